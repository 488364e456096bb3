//! Wire adapters around the [`Dispatcher`](crate::dispatch::Dispatcher).
//!
//! Transports only translate framing. Validation, routing and error
//! classification all live in the dispatcher. The HTTP adapter is the
//! separate `hostkit-web` crate.

pub mod stdio;
