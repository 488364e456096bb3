//! Subscriber setup shared by the `hostkit` and `hostkit-web` binaries.
//!
//! Logs go to stderr so stdout stays free for the JSON-RPC stream. The
//! filter comes from `RUST_LOG` and defaults to `info`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber. Does nothing if one is already set.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
    // Err only means a subscriber is already installed (e.g. in tests).
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
