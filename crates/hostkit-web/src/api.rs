//! REST endpoint handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use hostkit::dispatch::{Dispatcher, Health, ToolListing, ToolRequest};
use hostkit::tools::ExecutionResult;
use serde::Serialize;
use tracing::warn;

/// Shared application state passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Body of a `4xx` answer to a request that never reached the dispatcher.
#[derive(Debug, Serialize)]
pub struct BadRequest {
    pub error: String,
}

/// GET /health: liveness, tool availability and live subprocess count.
pub async fn get_health(State(app): State<AppState>) -> Json<Health> {
    Json(app.dispatcher.health())
}

/// GET /tools: every tool with its input schema.
pub async fn get_tools(State(app): State<AppState>) -> Json<Vec<ToolListing>> {
    Json(app.dispatcher.list_tools())
}

/// POST /call: run one tool.
///
/// Returns 200 with an `ExecutionResult` for every request that parses as a
/// tool request, including rejected and failed calls. A body that does not
/// parse gets the extractor's status code and a one-line reason.
pub async fn post_call(
    State(app): State<AppState>,
    body: Result<Json<ToolRequest>, JsonRejection>,
) -> Result<Json<ExecutionResult>, (StatusCode, Json<BadRequest>)> {
    let Json(request) = body.map_err(|rejection| {
        warn!("[http] malformed call: {}", rejection.body_text());
        (
            rejection.status(),
            Json(BadRequest {
                error: rejection.body_text(),
            }),
        )
    })?;
    Ok(Json(app.dispatcher.invoke(request).await))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_request_deserializes() {
        let json = r#"{"tool":"read_file","arguments":{"file_path":"a.txt"},"request_id":"r1"}"#;
        let req: ToolRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.tool, "read_file");
        assert_eq!(req.arguments["file_path"], "a.txt");
        assert_eq!(req.request_id.as_deref(), Some("r1"));
    }

    #[test]
    fn arguments_and_request_id_are_optional() {
        let req: ToolRequest = serde_json::from_str(r#"{"tool":"ping_host"}"#).unwrap();
        assert!(req.arguments.is_empty());
        assert!(req.request_id.is_none());
    }
}
