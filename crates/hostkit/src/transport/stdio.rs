//! Newline-delimited JSON-RPC 2.0 over a byte stream (stdin/stdout).
//!
//! One reader loop parses requests. Cheap methods are answered inline;
//! every `tools/call` runs on its own task so a slow scan never blocks the
//! next request. All responses funnel through one channel into a single
//! writer task, which keeps lines from interleaving.

use std::io;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, ToolRequest};
use crate::tools::result::{DEFAULT_MAX_TEXT_BYTES, ExecutionResult, truncate_result};

pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "hostkit";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Serve requests from `reader` until EOF, writing responses to `writer`.
///
/// Returns once the input is exhausted and every in-flight call has
/// answered.
pub async fn serve<R, W>(dispatcher: Arc<Dispatcher>, reader: R, writer: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Value>();
    let writer_task = tokio::spawn(write_responses(writer, rx));

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        handle_line(&dispatcher, line, &tx);
    }
    debug!("[stdio] input closed; waiting for in-flight calls");
    drop(tx);

    writer_task
        .await
        .map_err(|e| io::Error::other(format!("writer task failed: {e}")))?
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Value>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = message.to_string();
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

fn handle_line(dispatcher: &Arc<Dispatcher>, line: &str, tx: &mpsc::UnboundedSender<Value>) {
    let send = |message: Value| {
        if tx.send(message).is_err() {
            warn!("[stdio] writer closed; dropping response");
        }
    };

    let raw: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return send(error_message(None, PARSE_ERROR, &format!("parse error: {e}"))),
    };
    let id = raw.get("id").cloned().filter(|v| !v.is_null());
    let request: RpcRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => {
            return send(error_message(id, INVALID_REQUEST, &format!("invalid request: {e}")));
        }
    };

    // Notifications never get a reply, not even an error.
    let Some(id) = request.id else {
        debug!("[stdio] notification {}", request.method);
        return;
    };

    match request.method.as_str() {
        "initialize" => send(result_message(id, initialize_result(&request.params))),
        "ping" => send(result_message(id, json!({}))),
        "tools/list" => send(result_message(id, tools_list_result(dispatcher))),
        "tools/call" => {
            let params: CallParams = match serde_json::from_value(request.params) {
                Ok(p) => p,
                Err(e) => {
                    return send(error_message(Some(id), INVALID_PARAMS, &format!("invalid params: {e}")));
                }
            };
            let arguments = match params.arguments {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(map)) => map,
                Some(_) => {
                    return send(error_message(
                        Some(id),
                        INVALID_PARAMS,
                        "invalid params: arguments must be an object",
                    ));
                }
            };
            let request_id = match &id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let request = ToolRequest::new(params.name, arguments).with_request_id(request_id);
            let dispatcher = Arc::clone(dispatcher);
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = dispatcher.invoke(request).await;
                if tx.send(result_message(id, call_result(&result))).is_err() {
                    warn!("[stdio] writer closed; dropping tool result");
                }
            });
        }
        other => send(error_message(
            Some(id),
            METHOD_NOT_FOUND,
            &format!("method not found: {other}"),
        )),
    }
}

fn initialize_result(params: &Value) -> Value {
    let version = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);
    info!("[stdio] client initialized (protocol {version})");
    json!({
        "protocolVersion": version,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
    })
}

/// Every registered tool, usable or not, with the same availability fields
/// the HTTP listing carries under `_meta`.
fn tools_list_result(dispatcher: &Dispatcher) -> Value {
    let tools: Vec<Value> = dispatcher
        .list_tools()
        .into_iter()
        .map(|t| {
            let mut description = t.description;
            if !t.available {
                description.push_str(&format!("\nUnavailable: needs {}", t.missing.join(", ")));
            }
            json!({
                "name": t.name,
                "description": description,
                "inputSchema": t.input_schema,
                "_meta": {
                    "backend": t.backend,
                    "available": t.available,
                    "missing": t.missing,
                    "unusable_params": t.unusable_params,
                },
            })
        })
        .collect();
    json!({ "tools": tools })
}

fn call_result(result: &ExecutionResult) -> Value {
    let text = truncate_result(result.render_text(), DEFAULT_MAX_TEXT_BYTES);
    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": result,
        "isError": !result.is_success(),
    })
}

fn result_message(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_message(id: Option<Value>, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id.unwrap_or(Value::Null),
        "error": { "code": code, "message": message },
    })
}
