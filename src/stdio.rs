//! JSON-lines front-end over stdin/stdout.
//!
//! Each input line is a request `{"id", "method", "body"}`; each output line
//! is `{"id", "ok": true, "body"}` or `{"id", "ok": false, "error"}`. Requests
//! run concurrently, so responses may come back out of order; callers match
//! them by `id`.

use crate::engine::ExecutionEngine;
use crate::types::{CallerId, Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const RESPONSE_QUEUE: usize = 256;

fn str_field(body: &Value, key: &str) -> Result<String> {
    body.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::validation(format!("Missing required field: {}", key)))
}

/// Route one request to the engine.
pub async fn dispatch(engine: &ExecutionEngine, method: &str, body: Value) -> Result<Value> {
    match method {
        "Execute" => {
            let tool = str_field(&body, "tool")?;
            let params = body.get("params").cloned().unwrap_or_else(|| json!({}));
            let result = match body.get("caller").and_then(Value::as_str) {
                Some(caller) => {
                    let caller = CallerId::from_string(caller.to_string())
                        .map_err(Error::validation)?;
                    engine.execute_for(&caller, &tool, params).await?
                }
                None => engine.execute(&tool, params).await?,
            };
            Ok(serde_json::to_value(result)?)
        }

        "ListTools" => {
            let tools = engine
                .get_tools()
                .iter()
                .map(|d| serde_json::to_value(d.as_ref()))
                .collect::<std::result::Result<Vec<Value>, _>>()?;
            Ok(json!({
                "count": tools.len(),
                "tools": tools,
            }))
        }

        "GetTool" => {
            let name = str_field(&body, "name")?;
            let descriptor = engine
                .get_tool(&name)
                .ok_or_else(|| Error::tool_not_found(&name))?;
            let mut value = serde_json::to_value(descriptor.as_ref())?;
            value["signature"] = json!(descriptor.signature());
            Ok(value)
        }

        "GetMetrics" => Ok(json!({ "metrics": engine.get_metrics() })),

        "GetToolStats" => {
            let name = str_field(&body, "name")?;
            if engine.get_tool(&name).is_none() {
                return Err(Error::tool_not_found(&name));
            }
            Ok(json!({ "stats": engine.tool_stats(&name) }))
        }

        "ClearCache" => {
            engine.clear_cache();
            Ok(json!({ "cleared": true }))
        }

        _ => Err(Error::validation(format!("Unknown method: {}", method))),
    }
}

fn response_line(id: &str, outcome: Result<Value>) -> Value {
    match outcome {
        Ok(body) => json!({ "id": id, "ok": true, "body": body }),
        Err(err) => json!({ "id": id, "ok": false, "error": err.to_json() }),
    }
}

/// Serve requests from `reader` until EOF or cancellation, writing responses to `writer`.
pub async fn serve<R, W>(
    engine: Arc<ExecutionEngine>,
    mut reader: R,
    mut writer: W,
    cancel: CancellationToken,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Value>(RESPONSE_QUEUE);

    let writer_task = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let mut line = serde_json::to_vec(&response).map_err(std::io::Error::other)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut buf = Vec::new();
    tracing::info!("stdio_server_started");

    let read_result = loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("stdio_server_cancelled");
                break Ok(());
            }
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => break Ok(()),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("stdio_read_failed: error={}", e);
                break Err(e);
            }
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                let err = Error::validation(format!("Request is not valid UTF-8: {}", e));
                if tx.send(response_line("", Err(err))).await.is_err() {
                    break Ok(());
                }
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                let err = Error::validation(format!("Invalid JSON request: {}", e));
                if tx.send(response_line("", Err(err))).await.is_err() {
                    break Ok(());
                }
                continue;
            }
        };

        let id = request
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let body = request.get("body").cloned().unwrap_or_else(|| json!({}));

        let engine = engine.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            tracing::debug!("request_received: id={}, method={}", id, method);
            let outcome = dispatch(&engine, &method, body).await;
            let _ = tx.send(response_line(&id, outcome)).await;
        });
    };

    // Let in-flight requests finish writing before reporting a read failure.
    drop(tx);
    let write_result = match writer_task.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    };
    read_result.and(write_result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{handler_fn, ParamDef, ParamType, ToolCategory, ToolDescriptor, ToolRegistry};
    use crate::types::EngineConfig;

    fn engine() -> Arc<ExecutionEngine> {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolDescriptor::new(
                    "echo",
                    "Echo parameters",
                    ToolCategory::Utility,
                    handler_fn(|p| async move { Ok(p) }),
                )
                .with_param(ParamDef::required("text", ParamType::Text, "input")),
            )
            .unwrap();
        Arc::new(ExecutionEngine::new(registry, EngineConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_dispatch_execute_and_stats() {
        let engine = engine();
        let out = dispatch(
            &engine,
            "Execute",
            json!({"tool": "echo", "params": {"text": "hi"}}),
        )
        .await
        .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["result"]["text"], "hi");

        let stats = dispatch(&engine, "GetToolStats", json!({"name": "echo"}))
            .await
            .unwrap();
        assert_eq!(stats["stats"]["successes"], 1);
    }

    #[tokio::test]
    async fn test_dispatch_list_and_get_tool() {
        let engine = engine();
        let list = dispatch(&engine, "ListTools", json!({})).await.unwrap();
        assert_eq!(list["count"], 1);

        let tool = dispatch(&engine, "GetTool", json!({"name": "echo"})).await.unwrap();
        assert_eq!(tool["signature"], "echo(text: text)");

        let err = dispatch(&engine, "GetTool", json!({"name": "nope"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::types::ErrorCode::ToolNotFound);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let err = dispatch(&engine(), "Reboot", json!({})).await.unwrap_err();
        assert_eq!(err.code, crate::types::ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_serve_round_trip() {
        let input = concat!(
            r#"{"id":"1","method":"Execute","body":{"tool":"echo","params":{"text":"a"}}}"#,
            "\n",
            "not json\n",
        );
        let (client, server) = tokio::io::duplex(64 * 1024);

        serve(
            engine(),
            tokio::io::BufReader::new(input.as_bytes()),
            server,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let mut lines = tokio::io::BufReader::new(client).lines();
        let mut responses = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            responses.push(serde_json::from_str::<Value>(&line).unwrap());
        }

        assert_eq!(responses.len(), 2);
        let ok = responses.iter().find(|r| r["id"] == "1").unwrap();
        assert_eq!(ok["ok"], true);
        let bad = responses.iter().find(|r| r["id"] == "").unwrap();
        assert_eq!(bad["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_serve_survives_invalid_utf8_line() {
        let mut input = b"\xff\xfe garbage\n".to_vec();
        input.extend_from_slice(
            br#"{"id":"2","method":"Execute","body":{"tool":"echo","params":{"text":"b"}}}"#,
        );
        input.push(b'\n');
        let (client, server) = tokio::io::duplex(64 * 1024);

        serve(
            engine(),
            tokio::io::BufReader::new(input.as_slice()),
            server,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let mut lines = tokio::io::BufReader::new(client).lines();
        let mut responses = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            responses.push(serde_json::from_str::<Value>(&line).unwrap());
        }

        assert_eq!(responses.len(), 2);
        let bad = responses.iter().find(|r| r["id"] == "").unwrap();
        assert_eq!(bad["ok"], false);
        assert_eq!(bad["error"]["code"], "VALIDATION_ERROR");
        let ok = responses.iter().find(|r| r["id"] == "2").unwrap();
        assert_eq!(ok["body"]["result"]["text"], "b");
    }
}
