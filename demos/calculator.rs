//! demo-calculator: a stdio tool server used by the end-to-end tests.
//!
//! Speaks line-delimited JSON-RPC 2.0 on stdin/stdout and logs to stderr.
//! Tools: add, subtract, multiply, divide, power, sqrt, and `sleep` for
//! exercising call timeouts.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

const PROTOCOL_VERSION: &str = "2024-11-05";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tracing::info!("demo-calculator ready");

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed line");
                continue;
            }
        };
        let method = message.get("method").and_then(Value::as_str).unwrap_or_default().to_string();
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let Some(id) = message.get("id").cloned() else {
            if method == "shutdown" {
                tracing::info!("shutdown requested");
                break;
            }
            tracing::debug!(method = %method, "notification");
            continue;
        };

        // Each request runs on its own task so a slow call never blocks a ping.
        let stdout = Arc::clone(&stdout);
        tokio::spawn(async move {
            let reply = match handle_request(&method, params).await {
                Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                Err((code, message)) => {
                    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
                }
            };
            let mut out = stdout.lock().await;
            let line = format!("{reply}\n");
            if let Err(e) = out.write_all(line.as_bytes()).await {
                tracing::error!(error = %e, "failed to write reply");
                return;
            }
            let _ = out.flush().await;
        });
    }

    tracing::info!("stdin closed, exiting");
    Ok(())
}

async fn handle_request(method: &str, params: Value) -> Result<Value, (i64, String)> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {"name": "demo-calculator", "version": env!("CARGO_PKG_VERSION")},
            "capabilities": {"tools": {}},
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": tool_list() })),
        "tools/call" => {
            let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            Ok(call_tool(name, &arguments).await)
        }
        other => Err((-32601, format!("method not found: {other}"))),
    }
}

fn number_schema(params: &[(&str, &str)]) -> Value {
    let properties: serde_json::Map<String, Value> = params
        .iter()
        .map(|(name, desc)| (name.to_string(), json!({"type": "number", "description": desc})))
        .collect();
    let required: Vec<&str> = params.iter().map(|(name, _)| *name).collect();
    json!({"type": "object", "properties": properties, "required": required})
}

fn tool_list() -> Vec<Value> {
    let binary = [("a", "First number"), ("b", "Second number")];
    vec![
        json!({"name": "add", "description": "Add two numbers", "inputSchema": number_schema(&binary)}),
        json!({"name": "subtract", "description": "Subtract two numbers", "inputSchema": number_schema(&binary)}),
        json!({"name": "multiply", "description": "Multiply two numbers", "inputSchema": number_schema(&binary)}),
        json!({
            "name": "divide",
            "description": "Divide two numbers",
            "inputSchema": number_schema(&[("a", "Dividend"), ("b", "Divisor")]),
        }),
        json!({
            "name": "power",
            "description": "Raise a number to a power",
            "inputSchema": number_schema(&[("base", "Base number"), ("exponent", "Exponent")]),
        }),
        json!({
            "name": "sqrt",
            "description": "Calculate square root of a number",
            "inputSchema": number_schema(&[("number", "Number to calculate square root of")]),
        }),
        json!({
            "name": "sleep",
            "description": "Wait before answering",
            "inputSchema": {
                "type": "object",
                "properties": {"ms": {"type": "integer", "description": "Milliseconds to wait"}},
                "required": ["ms"],
            },
        }),
    ]
}

fn text(value: impl std::fmt::Display) -> Value {
    json!({"content": [{"type": "text", "text": value.to_string()}]})
}

fn tool_error(message: impl std::fmt::Display) -> Value {
    json!({"content": [{"type": "text", "text": format!("Error: {message}")}], "isError": true})
}

async fn call_tool(name: &str, args: &Value) -> Value {
    let num = |key: &str| args.get(key).and_then(Value::as_f64);
    let int = |key: &str| args.get(key).and_then(Value::as_i64);

    match name {
        "add" | "subtract" | "multiply" => {
            // Integer inputs give integer output.
            if let (Some(a), Some(b)) = (int("a"), int("b")) {
                let result = match name {
                    "add" => a.checked_add(b),
                    "subtract" => a.checked_sub(b),
                    _ => a.checked_mul(b),
                };
                if let Some(result) = result {
                    return text(result);
                }
            }
            match (num("a"), num("b")) {
                (Some(a), Some(b)) => text(match name {
                    "add" => a + b,
                    "subtract" => a - b,
                    _ => a * b,
                }),
                _ => tool_error("'a' and 'b' must be numbers"),
            }
        }
        "divide" => match (num("a"), num("b")) {
            (Some(_), Some(b)) if b == 0.0 => tool_error("Division by zero"),
            (Some(a), Some(b)) => text(a / b),
            _ => tool_error("'a' and 'b' must be numbers"),
        },
        "power" => match (num("base"), num("exponent")) {
            (Some(base), Some(exponent)) => text(base.powf(exponent)),
            _ => tool_error("'base' and 'exponent' must be numbers"),
        },
        "sqrt" => match num("number") {
            Some(n) if n < 0.0 => tool_error("Cannot calculate square root of negative number"),
            Some(n) => text(n.sqrt()),
            None => tool_error("'number' must be a number"),
        },
        "sleep" => {
            let ms = int("ms").unwrap_or(0).max(0) as u64;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            text(format!("slept {ms}ms"))
        }
        other => tool_error(format!("Unknown tool '{other}'")),
    }
}
