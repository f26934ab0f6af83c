use std::io::{self, BufRead, Write};

use serde_json::{json, Value};
use tracing::{debug, error, info};

use tutor_core::{LevelCurve, ProgressStore, SessionConfig};

use crate::protocol::{JsonRpcMessage, JsonRpcResponse};
use crate::tools::{self, ToolContext};

const SERVER_NAME: &str = "tutor";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server-wide settings resolved from the CLI config.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub curve: LevelCurve,
    pub session: SessionConfig,
    /// Extra text appended to the built-in instructions.
    pub instructions: Option<String>,
}

/// Run the tool server on stdio. Blocks until stdin is closed.
pub fn run_server(store: &dyn ProgressStore, options: &ServerOptions) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut ctx = ToolContext::new(store, options.curve, options.session);
    info!("tutor tool server listening on stdio");

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!("stdin read error: {e}");
                break;
            }
        };

        if let Some(response) = handle_line(&mut ctx, options, &line) {
            write_response(&mut stdout, &response)?;
        }
    }

    Ok(())
}

/// Handle one line of input. Returns `None` for blank lines and
/// notifications, which get no reply.
pub fn handle_line(
    ctx: &mut ToolContext<'_>,
    options: &ServerOptions,
    line: &str,
) -> Option<JsonRpcResponse> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let msg: JsonRpcMessage = match serde_json::from_str(line) {
        Ok(m) => m,
        Err(e) => {
            error!("invalid JSON-RPC: {e}");
            return Some(JsonRpcResponse::parse_error(e.to_string()));
        }
    };

    let method = msg.method.as_deref().unwrap_or("");
    debug!("request: {method}");

    let id = msg.id?;

    let response = match method {
        "initialize" => handle_initialize(id, options),
        "ping" => JsonRpcResponse::ok(id, json!({})),
        "tools/list" => JsonRpcResponse::ok(id, tools::tool_definitions()),
        "tools/call" => handle_tools_call(id, &msg.params, ctx),
        other => JsonRpcResponse::method_not_found(id, other),
    };
    Some(response)
}

fn write_response(stdout: &mut io::Stdout, resp: &JsonRpcResponse) -> anyhow::Result<()> {
    let json = serde_json::to_string(resp)?;
    writeln!(stdout, "{json}")?;
    stdout.flush()?;
    Ok(())
}

fn handle_initialize(id: Value, options: &ServerOptions) -> JsonRpcResponse {
    let instructions = match &options.instructions {
        Some(extra) => format!("{TUTOR_INSTRUCTIONS}\n\n{extra}"),
        None => TUTOR_INSTRUCTIONS.to_string(),
    };
    JsonRpcResponse::ok(
        id,
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION
            },
            "instructions": instructions
        }),
    )
}

const TUTOR_INSTRUCTIONS: &str = "\
Use the tutor tools to grade a language learner's English as the conversation goes.\n\
\n\
TURN (tutor_turn): call once per learner message with the learner's userId. It scores \
the message, updates the session accuracy and awards XP. Mention level-ups to the learner.\n\
\n\
ANALYZE (tutor_analyze): score a message without awarding XP, e.g. to preview a correction.\n\
\n\
Scores are heuristics: use the errors and suggestions as hints, not as a final verdict.";

fn handle_tools_call(
    id: Value,
    params: &Option<Value>,
    ctx: &mut ToolContext<'_>,
) -> JsonRpcResponse {
    let params = match params {
        Some(p) => p,
        None => return JsonRpcResponse::invalid_params(id, "missing params"),
    };

    let tool_name = match params.get("name").and_then(|v| v.as_str()) {
        Some(n) => n,
        None => return JsonRpcResponse::invalid_params(id, "missing tool name"),
    };

    let args = params.get("arguments").cloned().unwrap_or(json!({}));

    let result = tools::call_tool(ctx, tool_name, &args);
    JsonRpcResponse::ok(id, serde_json::to_value(result).unwrap_or(json!(null)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_store::SqliteStore;

    fn roundtrip(ctx: &mut ToolContext<'_>, line: &str) -> Value {
        let resp = handle_line(ctx, &ServerOptions::default(), line).unwrap();
        serde_json::to_value(resp).unwrap()
    }

    #[test]
    fn test_initialize() {
        let store = SqliteStore::in_memory().unwrap();
        let mut ctx = ToolContext::new(&store, LevelCurve::DEFAULT, SessionConfig::default());
        let v = roundtrip(
            &mut ctx,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        );
        assert_eq!(v["result"]["serverInfo"]["name"], "tutor");
        assert_eq!(v["result"]["protocolVersion"], PROTOCOL_VERSION);
    }

    #[test]
    fn test_custom_instructions_appended() {
        let store = SqliteStore::in_memory().unwrap();
        let mut ctx = ToolContext::new(&store, LevelCurve::DEFAULT, SessionConfig::default());
        let options = ServerOptions {
            instructions: Some("Be gentle.".into()),
            ..ServerOptions::default()
        };
        let resp = handle_line(
            &mut ctx,
            &options,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#,
        )
        .unwrap();
        let v = serde_json::to_value(resp).unwrap();
        assert!(v["result"]["instructions"]
            .as_str()
            .unwrap()
            .ends_with("Be gentle."));
    }

    #[test]
    fn test_notification_gets_no_reply() {
        let store = SqliteStore::in_memory().unwrap();
        let mut ctx = ToolContext::new(&store, LevelCurve::DEFAULT, SessionConfig::default());
        let resp = handle_line(
            &mut ctx,
            &ServerOptions::default(),
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        );
        assert!(resp.is_none());
        assert!(handle_line(&mut ctx, &ServerOptions::default(), "   ").is_none());
    }

    #[test]
    fn test_parse_error() {
        let store = SqliteStore::in_memory().unwrap();
        let mut ctx = ToolContext::new(&store, LevelCurve::DEFAULT, SessionConfig::default());
        let v = roundtrip(&mut ctx, "{not json");
        assert_eq!(v["error"]["code"], -32700);
    }

    #[test]
    fn test_unknown_method() {
        let store = SqliteStore::in_memory().unwrap();
        let mut ctx = ToolContext::new(&store, LevelCurve::DEFAULT, SessionConfig::default());
        let v = roundtrip(&mut ctx, r#"{"jsonrpc":"2.0","id":7,"method":"bogus"}"#);
        assert_eq!(v["error"]["code"], -32601);
        assert_eq!(v["id"], 7);
    }

    #[test]
    fn test_tools_call_missing_params() {
        let store = SqliteStore::in_memory().unwrap();
        let mut ctx = ToolContext::new(&store, LevelCurve::DEFAULT, SessionConfig::default());
        let v = roundtrip(&mut ctx, r#"{"jsonrpc":"2.0","id":3,"method":"tools/call"}"#);
        assert_eq!(v["error"]["code"], -32602);
    }

    #[test]
    fn test_tools_call_level_info() {
        let store = SqliteStore::in_memory().unwrap();
        let mut ctx = ToolContext::new(&store, LevelCurve::DEFAULT, SessionConfig::default());
        let v = roundtrip(
            &mut ctx,
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"tutor_level_info","arguments":{"totalXP":250}}}"#,
        );
        let text = v["result"]["content"][0]["text"].as_str().unwrap();
        let info: Value = serde_json::from_str(text).unwrap();
        assert_eq!(info["level"], 3);
    }
}
