//! Tool registry
//!
//! A closed, statically enumerable mapping from operation names to handlers.
//! Dispatch decodes `params` into each handler's typed parameter struct, so
//! the calling convention is keyword-style and checked up front. Handlers
//! never panic on bad input; every failure is a message that flows back as a
//! per-request error.
//!
//! All handlers are async and safe to invoke concurrently from different
//! connections; blocking work goes through `tokio::fs`/`tokio::process`.

mod fs;
mod shell;
mod system;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Every tool the registry serves. Unknown names are a well-defined
/// per-request error, never a lookup failure.
pub const TOOL_NAMES: [&str; 6] = [
    "list_files",
    "read_file",
    "write_file",
    "execute_command",
    "get_system_info",
    "search_files",
];

/// Tool dispatch and execution failures.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Invalid params for {tool}: {message}")]
    InvalidParams { tool: String, message: String },

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub(crate) fn failed(message: impl Into<String>) -> Self {
        ToolError::Failed(message.into())
    }
}

/// Whether `name` is in the registry.
pub fn is_registered(name: &str) -> bool {
    TOOL_NAMES.contains(&name)
}

/// Invoke a tool by name with keyword-style params.
pub async fn dispatch(tool: &str, params: Map<String, Value>) -> Result<Value, ToolError> {
    match tool {
        "list_files" => fs::list_files(decode(tool, params)?).await,
        "read_file" => fs::read_file(decode(tool, params)?).await,
        "write_file" => fs::write_file(decode(tool, params)?).await,
        "execute_command" => shell::execute_command(decode(tool, params)?).await,
        "get_system_info" => system::get_system_info().await,
        "search_files" => fs::search_files(decode(tool, params)?).await,
        other => Err(ToolError::Unknown(other.to_string())),
    }
}

fn decode<T: DeserializeOwned>(tool: &str, params: Map<String, Value>) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(params)).map_err(|err| ToolError::InvalidParams {
        tool: tool.to_string(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test params must be objects"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let err = dispatch("reboot_machine", Map::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: reboot_machine");
    }

    #[tokio::test]
    async fn test_every_registered_name_dispatches() {
        // No registered name may fall through to the unknown-tool arm; with
        // empty params each either runs or reports an Invalid-params error.
        for name in TOOL_NAMES {
            assert!(is_registered(name));
            match dispatch(name, Map::new()).await {
                Ok(_) => {}
                Err(ToolError::InvalidParams { tool, .. }) => assert_eq!(tool, name),
                Err(other) => panic!("{name} fell through: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_invalid_params_reported() {
        let err = dispatch("read_file", params(json!({"path": 42})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_null_optional_params_accepted() {
        // The client serializes omitted optionals as JSON null.
        let result = dispatch(
            "execute_command",
            params(json!({"command": "echo ok", "cwd": null})),
        )
        .await;
        #[cfg(unix)]
        assert!(result.is_ok());
        let _ = result;
    }
}
