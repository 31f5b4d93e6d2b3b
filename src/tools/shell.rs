//! Shell command execution tool.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use super::ToolError;

#[derive(Debug, Deserialize)]
pub(super) struct ExecuteCommandParams {
    command: String,
    #[serde(default)]
    cwd: Option<String>,
}

/// Run a command through the platform shell and capture its output.
///
/// The exit code is reported to the caller as-is; a non-zero code is a
/// normal result, not a tool error. Only a failure to spawn is an error.
pub(super) async fn execute_command(params: ExecuteCommandParams) -> Result<Value, ToolError> {
    let mut command = shell_command(&params.command);
    if let Some(ref cwd) = params.cwd {
        command.current_dir(cwd);
    }

    debug!(command = %params.command, cwd = ?params.cwd, "executing command");
    let output = command
        .output()
        .await
        .map_err(|err| ToolError::failed(err.to_string()))?;

    Ok(json!({
        "command": params.command,
        "returncode": output.status.code().unwrap_or(-1),
        "stdout": String::from_utf8_lossy(&output.stdout),
        "stderr": String::from_utf8_lossy(&output.stderr),
    }))
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", command]);
    cmd
}
