use std::path::Path;
use std::process::Stdio;

use sandbox::{PluginType, Result, SandboxError};
use serde_json::{Map, Value};
use tokio::process::Command;

/// Interpreter binary for interpreted plugin types; `None` for native.
pub(crate) fn interpreter_for(plugin_type: PluginType) -> Option<&'static str> {
    match plugin_type {
        PluginType::Native => None,
        PluginType::Python => Some("python3"),
        PluginType::Lua => Some("lua"),
        PluginType::JavaScript => Some("node"),
    }
}

/// Build the workload command.
///
/// Interpreted plugins run as `<interpreter> <script> <params-json>`;
/// native plugins run the plugin binary directly with the params JSON as
/// their single argument. `params` is opaque to the sandbox — it is
/// forwarded, never interpreted.
///
/// The child gets its own process group so the whole tree can be killed
/// with `killpg` on breach or shutdown.
pub(crate) fn build_command(
    path: &Path,
    plugin_type: PluginType,
    params: &Map<String, Value>,
) -> Result<Command> {
    let mut command = match interpreter_for(plugin_type) {
        Some(name) => {
            let interpreter = which::which(name).map_err(|e| {
                SandboxError::LaunchFailed(format!("{name} interpreter not found: {e}"))
            })?;
            let mut command = Command::new(interpreter);
            command.arg(path);
            command
        }
        None => Command::new(path),
    };

    let params_json = serde_json::to_string(params)
        .map_err(|e| SandboxError::LaunchFailed(format!("serialize params: {e}")))?;

    command
        .arg(params_json)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    Ok(command)
}
