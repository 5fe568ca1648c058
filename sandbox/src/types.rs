use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of plugin workload a sandbox can launch.
///
/// Interpreted types run under their interpreter in a supervised child
/// process. `Native` plugins execute out-of-process as a directly spawned
/// child (a thin host stub); this is still weaker isolation than the
/// interpreted path because the binary talks to the OS with no interpreter
/// in between, which is why launching one requires process and syscall
/// permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    Native,
    Python,
    Lua,
    JavaScript,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Python => "python",
            Self::Lua => "lua",
            Self::JavaScript => "javascript",
        }
    }
}

impl std::fmt::Display for PluginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by `execute()` as soon as the workload is launched.
/// Completion arrives asynchronously via the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionHandle {
    pub execution_id: Uuid,
    pub pid: u32,
}
