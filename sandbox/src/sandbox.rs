use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::events::EventCallback;
use crate::policy::SecurityPolicy;
use crate::types::{ExecutionHandle, PluginType};
use crate::usage::ResourceUsage;

/// One isolated execution context bound to a single security policy,
/// running at most one plugin workload at a time.
///
/// Lifecycle: `Created → Idle ⇄ Executing → Terminated`. The policy is
/// immutable for the instance's lifetime; changing enforcement means
/// creating a new sandbox.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;

    fn policy(&self) -> &SecurityPolicy;

    /// Transition `Created → Idle`, allocating monitoring state. A second
    /// call returns `InvalidState`.
    fn initialize(&self) -> Result<()>;

    /// Pre-flight check the request against the policy, then launch the
    /// workload and start monitoring. Returns as soon as the workload is
    /// running; completion arrives via `ExecutionCompleted`.
    ///
    /// `params` is passed opaquely to the workload, except for the
    /// optional `"declared_apis"` array which pre-flight checks against
    /// the policy denylist.
    async fn execute(
        &self,
        path: &Path,
        plugin_type: PluginType,
        params: Map<String, Value>,
    ) -> Result<ExecutionHandle>;

    /// Latest monitored snapshot; zeroed with `start_time` unset while
    /// idle.
    fn get_resource_usage(&self) -> ResourceUsage;

    /// True between a successful `initialize()` and `shutdown()`.
    fn is_active(&self) -> bool;

    /// Forcibly terminate any running workload, stop the monitor, release
    /// handles. Never fails; safe to call repeatedly.
    async fn shutdown(&self);

    /// Register an event callback. Multiple subscribers allowed; each sees
    /// every event in emission order.
    fn subscribe(&self, callback: EventCallback);
}
