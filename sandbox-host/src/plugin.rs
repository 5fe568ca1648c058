use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use sandbox::{
    EventCallback, EventSubscribers, ExecutionHandle, PluginType, ResourceProbe, ResourceUsage,
    Result, Sandbox, SandboxError, SecurityPolicy,
};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::launcher;
use crate::monitor::{self, MonitorConfig, Supervision};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SandboxState {
    Created = 0,
    Idle = 1,
    Executing = 2,
    ShuttingDown = 3,
    Terminated = 4,
}

impl SandboxState {
    pub(crate) fn from_u8(v: u8) -> Self {
        debug_assert!(v <= 4, "invalid SandboxState: {v}");
        match v {
            0 => Self::Created,
            1 => Self::Idle,
            2 => Self::Executing,
            3 => Self::ShuttingDown,
            _ => Self::Terminated,
        }
    }

    /// Return the sandbox from `Executing` to `Idle` once a workload is
    /// done. Leaves the state alone if a shutdown raced in first.
    pub(crate) fn release_execution(state: &AtomicU8) {
        let _ = state.compare_exchange(
            Self::Executing as u8,
            Self::Idle as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Idle => f.write_str("idle"),
            Self::Executing => f.write_str("executing"),
            Self::ShuttingDown => f.write_str("shutting down"),
            Self::Terminated => f.write_str("terminated"),
        }
    }
}

/// The state a supervision task leaves behind for `shutdown()` to find.
struct ExecutionSlot {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Per-plugin isolated execution unit bound to one immutable policy.
///
/// One workload at a time; concurrent `execute()` calls are rejected, not
/// queued. All methods take `&self` — share via `Arc`.
pub struct PluginSandbox {
    id: String,
    policy: SecurityPolicy,
    probe: Arc<dyn ResourceProbe>,
    monitor: MonitorConfig,
    state: Arc<AtomicU8>,
    events: Arc<EventSubscribers>,
    latest: Arc<Mutex<ResourceUsage>>,
    /// Guards the claim-state/spawn/store sequence against a concurrent
    /// `shutdown()`. Never held across an await.
    execution: Mutex<Option<ExecutionSlot>>,
}

impl std::fmt::Debug for PluginSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSandbox")
            .field("id", &self.id)
            .field("policy", &self.policy)
            .field("monitor", &self.monitor)
            .field("state", &SandboxState::from_u8(self.state.load(Ordering::Acquire)))
            .finish_non_exhaustive()
    }
}

impl PluginSandbox {
    pub fn new(
        id: &str,
        policy: SecurityPolicy,
        probe: Arc<dyn ResourceProbe>,
        monitor: MonitorConfig,
    ) -> Self {
        Self {
            id: id.to_owned(),
            policy,
            probe,
            monitor,
            state: Arc::new(AtomicU8::new(SandboxState::Created as u8)),
            events: Arc::new(EventSubscribers::new()),
            latest: Arc::new(Mutex::new(ResourceUsage::default())),
            execution: Mutex::new(None),
        }
    }

    fn current_state(&self) -> SandboxState {
        SandboxState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Atomically transition between states using CAS. Returns the actual
    /// previous state on failure.
    fn transition(
        &self,
        from: SandboxState,
        to: SandboxState,
    ) -> std::result::Result<(), SandboxState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SandboxState::from_u8)
    }
}

/// Static permission evaluation, run before any filesystem or process
/// call so a denied launch has no side effects at all.
///
/// Every plugin must be read from disk; native plugins additionally run
/// with nothing between them and the OS, so they need process and syscall
/// permissions. The interpreter child for scripted plugins is spawned and
/// supervised by the sandbox itself, so `allow_process_creation` governs
/// the plugin's own process use, not the launch.
fn preflight(
    policy: &SecurityPolicy,
    plugin_type: PluginType,
    params: &Map<String, Value>,
) -> std::result::Result<(), String> {
    let permissions = &policy.permissions;

    if !permissions.allow_filesystem_read {
        return Err(format!(
            "policy '{}' denies filesystem read, required to load any plugin",
            policy.name
        ));
    }
    if plugin_type == PluginType::Native {
        if !permissions.allow_process_creation {
            return Err(format!(
                "policy '{}' denies process creation, required for native plugins",
                policy.name
            ));
        }
        if !permissions.allow_system_calls {
            return Err(format!(
                "policy '{}' denies system calls, required for native plugins",
                policy.name
            ));
        }
    }

    if let Some(declared) = params.get("declared_apis").and_then(Value::as_array) {
        for api in declared.iter().filter_map(Value::as_str) {
            if permissions.blocked_api_names.contains(api) {
                return Err(format!(
                    "declared API '{api}' is blocked by policy '{}'",
                    policy.name
                ));
            }
        }
    }

    Ok(())
}

#[async_trait]
impl Sandbox for PluginSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    fn initialize(&self) -> Result<()> {
        self.transition(SandboxState::Created, SandboxState::Idle)
            .map_err(|state| {
                SandboxError::InvalidState(format!("cannot initialize while {state}"))
            })?;
        info!(id = %self.id, policy = %self.policy.name, "sandbox initialized");
        Ok(())
    }

    async fn execute(
        &self,
        path: &Path,
        plugin_type: PluginType,
        params: Map<String, Value>,
    ) -> Result<ExecutionHandle> {
        // Pre-flight before anything touches the filesystem; a denied
        // policy must not even reveal whether the path exists.
        if let Err(reason) = preflight(&self.policy, plugin_type, &params) {
            warn!(id = %self.id, plugin_type = %plugin_type, reason = %reason, "launch denied at pre-flight");
            return Err(SandboxError::PermissionDenied(reason));
        }

        if path.as_os_str().is_empty() {
            return Err(SandboxError::InvalidPath("empty path".into()));
        }
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(SandboxError::InvalidPath(path.display().to_string()));
        }

        let mut command = launcher::build_command(path, plugin_type, &params)?;
        let execution_id = Uuid::new_v4();
        let start_time = Utc::now();

        let mut slot = self.execution.lock().unwrap_or_else(PoisonError::into_inner);

        self.transition(SandboxState::Idle, SandboxState::Executing)
            .map_err(|state| match state {
                SandboxState::Executing => SandboxError::AlreadyExecuting,
                SandboxState::Created => {
                    SandboxError::InvalidState("sandbox not initialized".into())
                }
                other => SandboxError::InvalidState(format!("cannot execute while {other}")),
            })?;

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                SandboxState::release_execution(&self.state);
                return Err(SandboxError::LaunchFailed(format!(
                    "spawn {plugin_type} workload: {e}"
                )));
            }
        };
        let Some(pid) = child.id() else {
            SandboxState::release_execution(&self.state);
            return Err(SandboxError::LaunchFailed(
                "workload exited before monitoring began".into(),
            ));
        };

        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = ResourceUsage {
            start_time: Some(start_time),
            ..ResourceUsage::default()
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(monitor::supervise(Supervision {
            sandbox_id: self.id.clone(),
            execution_id,
            child,
            pid,
            limits: self.policy.limits.clone(),
            permissions: self.policy.permissions.clone(),
            probe: Arc::clone(&self.probe),
            events: Arc::clone(&self.events),
            latest: Arc::clone(&self.latest),
            cancel: cancel_rx,
            config: self.monitor,
            start_time,
            state: Arc::clone(&self.state),
        }));
        *slot = Some(ExecutionSlot {
            cancel: cancel_tx,
            task,
        });
        drop(slot);

        info!(
            id = %self.id,
            execution_id = %execution_id,
            pid,
            plugin_type = %plugin_type,
            "workload launched"
        );
        Ok(ExecutionHandle { execution_id, pid })
    }

    fn get_resource_usage(&self) -> ResourceUsage {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_active(&self) -> bool {
        matches!(
            self.current_state(),
            SandboxState::Idle | SandboxState::Executing
        )
    }

    async fn shutdown(&self) {
        let slot = {
            let mut slot = self.execution.lock().unwrap_or_else(PoisonError::into_inner);
            let prev = SandboxState::from_u8(
                self.state
                    .swap(SandboxState::ShuttingDown as u8, Ordering::AcqRel),
            );
            if matches!(prev, SandboxState::ShuttingDown | SandboxState::Terminated) {
                self.state
                    .store(SandboxState::Terminated as u8, Ordering::Release);
                return;
            }
            slot.take()
        };

        if let Some(slot) = slot {
            // Wake the supervision task; it kills the workload and emits
            // the terminal event before finishing.
            let _ = slot.cancel.send(true);
            if let Err(e) = slot.task.await {
                warn!(id = %self.id, error = %e, "supervision task join failed");
            }
        }

        self.state
            .store(SandboxState::Terminated as u8, Ordering::Release);
        info!(id = %self.id, "sandbox terminated");
    }

    fn subscribe(&self, callback: EventCallback) {
        self.events.subscribe(callback);
    }
}
