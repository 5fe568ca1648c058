use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use sandbox::{RegistryError, ResourceProbe, Sandbox, SecurityPolicy};
use tracing::info;

use crate::monitor::MonitorConfig;
use crate::plugin::PluginSandbox;
use crate::probe::ProcProbe;

/// Process-wide directory of active sandboxes plus a named-policy store.
///
/// Explicitly constructed and passed around by the host's composition
/// root — not a hidden global. Each table sits behind its own
/// reader/writer lock, and no lock is ever held across a call into a
/// sandbox, so all methods are safe to call from any number of threads.
pub struct SandboxRegistry {
    sandboxes: RwLock<HashMap<String, Arc<PluginSandbox>>>,
    policies: RwLock<HashMap<String, SecurityPolicy>>,
    probe: Arc<dyn ResourceProbe>,
    monitor: MonitorConfig,
}

impl SandboxRegistry {
    /// Build a registry with an injected probe and monitor settings. The
    /// four built-in policies are registered up front.
    pub fn new(probe: Arc<dyn ResourceProbe>, monitor: MonitorConfig) -> Self {
        let mut policies = HashMap::new();
        for policy in [
            SecurityPolicy::unrestricted(),
            SecurityPolicy::limited(),
            SecurityPolicy::sandboxed(),
            SecurityPolicy::strict(),
        ] {
            policies.insert(policy.name.clone(), policy);
        }
        Self {
            sandboxes: RwLock::new(HashMap::new()),
            policies: RwLock::new(policies),
            probe,
            monitor,
        }
    }

    /// Platform defaults: the `/proc` probe at the standard cadence.
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(ProcProbe::new()), MonitorConfig::default())
    }

    /// Atomically reserve `id` and create its sandbox; the returned
    /// sandbox is already initialized. The duplicate check and the insert
    /// happen in one critical section, so two racing callers can never
    /// both succeed for the same id.
    pub fn create_sandbox(
        &self,
        id: &str,
        policy: SecurityPolicy,
    ) -> Result<Arc<PluginSandbox>, RegistryError> {
        let created = Arc::new(PluginSandbox::new(
            id,
            policy,
            Arc::clone(&self.probe),
            self.monitor,
        ));
        {
            let mut table = self
                .sandboxes
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if table.contains_key(id) {
                return Err(RegistryError::DuplicateId(id.to_owned()));
            }
            table.insert(id.to_owned(), Arc::clone(&created));
        }

        // Initialize after the insert completes so the write lock is
        // never held across a call into the sandbox.
        if let Err(e) = created.initialize() {
            self.sandboxes
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(id);
            return Err(e.into());
        }
        Ok(created)
    }

    /// Absence is routine, not an error.
    pub fn get_sandbox(&self, id: &str) -> Option<Arc<PluginSandbox>> {
        self.sandboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Shut down and evict a sandbox; no-op if absent.
    pub async fn remove_sandbox(&self, id: &str) {
        let evicted = self
            .sandboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(evicted) = evicted {
            evicted.shutdown().await;
            info!(id = %id, "sandbox removed");
        }
    }

    /// Evict and shut down every sandbox; used for process-wide teardown.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(String, Arc<PluginSandbox>)> = self
            .sandboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (id, evicted) in drained {
            evicted.shutdown().await;
            info!(id = %id, "sandbox shut down");
        }
    }

    /// Register or atomically replace a named policy. Nothing stops a
    /// caller from shadowing a built-in name; custom policies use distinct
    /// names by convention.
    pub fn register_policy(&self, name: &str, policy: SecurityPolicy) {
        self.policies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), policy);
    }

    pub fn get_policy(&self, name: &str) -> Option<SecurityPolicy> {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}
