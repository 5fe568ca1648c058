//! Shared helpers for the sandbox-host test suites.
#![allow(dead_code)] // each test binary uses its own subset

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sandbox::{
    ProbeSample, ResourceLimits, ResourcePermissions, ResourceProbe, Sandbox, SandboxEvent,
    SecurityLevel, SecurityPolicy,
};
use sandbox_host::MonitorConfig;

/// Install a capturing log subscriber; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Tight cadence so tests finish quickly.
pub fn fast_monitor() -> MonitorConfig {
    MonitorConfig {
        interval: Duration::from_millis(20),
        grace: Duration::from_millis(100),
    }
}

/// A policy permissive enough to launch native shell-script workloads,
/// with caller-chosen limits.
pub fn native_policy(limits: ResourceLimits) -> SecurityPolicy {
    SecurityPolicy {
        level: SecurityLevel::Limited,
        name: "test-native".to_owned(),
        description: "permissive test policy".to_owned(),
        permissions: ResourcePermissions::all(),
        limits,
    }
}

/// Write an executable `/bin/sh` script into `dir` and return its path.
pub fn write_script(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Collects every event a sandbox emits, in order.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SandboxEvent>>>,
}

impl EventLog {
    pub fn attach(sandbox: &dyn Sandbox) -> Self {
        let log = Self::default();
        let events = Arc::clone(&log.events);
        sandbox.subscribe(Box::new(move |event| {
            events.lock().unwrap().push(event.clone());
        }));
        log
    }

    pub fn snapshot(&self) -> Vec<SandboxEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<i32> {
        self.snapshot()
            .iter()
            .filter_map(|event| match event {
                SandboxEvent::ExecutionCompleted { exit_code, .. } => Some(*exit_code),
                _ => None,
            })
            .collect()
    }

    pub fn usage_updates(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|event| matches!(event, SandboxEvent::ResourceUsageUpdated(_)))
            .count()
    }

    /// Poll until an `ExecutionCompleted` appears or `timeout` elapses.
    pub async fn wait_for_completion(&self, timeout: Duration) -> Option<i32> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(code) = self.completions().first().copied() {
                return Some(code);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// A probe that replays a scripted sequence of samples, holding the last
/// one forever. Lets tests drive limit breaches deterministically.
pub struct FakeProbe {
    script: Vec<ProbeSample>,
    cursor: AtomicUsize,
}

impl FakeProbe {
    pub fn new(script: Vec<ProbeSample>) -> Self {
        Self {
            script,
            cursor: AtomicUsize::new(0),
        }
    }

    /// A probe that always reports the same sample.
    pub fn constant(sample: ProbeSample) -> Self {
        Self::new(vec![sample])
    }
}

impl ResourceProbe for FakeProbe {
    fn sample(&self, _pid: u32) -> std::io::Result<ProbeSample> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.script
            .get(index)
            .or_else(|| self.script.last())
            .copied()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no sample"))
    }
}
