//! End-to-end scenarios against real child processes.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{EventLog, FakeProbe, fast_monitor, init_tracing, native_policy, write_script};
use sandbox::{
    Dimension, PluginType, ProbeSample, ResourceLimits, Sandbox, SandboxError, SandboxEvent,
    SecurityPolicy,
};
use sandbox_host::{EXIT_CANCELLED, EXIT_LIMIT_KILLED, PluginSandbox, ProcProbe, SandboxRegistry};
use serde_json::Map;

fn registry() -> SandboxRegistry {
    init_tracing();
    SandboxRegistry::new(Arc::new(ProcProbe::new()), fast_monitor())
}

#[tokio::test]
async fn strict_policy_denies_native_before_launch() {
    let registry = registry();
    let sandbox = registry
        .create_sandbox("strict-deny", SecurityPolicy::strict())
        .unwrap();
    let log = EventLog::attach(sandbox.as_ref());

    let err = sandbox
        .execute(Path::new("/etc/passwd"), PluginType::Native, Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::PermissionDenied(_)));

    // The workload never ran, so no terminal event may ever fire.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(log.snapshot().is_empty());
    registry.shutdown_all().await;
}

#[tokio::test]
async fn short_workload_completes_with_usage_updates() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "ok.sh", "sleep 0.3\necho done");

    let registry = registry();
    let sandbox = registry
        .create_sandbox("short", native_policy(ResourceLimits::unlimited()))
        .unwrap();
    let log = EventLog::attach(sandbox.as_ref());

    sandbox
        .execute(&script, PluginType::Native, Map::new())
        .await
        .unwrap();

    let code = log.wait_for_completion(Duration::from_secs(5)).await;
    assert_eq!(code, Some(0));
    assert_eq!(log.completions(), vec![0]);
    assert!(log.usage_updates() >= 1, "expected at least one monitor tick");
    registry.shutdown_all().await;
}

#[tokio::test]
async fn python_workload_completes_when_interpreter_present() {
    if which::which("python3").is_err() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("plugin.py");
    std::fs::write(&script, "import time\ntime.sleep(0.3)\nprint('ok')\n").unwrap();

    let registry = registry();
    let sandbox = registry
        .create_sandbox("py", SecurityPolicy::limited())
        .unwrap();
    let log = EventLog::attach(sandbox.as_ref());

    sandbox
        .execute(&script, PluginType::Python, Map::new())
        .await
        .unwrap();

    assert_eq!(log.wait_for_completion(Duration::from_secs(5)).await, Some(0));
    assert!(log.usage_updates() >= 1);
    registry.shutdown_all().await;
}

#[tokio::test]
async fn memory_breach_terminates_the_workload() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "hog.sh", "sleep 5");

    // Scripted probe: memory climbs past the 10 MiB cap on the third tick.
    let probe = FakeProbe::new(vec![
        ProbeSample {
            memory_mb: 4,
            ..ProbeSample::default()
        },
        ProbeSample {
            memory_mb: 8,
            ..ProbeSample::default()
        },
        ProbeSample {
            memory_mb: 64,
            ..ProbeSample::default()
        },
    ]);
    let limits = ResourceLimits {
        memory_limit_mb: 10,
        ..ResourceLimits::unlimited()
    };
    let sandbox = PluginSandbox::new(
        "mem-hog",
        native_policy(limits),
        Arc::new(probe),
        fast_monitor(),
    );
    sandbox.initialize().unwrap();
    let log = EventLog::attach(&sandbox);

    let started = Instant::now();
    sandbox
        .execute(&script, PluginType::Native, Map::new())
        .await
        .unwrap();

    let code = log.wait_for_completion(Duration::from_secs(3)).await;
    assert_eq!(code, Some(EXIT_LIMIT_KILLED));
    assert!(started.elapsed() < Duration::from_secs(3), "killed well before sleep ended");

    let events = log.snapshot();
    let breach_index = events
        .iter()
        .position(|e| {
            matches!(
                e,
                SandboxEvent::ResourceLimitExceeded {
                    dimension: Dimension::Memory,
                    ..
                }
            )
        })
        .expect("memory breach event");
    let completed_index = events
        .iter()
        .position(|e| matches!(e, SandboxEvent::ExecutionCompleted { .. }))
        .expect("terminal event");
    assert!(breach_index < completed_index, "breach precedes completion");
    sandbox.shutdown().await;
}

#[tokio::test]
async fn wall_clock_timeout_kills_a_sleeping_workload() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "sleeper.sh", "sleep 5");

    let limits = ResourceLimits {
        execution_timeout: Duration::from_millis(1000),
        ..ResourceLimits::unlimited()
    };
    let registry = registry();
    let sandbox = registry
        .create_sandbox("sleeper", native_policy(limits))
        .unwrap();
    let log = EventLog::attach(sandbox.as_ref());

    let started = Instant::now();
    sandbox
        .execute(&script, PluginType::Native, Map::new())
        .await
        .unwrap();

    let code = log.wait_for_completion(Duration::from_secs(4)).await;
    let elapsed = started.elapsed();
    assert_eq!(code, Some(EXIT_LIMIT_KILLED));
    assert!(elapsed >= Duration::from_millis(900), "ran until the timeout");
    assert!(elapsed < Duration::from_millis(2500), "did not run to natural exit");
    assert!(log.snapshot().iter().any(|e| matches!(
        e,
        SandboxEvent::ResourceLimitExceeded {
            dimension: Dimension::ExecutionTimeout,
            ..
        }
    )));
    registry.shutdown_all().await;
}

#[tokio::test]
async fn duplicate_id_is_rejected_until_removed() {
    let registry = registry();
    registry
        .create_sandbox("x", SecurityPolicy::limited())
        .unwrap();

    let err = registry
        .create_sandbox("x", SecurityPolicy::limited())
        .unwrap_err();
    assert!(matches!(err, sandbox::RegistryError::DuplicateId(ref id) if id == "x"));

    registry.remove_sandbox("x").await;
    registry
        .create_sandbox("x", SecurityPolicy::limited())
        .unwrap();
    registry.shutdown_all().await;
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let registry = registry();
    let sandbox = registry
        .create_sandbox("twice", SecurityPolicy::limited())
        .unwrap();
    assert!(sandbox.is_active());

    sandbox.shutdown().await;
    assert!(!sandbox.is_active());
    sandbox.shutdown().await;
    assert!(!sandbox.is_active());
    registry.shutdown_all().await;
}

#[tokio::test]
async fn shutdown_mid_run_still_emits_a_terminal_event() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "forever.sh", "sleep 30");

    let registry = registry();
    let sandbox = registry
        .create_sandbox("cancelled", native_policy(ResourceLimits::unlimited()))
        .unwrap();
    let log = EventLog::attach(sandbox.as_ref());

    sandbox
        .execute(&script, PluginType::Native, Map::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    sandbox.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(log.completions(), vec![EXIT_CANCELLED]);
    assert!(!sandbox.is_active());
}

#[tokio::test]
async fn network_activity_under_denial_raises_a_violation() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "brief.sh", "sleep 0.3");

    // Probe reports open sockets; the policy denies network access but
    // sets no numeric connection cap, so this is a violation, not a kill.
    let probe = FakeProbe::constant(ProbeSample {
        memory_mb: 1,
        network_connections: 2,
        ..ProbeSample::default()
    });
    let mut policy = native_policy(ResourceLimits::unlimited());
    policy.permissions.allow_network = false;

    let sandbox = PluginSandbox::new("sneaky", policy, Arc::new(probe), fast_monitor());
    sandbox.initialize().unwrap();
    let log = EventLog::attach(&sandbox);

    sandbox
        .execute(&script, PluginType::Native, Map::new())
        .await
        .unwrap();
    assert_eq!(log.wait_for_completion(Duration::from_secs(5)).await, Some(0));

    let violations = log
        .snapshot()
        .iter()
        .filter(|e| matches!(e, SandboxEvent::SecurityViolation { .. }))
        .count();
    assert_eq!(violations, 1, "violation reported once, workload not killed");
    sandbox.shutdown().await;
}

#[tokio::test]
async fn executing_sandbox_rejects_a_second_workload() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "busy.sh", "sleep 2");

    let registry = registry();
    let sandbox = registry
        .create_sandbox("busy", native_policy(ResourceLimits::unlimited()))
        .unwrap();
    let log = EventLog::attach(sandbox.as_ref());

    sandbox
        .execute(&script, PluginType::Native, Map::new())
        .await
        .unwrap();
    let err = sandbox
        .execute(&script, PluginType::Native, Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::AlreadyExecuting));

    registry.shutdown_all().await;
    // Exactly one terminal event for the one successful launch.
    assert_eq!(log.completions().len(), 1);
}

#[tokio::test]
async fn nonexistent_and_empty_paths_are_invalid() {
    let registry = registry();
    let sandbox = registry
        .create_sandbox("paths", native_policy(ResourceLimits::unlimited()))
        .unwrap();

    let err = sandbox
        .execute(Path::new(""), PluginType::Native, Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::InvalidPath(_)));

    let err = sandbox
        .execute(
            Path::new("/no/such/plugin-workload"),
            PluginType::Native,
            Map::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::InvalidPath(_)));
    registry.shutdown_all().await;
}

#[tokio::test]
async fn idle_sandbox_reports_zeroed_usage() {
    let registry = registry();
    let sandbox = registry
        .create_sandbox("idle", SecurityPolicy::limited())
        .unwrap();
    let usage = sandbox.get_resource_usage();
    assert_eq!(usage.memory_used_mb, 0);
    assert!(usage.start_time.is_none());
    registry.shutdown_all().await;
}
