use std::process::ExitStatus;
use std::sync::atomic::AtomicU8;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sandbox::{
    Dimension, EventSubscribers, ProbeSample, ResourceLimits, ResourcePermissions, ResourceProbe,
    ResourceUsage, SandboxEvent,
};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::plugin::SandboxState;
use crate::process;

/// Exit code reported when the monitor killed the workload on a limit
/// breach or timeout.
pub const EXIT_LIMIT_KILLED: i32 = -1;
/// Exit code reported when `shutdown()` cancelled the workload.
pub const EXIT_CANCELLED: i32 = -2;

/// Monitoring loop settings.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Sampling cadence while a workload runs.
    pub interval: Duration,
    /// Time a terminated workload gets between SIGTERM and SIGKILL.
    pub grace: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            grace: Duration::from_millis(500),
        }
    }
}

/// Everything one supervision task owns for a single `execute()` call.
pub(crate) struct Supervision {
    pub sandbox_id: String,
    pub execution_id: uuid::Uuid,
    pub child: Child,
    pub pid: u32,
    pub limits: ResourceLimits,
    pub permissions: ResourcePermissions,
    pub probe: Arc<dyn ResourceProbe>,
    pub events: Arc<EventSubscribers>,
    pub latest: Arc<Mutex<ResourceUsage>>,
    pub cancel: watch::Receiver<bool>,
    pub config: MonitorConfig,
    pub start_time: DateTime<Utc>,
    pub state: Arc<AtomicU8>,
}

enum Action {
    Exited(std::io::Result<ExitStatus>),
    Cancel,
    Tick,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    LimitExceeded {
        dimension: Dimension,
        usage: ResourceUsage,
    },
}

/// Supervise one workload: forward its output, sample resources on an
/// interval, enforce limits and the wall-clock timeout, and react to
/// external cancellation.
///
/// This single task is the only emitter for its execution, so events are
/// totally ordered and exactly one `ExecutionCompleted` is emitted no
/// matter how the workload ends.
pub(crate) async fn supervise(mut s: Supervision) {
    forward_output(&s.sandbox_id, &mut s.child);

    let started = Instant::now();
    let mut ticker = tokio::time::interval(s.config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick of `interval` completes immediately; consume it so
    // sampling starts one interval after launch.
    ticker.tick().await;

    let mut network_violation_reported = false;

    let outcome = loop {
        let action = tokio::select! {
            status = s.child.wait() => Action::Exited(status),
            _ = s.cancel.changed() => Action::Cancel,
            _ = ticker.tick() => Action::Tick,
        };

        match action {
            Action::Exited(status) => break Outcome::Exited(status),
            Action::Cancel => {
                process::terminate(&mut s.child, s.config.grace).await;
                break Outcome::Cancelled;
            }
            Action::Tick => {
                let sample = match s.probe.sample(s.pid) {
                    Ok(sample) => sample,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        // Workload exited between ticks; the wait() branch
                        // observes it next iteration.
                        continue;
                    }
                    Err(e) => {
                        warn!(id = %s.sandbox_id, error = %e, "resource probe failed, skipping tick");
                        continue;
                    }
                };

                let usage = usage_from(sample, s.start_time);
                set_latest(&s.latest, usage.clone());
                s.events.emit(&SandboxEvent::ResourceUsageUpdated(usage.clone()));

                if !network_violation_reported && network_violation(&s.permissions, &s.limits, &usage)
                {
                    network_violation_reported = true;
                    s.events.emit(&SandboxEvent::SecurityViolation {
                        description: "network activity under a policy that denies network access"
                            .to_owned(),
                        context: event_context(&s, &usage),
                    });
                }

                let timed_out = !s.limits.execution_timeout.is_zero()
                    && started.elapsed() > s.limits.execution_timeout;
                let mut breach = usage.exceeded_dimension(&s.limits);
                if breach.is_none() && timed_out {
                    breach = Some(Dimension::ExecutionTimeout);
                }

                if let Some(dimension) = breach {
                    info!(
                        id = %s.sandbox_id,
                        dimension = %dimension,
                        "resource limit exceeded, terminating workload"
                    );
                    process::terminate(&mut s.child, s.config.grace).await;
                    break Outcome::LimitExceeded { dimension, usage };
                }
            }
        }
    };

    emit_terminal(&s, outcome, started.elapsed());

    // Back to zeroed usage now that the sandbox is idle again.
    set_latest(&s.latest, ResourceUsage::default());
    SandboxState::release_execution(&s.state);
}

fn emit_terminal(s: &Supervision, outcome: Outcome, elapsed: Duration) {
    let (exit_code, reason, dimension) = match outcome {
        Outcome::Exited(Ok(status)) => match status.code() {
            Some(code) => (code, "completed", None),
            None => {
                // Killed by a signal we did not send.
                use std::os::unix::process::ExitStatusExt;
                let signal = status.signal().unwrap_or(0);
                (-signal, "crashed", None)
            }
        },
        Outcome::Exited(Err(e)) => {
            warn!(id = %s.sandbox_id, error = %e, "waiting on workload failed");
            (EXIT_LIMIT_KILLED, "crashed", None)
        }
        Outcome::Cancelled => (EXIT_CANCELLED, "cancelled", None),
        Outcome::LimitExceeded { dimension, usage } => {
            let mut context = event_context(s, &usage);
            context.insert("dimension".into(), dimension.as_str().into());
            s.events
                .emit(&SandboxEvent::ResourceLimitExceeded { dimension, context });
            let reason = if dimension == Dimension::ExecutionTimeout {
                "timeout"
            } else {
                "limit_exceeded"
            };
            (EXIT_LIMIT_KILLED, reason, Some(dimension))
        }
    };

    let mut summary = Map::new();
    summary.insert("execution_id".into(), s.execution_id.to_string().into());
    summary.insert(
        "duration_ms".into(),
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX).into(),
    );
    summary.insert("reason".into(), reason.into());
    if let Some(dimension) = dimension {
        summary.insert("dimension".into(), dimension.as_str().into());
    }

    info!(id = %s.sandbox_id, exit_code, reason, "workload finished");
    s.events
        .emit(&SandboxEvent::ExecutionCompleted { exit_code, summary });
}

/// Open sockets under a policy that denies network access, in a dimension
/// with no numeric cap. A capped dimension takes the limit-breach path
/// instead.
fn network_violation(
    permissions: &ResourcePermissions,
    limits: &ResourceLimits,
    usage: &ResourceUsage,
) -> bool {
    !permissions.allow_network
        && limits.max_network_connections == 0
        && usage.network_connections_used > 0
}

fn usage_from(sample: ProbeSample, start_time: DateTime<Utc>) -> ResourceUsage {
    ResourceUsage {
        cpu_time_used: sample.cpu_time,
        memory_used_mb: sample.memory_mb,
        disk_space_used_mb: sample.disk_write_mb,
        file_handles_used: sample.file_handles,
        network_connections_used: sample.network_connections,
        start_time: Some(start_time),
    }
}

fn event_context(s: &Supervision, usage: &ResourceUsage) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("sandbox_id".into(), s.sandbox_id.clone().into());
    context.insert("execution_id".into(), s.execution_id.to_string().into());
    context.insert("usage".into(), Value::Object(usage.to_map()));
    context
}

fn set_latest(latest: &Mutex<ResourceUsage>, usage: ResourceUsage) {
    *latest.lock().unwrap_or_else(PoisonError::into_inner) = usage;
}

/// Forward workload stdout/stderr lines into the tracing log until the
/// pipes close.
fn forward_output(id: &str, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let id = id.to_owned();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    info!(id = %id, "{line}");
                }
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let id = id.to_owned();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    warn!(id = %id, "stderr: {line}");
                }
            }
        });
    }
}
