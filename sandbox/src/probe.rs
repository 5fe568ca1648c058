use std::time::Duration;

/// One sample of a workload's resource consumption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeSample {
    pub cpu_time: Duration,
    pub memory_mb: u64,
    pub disk_write_mb: u64,
    pub file_handles: u64,
    pub network_connections: u64,
}

/// Platform-specific resource accounting, isolated behind a trait so the
/// monitoring loop stays platform-agnostic and testable with a fake probe.
///
/// Sampling a pid that no longer exists must return
/// `io::ErrorKind::NotFound`; the monitor treats that as "workload exited
/// between ticks", not as an error.
pub trait ResourceProbe: Send + Sync {
    fn sample(&self, pid: u32) -> std::io::Result<ProbeSample>;
}
