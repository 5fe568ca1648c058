use std::time::Duration;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::Child;
use tracing::warn;

/// Signal the entire process group of `child`.
///
/// Requires the child to have been spawned with `process_group(0)` so that
/// its PGID equals its PID. No-op if the child has already exited or the
/// PID cannot be represented as `i32`.
pub(crate) fn signal_group(child: &Child, signal: Signal) {
    if let Some(pid) = child.id()
        && let Ok(pid) = i32::try_from(pid)
    {
        let pgid = Pid::from_raw(pid);
        let _ = killpg(pgid, signal);
    }
}

/// Terminate the workload's process group: `SIGTERM`, wait up to `grace`,
/// then `SIGKILL`. Always reaps the child so no zombie is left behind.
pub(crate) async fn terminate(child: &mut Child, grace: Duration) {
    signal_group(child, Signal::SIGTERM);
    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        return;
    }
    signal_group(child, Signal::SIGKILL);
    if let Err(e) = child.wait().await {
        warn!(error = %e, "reap after SIGKILL failed");
    }
}
