use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sandbox::{ProbeSample, ResourceProbe};

/// `/proc`-based resource accounting for one workload process.
///
/// Four small file reads per sample, cheap enough for a 100 ms cadence.
pub struct ProcProbe {
    ticks_per_sec: u64,
    page_size: u64,
}

impl ProcProbe {
    pub fn new() -> Self {
        // SAFETY: sysconf reads static kernel configuration.
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        Self {
            ticks_per_sec: u64::try_from(ticks).unwrap_or(100),
            page_size: u64::try_from(page).unwrap_or(4096),
        }
    }
}

impl Default for ProcProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for ProcProbe {
    fn sample(&self, pid: u32) -> io::Result<ProbeSample> {
        let proc_dir = PathBuf::from(format!("/proc/{pid}"));

        let stat = std::fs::read_to_string(proc_dir.join("stat"))?;
        let cpu_time = parse_cpu_time(&stat, self.ticks_per_sec)?;

        let statm = std::fs::read_to_string(proc_dir.join("statm"))?;
        let memory_mb = parse_resident_mb(&statm, self.page_size)?;

        let (file_handles, network_connections) = count_fds(&proc_dir.join("fd"))?;

        // Reading /proc/<pid>/io needs ptrace-level access; treat absence
        // as zero rather than failing the whole sample.
        let disk_write_mb = std::fs::read_to_string(proc_dir.join("io"))
            .ok()
            .and_then(|contents| parse_write_bytes(&contents))
            .map_or(0, |bytes| bytes / (1024 * 1024));

        Ok(ProbeSample {
            cpu_time,
            memory_mb,
            disk_write_mb,
            file_handles,
            network_connections,
        })
    }
}

/// Sum of utime and stime from `/proc/<pid>/stat`.
///
/// The comm field may contain spaces and parentheses, so fields are
/// located relative to the last `)`.
fn parse_cpu_time(stat: &str, ticks_per_sec: u64) -> io::Result<Duration> {
    let (_, rest) = stat.rsplit_once(')').ok_or_else(bad_format)?;
    let mut fields = rest.split_whitespace();
    // rest starts at field 3 (state); utime and stime are fields 14 and 15.
    let utime: u64 = fields
        .nth(11)
        .and_then(|f| f.parse().ok())
        .ok_or_else(bad_format)?;
    let stime: u64 = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(bad_format)?;
    let ticks = utime.saturating_add(stime);
    Ok(Duration::from_millis(
        ticks.saturating_mul(1000) / ticks_per_sec.max(1),
    ))
}

/// Resident set size from `/proc/<pid>/statm`, in MiB.
fn parse_resident_mb(statm: &str, page_size: u64) -> io::Result<u64> {
    let resident: u64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|f| f.parse().ok())
        .ok_or_else(bad_format)?;
    Ok(resident.saturating_mul(page_size) / (1024 * 1024))
}

/// Count open fds and the subset that are sockets.
fn count_fds(fd_dir: &Path) -> io::Result<(u64, u64)> {
    let mut total = 0u64;
    let mut sockets = 0u64;
    for entry in std::fs::read_dir(fd_dir)? {
        let entry = entry?;
        total += 1;
        if let Ok(target) = std::fs::read_link(entry.path())
            && target.to_string_lossy().starts_with("socket:")
        {
            sockets += 1;
        }
    }
    Ok((total, sockets))
}

fn parse_write_bytes(io_contents: &str) -> Option<u64> {
    io_contents
        .lines()
        .find_map(|line| line.strip_prefix("write_bytes:"))
        .and_then(|v| v.trim().parse().ok())
}

fn bad_format() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "unexpected /proc format")
}
