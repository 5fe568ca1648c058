use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::policy::ResourceLimits;
use crate::timefmt::duration_ms;

/// A resource dimension that can breach its configured cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    CpuTime,
    Memory,
    DiskSpace,
    FileHandles,
    NetworkConnections,
    ExecutionTimeout,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpuTime => "cpu_time",
            Self::Memory => "memory",
            Self::DiskSpace => "disk_space",
            Self::FileHandles => "file_handles",
            Self::NetworkConnections => "network_connections",
            Self::ExecutionTimeout => "execution_timeout",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a workload's consumption at one monitor tick.
///
/// Snapshots are produced by the monitor and passed around as immutable
/// values; nothing here mutates or performs I/O.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceUsage {
    #[serde(rename = "cpu_time_used_ms", with = "duration_ms")]
    pub cpu_time_used: Duration,
    pub memory_used_mb: u64,
    pub disk_space_used_mb: u64,
    pub file_handles_used: u64,
    pub network_connections_used: u64,
    #[serde(serialize_with = "crate::timefmt::serialize_iso_opt")]
    pub start_time: Option<DateTime<Utc>>,
}

impl ResourceUsage {
    /// True iff any dimension with a non-zero cap is strictly above it.
    ///
    /// Wall-clock timeout is deliberately not part of this check: elapsed
    /// time is measured by the monitor against its own clock so this
    /// function stays deterministic.
    pub fn exceeds(&self, limits: &ResourceLimits) -> bool {
        self.exceeded_dimension(limits).is_some()
    }

    /// First exceeded dimension in a fixed evaluation order, so the
    /// dimension reported on breach is deterministic.
    pub fn exceeded_dimension(&self, limits: &ResourceLimits) -> Option<Dimension> {
        if !limits.cpu_time_limit.is_zero() && self.cpu_time_used > limits.cpu_time_limit {
            return Some(Dimension::CpuTime);
        }
        if limits.memory_limit_mb != 0 && self.memory_used_mb > limits.memory_limit_mb {
            return Some(Dimension::Memory);
        }
        if limits.disk_space_limit_mb != 0 && self.disk_space_used_mb > limits.disk_space_limit_mb {
            return Some(Dimension::DiskSpace);
        }
        if limits.max_file_handles != 0 && self.file_handles_used > limits.max_file_handles {
            return Some(Dimension::FileHandles);
        }
        if limits.max_network_connections != 0
            && self.network_connections_used > limits.max_network_connections
        {
            return Some(Dimension::NetworkConnections);
        }
        None
    }

    /// Serialize every field; `start_time` as ISO 8601 or null.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
