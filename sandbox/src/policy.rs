use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PolicyError;
use crate::timefmt::duration_ms;

/// Restrictiveness levels, ordered from most permissive to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Unrestricted,
    Limited,
    Sandboxed,
    Strict,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unrestricted => "unrestricted",
            Self::Limited => "limited",
            Self::Sandboxed => "sandboxed",
            Self::Strict => "strict",
        }
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags checked at pre-flight time, plus an API denylist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePermissions {
    pub allow_filesystem_read: bool,
    pub allow_filesystem_write: bool,
    pub allow_network: bool,
    pub allow_process_creation: bool,
    pub allow_system_calls: bool,
    pub allow_registry_access: bool,
    pub allow_environment_access: bool,
    #[serde(rename = "blocked_apis")]
    pub blocked_api_names: BTreeSet<String>,
}

impl ResourcePermissions {
    /// Everything allowed, nothing denylisted.
    pub fn all() -> Self {
        Self {
            allow_filesystem_read: true,
            allow_filesystem_write: true,
            allow_network: true,
            allow_process_creation: true,
            allow_system_calls: true,
            allow_registry_access: true,
            allow_environment_access: true,
            blocked_api_names: BTreeSet::new(),
        }
    }

    /// Everything denied. Callers add a denylist on top.
    pub fn none() -> Self {
        Self {
            allow_filesystem_read: false,
            allow_filesystem_write: false,
            allow_network: false,
            allow_process_creation: false,
            allow_system_calls: false,
            allow_registry_access: false,
            allow_environment_access: false,
            blocked_api_names: BTreeSet::new(),
        }
    }

    fn any_allowed(&self) -> bool {
        self.allow_filesystem_read
            || self.allow_filesystem_write
            || self.allow_network
            || self.allow_process_creation
            || self.allow_system_calls
            || self.allow_registry_access
            || self.allow_environment_access
    }

    fn all_allowed(&self) -> bool {
        self.allow_filesystem_read
            && self.allow_filesystem_write
            && self.allow_network
            && self.allow_process_creation
            && self.allow_system_calls
            && self.allow_registry_access
            && self.allow_environment_access
    }
}

/// Per-dimension consumption caps. A zero value means "no cap".
///
/// Durations serialize as integer milliseconds (`*_ms` keys).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(rename = "cpu_time_limit_ms", with = "duration_ms")]
    pub cpu_time_limit: Duration,
    pub memory_limit_mb: u64,
    pub disk_space_limit_mb: u64,
    pub max_file_handles: u64,
    pub max_network_connections: u64,
    #[serde(rename = "execution_timeout_ms", with = "duration_ms")]
    pub execution_timeout: Duration,
}

impl ResourceLimits {
    /// No caps in any dimension.
    pub fn unlimited() -> Self {
        Self::default()
    }
}

fn denylist(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| (*s).to_owned()).collect()
}

/// Named, immutable bundle of permissions and resource limits.
///
/// Updating a policy means registering a new value under the same name;
/// sandboxes bound to the old value keep it for their lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub level: SecurityLevel,
    #[serde(rename = "policy_name")]
    pub name: String,
    pub description: String,
    pub permissions: ResourcePermissions,
    pub limits: ResourceLimits,
}

impl SecurityPolicy {
    /// All permissions granted, no limits. For fully trusted plugins only.
    pub fn unrestricted() -> Self {
        Self {
            level: SecurityLevel::Unrestricted,
            name: "unrestricted".to_owned(),
            description: "Full access, no resource caps".to_owned(),
            permissions: ResourcePermissions::all(),
            limits: ResourceLimits::unlimited(),
        }
    }

    /// Filesystem and network access with generous caps; no process
    /// creation or raw syscalls.
    pub fn limited() -> Self {
        Self {
            level: SecurityLevel::Limited,
            name: "limited".to_owned(),
            description: "Filesystem and network access under generous caps".to_owned(),
            permissions: ResourcePermissions {
                allow_filesystem_read: true,
                allow_filesystem_write: true,
                allow_network: true,
                allow_process_creation: false,
                allow_system_calls: false,
                allow_registry_access: false,
                allow_environment_access: true,
                blocked_api_names: denylist(&["process_spawn", "registry_write"]),
            },
            limits: ResourceLimits {
                cpu_time_limit: Duration::from_secs(300),
                memory_limit_mb: 1024,
                disk_space_limit_mb: 1024,
                max_file_handles: 256,
                max_network_connections: 32,
                execution_timeout: Duration::from_secs(600),
            },
        }
    }

    /// Read-only filesystem access, no network, tight caps.
    pub fn sandboxed() -> Self {
        Self {
            level: SecurityLevel::Sandboxed,
            name: "sandboxed".to_owned(),
            description: "Read-only filesystem, no network, tight caps".to_owned(),
            permissions: ResourcePermissions {
                allow_filesystem_read: true,
                ..ResourcePermissions::none()
            }
            .with_denylist(&[
                "process_spawn",
                "registry_write",
                "network_listen",
                "env_write",
            ]),
            limits: ResourceLimits {
                cpu_time_limit: Duration::from_secs(60),
                memory_limit_mb: 256,
                disk_space_limit_mb: 100,
                max_file_handles: 64,
                max_network_connections: 0,
                execution_timeout: Duration::from_secs(120),
            },
        }
    }

    /// Everything denied. Only workloads that need no capabilities at all
    /// can pass pre-flight, and a timeout is always enforced.
    pub fn strict() -> Self {
        Self {
            level: SecurityLevel::Strict,
            name: "strict".to_owned(),
            description: "All permissions denied, mandatory timeout".to_owned(),
            permissions: ResourcePermissions::none().with_denylist(&[
                "process_spawn",
                "registry_write",
                "network_listen",
                "env_write",
                "filesystem_read",
                "filesystem_write",
                "network_connect",
            ]),
            limits: ResourceLimits {
                cpu_time_limit: Duration::from_secs(30),
                memory_limit_mb: 64,
                disk_space_limit_mb: 10,
                max_file_handles: 16,
                max_network_connections: 0,
                execution_timeout: Duration::from_secs(30),
            },
        }
    }

    /// Check the structural invariants that the canonical constructors
    /// guarantee and that custom policies must also uphold.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.name.is_empty() {
            return Err(PolicyError::InvalidPolicy("policy name is empty".into()));
        }
        match self.level {
            SecurityLevel::Strict => {
                if self.permissions.any_allowed() {
                    return Err(PolicyError::InvalidPolicy(
                        "strict policy grants a permission".into(),
                    ));
                }
                if self.permissions.blocked_api_names.is_empty() {
                    return Err(PolicyError::InvalidPolicy(
                        "strict policy has an empty API denylist".into(),
                    ));
                }
                if self.limits.execution_timeout.is_zero() {
                    return Err(PolicyError::InvalidPolicy(
                        "strict policy requires an execution timeout".into(),
                    ));
                }
            }
            SecurityLevel::Unrestricted => {
                if !self.permissions.all_allowed() {
                    return Err(PolicyError::InvalidPolicy(
                        "unrestricted policy denies a permission".into(),
                    ));
                }
                if !self.permissions.blocked_api_names.is_empty() {
                    return Err(PolicyError::InvalidPolicy(
                        "unrestricted policy has a non-empty API denylist".into(),
                    ));
                }
            }
            SecurityLevel::Limited | SecurityLevel::Sandboxed => {}
        }
        Ok(())
    }

    /// Serialize to the JSON-object persistence format.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Deserialize from the JSON-object persistence format. Missing keys
    /// and unknown level strings are `MalformedPolicy`.
    pub fn from_map(map: Map<String, Value>) -> Result<Self, PolicyError> {
        serde_json::from_value(Value::Object(map))
            .map_err(|e| PolicyError::MalformedPolicy(e.to_string()))
    }
}

impl ResourcePermissions {
    fn with_denylist(mut self, names: &[&str]) -> Self {
        self.blocked_api_names = denylist(names);
        self
    }
}
