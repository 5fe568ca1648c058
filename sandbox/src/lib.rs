mod error;
mod events;
mod policy;
mod probe;
mod sandbox;
mod timefmt;
mod types;
mod usage;

pub use error::{PolicyError, RegistryError, Result, SandboxError};
pub use events::{EventCallback, EventSubscribers, SandboxEvent};
pub use policy::{ResourceLimits, ResourcePermissions, SecurityLevel, SecurityPolicy};
pub use probe::{ProbeSample, ResourceProbe};
pub use sandbox::Sandbox;
pub use types::{ExecutionHandle, PluginType};
pub use usage::{Dimension, ResourceUsage};
