mod launcher;
mod monitor;
mod plugin;
mod probe;
mod process;
mod registry;

pub use monitor::{EXIT_CANCELLED, EXIT_LIMIT_KILLED, MonitorConfig};
pub use plugin::PluginSandbox;
pub use probe::ProcProbe;
pub use registry::SandboxRegistry;
