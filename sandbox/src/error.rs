#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid plugin path: {0}")]
    InvalidPath(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("a workload is already executing")]
    AlreadyExecuting,

    #[error("launch failed: {0}")]
    LaunchFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate sandbox id: {0}")]
    DuplicateId(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("malformed policy: {0}")]
    MalformedPolicy(String),

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
