use railworld_kernel::WorldError;

/// Errors from running a world service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    World(#[from] WorldError),
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}
