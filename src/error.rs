use thiserror::Error;

pub type Result<T> = std::result::Result<T, WebshellError>;

/// Errors produced by the container lifecycle layer.
#[derive(Debug, Error)]
pub enum WebshellError {
    /// The configured container image is not present on the runtime.
    #[error("webshell image `{0}` not found")]
    ImageMissing(String),

    /// A container with the derived name already exists. Creation treats
    /// this as the "already exists" success path, never as a failure.
    #[error("container name `{0}` already in use")]
    NameConflict(String),

    /// The container does not exist. Often a success condition for the
    /// caller (delete, concurrent reclamation).
    #[error("container `{0}` does not exist")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl WebshellError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }
}
