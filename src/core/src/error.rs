use thiserror::Error;

/// Hoist error types
#[derive(Error, Debug)]
pub enum HoistError {
    /// Base image manifest or config could not be fetched during pull
    #[error("Base image unavailable: {image} - {message}")]
    BaseImageUnavailable { image: String, message: String },

    /// A gzip or tar stream could not be decoded
    #[error("Corrupt archive: {name} - {message}")]
    CorruptArchive { name: String, message: String },

    /// Content did not hash to the digest it was recorded or echoed under
    #[error("Digest mismatch for {subject}: expected {expected}, got {actual}")]
    DigestMismatch {
        subject: String,
        expected: String,
        actual: String,
    },

    /// A version string could not be interpreted where one is required
    #[error("Invalid version '{version}': {message}")]
    InvalidVersion { version: String, message: String },

    /// Network or HTTP failure talking to the registry
    #[error("Registry error: {operation} {repository} - {message}")]
    RegistryTransport {
        operation: String,
        repository: String,
        message: String,
    },

    /// Registry reported that the requested manifest, blob or repository does not exist
    #[error("Not found: {repository} {reference}")]
    NotFound {
        repository: String,
        reference: String,
    },

    /// Push failed after some content was already published
    #[error("Partial publish to {repository} ({} item(s) already pushed): {message}", .pushed.len())]
    PartialPublish {
        repository: String,
        pushed: Vec<String>,
        message: String,
    },

    /// Layer packing or working-file failure
    #[error("Build error: {0}")]
    Build(String),

    /// Image reference could not be parsed
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Registry credentials could not be loaded
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl HoistError {
    /// Whether this error is the registry's not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, HoistError::NotFound { .. })
    }

    /// Build a transport error for a registry operation.
    pub fn transport(
        operation: impl Into<String>,
        repository: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        HoistError::RegistryTransport {
            operation: operation.into(),
            repository: repository.into(),
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for HoistError {
    fn from(err: serde_json::Error) -> Self {
        HoistError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for HoistError {
    fn from(err: serde_yaml::Error) -> Self {
        HoistError::Serialization(err.to_string())
    }
}

/// Result type alias for hoist operations
pub type Result<T> = std::result::Result<T, HoistError>;
