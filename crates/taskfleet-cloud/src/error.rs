//! Cloud error types

use thiserror::Error;

/// Errors shared by every provider and the orchestrator
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A dependency was used before it was read
    #[error("Unresolved dependency: {0}")]
    Unresolved(&'static str),

    #[error("API error: {0}")]
    Api(String),

    #[error("Command `{program}` failed: {stderr}")]
    CommandFailed { program: String, stderr: String },

    #[error("Required tool is not installed: {0}")]
    MissingTool(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{description}: {source}")]
    StepFailed {
        description: String,
        #[source]
        source: Box<CloudError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SSH key error: {0}")]
    Ssh(#[from] ssh_key::Error),
}

impl CloudError {
    /// True for `NotFound`, including when wrapped by a failed step
    pub fn is_not_found(&self) -> bool {
        match self {
            CloudError::NotFound(_) => true,
            CloudError::StepFailed { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        match self {
            CloudError::AlreadyExists(_) => true,
            CloudError::StepFailed { source, .. } => source.is_already_exists(),
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        match self {
            CloudError::Validation(_) => true,
            CloudError::StepFailed { source, .. } => source.is_validation(),
            _ => false,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        match self {
            CloudError::Unsupported(_) => true,
            CloudError::StepFailed { source, .. } => source.is_unsupported(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
