//! Storage error types

use taskfleet_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid include pattern: {0}")]
    Validation(String),

    #[error("Invalid remote: {0}")]
    InvalidRemote(String),

    #[error("Object store error: {0}")]
    Store(#[from] object_store::Error),

    #[error("Invalid object path: {0}")]
    Path(#[from] object_store::path::Error),

    #[error("Malformed report {name}: {reason}")]
    MalformedReport { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for CloudError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => CloudError::NotFound(what),
            StorageError::Validation(reason) => CloudError::Validation(reason),
            StorageError::InvalidRemote(reason) => {
                CloudError::Validation(format!("invalid remote: {reason}"))
            }
            StorageError::Io(e) => CloudError::Io(e),
            other => CloudError::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
