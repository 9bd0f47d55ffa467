//! Remote storage purge

use crate::endpoint::Endpoint;
use crate::error::{Result, StorageError};
use std::path::Path;

/// Delete every object under `destination`, then its empty directories
///
/// A missing directory, bucket or unreachable host is reported as
/// [`StorageError::NotFound`].
pub async fn delete(destination: &str) -> Result<()> {
    let endpoint = Endpoint::resolve(destination, false).await?;

    let objects = endpoint.list().await.map_err(|e| classify(destination, e))?;
    tracing::debug!("Deleting {} objects from {}", objects.len(), endpoint.location());
    for meta in &objects {
        match endpoint.store().delete(&meta.location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(classify(destination, e.into())),
        }
    }

    if let Some(dir) = endpoint.local_dir() {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || remove_empty_dirs(&dir, true))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;
    }
    Ok(())
}

fn classify(destination: &str, err: StorageError) -> StorageError {
    match err {
        StorageError::Store(object_store::Error::NotFound { .. }) => {
            StorageError::NotFound(destination.to_string())
        }
        StorageError::Store(ref e) if is_unreachable(&e.to_string()) => {
            StorageError::NotFound(destination.to_string())
        }
        other => other,
    }
}

fn is_unreachable(message: &str) -> bool {
    [
        "dns error",
        "no such host",
        "failed to lookup address",
        "NoSuchBucket",
        "ContainerNotFound",
        "The specified bucket does not exist",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

/// Remove empty directories below `dir`; the root itself is kept
fn remove_empty_dirs(dir: &Path, root: bool) -> std::io::Result<bool> {
    let mut empty = true;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if !remove_empty_dirs(&entry.path(), false)? {
                empty = false;
            }
        } else {
            empty = false;
        }
    }
    if empty && !root {
        std::fs::remove_dir(dir)?;
    }
    Ok(empty)
}
