//! Endpoint resolution
//!
//! Turns a location string into an [`ObjectStore`] handle plus the root path
//! inside it.

use crate::error::{Result, StorageError};
use futures_util::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// Resolved storage location
#[derive(Debug, Clone)]
pub struct Endpoint {
    store: Arc<dyn ObjectStore>,
    root: Path,
    location: String,
    local: Option<PathBuf>,
}

impl Endpoint {
    /// Resolve `location`; with `create`, a missing local directory is created,
    /// otherwise it is reported as [`StorageError::NotFound`]
    pub async fn resolve(location: &str, create: bool) -> Result<Self> {
        match local_path(location)? {
            Some(path) => Self::resolve_local(location, path, create).await,
            None => Self::resolve_remote(location),
        }
    }

    async fn resolve_local(location: &str, path: PathBuf, create: bool) -> Result<Self> {
        if create {
            tokio::fs::create_dir_all(&path).await?;
        } else if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(path.display().to_string()));
        }
        let store = LocalFileSystem::new_with_prefix(&path)?;
        Ok(Self {
            store: Arc::new(store),
            root: Path::default(),
            location: location.to_string(),
            local: Some(path),
        })
    }

    fn resolve_remote(location: &str) -> Result<Self> {
        let mut url = Url::parse(location)
            .map_err(|e| StorageError::InvalidRemote(format!("{location}: {e}")))?;
        let options: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.set_query(None);

        let (store, root) = object_store::parse_url_opts(&url, options)
            .map_err(|e| StorageError::InvalidRemote(format!("{url}: {e}")))?;
        Ok(Self {
            store: Arc::from(store),
            root,
            location: url.to_string(),
            local: None,
        })
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Location without store options, safe to log
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Backing directory for local endpoints
    pub fn local_dir(&self) -> Option<&std::path::Path> {
        self.local.as_deref()
    }

    /// Every object below the root
    pub async fn list(&self) -> Result<Vec<ObjectMeta>> {
        let prefix = (!self.root.as_ref().is_empty()).then_some(&self.root);
        Ok(self.store.list(prefix).try_collect().await?)
    }

    /// `location` relative to the root, `None` when it lies elsewhere
    pub fn relative(&self, location: &Path) -> Option<String> {
        let root = self.root.as_ref();
        let relative = location.as_ref().strip_prefix(root)?;
        let relative = if root.is_empty() {
            relative
        } else {
            relative.strip_prefix('/')?
        };
        (!relative.is_empty()).then(|| relative.to_string())
    }

    /// Absolute object path for a path relative to the root
    pub fn child(&self, relative: &str) -> Result<Path> {
        let root = self.root.as_ref();
        if root.is_empty() {
            Ok(Path::parse(relative)?)
        } else {
            Ok(Path::parse(format!("{root}/{relative}"))?)
        }
    }
}

/// Local directory for `location`, `None` for remote URLs
fn local_path(location: &str) -> Result<Option<PathBuf>> {
    if !location.contains("://") {
        return Ok(Some(PathBuf::from(location)));
    }
    if location.starts_with("file://") {
        let url = Url::parse(location)
            .map_err(|e| StorageError::InvalidRemote(format!("{location}: {e}")))?;
        let path = url
            .to_file_path()
            .map_err(|()| StorageError::InvalidRemote(location.to_string()))?;
        return Ok(Some(path));
    }
    Ok(None)
}

/// Append a path below `location`, keeping any store options
pub fn join(location: &str, child: &str) -> Result<String> {
    if !location.contains("://") {
        return Ok(PathBuf::from(location)
            .join(child)
            .to_string_lossy()
            .to_string());
    }
    let mut url = Url::parse(location)
        .map_err(|e| StorageError::InvalidRemote(format!("{location}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| StorageError::InvalidRemote(location.to_string()))?
        .pop_if_empty()
        .extend(child.split('/').filter(|s| !s.is_empty()));
    Ok(url.to_string())
}

/// Attach store options to a remote URL
pub fn with_options<'a>(
    location: &str,
    options: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<String> {
    let mut url = Url::parse(location)
        .map_err(|e| StorageError::InvalidRemote(format!("{location}: {e}")))?;
    url.query_pairs_mut().extend_pairs(options);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_join_keeps_options() {
        assert_eq!(
            join("s3://bucket?region=us-west-1", "reports").unwrap(),
            "s3://bucket/reports?region=us-west-1"
        );
        assert_eq!(
            join("gs://bucket/root/", "data").unwrap(),
            "gs://bucket/root/data"
        );
        assert_eq!(join("/tmp/remote", "data").unwrap(), "/tmp/remote/data");
    }

    #[test]
    fn test_with_options_round_trip() {
        let remote = with_options("s3://bucket", [("region", "us-east-1"), ("token", "a/b+c")]).unwrap();
        assert_eq!(remote, "s3://bucket?region=us-east-1&token=a%2Fb%2Bc");
        assert_eq!(
            join(&remote, "data").unwrap(),
            "s3://bucket/data?region=us-east-1&token=a%2Fb%2Bc"
        );
    }

    #[tokio::test]
    async fn test_missing_local_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent");
        let err = Endpoint::resolve(missing.to_str().unwrap(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));

        let endpoint = Endpoint::resolve(missing.to_str().unwrap(), true)
            .await
            .unwrap();
        assert!(missing.is_dir());
        assert!(endpoint.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_url_is_local() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/b.txt"), "x").unwrap();

        let url = Url::from_directory_path(dir.path()).unwrap();
        let endpoint = Endpoint::resolve(url.as_str(), false).await.unwrap();
        let objects = endpoint.list().await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(
            endpoint.relative(&objects[0].location).as_deref(),
            Some("a/b.txt")
        );
    }

    #[test]
    fn test_unknown_scheme() {
        assert!(matches!(
            Endpoint::resolve_remote("ftp://host/path"),
            Err(StorageError::InvalidRemote(_))
        ));
    }
}
