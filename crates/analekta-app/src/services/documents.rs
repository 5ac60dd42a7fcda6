use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::fs;

/// Errors emitted by document storage operations.
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("invalid bucket name `{0}`")]
    InvalidBucket(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DocumentStoreError {
    fn from(e: std::io::Error) -> Self {
        DocumentStoreError::Io(e.to_string())
    }
}

/// Trait abstracting over bucketed object storage for input documents and
/// extraction outputs. The filesystem implementation below is the default;
/// an object-storage backend slots in behind the same seam.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// List every key in `bucket` starting with `prefix`, in lexicographic
    /// order. An empty prefix lists the whole bucket.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, DocumentStoreError>;

    /// Fetch an object's bytes, or `NotFound`.
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, DocumentStoreError>;

    /// Write an object, replacing any existing content at the key. The
    /// content type is advisory; backends without object metadata ignore it.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), DocumentStoreError>;

    /// Copy an object within a bucket.
    async fn copy(&self, bucket: &str, from: &str, to: &str) -> Result<(), DocumentStoreError>;
}

/// Filesystem document store: `<root>/<bucket>/<key>`, keys using forward
/// slashes. Keys are validated against traversal before touching the disk.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, DocumentStoreError> {
        if bucket.is_empty() || bucket.contains('/') || bucket.contains("..") {
            return Err(DocumentStoreError::InvalidBucket(bucket.to_string()));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, DocumentStoreError> {
        let dir = self.bucket_dir(bucket)?;
        validate_key(key)?;
        Ok(dir.join(key))
    }
}

fn validate_key(key: &str) -> Result<(), DocumentStoreError> {
    if key.is_empty() || key.starts_with('/') || key.ends_with('/') {
        return Err(DocumentStoreError::InvalidKey(key.to_string()));
    }
    let path = Path::new(key);
    let traversal = path
        .components()
        .any(|component| !matches!(component, Component::Normal(_)));
    if traversal {
        return Err(DocumentStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Collect every file under `dir` as a `/`-separated key relative to `dir`.
async fn collect_keys(dir: &Path) -> Result<Vec<String>, DocumentStoreError> {
    let mut keys = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = match fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(dir)
                    .map_err(|e| DocumentStoreError::Io(e.to_string()))?;
                let key = relative
                    .components()
                    .filter_map(|component| match component {
                        Component::Normal(part) => part.to_str(),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("/");
                keys.push(key);
            }
        }
    }

    keys.sort();
    Ok(keys)
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, DocumentStoreError> {
        let dir = self.bucket_dir(bucket)?;
        let keys = collect_keys(&dir).await?;
        Ok(keys
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, DocumentStoreError> {
        let path = self.object_path(bucket, key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(DocumentStoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        _content_type: &str,
    ) -> Result<(), DocumentStoreError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, body.as_ref()).await?;
        Ok(())
    }

    async fn copy(&self, bucket: &str, from: &str, to: &str) -> Result<(), DocumentStoreError> {
        let source = self.object_path(bucket, from)?;
        let target = self.object_path(bucket, to)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::copy(&source, &target).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(DocumentStoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: from.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}
