//! Blob store interface — the abstract byte-addressable key/value store the
//! rest of the engine consumes. Filesystem and in-memory backends are
//! provided here; an S3-compatible backend is available behind the `s3`
//! feature for parity with real deployments.

use crate::error::{CoreError, ErrorKind, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Abstract key/value store. All operations are awaitable.
///
/// Keys are `/`-separated strings with no leading slash, e.g.
/// `zlib/1.2.11/_/_/0/export/conanfile.py`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List every key that starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Whether `key` exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Read the full contents of `key`.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Write `value` at `key`, replacing any existing content.
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;

    /// Delete `key`, returning whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Move (rename) a key, overwriting `dst` if present.
    async fn mv(&self, src: &str, dst: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Filesystem backend
// ---------------------------------------------------------------------------

/// Filesystem-backed store. Each key maps to a path under `root`. Writes
/// go through a sibling temp file and a rename, so readers of a concurrently
/// written key see either the old content or the full new content, never a
/// partial write.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.resolve(prefix);
        let mut out = Vec::new();
        walk(&dir, &self.root, &mut out).await?;
        Ok(out)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(key))
            .await
            .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "exists failed", e))?)
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let bytes = tokio::fs::read(self.resolve(key)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::not_found(format!("no such key: {key}"))
            } else {
                CoreError::with_source(ErrorKind::StoreFault, "read failed", e)
            }
        })?;
        Ok(Bytes::from(bytes))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let dest = self.resolve(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "mkdir failed", e))?;
        }
        let tmp = dest.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &value)
            .await
            .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "write failed", e))?;
        tokio::fs::rename(&tmp, &dest)
            .await
            .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "rename failed", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.resolve(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CoreError::with_source(ErrorKind::StoreFault, "delete failed", e)),
        }
    }

    async fn mv(&self, src: &str, dst: &str) -> Result<()> {
        let dst_path = self.resolve(dst);
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "mkdir failed", e))?;
        }
        tokio::fs::rename(self.resolve(src), dst_path)
            .await
            .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "move failed", e))?;
        Ok(())
    }
}

async fn walk(dir: &Path, root: &Path, out: &mut Vec<String>) -> Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CoreError::with_source(ErrorKind::StoreFault, "readdir failed", e)),
    };

    let mut subdirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "readdir failed", e))?
    {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "stat failed", e))?;
        if file_type.is_dir() {
            subdirs.push(path);
        } else {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    for sub in subdirs {
        Box::pin(walk(&sub, root, out)).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory backend (tests)
// ---------------------------------------------------------------------------

/// In-process store backed by a `DashMap`. Deterministic and fast — used by
/// unit and integration tests instead of touching a real filesystem.
#[derive(Default)]
pub struct MemoryBlobStore {
    data: Arc<DashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.data.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.data
            .get(key)
            .map(|v| v.clone())
            .ok_or_else(|| CoreError::not_found(format!("no such key: {key}")))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.data.remove(key).is_some())
    }

    async fn mv(&self, src: &str, dst: &str) -> Result<()> {
        if let Some((_, value)) = self.data.remove(src) {
            self.data.insert(dst.to_string(), value);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// S3-compatible backend (feature `s3`)
// ---------------------------------------------------------------------------

/// Thin wrapper over `object_store`'s S3 client, grounded on
/// `libobjectstore`'s `AmazonS3Builder` usage. Not exercised by the default
/// test suite — intended for parity with real deployments.
#[cfg(feature = "s3")]
pub struct S3BlobStore {
    inner: object_store::aws::AmazonS3,
}

#[cfg(feature = "s3")]
impl S3BlobStore {
    pub fn new(bucket: &str, region: &str) -> Result<Self> {
        let inner = object_store::aws::AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(region)
            .build()
            .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "failed to build S3 client", e))?;
        Ok(Self { inner })
    }
}

#[cfg(feature = "s3")]
#[async_trait]
impl BlobStore for S3BlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        use futures_util::StreamExt;
        let path = object_store::path::Path::from(prefix);
        let mut stream = self.inner.list(Some(&path));
        let mut out = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "list failed", e))?;
            out.push(meta.location.to_string());
        }
        Ok(out)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = object_store::path::Path::from(key);
        match self.inner.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(CoreError::with_source(ErrorKind::StoreFault, "head failed", e)),
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = object_store::path::Path::from(key);
        match self.inner.get(&path).await {
            Ok(result) => result
                .bytes()
                .await
                .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "read failed", e)),
            Err(object_store::Error::NotFound { .. }) => Err(CoreError::not_found(format!("no such key: {key}"))),
            Err(e) => Err(CoreError::with_source(ErrorKind::StoreFault, "get failed", e)),
        }
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let path = object_store::path::Path::from(key);
        self.inner
            .put(&path, value.into())
            .await
            .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "put failed", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = object_store::path::Path::from(key);
        match self.inner.delete(&path).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(CoreError::with_source(ErrorKind::StoreFault, "delete failed", e)),
        }
    }

    async fn mv(&self, src: &str, dst: &str) -> Result<()> {
        let src = object_store::path::Path::from(src);
        let dst = object_store::path::Path::from(dst);
        self.inner
            .rename(&src, &dst)
            .await
            .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "rename failed", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_put_get_roundtrip() {
        let store = MemoryBlobStore::new();
        store.put("a/b/c.txt", Bytes::from_static(b"hello")).await.unwrap();
        assert!(store.exists("a/b/c.txt").await.unwrap());
        assert_eq!(&store.get("a/b/c.txt").await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn memory_store_missing_key_is_not_found() {
        let store = MemoryBlobStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn memory_store_list_prefix() {
        let store = MemoryBlobStore::new();
        store.put("zlib/1.2.11/_/_/0/export/conanfile.py", Bytes::new()).await.unwrap();
        store.put("zlib/1.2.11/_/_/0/export/conanmanifest.txt", Bytes::new()).await.unwrap();
        store.put("other/thing", Bytes::new()).await.unwrap();

        let mut keys = store.list("zlib/1.2.11/_/_").await.unwrap();
        keys.sort();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn fs_store_roundtrip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        store.put("pkg/0/export/conanfile.py", Bytes::from_static(b"class Foo: pass")).await.unwrap();
        assert!(store.exists("pkg/0/export/conanfile.py").await.unwrap());
        let listed = store.list("pkg").await.unwrap();
        assert_eq!(listed, vec!["pkg/0/export/conanfile.py".to_string()]);
    }

    #[tokio::test]
    async fn fs_store_missing_list_prefix_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.list("does/not/exist").await.unwrap().is_empty());
    }
}
