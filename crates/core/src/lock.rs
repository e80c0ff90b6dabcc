//! Storage lock — a named, TTL-bounded advisory lock backed by the blob
//! store.
//!
//! Acquisition writes a uniquely-tagged sentinel blob under `<key>/.lock`
//! carrying an expiration timestamp; a fresh acquirer may steal a sentinel
//! found past its TTL. The lock is advisory and per-key — it does not
//! serialize unrelated coordinates.

use crate::blob::BlobStore;
use crate::error::{CoreError, ErrorKind, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default lock TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Serialize, Deserialize)]
struct Sentinel {
    tag: String,
    expires_at: DateTime<Utc>,
}

/// A held lock. Dropping this without calling [`LockHandle::release`] leaves
/// the sentinel in place until its TTL expires — the same outcome as a
/// writer that crashed mid-update.
pub struct LockHandle {
    store: Arc<dyn BlobStore>,
    sentinel_key: String,
    tag: String,
}

impl LockHandle {
    /// Remove the sentinel, but only if it still carries our tag — a lock
    /// that was stolen out from under us (TTL expired, another acquirer
    /// took it) must not be released by its original, late owner.
    pub async fn release(self) -> Result<()> {
        if let Ok(bytes) = self.store.get(&self.sentinel_key).await {
            if let Ok(sentinel) = serde_json::from_slice::<Sentinel>(&bytes) {
                if sentinel.tag != self.tag {
                    return Ok(());
                }
            }
        }
        self.store.delete(&self.sentinel_key).await?;
        Ok(())
    }
}

/// Acquire the advisory lock on `key`, retrying once if the current holder's
/// sentinel has not yet expired. A second failure surfaces as a
/// [`ErrorKind::StoreFault`].
pub async fn acquire(store: Arc<dyn BlobStore>, key: &str, ttl: Duration) -> Result<LockHandle> {
    match try_acquire(&store, key, ttl).await? {
        Some(handle) => Ok(handle),
        None => match try_acquire(&store, key, ttl).await? {
            Some(handle) => Ok(handle),
            None => Err(CoreError::new(ErrorKind::StoreFault, format!("lock held: {key}"))),
        },
    }
}

async fn try_acquire(store: &Arc<dyn BlobStore>, key: &str, ttl: Duration) -> Result<Option<LockHandle>> {
    let sentinel_key = format!("{key}/.lock");

    if let Ok(bytes) = store.get(&sentinel_key).await {
        if let Ok(sentinel) = serde_json::from_slice::<Sentinel>(&bytes) {
            if Utc::now() < sentinel.expires_at {
                return Ok(None);
            }
            tracing::debug!(key, tag = %sentinel.tag, "stealing expired lock");
        }
    }

    let tag = uuid::Uuid::new_v4().to_string();
    let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1));
    let sentinel = Sentinel { tag: tag.clone(), expires_at };
    let body = serde_json::to_vec(&sentinel)
        .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "failed to serialize lock sentinel", e))?;
    store.put(&sentinel_key, Bytes::from(body)).await?;

    Ok(Some(LockHandle { store: Arc::clone(store), sentinel_key, tag }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;

    #[tokio::test]
    async fn acquire_then_release_allows_reacquire() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let handle = acquire(Arc::clone(&store), "zlib/1.2.11/_/_", DEFAULT_TTL).await.unwrap();
        handle.release().await.unwrap();
        assert!(acquire(Arc::clone(&store), "zlib/1.2.11/_/_", DEFAULT_TTL).await.is_ok());
    }

    #[tokio::test]
    async fn held_lock_blocks_second_acquirer() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let _handle = acquire(Arc::clone(&store), "zlib/1.2.11/_/_", DEFAULT_TTL).await.unwrap();
        let second = acquire(Arc::clone(&store), "zlib/1.2.11/_/_", DEFAULT_TTL).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn expired_lock_is_stealable() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let _handle = acquire(Arc::clone(&store), "zlib/1.2.11/_/_", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(acquire(Arc::clone(&store), "zlib/1.2.11/_/_", DEFAULT_TTL).await.is_ok());
    }

    #[tokio::test]
    async fn locks_are_per_key() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let _a = acquire(Arc::clone(&store), "zlib/1.2.11/_/_", DEFAULT_TTL).await.unwrap();
        assert!(acquire(Arc::clone(&store), "zmqpp/4.2.0/_/_", DEFAULT_TTL).await.is_ok());
    }
}
