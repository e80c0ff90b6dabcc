//! Revision indexer and revisions API.
//!
//! `build_index` rebuilds one `revisions.txt` by scanning a package subtree.
//! `RevisionsApi` is the public facade used by upload handlers and the
//! full-package maintenance sweep.

use crate::blob::BlobStore;
use crate::error::{CoreError, ErrorKind, Result};
use crate::lock;
use crate::path::{self, Coordinate, PackageHash, PKG_BIN_LIST, PKG_SRC_LIST};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// One entry in a `revisions.txt` document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevisionEntry {
    pub revision: String,
    pub time: String,
}

/// The `revisions.txt` document shape.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RevisionIndex {
    pub revisions: Vec<RevisionEntry>,
}

fn iso8601_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// List the immediate child segments of `dir` present in `store`, derived
/// from the flat key listing (the store has no native directory concept).
async fn list_immediate_children(store: &dyn BlobStore, dir: &str) -> Result<Vec<String>> {
    let prefix = format!("{dir}/");
    let keys = store.list(&prefix).await?;
    let mut children = BTreeSet::new();
    for key in keys {
        if let Some(rest) = key.strip_prefix(&prefix) {
            if let Some(first) = rest.split('/').next() {
                if !first.is_empty() {
                    children.insert(first.to_string());
                }
            }
        }
    }
    Ok(children.into_iter().collect())
}

/// Candidate revision numbers: immediate children of `dir` that parse as
/// non-negative integers.
async fn candidate_revisions(store: &dyn BlobStore, dir: &str) -> Result<Vec<u64>> {
    let children = list_immediate_children(store, dir).await?;
    let mut revisions: Vec<u64> = children.iter().filter_map(|c| c.parse::<u64>().ok()).collect();
    revisions.sort_unstable();
    Ok(revisions)
}

/// Rebuild one `revisions.txt`. `key_of(filename, revision)` builds the
/// storage key for a canonical file beneath a candidate revision.
///
/// Returns the ascending list of valid revisions. A blob-store fault during
/// listing or the final write is fatal (`IndexFault`); a missing file during
/// the existence sweep merely excludes that revision.
pub async fn build_index(
    store: &dyn BlobStore,
    dir: &str,
    canonical_files: &[&str],
    key_of: impl Fn(&str, u64) -> String,
) -> Result<Vec<u64>> {
    let candidates = candidate_revisions(store, dir).await.map_err(|e| {
        tracing::warn!(dir, error = %e.message, "failed to list candidate revisions");
        CoreError::index_fault(format!("failed to list {dir}: {}", e.message))
    })?;

    let mut valid = Vec::new();
    for rev in candidates {
        let mut all_present = true;
        for filename in canonical_files {
            match store.exists(&key_of(filename, rev)).await {
                Ok(true) => {}
                Ok(false) => {
                    all_present = false;
                    break;
                }
                Err(e) => {
                    return Err(CoreError::index_fault(format!(
                        "failed to check {filename} at revision {rev}: {}",
                        e.message
                    )));
                }
            }
        }
        if all_present {
            valid.push(rev);
        }
    }

    // Preserve the timestamp of a revision that was already indexed; only a
    // revision appearing for the first time gets stamped with now.
    let previous = read_revision_entries(store, dir).await.unwrap_or_default();
    let now = iso8601_now();
    let entries: Vec<RevisionEntry> = valid
        .iter()
        .map(|r| {
            let revision = r.to_string();
            let time = previous.iter().find(|e| e.revision == revision).map(|e| e.time.clone()).unwrap_or_else(|| now.clone());
            RevisionEntry { revision, time }
        })
        .collect();
    write_revision_entries(store, dir, &entries).await.map_err(|e| {
        CoreError::index_fault(format!("failed to write {dir}/revisions.txt: {}", e.message))
    })?;

    Ok(valid)
}

/// Parse a `revisions.txt` document, returning its entries (revision id and
/// upload timestamp) in file order. An absent file is not an error — it
/// yields an empty list.
async fn read_revision_entries(store: &dyn BlobStore, dir: &str) -> Result<Vec<RevisionEntry>> {
    let key = format!("{dir}/revisions.txt");
    match store.exists(&key).await? {
        false => Ok(Vec::new()),
        true => {
            let bytes = store.get(&key).await?;
            let doc: RevisionIndex = serde_json::from_slice(&bytes)
                .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "malformed revisions.txt", e))?;
            Ok(doc.revisions)
        }
    }
}

async fn read_revisions(store: &dyn BlobStore, dir: &str) -> Result<Vec<u64>> {
    Ok(read_revision_entries(store, dir).await?.iter().filter_map(|e| e.revision.parse::<u64>().ok()).collect())
}

async fn write_revision_entries(store: &dyn BlobStore, dir: &str, entries: &[RevisionEntry]) -> Result<()> {
    let doc = RevisionIndex { revisions: entries.to_vec() };
    let body = serde_json::to_vec(&doc)
        .map_err(|e| CoreError::with_source(ErrorKind::StoreFault, "failed to serialize revisions.txt", e))?;
    store.put(&format!("{dir}/revisions.txt"), Bytes::from(body)).await
}

async fn write_revisions(store: &dyn BlobStore, dir: &str, revisions: &[u64]) -> Result<()> {
    let previous = read_revision_entries(store, dir).await.unwrap_or_default();
    let now = iso8601_now();
    let entries: Vec<RevisionEntry> = revisions
        .iter()
        .map(|r| {
            let revision = r.to_string();
            let time = previous.iter().find(|e| e.revision == revision).map(|e| e.time.clone()).unwrap_or_else(|| now.clone());
            RevisionEntry { revision, time }
        })
        .collect();
    write_revision_entries(store, dir, &entries).await
}

/// Public facade over the indexer: recipe/binary index maintenance and
/// full-package updates, all serialized through the coordinate lock.
pub struct RevisionsApi {
    store: Arc<dyn BlobStore>,
    coord: Coordinate,
    lock_ttl: Duration,
}

impl RevisionsApi {
    pub fn new(store: Arc<dyn BlobStore>, coord: Coordinate) -> Self {
        Self { store, coord, lock_ttl: lock::DEFAULT_TTL }
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    async fn with_lock<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let handle = lock::acquire(Arc::clone(&self.store), &self.coord.root_key(), self.lock_ttl).await?;
        let result = f().await;
        handle.release().await?;
        result
    }

    /// Append a revision entry without scanning files, used after a
    /// successful recipe upload.
    pub async fn add_recipe_revision(&self, rev: u64) -> Result<()> {
        self.with_lock(|| async {
            let mut revisions = read_revisions(&*self.store, &self.coord.root_key()).await?;
            if !revisions.contains(&rev) {
                revisions.push(rev);
                revisions.sort_unstable();
            }
            write_revisions(&*self.store, &self.coord.root_key(), &revisions).await
        })
        .await
    }

    /// Remove a revision entry, returning whether it was present.
    pub async fn remove_recipe_revision(&self, rev: u64) -> Result<bool> {
        self.with_lock(|| async {
            let mut revisions = read_revisions(&*self.store, &self.coord.root_key()).await?;
            let existed = revisions.contains(&rev);
            revisions.retain(|r| *r != rev);
            write_revisions(&*self.store, &self.coord.root_key(), &revisions).await?;
            Ok(existed)
        })
        .await
    }

    /// Recipe revisions currently listed in the index, in file order.
    pub async fn get_recipe_revisions(&self) -> Result<Vec<u64>> {
        read_revisions(&*self.store, &self.coord.root_key()).await
    }

    /// Binary revisions currently listed in the index, in file order.
    pub async fn get_binary_revisions(&self, recipe_rev: u64, hash: &PackageHash) -> Result<Vec<u64>> {
        read_revisions(&*self.store, &path::binary_root(&self.coord, recipe_rev, hash)).await
    }

    /// Recipe revision entries (id and upload timestamp), in file order.
    /// The last entry is the latest recipe revision.
    pub async fn get_recipe_revision_entries(&self) -> Result<Vec<RevisionEntry>> {
        read_revision_entries(&*self.store, &self.coord.root_key()).await
    }

    /// Binary revision entries (id and upload timestamp), in file order.
    /// The last entry is the latest binary revision.
    pub async fn get_binary_revision_entries(&self, recipe_rev: u64, hash: &PackageHash) -> Result<Vec<RevisionEntry>> {
        read_revision_entries(&*self.store, &path::binary_root(&self.coord, recipe_rev, hash)).await
    }

    /// Rebuild the recipe index at the coordinate root against
    /// `PKG_SRC_LIST`.
    pub async fn update_recipe_index(&self) -> Result<Vec<u64>> {
        let coord = self.coord.clone();
        self.with_lock(|| async move {
            build_index(&*self.store, &coord.root_key(), PKG_SRC_LIST, |filename, rev| {
                path::recipe_key(&coord, rev, filename)
            })
            .await
        })
        .await
    }

    /// Rebuild a binary index against `PKG_BIN_LIST`. Still locks at the
    /// coordinate root, not the binary dir, so it cannot interleave with a
    /// concurrent recipe-index rebuild for the same package.
    pub async fn update_binary_index(&self, recipe_rev: u64, hash: &PackageHash) -> Result<Vec<u64>> {
        let coord = self.coord.clone();
        let hash = hash.clone();
        self.with_lock(|| async move {
            let dir = path::binary_root(&coord, recipe_rev, &hash);
            build_index(&*self.store, &dir, PKG_BIN_LIST, move |filename, bin_rev| {
                path::binary_key(&coord, recipe_rev, &hash, bin_rev, filename)
            })
            .await
        })
        .await
    }

    /// Update the recipe index, then rebuild every binary index beneath
    /// every resulting recipe revision. Errors in one binary do not abort
    /// the others; they are collected and returned together.
    ///
    /// A failure in `update_recipe_index` itself short-circuits and returns
    /// `Err` before any binaries are touched.
    pub async fn full_index_update(&self) -> Result<Vec<(String, CoreError)>> {
        let recipe_revisions = self.update_recipe_index().await?;

        let mut errors = Vec::new();
        for recipe_rev in recipe_revisions {
            let package_dir = format!("{}/{recipe_rev}/package", self.coord.root_key());
            let hashes = match list_immediate_children(&*self.store, &package_dir).await {
                Ok(hashes) => hashes,
                Err(e) => {
                    errors.push((format!("recipe-rev-{recipe_rev}"), e));
                    continue;
                }
            };
            for raw_hash in hashes {
                let Ok(hash) = PackageHash::parse(&raw_hash) else { continue };
                if let Err(e) = self.update_binary_index(recipe_rev, &hash).await {
                    errors.push((raw_hash, e));
                }
            }
        }

        Ok(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;

    async fn seed_zlib(store: &dyn BlobStore) {
        let coord = Coordinate::new("zlib", "1.2.11");
        for filename in PKG_SRC_LIST {
            store.put(&path::recipe_key(&coord, 0, filename), Bytes::from_static(b"x")).await.unwrap();
        }
        let hash = PackageHash::parse("6af9cc7cb931c5ad942174fd7838eb655717c709").unwrap();
        for filename in PKG_BIN_LIST {
            store.put(&path::binary_key(&coord, 0, &hash, 0, filename), Bytes::from_static(b"x")).await.unwrap();
        }
    }

    #[tokio::test]
    async fn recipe_index_over_complete_package() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        seed_zlib(&*store).await;
        let coord = Coordinate::new("zlib", "1.2.11");
        let api = RevisionsApi::new(Arc::clone(&store), coord.clone());

        let revisions = api.update_recipe_index().await.unwrap();
        assert_eq!(revisions, vec![0]);

        let bytes = store.get(&format!("{}/revisions.txt", coord.root_key())).await.unwrap();
        let doc: RevisionIndex = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc.revisions.len(), 1);
        assert_eq!(doc.revisions[0].revision, "0");
        assert!(chrono::DateTime::parse_from_rfc3339(&doc.revisions[0].time.replace('Z', "+00:00")).is_ok());
    }

    #[tokio::test]
    async fn binary_index_over_complete_package() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        seed_zlib(&*store).await;
        let coord = Coordinate::new("zlib", "1.2.11");
        let api = RevisionsApi::new(Arc::clone(&store), coord);
        let hash = PackageHash::parse("6af9cc7cb931c5ad942174fd7838eb655717c709").unwrap();

        let revisions = api.update_binary_index(0, &hash).await.unwrap();
        assert_eq!(revisions, vec![0]);
    }

    #[tokio::test]
    async fn incomplete_revision_is_excluded() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let coord = Coordinate::new("zlib", "1.2.11");
        // Only two of four canonical files present at revision 0.
        store.put(&path::recipe_key(&coord, 0, "conanfile.py"), Bytes::from_static(b"x")).await.unwrap();
        store.put(&path::recipe_key(&coord, 0, "conanmanifest.txt"), Bytes::from_static(b"x")).await.unwrap();

        let api = RevisionsApi::new(Arc::clone(&store), coord);
        let revisions = api.update_recipe_index().await.unwrap();
        assert!(revisions.is_empty());
    }

    #[tokio::test]
    async fn non_numeric_subdirs_are_ignored() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let coord = Coordinate::new("zlib", "1.2.11");
        store.put(&format!("{}/latest/export/conanfile.py", coord.root_key()), Bytes::new()).await.unwrap();

        let api = RevisionsApi::new(Arc::clone(&store), coord);
        let revisions = api.update_recipe_index().await.unwrap();
        assert!(revisions.is_empty());
    }

    #[tokio::test]
    async fn empty_storage_yields_empty_index() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let coord = Coordinate::new("nothing", "0.0.0");
        let api = RevisionsApi::new(Arc::clone(&store), coord.clone());
        let revisions = api.update_recipe_index().await.unwrap();
        assert!(revisions.is_empty());

        let bytes = store.get(&format!("{}/revisions.txt", coord.root_key())).await.unwrap();
        let doc: RevisionIndex = serde_json::from_slice(&bytes).unwrap();
        assert!(doc.revisions.is_empty());
    }

    #[tokio::test]
    async fn full_index_update_rebuilds_every_binary() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        seed_zlib(&*store).await;
        let coord = Coordinate::new("zlib", "1.2.11");
        let api = RevisionsApi::new(Arc::clone(&store), coord.clone());

        let errors = api.full_index_update().await.unwrap();
        assert!(errors.is_empty());

        let hash = PackageHash::parse("6af9cc7cb931c5ad942174fd7838eb655717c709").unwrap();
        let revisions = api.get_binary_revisions(0, &hash).await.unwrap();
        assert_eq!(revisions, vec![0]);
    }

    #[tokio::test]
    async fn add_and_remove_recipe_revision() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let coord = Coordinate::new("zmqpp", "4.2.0");
        let api = RevisionsApi::new(Arc::clone(&store), coord);

        api.add_recipe_revision(0).await.unwrap();
        assert_eq!(api.get_recipe_revisions().await.unwrap(), vec![0]);

        let existed = api.remove_recipe_revision(0).await.unwrap();
        assert!(existed);
        assert!(api.get_recipe_revisions().await.unwrap().is_empty());

        let existed_again = api.remove_recipe_revision(0).await.unwrap();
        assert!(!existed_again);
    }
}
