//! Content-addressed blob storage for published models and accepted
//! updates. The engine only sees the `ArtifactStore` trait; an IPFS-backed
//! client drops in behind the same surface.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

pub type ContentId = String;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores bytes and returns their content id. The same bytes always
    /// yield the same id.
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentId>;

    async fn get(&self, id: &str) -> Result<Vec<u8>>;

    /// Protects a blob from collection.
    async fn pin(&self, id: &str) -> Result<()>;

    async fn unpin(&self, id: &str) -> Result<()>;
}

/// In-memory store addressing blobs by their SHA-256 hex digest.
#[derive(Default)]
pub struct MemoryArtifactStore {
    inner: RwLock<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    blobs: HashMap<ContentId, Vec<u8>>,
    pinned: HashSet<ContentId>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pinned(&self, id: &str) -> bool {
        self.inner.read().pinned.contains(id)
    }

    pub fn blob_count(&self) -> usize {
        self.inner.read().blobs.len()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentId> {
        let id = hex::encode(Sha256::digest(&bytes));
        self.inner.write().blobs.insert(id.clone(), bytes);
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>> {
        match self.inner.read().blobs.get(id) {
            Some(bytes) => Ok(bytes.clone()),
            None => bail!("unknown content id {id}"),
        }
    }

    async fn pin(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.blobs.contains_key(id) {
            bail!("cannot pin unknown content id {id}");
        }
        inner.pinned.insert(id.to_string());
        Ok(())
    }

    async fn unpin(&self, id: &str) -> Result<()> {
        self.inner.write().pinned.remove(id);
        Ok(())
    }
}
