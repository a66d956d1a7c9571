//! The external blob store collaborator: written by workers for oversized
//! results, read and conditionally deleted by the Wait Coordinator. Out of
//! scope per spec.md §1 beyond its interface (§6).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::BlobStoreError;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, job_id: Uuid) -> Result<Option<Vec<serde_json::Value>>, BlobStoreError>;
    async fn delete(&self, job_id: Uuid) -> Result<(), BlobStoreError>;
}

/// In-memory blob store double for tests and example wiring.
#[derive(Default)]
pub struct LocalBlobStore {
    blobs: Mutex<HashMap<Uuid, Vec<serde_json::Value>>>,
}

impl LocalBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, job_id: Uuid, documents: Vec<serde_json::Value>) {
        self.blobs.lock().unwrap().insert(job_id, documents);
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn get(&self, job_id: Uuid) -> Result<Option<Vec<serde_json::Value>>, BlobStoreError> {
        Ok(self.blobs.lock().unwrap().get(&job_id).cloned())
    }

    async fn delete(&self, job_id: Uuid) -> Result<(), BlobStoreError> {
        self.blobs.lock().unwrap().remove(&job_id);
        Ok(())
    }
}
