//! Directory-backed durable tier.
//!
//! Layout: `<root>/<collection>/<encoded id>.json`, one JSON file per document.
//! Writes go through [`AtomicJsonFile`], so each document update is an atomic
//! tmp-file + rename under an exclusive file lock.

use crate::storage::{AtomicJsonError, AtomicJsonFile};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use switchyard_core::state::{
    Document, DocumentFilter, DurableStore, Precondition, StoreError, StoreResult,
};

const BACKEND: &str = "dir-durable";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDocument {
    id: String,
    version: u64,
    body: Value,
}

impl From<StoredDocument> for Document {
    fn from(stored: StoredDocument) -> Self {
        Document {
            id: stored.id,
            version: stored.version,
            body: stored.body,
        }
    }
}

impl From<AtomicJsonError> for StoreError {
    fn from(err: AtomicJsonError) -> Self {
        match err {
            AtomicJsonError::Json(e) => StoreError::Serialization(e.to_string()),
            other => StoreError::backend(BACKEND, other.to_string()),
        }
    }
}

/// Durable tier persisted as JSON files under a root directory.
#[derive(Debug, Clone)]
pub struct DirDurableStore {
    root: PathBuf,
}

impl DirDurableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_file(&self, collection: &str, id: &str) -> AtomicJsonFile<StoredDocument> {
        AtomicJsonFile::new(
            self.root
                .join(encode_component(collection))
                .join(format!("{}.json", encode_component(id))),
        )
    }

    async fn blocking<T, F>(f: F) -> StoreResult<T>
    where
        F: FnOnce() -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| StoreError::backend(BACKEND, format!("blocking task failed: {}", e)))?
    }
}

/// Maps an id to a safe file stem: `[A-Za-z0-9_-]` pass through, everything else is
/// percent-encoded.
fn encode_component(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

/// Next version for a document: strictly above the previous one and above the
/// current wall clock in microseconds, so recreated documents never reuse a version.
fn next_version(previous: Option<u64>) -> u64 {
    let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
    previous.map_or(now, |p| p.saturating_add(1)).max(now)
}

#[async_trait]
impl DurableStore for DirDurableStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        body: Value,
        precondition: Precondition,
    ) -> StoreResult<u64> {
        let file = self.document_file(collection, id);
        let key = format!("{}/{}", collection, id);
        let id = id.to_string();

        Self::blocking(move || {
            file.update(|slot: &mut Option<StoredDocument>| {
                let current = slot.as_ref().map(|d| d.version);
                if !precondition.holds(current) {
                    return Err(StoreError::conflict(
                        key,
                        precondition.describe_failure(current),
                    ));
                }
                let version = next_version(current);
                *slot = Some(StoredDocument { id, version, body });
                Ok(version)
            })
        })
        .await
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let file = self.document_file(collection, id);
        Self::blocking(move || Ok(file.load()?.map(Document::from))).await
    }

    async fn query(&self, collection: &str, filter: &DocumentFilter) -> StoreResult<Vec<Document>> {
        let dir = self.root.join(encode_component(collection));
        let filter = filter.clone();

        Self::blocking(move || {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(StoreError::backend(BACKEND, e.to_string())),
            };

            let mut documents = Vec::new();
            for entry in entries {
                let path = entry
                    .map_err(|e| StoreError::backend(BACKEND, e.to_string()))?
                    .path();
                let is_document = path.extension().is_some_and(|ext| ext == "json")
                    && !path
                        .file_name()
                        .is_some_and(|n| n.to_string_lossy().starts_with('.'));
                if !is_document {
                    continue;
                }
                if let Some(stored) = AtomicJsonFile::<StoredDocument>::new(path).load()? {
                    if filter.matches(&stored.body) {
                        documents.push(Document::from(stored));
                    }
                }
            }

            documents.sort_by(|a, b| a.id.cmp(&b.id));
            if let Some(limit) = filter.limit {
                documents.truncate(limit);
            }
            Ok(documents)
        })
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let file = self.document_file(collection, id);
        Self::blocking(move || {
            file.update(|slot: &mut Option<StoredDocument>| Ok(slot.take().is_some()))
        })
        .await
    }

    async fn ping(&self) -> StoreResult<()> {
        let root = self.root.clone();
        Self::blocking(move || {
            std::fs::create_dir_all(&root)
                .map_err(|e| StoreError::unavailable(BACKEND, e.to_string()))
        })
        .await
    }
}
