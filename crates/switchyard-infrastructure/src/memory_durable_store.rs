//! In-process durable tier.

use crate::fault::FaultSwitch;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use switchyard_core::state::{
    Document, DocumentFilter, DurableStore, Precondition, StoreError, StoreResult,
};

const BACKEND: &str = "memory-durable";

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, (u64, Value)>>,
    last_version: u64,
}

/// Collection → id → versioned document, held in memory.
#[derive(Default)]
pub struct InMemoryDurableStore {
    state: Mutex<State>,
    faults: FaultSwitch,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultSwitch {
        &self.faults
    }

    /// Number of documents in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        self.state()
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn enter(&self) -> StoreResult<()> {
        if self.faults.pass().await {
            Ok(())
        } else {
            Err(StoreError::unavailable(BACKEND, "simulated outage"))
        }
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
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
        self.enter().await?;
        let mut state = self.state();
        state.last_version += 1;
        let version = state.last_version;

        let documents = state.collections.entry(collection.to_string()).or_default();
        let current = documents.get(id).map(|(v, _)| *v);
        if !precondition.holds(current) {
            return Err(StoreError::conflict(
                format!("{}/{}", collection, id),
                precondition.describe_failure(current),
            ));
        }
        documents.insert(id.to_string(), (version, body));
        Ok(version)
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.enter().await?;
        Ok(self
            .state()
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|(version, body)| Document {
                id: id.to_string(),
                version: *version,
                body: body.clone(),
            }))
    }

    async fn query(&self, collection: &str, filter: &DocumentFilter) -> StoreResult<Vec<Document>> {
        self.enter().await?;
        let state = self.state();
        let Some(documents) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(documents
            .iter()
            .filter(|(_, (_, body))| filter.matches(body))
            .take(filter.limit.unwrap_or(usize::MAX))
            .map(|(id, (version, body))| Document {
                id: id.clone(),
                version: *version,
                body: body.clone(),
            })
            .collect())
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        self.enter().await?;
        Ok(self
            .state()
            .collections
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(id).is_some()))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.enter().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_with_preconditions() {
        let store = InMemoryDurableStore::new();
        let v1 = store
            .upsert("c", "a", json!({"n": 1}), Precondition::Absent)
            .await
            .unwrap();
        assert!(
            store
                .upsert("c", "a", json!({"n": 2}), Precondition::Absent)
                .await
                .unwrap_err()
                .is_conflict()
        );
        let v2 = store
            .upsert("c", "a", json!({"n": 2}), Precondition::Version(v1))
            .await
            .unwrap();
        assert!(v2 > v1);

        let doc = store.get("c", "a").await.unwrap().unwrap();
        assert_eq!(doc.version, v2);
        assert_eq!(doc.body, json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_query_filters_and_limits() {
        let store = InMemoryDurableStore::new();
        for (id, owner) in [("a", "s1"), ("b", "s2"), ("c", "s1"), ("d", "s1")] {
            store
                .upsert("c", id, json!({"owner": owner}), Precondition::None)
                .await
                .unwrap();
        }

        let filter = DocumentFilter::new().eq("owner", json!("s1"));
        let ids: Vec<_> = store
            .query("c", &filter)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["a", "c", "d"]);

        let limited = store.query("c", &filter.limit(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert!(store.query("other", &DocumentFilter::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_outage() {
        let store = InMemoryDurableStore::new();
        store
            .upsert("c", "a", json!(1), Precondition::None)
            .await
            .unwrap();
        assert!(store.delete("c", "a").await.unwrap());
        assert!(!store.delete("c", "a").await.unwrap());

        store.faults().set_available(false);
        assert!(store.get("c", "a").await.unwrap_err().is_transient());
    }
}
