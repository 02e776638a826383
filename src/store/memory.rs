use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use super::{
    ChangeEvent, ChangeKind, Collection, Filter, Store, StoreError, StoreResult, merge_patch,
};

const FEED_CAPACITY: usize = 1024;

/// Process-local store. Used when no database is configured and by tests.
pub struct InMemoryStore {
    collections: RwLock<HashMap<Collection, BTreeMap<String, Value>>>,
    feed: broadcast::Sender<ChangeEvent>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            collections: RwLock::new(HashMap::new()),
            feed,
        }
    }

    fn publish(&self, collection: Collection, id: &str, kind: ChangeKind, doc: Option<Value>) {
        // No receivers is fine.
        let _ = self.feed.send(ChangeEvent {
            collection,
            id: id.to_string(),
            kind,
            doc,
        });
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections.get(&collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn query(&self, collection: Collection, filter: &Filter) -> StoreResult<Vec<(String, Value)>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| filter.matches(doc))
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create(&self, collection: Collection, doc: Value) -> StoreResult<String> {
        if !doc.is_object() {
            return Err(StoreError::NotAnObject);
        }
        let id = Uuid::new_v4().to_string();
        self.collections
            .write()
            .await
            .entry(collection)
            .or_default()
            .insert(id.clone(), doc.clone());
        self.publish(collection, &id, ChangeKind::Created, Some(doc));
        Ok(id)
    }

    async fn create_if_absent(&self, collection: Collection, id: &str, doc: Value) -> StoreResult<bool> {
        if !doc.is_object() {
            return Err(StoreError::NotAnObject);
        }
        {
            let mut collections = self.collections.write().await;
            let docs = collections.entry(collection).or_default();
            if docs.contains_key(id) {
                return Ok(false);
            }
            docs.insert(id.to_string(), doc.clone());
        }
        self.publish(collection, id, ChangeKind::Created, Some(doc));
        Ok(true)
    }

    async fn update(&self, collection: Collection, id: &str, patch: Value) -> StoreResult<()> {
        let updated = {
            let mut collections = self.collections.write().await;
            let doc = collections
                .get_mut(&collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StoreError::NotFound {
                    collection,
                    id: id.to_string(),
                })?;
            merge_patch(doc, &patch)?;
            doc.clone()
        };
        self.publish(collection, id, ChangeKind::Updated, Some(updated));
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool> {
        let removed = self
            .collections
            .write()
            .await
            .get_mut(&collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            self.publish(collection, id, ChangeKind::Deleted, None);
        }
        Ok(removed)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_if_absent_claims_once() {
        let store = InMemoryStore::new();
        let first = store
            .create_if_absent(Collection::AttendanceSummary, "e1:1", json!({"n": 1}))
            .await
            .unwrap();
        let second = store
            .create_if_absent(Collection::AttendanceSummary, "e1:1", json!({"n": 2}))
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
        let doc = store.get(Collection::AttendanceSummary, "e1:1").await.unwrap();
        assert_eq!(doc, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let store = InMemoryStore::new();
        let err = store
            .update(Collection::Status, "nobody", json!({"status": "Working"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn writes_are_published_to_subscribers() {
        let store = InMemoryStore::new();
        let mut rx = store.subscribe();

        store
            .create_if_absent(Collection::Status, "e1", json!({"status": "Working"}))
            .await
            .unwrap();
        store
            .update(Collection::Status, "e1", json!({"status": "Standby"}))
            .await
            .unwrap();
        store.delete(Collection::Status, "e1").await.unwrap();

        let created = rx.recv().await.unwrap();
        assert_eq!(created.kind, ChangeKind::Created);
        let updated = rx.recv().await.unwrap();
        assert_eq!(updated.doc, Some(json!({"status": "Standby"})));
        let deleted = rx.recv().await.unwrap();
        assert_eq!(deleted.kind, ChangeKind::Deleted);
        assert!(deleted.doc.is_none());
    }
}
