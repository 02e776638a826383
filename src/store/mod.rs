//! Document store contract.
//!
//! Every piece of core logic talks to persistence through [`Store`]: plain
//! JSON documents grouped in collections, partial updates, an insert-if-absent
//! primitive for the exactly-once claims, and a change feed that observers
//! subscribe to.

pub mod filter;
pub mod memory;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use tokio::sync::broadcast;

pub use filter::Filter;
pub use memory::InMemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum Collection {
    Employees,
    Departments,
    Status,
    Attendance,
    AttendanceSummary,
    Messages,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{collection}/{id} not found")]
    NotFound { collection: Collection, id: String },

    #[error("document is not a JSON object")]
    NotAnObject,

    #[error("failed to (de)serialize document: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// One write as seen by subscribers. `doc` is the document after the write
/// (absent for deletes).
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub id: String,
    pub kind: ChangeKind,
    pub doc: Option<Value>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Value>>;

    /// Returns `(id, document)` pairs matching `filter`, in id order.
    async fn query(&self, collection: Collection, filter: &Filter) -> StoreResult<Vec<(String, Value)>>;

    /// Inserts under a generated id.
    async fn create(&self, collection: Collection, doc: Value) -> StoreResult<String>;

    /// Inserts under `id` unless a document already lives there.
    /// Returns `false` when the id was taken.
    async fn create_if_absent(&self, collection: Collection, id: &str, doc: Value) -> StoreResult<bool>;

    /// Merges `patch` into an existing document. `null` fields are removed.
    async fn update(&self, collection: Collection, id: &str, patch: Value) -> StoreResult<()>;

    /// Returns whether a document was removed.
    async fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool>;

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Shallow merge-patch, the semantics `update` promises.
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) -> StoreResult<()> {
    let target = target.as_object_mut().ok_or(StoreError::NotAnObject)?;
    let patch = patch.as_object().ok_or(StoreError::NotAnObject)?;
    for (key, value) in patch {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
    Ok(())
}

pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Value> {
    let doc = serde_json::to_value(value)?;
    if !doc.is_object() {
        return Err(StoreError::NotAnObject);
    }
    Ok(doc)
}

pub async fn get_as<T: DeserializeOwned>(
    store: &dyn Store,
    collection: Collection,
    id: &str,
) -> StoreResult<Option<T>> {
    match store.get(collection, id).await? {
        Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
        None => Ok(None),
    }
}

pub async fn query_as<T: DeserializeOwned>(
    store: &dyn Store,
    collection: Collection,
    filter: &Filter,
) -> StoreResult<Vec<(String, T)>> {
    store
        .query(collection, filter)
        .await?
        .into_iter()
        .map(|(id, doc)| Ok((id, serde_json::from_value(doc)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_sets_and_removes_fields() {
        let mut doc = json!({"status": "Working", "shouldBuzz": true, "clockInTime": "x"});
        merge_patch(&mut doc, &json!({"status": "Standby", "shouldBuzz": null})).unwrap();
        assert_eq!(doc, json!({"status": "Standby", "clockInTime": "x"}));
    }

    #[test]
    fn collection_names_match_document_layout() {
        assert_eq!(Collection::AttendanceSummary.as_ref(), "attendanceSummary");
        assert_eq!(Collection::Status.to_string(), "status");
        assert_eq!("messages".parse::<Collection>().unwrap(), Collection::Messages);
    }
}
