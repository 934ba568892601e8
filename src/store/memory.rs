//! In-memory record store.
//!
//! Not durable. Each call runs as one critical section over the whole
//! collection, which is what makes `find_one_and_update` linearizable here.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Filter, RecordStore, Sort, Update};
use crate::error::{Error, Result};
use crate::model::{NewRecord, Record, RecordId};

/// In-memory collection. Clones share the same records.
#[derive(Clone)]
pub struct MemoryStore {
    name: String,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<RecordId, Record>,
    next_id: i64,
    indexed: bool,
}

impl Inner {
    fn insert(&mut self, new: NewRecord) -> RecordId {
        self.next_id += 1;
        let id = RecordId(self.next_id);
        self.records.insert(
            id,
            Record {
                id,
                payload: new.payload,
                visible: new.visible,
                ack: None,
                tries: 0,
                deleted: None,
            },
        );
        id
    }
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Whether `ensure_indexes` has been called on this collection.
    pub async fn is_indexed(&self) -> bool {
        self.inner.lock().await.indexed
    }

    /// Copy of a record by id, for inspection in tests and tooling.
    pub async fn get(&self, id: RecordId) -> Option<Record> {
        self.inner.lock().await.records.get(&id).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn collection(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, record: NewRecord) -> Result<RecordId> {
        Ok(self.inner.lock().await.insert(record))
    }

    async fn insert_many(&self, records: Vec<NewRecord>) -> Result<Vec<RecordId>> {
        if records.is_empty() {
            return Err(Error::EmptyBatch);
        }
        let mut inner = self.inner.lock().await;
        Ok(records.into_iter().map(|r| inner.insert(r)).collect())
    }

    async fn find_one_and_update(
        &self,
        filter: Filter,
        update: Update,
        _sort: Sort,
    ) -> Result<Option<Record>> {
        let mut inner = self.inner.lock().await;

        // BTreeMap iterates in id order, so Natural and IdAscending coincide.
        let Some(id) = inner
            .records
            .values()
            .find(|r| filter.matches(r))
            .map(|r| r.id)
        else {
            return Ok(None);
        };

        if let Update::Claim { ack, .. } = &update {
            let taken = inner
                .records
                .values()
                .any(|r| r.id != id && r.ack.as_deref() == Some(ack.as_str()));
            if taken {
                return Err(Error::DuplicateAck);
            }
        }

        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| Error::Other(format!("record {id} vanished mid-update")))?;
        update.apply(record);
        Ok(Some(record.clone()))
    }

    async fn count(&self, filter: Filter) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.records.values().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn delete_many(&self, filter: Filter) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.records.len();
        inner.records.retain(|_, r| !filter.matches(r));
        Ok((before - inner.records.len()) as u64)
    }

    async fn ensure_indexes(&self) -> Result<()> {
        self.inner.lock().await.indexed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;

    #[tokio::test]
    async fn insert_many_assigns_ascending_ids() {
        let store = MemoryStore::new("t");
        let now = Utc::now();
        let ids = store
            .insert_many(vec![
                NewRecord::new(json!(1), now),
                NewRecord::new(json!(2), now),
                NewRecord::new(json!(3), now),
            ])
            .await
            .unwrap();
        assert_eq!(ids, vec![RecordId(1), RecordId(2), RecordId(3)]);
    }

    #[tokio::test]
    async fn insert_many_rejects_empty_batch() {
        let store = MemoryStore::new("t");
        let err = store.insert_many(vec![]).await.unwrap_err();
        assert!(matches!(err, Error::EmptyBatch));
    }

    #[tokio::test]
    async fn find_one_and_update_picks_smallest_matching_id() {
        let store = MemoryStore::new("t");
        let now = Utc::now();
        store.insert_one(NewRecord::new(json!("a"), now)).await.unwrap();
        store.insert_one(NewRecord::new(json!("b"), now)).await.unwrap();

        let claimed = store
            .find_one_and_update(
                Filter::Available { now },
                Update::Claim {
                    ack: "x".into(),
                    visible: now + Duration::seconds(30),
                },
                Sort::IdAscending,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, RecordId(1));
        assert_eq!(claimed.tries, 1);
        assert_eq!(claimed.ack.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn duplicate_ack_is_rejected() {
        let store = MemoryStore::new("t");
        let now = Utc::now();
        store.insert_one(NewRecord::new(json!("a"), now)).await.unwrap();
        store.insert_one(NewRecord::new(json!("b"), now)).await.unwrap();

        let claim = Update::Claim {
            ack: "same".into(),
            visible: now + Duration::seconds(30),
        };
        store
            .find_one_and_update(Filter::Available { now }, claim.clone(), Sort::IdAscending)
            .await
            .unwrap();
        let err = store
            .find_one_and_update(Filter::Available { now }, claim, Sort::IdAscending)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateAck));
    }

    #[tokio::test]
    async fn delete_many_returns_removed_count() {
        let store = MemoryStore::new("t");
        let now = Utc::now();
        let id = store.insert_one(NewRecord::new(json!("a"), now)).await.unwrap();
        store.insert_one(NewRecord::new(json!("b"), now)).await.unwrap();
        store
            .find_one_and_update(
                Filter::All,
                Update::Resolve { deleted: now },
                Sort::IdAscending,
            )
            .await
            .unwrap();

        assert_eq!(store.delete_many(Filter::Done).await.unwrap(), 1);
        assert!(store.get(id).await.is_none());
        assert_eq!(store.count(Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clones_share_records() {
        let store = MemoryStore::new("t");
        let other = store.clone();
        store
            .insert_one(NewRecord::new(json!("a"), Utc::now()))
            .await
            .unwrap();
        assert_eq!(other.count(Filter::All).await.unwrap(), 1);
        assert!(!other.is_indexed().await);
        store.ensure_indexes().await.unwrap();
        assert!(other.is_indexed().await);
    }
}
