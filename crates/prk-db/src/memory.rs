use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use prk_reconcile::{StoreError, TransactionStore};
use prk_schemas::{CanonicalTransaction, ValidationError, VisitKey};
use uuid::Uuid;

/// In-process store with the same contract as the Postgres one.
///
/// "Newest first" is insertion order reversed, so results do not depend on
/// clock resolution.
#[derive(Debug, Default)]
pub struct MemoryTransactionStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    rows: HashMap<Uuid, Stored>,
    next_seq: u64,
}

#[derive(Debug, Clone)]
struct Stored {
    seq: u64,
    tx: CanonicalTransaction,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Inspection view; a poisoned lock still yields the rows it guards.
    fn read(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every record, deleted ones included, oldest first.
    pub fn snapshot(&self) -> Vec<CanonicalTransaction> {
        let inner = self.read();
        let mut rows: Vec<&Stored> = inner.rows.values().collect();
        rows.sort_by_key(|s| s.seq);
        rows.into_iter().map(|s| s.tx.clone()).collect()
    }

    /// Live (non-deleted) record count.
    pub fn live_count(&self) -> usize {
        self.read()
            .rows
            .values()
            .filter(|s| !s.tx.is_deleted())
            .count()
    }
}

impl Inner {
    fn live_newest_first<F>(&self, pred: F) -> Vec<CanonicalTransaction>
    where
        F: Fn(&CanonicalTransaction) -> bool,
    {
        let mut hits: Vec<&Stored> = self
            .rows
            .values()
            .filter(|s| !s.tx.is_deleted() && pred(&s.tx))
            .collect();
        hits.sort_by(|a, b| b.seq.cmp(&a.seq));
        hits.into_iter().map(|s| s.tx.clone()).collect()
    }
}

#[async_trait::async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn find_by_key(&self, key: &VisitKey) -> Result<Vec<CanonicalTransaction>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.live_newest_first(|tx| {
            tx.parking.id == key.parking_id
                && tx.sequence == key.sequence
                && tx.matricula == key.matricula
        }))
    }

    async fn find_all_by_matricula(
        &self,
        parking_id: i64,
        matricula: &str,
    ) -> Result<Vec<CanonicalTransaction>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.live_newest_first(|tx| tx.parking.id == parking_id && tx.matricula == matricula))
    }

    async fn insert(&self, mut tx: CanonicalTransaction) -> Result<CanonicalTransaction, StoreError> {
        tx.validate()?;
        let now = Utc::now();
        let id = Uuid::new_v4();
        tx.id = Some(id);
        tx.version = 1;
        tx.created_at = Some(now);
        tx.updated_at = Some(now);
        tx.deleted_at = None;

        let mut inner = self.lock()?;
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.rows.insert(id, Stored { seq, tx: tx.clone() });
        Ok(tx)
    }

    async fn update_versioned(
        &self,
        mut tx: CanonicalTransaction,
        expected_version: i64,
    ) -> Result<CanonicalTransaction, StoreError> {
        let id = tx
            .id
            .ok_or_else(|| StoreError::Validation(ValidationError::single("update without id")))?;
        tx.validate()?;

        let mut inner = self.lock()?;
        let conflict = StoreError::Conflict {
            id,
            expected_version,
        };
        let Some(stored) = inner.rows.get_mut(&id) else {
            return Err(conflict);
        };
        if stored.tx.is_deleted() || stored.tx.version != expected_version {
            return Err(conflict);
        }

        tx.version = expected_version + 1;
        tx.created_at = stored.tx.created_at;
        tx.updated_at = Some(Utc::now());
        tx.deleted_at = None;
        stored.tx = tx.clone();
        Ok(tx)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CanonicalTransaction>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.rows.get(&id).map(|s| s.tx.clone()))
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.rows.get_mut(&id) {
            Some(stored) if !stored.tx.is_deleted() => {
                let now = Utc::now();
                stored.tx.deleted_at = Some(now);
                stored.tx.updated_at = Some(now);
                stored.tx.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prk_schemas::Parking;

    fn visit(seq: &str, mat: &str) -> CanonicalTransaction {
        CanonicalTransaction::new_visit(Parking::new(6, "Monza", "monza"), seq, mat, "On-demand")
    }

    #[tokio::test]
    async fn insert_assigns_identity_and_version_one() {
        let store = MemoryTransactionStore::new();
        let tx = store.insert(visit("123", "0")).await.unwrap();
        assert!(tx.id.is_some());
        assert_eq!(tx.version, 1);
        assert!(tx.created_at.is_some());
        assert_eq!(store.live_count(), 1);
    }

    #[tokio::test]
    async fn lookups_are_newest_first_and_skip_deleted() {
        let store = MemoryTransactionStore::new();
        let a = store.insert(visit("123", "0")).await.unwrap();
        let b = store.insert(visit("123", "0")).await.unwrap();
        let _other = store.insert(visit("124", "0")).await.unwrap();

        let hits = store.find_by_key(&VisitKey::new(6, "123", "0")).await.unwrap();
        assert_eq!(hits.iter().map(|t| t.id).collect::<Vec<_>>(), vec![b.id, a.id]);

        assert!(store.soft_delete(b.id.unwrap()).await.unwrap());
        assert!(!store.soft_delete(b.id.unwrap()).await.unwrap());
        let hits = store.find_by_key(&VisitKey::new(6, "123", "0")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a.id);

        assert_eq!(store.find_all_by_matricula(6, "0").await.unwrap().len(), 2);
        assert!(store.get(b.id.unwrap()).await.unwrap().unwrap().is_deleted());
    }

    #[tokio::test]
    async fn invalid_record_is_refused() {
        let store = MemoryTransactionStore::new();
        let mut tx = visit("123", "0");
        tx.fare_amount_micros = -1;
        let err = store.insert(tx).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.live_count(), 0);
    }

    #[tokio::test]
    async fn poisoned_lock_keeps_inspection_but_fails_store_calls() {
        let store = std::sync::Arc::new(MemoryTransactionStore::new());
        store.insert(visit("123", "0")).await.unwrap();

        let holder = store.clone();
        let poisoned = std::thread::spawn(move || {
            let _guard = holder.inner.lock().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(poisoned.is_err());
        assert!(store.inner.is_poisoned());

        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(store.live_count(), 1);
        let err = store.find_by_key(&VisitKey::new(6, "123", "0")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
