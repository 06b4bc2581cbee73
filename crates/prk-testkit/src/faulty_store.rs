use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prk_db::MemoryTransactionStore;
use prk_reconcile::{StoreError, TransactionStore};
use prk_schemas::{CanonicalTransaction, VisitKey};
use uuid::Uuid;

/// Wraps a [`MemoryTransactionStore`] and injects transport failures,
/// latency, and lost update races.
#[derive(Debug)]
pub struct FaultyStore {
    inner: Arc<MemoryTransactionStore>,
    calls: AtomicUsize,
    /// 1-based call number from which every call fails.
    fail_from_call: Option<usize>,
    delay: Option<Duration>,
    /// Versioned updates that lose a race to a concurrent writer.
    races: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryTransactionStore>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            fail_from_call: None,
            delay: None,
            races: AtomicUsize::new(0),
        }
    }

    pub fn fail_from_call(mut self, n: usize) -> Self {
        self.fail_from_call = Some(n);
        self
    }

    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// The next `n` versioned updates find that another writer bumped the
    /// record between match and write.
    pub fn lose_update_races(self, n: usize) -> Self {
        self.races.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryTransactionStore {
        &self.inner
    }

    async fn gate(&self, op: &str) -> Result<(), StoreError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        match self.fail_from_call {
            Some(from) if n >= from => Err(StoreError::Unavailable(format!(
                "injected failure on {op} (call {n})"
            ))),
            _ => Ok(()),
        }
    }

    fn take_race(&self) -> bool {
        self.races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl TransactionStore for FaultyStore {
    async fn find_by_key(&self, key: &VisitKey) -> Result<Vec<CanonicalTransaction>, StoreError> {
        self.gate("find_by_key").await?;
        self.inner.find_by_key(key).await
    }

    async fn find_all_by_matricula(
        &self,
        parking_id: i64,
        matricula: &str,
    ) -> Result<Vec<CanonicalTransaction>, StoreError> {
        self.gate("find_all_by_matricula").await?;
        self.inner.find_all_by_matricula(parking_id, matricula).await
    }

    async fn insert(&self, tx: CanonicalTransaction) -> Result<CanonicalTransaction, StoreError> {
        self.gate("insert").await?;
        self.inner.insert(tx).await
    }

    async fn update_versioned(
        &self,
        tx: CanonicalTransaction,
        expected_version: i64,
    ) -> Result<CanonicalTransaction, StoreError> {
        self.gate("update_versioned").await?;
        if let Some(id) = tx.id {
            if self.take_race() {
                if let Some(current) = self.inner.get(id).await? {
                    let v = current.version;
                    self.inner.update_versioned(current, v).await?;
                }
            }
        }
        self.inner.update_versioned(tx, expected_version).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<CanonicalTransaction>, StoreError> {
        self.gate("get").await?;
        self.inner.get(id).await
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, StoreError> {
        self.gate("soft_delete").await?;
        self.inner.soft_delete(id).await
    }
}
