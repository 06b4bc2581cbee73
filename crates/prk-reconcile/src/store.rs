//! Key Matcher / persistence contract.
//!
//! Implementations own soft-delete filtering, id assignment and optimistic
//! versioning; the engine never sees a deleted record and never writes
//! `version` itself.

use std::fmt;

use prk_schemas::{CanonicalTransaction, ValidationError, VisitKey};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The record is no longer at the expected version (or is gone / deleted).
    Conflict { id: Uuid, expected_version: i64 },
    NotFound { id: Uuid },
    /// Transport failure or timeout.
    Unavailable(String),
    /// The store refused the record itself.
    Validation(ValidationError),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Conflict {
                id,
                expected_version,
            } => write!(
                f,
                "version conflict on {id}: expected version {expected_version}"
            ),
            StoreError::NotFound { id } => write!(f, "transaction {id} not found"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            StoreError::Validation(e) => write!(f, "store rejected record: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<ValidationError> for StoreError {
    fn from(e: ValidationError) -> Self {
        StoreError::Validation(e)
    }
}

#[async_trait::async_trait]
pub trait TransactionStore: Send + Sync {
    /// Non-deleted records with this business key, newest first.
    async fn find_by_key(&self, key: &VisitKey) -> Result<Vec<CanonicalTransaction>, StoreError>;

    /// Every non-deleted record of `matricula` in the lot, newest first.
    async fn find_all_by_matricula(
        &self,
        parking_id: i64,
        matricula: &str,
    ) -> Result<Vec<CanonicalTransaction>, StoreError>;

    /// Persist a new record. Returns it with `id`, `version = 1`,
    /// `created_at` and `updated_at` assigned.
    async fn insert(&self, tx: CanonicalTransaction) -> Result<CanonicalTransaction, StoreError>;

    /// Replace a record whose stored version is still `expected_version`.
    /// Returns it with `version = expected_version + 1`.
    async fn update_versioned(
        &self,
        tx: CanonicalTransaction,
        expected_version: i64,
    ) -> Result<CanonicalTransaction, StoreError>;

    /// Fetch by id, including deleted records.
    async fn get(&self, id: Uuid) -> Result<Option<CanonicalTransaction>, StoreError>;

    /// Mark a record deleted. `false` when it does not exist or was already
    /// deleted.
    async fn soft_delete(&self, id: Uuid) -> Result<bool, StoreError>;
}
