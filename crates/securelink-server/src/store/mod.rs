pub mod crypto;
pub mod db;
pub mod memory;
pub mod model;

pub use db::RedbStore;
pub use memory::MemoryStore;
pub use model::{SecretRecord, SecretStatus};

use crate::error::StoreError;

/// Result of [`RecordStore::compare_and_update`].
#[derive(Debug)]
pub enum CasOutcome {
    /// The predicate held and the mutation was committed. Holds the new record.
    Updated(SecretRecord),
    /// The predicate failed. Holds the current record, untouched.
    Conflict(SecretRecord),
    NotFound,
}

/// Durable mapping from secret id to [`SecretRecord`].
///
/// Implementations are shared across request workers and must be safe to call
/// concurrently. Calls are synchronous and may block on I/O, so async callers
/// run them on a blocking pool.
pub trait RecordStore: Send + Sync + 'static {
    /// Insert a new record. Fails with [`StoreError::AlreadyExists`] if `id`
    /// is taken; records are never overwritten.
    fn put(&self, id: &str, record: &SecretRecord) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<SecretRecord>, StoreError>;

    /// Evaluate `expected` against the current record and, only if it holds,
    /// apply `mutation` and persist the result, all as one serialized step.
    /// The store increments `version` on every committed update.
    fn compare_and_update(
        &self,
        id: &str,
        expected: &dyn Fn(&SecretRecord) -> bool,
        mutation: &mut dyn FnMut(&mut SecretRecord),
    ) -> Result<CasOutcome, StoreError>;

    /// Physically remove every record that is destroyed or expired at `now`.
    /// Returns the number removed.
    fn delete_expired(&self, now: i64) -> Result<usize, StoreError>;

    /// Number of records currently held, live or not.
    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}
