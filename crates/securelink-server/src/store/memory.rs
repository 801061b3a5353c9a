use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::model::SecretRecord;
use super::{CasOutcome, RecordStore};
use crate::error::StoreError;

/// In-memory [`RecordStore`]. Nothing survives a restart.
///
/// Clones share the same map. Every operation holds the single lock for its
/// whole duration, which serializes compare-and-update exactly like redb's
/// write transactions do.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<String, SecretRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, SecretRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::backend(anyhow::anyhow!("memory store lock poisoned")))
    }
}

impl RecordStore for MemoryStore {
    fn put(&self, id: &str, record: &SecretRecord) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        if records.contains_key(id) {
            return Err(StoreError::AlreadyExists(id.to_owned()));
        }
        records.insert(id.to_owned(), record.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<SecretRecord>, StoreError> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn compare_and_update(
        &self,
        id: &str,
        expected: &dyn Fn(&SecretRecord) -> bool,
        mutation: &mut dyn FnMut(&mut SecretRecord),
    ) -> Result<CasOutcome, StoreError> {
        let mut records = self.lock()?;
        let Some(record) = records.get_mut(id) else {
            return Ok(CasOutcome::NotFound);
        };
        if !expected(record) {
            return Ok(CasOutcome::Conflict(record.clone()));
        }
        mutation(record);
        record.version += 1;
        Ok(CasOutcome::Updated(record.clone()))
    }

    fn delete_expired(&self, now: i64) -> Result<usize, StoreError> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, r| !r.is_reclaimable(now));
        Ok(before - records.len())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SecretStatus;

    fn record() -> SecretRecord {
        SecretRecord {
            ciphertext: "blob".into(),
            pin_hash: None,
            attempts_remaining: 3,
            status: SecretStatus::Active,
            created_at: 0,
            expires_at: 100,
            admin_token_hash: vec![],
            version: 0,
        }
    }

    #[test]
    fn clones_share_state() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.put("x", &record()).unwrap();
        assert!(b.get("x").unwrap().is_some());
        assert!(matches!(b.put("x", &record()), Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn conflict_returns_current_record() {
        let s = MemoryStore::new();
        s.put("x", &record()).unwrap();
        let outcome = s
            .compare_and_update("x", &|r| r.attempts_remaining == 1, &mut |r| r.strike())
            .unwrap();
        assert!(matches!(outcome, CasOutcome::Conflict(r) if r.attempts_remaining == 3));
    }

    #[test]
    fn sweep_counts_removed() {
        let s = MemoryStore::new();
        s.put("x", &record()).unwrap();
        assert_eq!(s.delete_expired(99).unwrap(), 0);
        assert_eq!(s.delete_expired(100).unwrap(), 1);
        assert!(s.is_empty().unwrap());
    }
}
