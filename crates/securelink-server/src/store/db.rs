use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::ZeroizeOnDrop;

use super::crypto::{self, StorageKey};
use super::model::{SecretRecord, SecretStatus};
use super::{CasOutcome, RecordStore};
use crate::error::StoreError;

const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Leading byte of every stored value. Bumped if the on-disk layout changes.
const RECORD_MARKER: u8 = 0x01;

/// On-disk form of a [`SecretRecord`]. The uploaded envelope is sealed under
/// the storage key; all metadata is plaintext so the sweep can evict without
/// decrypting.
#[derive(Serialize, Deserialize, ZeroizeOnDrop)]
struct DiskRecord {
    ciphertext_sealed: Vec<u8>,
    nonce: [u8; crypto::NONCE_LEN],
    pin_hash: Option<String>,
    attempts_remaining: u32,
    #[zeroize(skip)]
    status: SecretStatus,
    created_at: i64,
    expires_at: i64,
    admin_token_hash: Vec<u8>,
    version: u64,
}

/// Thread-safe handle to the redb store.
///
/// redb serializes write transactions, so a read-check-write inside one
/// transaction is the atomic compare-and-update the lifecycle relies on.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    key: Arc<StorageKey>,
}

impl RedbStore {
    /// Open (or create) the database at `path`, using `key` for at-rest encryption.
    pub fn open(path: &Path, key: StorageKey) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        let write_txn = db.begin_write()?;
        write_txn.open_table(SECRETS)?;
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            key: Arc::new(key),
        })
    }

    fn insert_new(&self, id: &str, record: &SecretRecord) -> Result<bool> {
        let bytes = self.encode(id, record)?;
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(SECRETS)?;
            if table.get(id)?.is_some() {
                false
            } else {
                table.insert(id, bytes.as_slice())?;
                true
            }
        };
        write_txn.commit()?;
        if inserted {
            debug!(id = %id, "stored secret");
        }
        Ok(inserted)
    }

    fn fetch(&self, id: &str) -> Result<Option<SecretRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECRETS)?;
        let raw_bytes: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());
        raw_bytes.map(|bytes| self.decode(id, &bytes)).transpose()
    }

    fn update(
        &self,
        id: &str,
        expected: &dyn Fn(&SecretRecord) -> bool,
        mutation: &mut dyn FnMut(&mut SecretRecord),
    ) -> Result<CasOutcome> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(SECRETS)?;

            // Copy out so the AccessGuard's borrow of `table` ends before insert.
            let raw_bytes: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());

            match raw_bytes {
                None => CasOutcome::NotFound,
                Some(bytes) => {
                    let mut record = self.decode(id, &bytes)?;
                    if expected(&record) {
                        mutation(&mut record);
                        record.version += 1;
                        let updated = self.encode(id, &record)?;
                        table.insert(id, updated.as_slice())?;
                        CasOutcome::Updated(record)
                    } else {
                        CasOutcome::Conflict(record)
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    fn prune(&self, now: i64) -> Result<usize> {
        // Collect candidates in a read pass first.
        let candidates: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SECRETS)?;
            let mut ids = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                if decode_metadata(v.value())?.is_reclaimable(now) {
                    ids.push(k.value().to_owned());
                }
            }
            ids
        };

        if candidates.is_empty() {
            return Ok(0);
        }

        // Terminal states never revert, but re-check under the write lock anyway
        // so a concurrent put of a fresh id is never removed.
        let write_txn = self.db.begin_write()?;
        let mut removed = 0usize;
        {
            let mut table = write_txn.open_table(SECRETS)?;
            for id in &candidates {
                let reclaimable = match table.get(id.as_str())? {
                    Some(guard) => decode_metadata(guard.value())?.is_reclaimable(now),
                    None => false,
                };
                if reclaimable {
                    table.remove(id.as_str())?;
                    removed += 1;
                }
            }
        }
        write_txn.commit()?;

        if removed > 0 {
            info!(removed, "pruned destroyed or expired secrets");
        }
        Ok(removed)
    }

    fn count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECRETS)?;
        Ok(table.len()? as usize)
    }

    fn encode(&self, id: &str, record: &SecretRecord) -> Result<Vec<u8>> {
        let (nonce, ciphertext_sealed) =
            crypto::seal_envelope(&self.key, id, record.ciphertext.as_bytes())?;
        let disk = DiskRecord {
            ciphertext_sealed,
            nonce,
            pin_hash: record.pin_hash.clone(),
            attempts_remaining: record.attempts_remaining,
            status: record.status,
            created_at: record.created_at,
            expires_at: record.expires_at,
            admin_token_hash: record.admin_token_hash.clone(),
            version: record.version,
        };
        let payload = bincode::serde::encode_to_vec(&disk, bincode::config::standard())
            .context("bincode encode")?;
        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(RECORD_MARKER);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    fn decode(&self, id: &str, bytes: &[u8]) -> Result<SecretRecord> {
        let disk = decode_disk(bytes)?;
        let plaintext =
            crypto::open_envelope(&self.key, id, &disk.nonce, &disk.ciphertext_sealed)?;
        let ciphertext = String::from_utf8(plaintext.to_vec()).context("envelope is not UTF-8")?;
        Ok(SecretRecord {
            ciphertext,
            pin_hash: disk.pin_hash.clone(),
            attempts_remaining: disk.attempts_remaining,
            status: disk.status,
            created_at: disk.created_at,
            expires_at: disk.expires_at,
            admin_token_hash: disk.admin_token_hash.clone(),
            version: disk.version,
        })
    }
}

fn decode_disk(bytes: &[u8]) -> Result<DiskRecord> {
    match bytes.split_first() {
        Some((&RECORD_MARKER, payload)) => {
            let (disk, _) = bincode::serde::decode_from_slice(payload, bincode::config::standard())
                .context("bincode decode")?;
            Ok(disk)
        }
        Some((marker, _)) => anyhow::bail!("unknown record marker {marker:#04x}"),
        None => anyhow::bail!("empty record"),
    }
}

/// Decode only what the sweep needs, without touching the sealed envelope.
fn decode_metadata(bytes: &[u8]) -> Result<SecretRecord> {
    let disk = decode_disk(bytes)?;
    Ok(SecretRecord {
        ciphertext: String::new(),
        pin_hash: None,
        attempts_remaining: disk.attempts_remaining,
        status: disk.status,
        created_at: disk.created_at,
        expires_at: disk.expires_at,
        admin_token_hash: Vec::new(),
        version: disk.version,
    })
}

impl RecordStore for RedbStore {
    fn put(&self, id: &str, record: &SecretRecord) -> Result<(), StoreError> {
        if self.insert_new(id, record).map_err(StoreError::backend)? {
            Ok(())
        } else {
            Err(StoreError::AlreadyExists(id.to_owned()))
        }
    }

    fn get(&self, id: &str) -> Result<Option<SecretRecord>, StoreError> {
        self.fetch(id).map_err(StoreError::backend)
    }

    fn compare_and_update(
        &self,
        id: &str,
        expected: &dyn Fn(&SecretRecord) -> bool,
        mutation: &mut dyn FnMut(&mut SecretRecord),
    ) -> Result<CasOutcome, StoreError> {
        self.update(id, expected, mutation)
            .map_err(StoreError::backend)
    }

    fn delete_expired(&self, now: i64) -> Result<usize, StoreError> {
        self.prune(now).map_err(StoreError::backend)
    }

    fn len(&self) -> Result<usize, StoreError> {
        self.count().map_err(StoreError::backend)
    }
}
