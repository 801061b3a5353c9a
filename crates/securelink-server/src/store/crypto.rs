use anyhow::Result;
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use zeroize::{ZeroizeOnDrop, Zeroizing};

pub const NONCE_LEN: usize = 12;

/// 32-byte server key used to encrypt uploaded envelopes at rest.
///
/// This is a second layer only. The envelope itself is sealed under a key the
/// server never sees, so losing this key exposes nothing readable.
#[derive(ZeroizeOnDrop)]
pub struct StorageKey([u8; 32]);

impl StorageKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

/// Generate a fresh random storage key.
pub fn generate_key() -> StorageKey {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    StorageKey(key)
}

/// Load a storage key from raw bytes. Returns `None` unless exactly 32 bytes.
pub fn load_key(bytes: &[u8]) -> Option<StorageKey> {
    let key: [u8; 32] = bytes.try_into().ok()?;
    Some(StorageKey(key))
}

/// Seal the envelope stored under `record_id`. The id is bound as associated
/// data, so the sealed bytes only open under the same id.
pub fn seal_envelope(
    key: &StorageKey,
    record_id: &str,
    envelope: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let payload = Payload {
        msg: envelope,
        aad: record_id.as_bytes(),
    };
    let sealed = key
        .cipher()
        .encrypt(&nonce, payload)
        .map_err(|_| anyhow::anyhow!("seal envelope for {record_id}"))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&nonce);
    Ok((nonce_bytes, sealed))
}

/// Reverse of [`seal_envelope`]. Fails on a wrong key, a tampered value, or
/// bytes that were sealed for a different id.
pub fn open_envelope(
    key: &StorageKey,
    record_id: &str,
    nonce: &[u8; NONCE_LEN],
    sealed: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let payload = Payload {
        msg: sealed,
        aad: record_id.as_bytes(),
    };
    key.cipher()
        .decrypt(Nonce::from_slice(nonce), payload)
        .map(Zeroizing::new)
        .map_err(|_| anyhow::anyhow!("sealed envelope for {record_id} does not authenticate"))
}
