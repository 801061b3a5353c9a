//! Authenticated envelope around a secret's plaintext.
//!
//! Wire format: `base64(nonce[12] || ciphertext || tag[16])`, standard
//! alphabet with padding, so browsers can decode it with `atob`.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::Zeroizing;

use crate::error::EnvelopeError;
use crate::provider::{CryptoProvider, OsCryptoProvider, SecretKey, NONCE_LEN, TAG_LEN};

#[derive(Clone)]
pub struct EnvelopeCodec {
    provider: Arc<dyn CryptoProvider>,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(Arc::new(OsCryptoProvider))
    }
}

impl EnvelopeCodec {
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &dyn CryptoProvider {
        self.provider.as_ref()
    }

    /// Seal `plaintext` under `key` with a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8], key: &SecretKey) -> Result<Vec<u8>, EnvelopeError> {
        let mut nonce = [0u8; NONCE_LEN];
        self.provider.random_bytes(&mut nonce);

        let sealed = self.provider.aead_seal(key, &nonce, plaintext)?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open an envelope produced by [`seal`](Self::seal). Any tampering,
    /// truncation or wrong key fails with [`EnvelopeError::Authentication`].
    pub fn open(
        &self,
        envelope: &[u8],
        key: &SecretKey,
    ) -> Result<Zeroizing<Vec<u8>>, EnvelopeError> {
        if envelope.len() < NONCE_LEN + TAG_LEN {
            return Err(EnvelopeError::Authentication);
        }
        let (nonce, sealed) = envelope.split_at(NONCE_LEN);
        let nonce: &[u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| EnvelopeError::Authentication)?;
        self.provider.aead_open(key, nonce, sealed)
    }

    /// [`seal`](Self::seal) a UTF-8 string and base64 it for upload.
    pub fn seal_text(&self, plaintext: &str, key: &SecretKey) -> Result<String, EnvelopeError> {
        Ok(STANDARD.encode(self.seal(plaintext.as_bytes(), key)?))
    }

    /// Reverse of [`seal_text`](Self::seal_text). Bad base64 and non-UTF-8
    /// output are authentication failures too.
    pub fn open_text(
        &self,
        envelope_b64: &str,
        key: &SecretKey,
    ) -> Result<Zeroizing<String>, EnvelopeError> {
        let envelope = STANDARD
            .decode(envelope_b64.trim())
            .map_err(|_| EnvelopeError::Authentication)?;
        let plaintext = self.open(&envelope, key)?;
        let text = std::str::from_utf8(&plaintext).map_err(|_| EnvelopeError::Authentication)?;
        Ok(Zeroizing::new(text.to_owned()))
    }
}
