use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

/// Lifecycle state of a secret. `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretStatus {
    Active,
    Destroyed,
}

/// A stored secret.
///
/// `ciphertext` is the client-produced envelope exactly as uploaded; the server
/// holds no key that can open it. It is emptied when the record is destroyed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretRecord {
    pub ciphertext: String,
    /// Argon2id PHC string, present iff the creator set a PIN.
    pub pin_hash: Option<String>,
    pub attempts_remaining: u32,
    #[zeroize(skip)]
    pub status: SecretStatus,
    /// Unix timestamp (seconds) when the record was created.
    pub created_at: i64,
    /// Unix timestamp (seconds) from which the record reads as gone.
    pub expires_at: i64,
    /// SHA-256 of the creator's admin token.
    pub admin_token_hash: Vec<u8>,
    /// Bumped by the store on every successful compare-and-update.
    pub version: u64,
}

impl SecretRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// True if the record can still be checked, viewed or burned.
    pub fn is_live(&self, now: i64) -> bool {
        self.status == SecretStatus::Active && !self.is_expired(now)
    }

    /// True once the record no longer matters to the protocol and may be
    /// physically removed.
    pub fn is_reclaimable(&self, now: i64) -> bool {
        !self.is_live(now)
    }

    /// Move to `Destroyed`, handing back whatever ciphertext was held.
    pub fn destroy(&mut self) -> String {
        self.status = SecretStatus::Destroyed;
        self.attempts_remaining = 0;
        std::mem::take(&mut self.ciphertext)
    }

    /// Count one failed PIN guess. Reaching zero destroys the record in the
    /// same step.
    pub fn strike(&mut self) {
        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
        if self.attempts_remaining == 0 {
            self.destroy();
        }
    }
}
