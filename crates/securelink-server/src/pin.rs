use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::RngCore;

use crate::error::LifecycleError;

/// Argon2id hashing for creator PINs.
///
/// PINs are short, so the hash only has to slow down offline guessing of a
/// leaked database; online guessing is capped by the strike budget.
#[derive(Clone)]
pub struct PinHasher {
    params: Params,
}

impl PinHasher {
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    /// 19 MiB, 2 passes, 1 lane: tens of milliseconds per hash.
    pub fn interactive() -> Result<Self, LifecycleError> {
        let params = Params::new(19 * 1024, 2, 1, None)
            .map_err(|e| LifecycleError::Pin(format!("argon2 params: {e}")))?;
        Ok(Self::new(params))
    }

    /// The cheapest parameters Argon2 accepts. Tests only.
    pub fn insecure_fast() -> Self {
        Self::new(Params::new(8, 1, 1, None).unwrap_or_default())
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash `pin` into a PHC string with a fresh random salt.
    pub fn hash(&self, pin: &str) -> Result<String, LifecycleError> {
        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| LifecycleError::Pin(format!("salt: {e}")))?;

        let hash = self
            .argon2()
            .hash_password(pin.as_bytes(), &salt)
            .map_err(|e| LifecycleError::Pin(format!("argon2 hash: {e}")))?;
        Ok(hash.to_string())
    }

    /// Check `guess` against a stored PHC string. Cost parameters are taken
    /// from the stored hash, not from `self`.
    ///
    /// A malformed stored hash is an error rather than a mismatch, so corrupt
    /// data never burns the caller's attempts.
    pub fn verify(&self, guess: &str, stored: &str) -> Result<bool, LifecycleError> {
        let parsed = PasswordHash::new(stored)
            .map_err(|e| LifecycleError::Pin(format!("stored pin hash: {e}")))?;
        match self.argon2().verify_password(guess.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(LifecycleError::Pin(format!("argon2 verify: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let h = PinHasher::insecure_fast();
        let stored = h.hash("1234").unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert!(h.verify("1234", &stored).unwrap());
        assert!(!h.verify("4321", &stored).unwrap());
        assert!(!h.verify("", &stored).unwrap());
    }

    #[test]
    fn salts_differ() {
        let h = PinHasher::insecure_fast();
        assert_ne!(h.hash("1234").unwrap(), h.hash("1234").unwrap());
    }

    #[test]
    fn verify_uses_stored_params() {
        let stored = PinHasher::interactive().unwrap().hash("0000").unwrap();
        assert!(PinHasher::insecure_fast().verify("0000", &stored).unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        let h = PinHasher::insecure_fast();
        assert!(matches!(
            h.verify("1234", "not-a-phc-string"),
            Err(LifecycleError::Pin(_))
        ));
    }
}
