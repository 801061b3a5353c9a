//! Secret lifecycle: create, check, status, view, burn.
//!
//! Every state change goes through [`RecordStore::compare_and_update`] keyed on
//! the record `version` observed beforehand, so concurrent views and burns of
//! one secret serialize. The slow part of a view, PIN verification, happens
//! outside the store's critical section; a losing writer re-reads and retries.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use constant_time_eq::constant_time_eq;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{LifecycleError, StoreError};
use crate::pin::PinHasher;
use crate::store::{CasOutcome, RecordStore, SecretRecord, SecretStatus};

/// Optimistic update attempts before giving up with [`StoreError::Contention`].
const MAX_CAS_RETRIES: usize = 16;

const ADMIN_TOKEN_PREFIX: &str = "slk_adm_";

#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    /// Wrong guesses tolerated before a PIN-protected secret self-destructs.
    pub strike_budget: u32,
    pub default_ttl_secs: u64,
    pub max_ttl_secs: u64,
    /// Upper bound on the uploaded envelope, in bytes.
    pub max_content_len: usize,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            strike_budget: 3,
            default_ttl_secs: 86_400,
            max_ttl_secs: 7 * 86_400,
            max_content_len: 1_048_576,
        }
    }
}

/// Input to [`SecretManager::create`].
#[derive(Debug, Clone, Default)]
pub struct NewSecret {
    /// Client-sealed envelope. Opaque to the server.
    pub ciphertext: String,
    pub pin: Option<String>,
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedSecret {
    pub id: String,
    pub admin_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretCheck {
    pub requires_pin: bool,
    pub attempts_remaining: u32,
}

/// Dashboard view of a secret. Never reveals whether a gone secret ever existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretSummary {
    pub active: bool,
    pub attempts_left: u32,
    pub created_at: Option<i64>,
    pub expires_at: Option<i64>,
}

impl SecretSummary {
    fn gone() -> Self {
        Self {
            active: false,
            attempts_left: 0,
            created_at: None,
            expires_at: None,
        }
    }
}

pub struct SecretManager {
    store: Arc<dyn RecordStore>,
    pins: PinHasher,
    policy: LifecyclePolicy,
}

impl SecretManager {
    pub fn new(store: Arc<dyn RecordStore>, pins: PinHasher, policy: LifecyclePolicy) -> Self {
        Self {
            store,
            pins,
            policy,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Store a new secret in the `Active` state with the full strike budget.
    pub fn create(&self, new: NewSecret) -> Result<CreatedSecret, LifecycleError> {
        if new.ciphertext.is_empty() {
            return Err(LifecycleError::Invalid("content must not be empty".into()));
        }
        if new.ciphertext.len() > self.policy.max_content_len {
            return Err(LifecycleError::Invalid(format!(
                "content exceeds {} bytes",
                self.policy.max_content_len
            )));
        }
        let ttl = new.ttl_secs.unwrap_or(self.policy.default_ttl_secs);
        if ttl > self.policy.max_ttl_secs {
            return Err(LifecycleError::Invalid(format!(
                "ttl exceeds {} seconds",
                self.policy.max_ttl_secs
            )));
        }

        let pin = new.pin.map(Zeroizing::new);
        let pin_hash = match pin.as_deref() {
            Some(p) if !p.is_empty() => Some(self.pins.hash(p)?),
            _ => None,
        };

        let id = generate_secret_id();
        let admin_token = generate_admin_token();
        let now = unix_now();
        let record = SecretRecord {
            ciphertext: new.ciphertext,
            pin_hash,
            attempts_remaining: self.policy.strike_budget.max(1),
            status: SecretStatus::Active,
            created_at: now,
            expires_at: now.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX)),
            admin_token_hash: hash_admin_token(&admin_token),
            version: 0,
        };
        self.store.put(&id, &record)?;

        info!(
            id = %id,
            ttl_secs = ttl,
            pin = record.pin_hash.is_some(),
            "secret created"
        );
        Ok(CreatedSecret { id, admin_token })
    }

    /// Read-only look used before the recipient commits a guess.
    pub fn check(&self, id: &str) -> Result<SecretCheck, LifecycleError> {
        let now = unix_now();
        match self.store.get(id)? {
            Some(r) if r.is_live(now) => Ok(SecretCheck {
                requires_pin: r.pin_hash.is_some(),
                attempts_remaining: r.attempts_remaining,
            }),
            _ => Err(LifecycleError::Gone),
        }
    }

    /// Read-only summary for the creator's dashboard.
    pub fn status(&self, id: &str) -> Result<SecretSummary, LifecycleError> {
        let now = unix_now();
        Ok(match self.store.get(id)? {
            Some(r) if r.is_live(now) => SecretSummary {
                active: true,
                attempts_left: r.attempts_remaining,
                created_at: Some(r.created_at),
                expires_at: Some(r.expires_at),
            },
            _ => SecretSummary::gone(),
        })
    }

    /// Attempt to reveal a secret.
    ///
    /// A matching PIN (or no PIN on the record) destroys the record and
    /// returns its envelope in the same committed step; no later call can see
    /// it again. A wrong PIN spends one attempt, destroying the record when the
    /// last one goes.
    pub fn view(&self, id: &str, pin_guess: Option<&str>) -> Result<String, LifecycleError> {
        let guess = pin_guess.unwrap_or("");

        for _ in 0..MAX_CAS_RETRIES {
            let now = unix_now();
            let observed = match self.store.get(id)? {
                Some(r) if r.is_live(now) => r,
                _ => return Err(LifecycleError::Gone),
            };

            let matched = match observed.pin_hash.as_deref() {
                None => true,
                Some(stored) => self.pins.verify(guess, stored)?,
            };

            let expected_version = observed.version;
            let mut released: Option<Zeroizing<String>> = None;
            let outcome = self.store.compare_and_update(
                id,
                &|current| current.version == expected_version && current.is_live(now),
                &mut |current| {
                    if matched {
                        released = Some(Zeroizing::new(current.destroy()));
                    } else {
                        current.strike();
                    }
                },
            )?;

            match outcome {
                CasOutcome::Updated(_) if matched => {
                    info!(id = %id, "secret revealed and destroyed");
                    return released
                        .map(|c| c.to_string())
                        .ok_or(LifecycleError::Gone);
                }
                CasOutcome::Updated(after) => {
                    if after.status == SecretStatus::Destroyed {
                        warn!(id = %id, "strike budget exhausted, secret destroyed");
                    } else {
                        info!(id = %id, attempts_remaining = after.attempts_remaining, "wrong pin");
                    }
                    return Err(LifecycleError::WrongPin {
                        attempts_remaining: after.attempts_remaining,
                    });
                }
                CasOutcome::Conflict(current) if current.is_live(unix_now()) => {
                    debug!(id = %id, "view lost a race, retrying");
                }
                CasOutcome::Conflict(_) | CasOutcome::NotFound => {
                    return Err(LifecycleError::Gone);
                }
            }
        }

        Err(StoreError::Contention(id.to_owned()).into())
    }

    /// Destroy a secret early on the creator's behalf.
    pub fn burn(&self, id: &str, admin_token: &str) -> Result<(), LifecycleError> {
        let presented = hash_admin_token(admin_token);

        for _ in 0..MAX_CAS_RETRIES {
            let now = unix_now();
            let observed = match self.store.get(id)? {
                Some(r) if r.is_live(now) => r,
                _ => return Err(LifecycleError::Gone),
            };
            if !constant_time_eq(&presented, &observed.admin_token_hash) {
                warn!(id = %id, "burn rejected: bad admin token");
                return Err(LifecycleError::Unauthorized);
            }

            let expected_version = observed.version;
            let outcome = self.store.compare_and_update(
                id,
                &|current| current.version == expected_version && current.is_live(now),
                &mut |current| {
                    current.destroy();
                },
            )?;

            match outcome {
                CasOutcome::Updated(_) => {
                    info!(id = %id, "secret burned");
                    return Ok(());
                }
                CasOutcome::Conflict(current) if current.is_live(unix_now()) => {
                    debug!(id = %id, "burn lost a race, retrying");
                }
                CasOutcome::Conflict(_) | CasOutcome::NotFound => {
                    return Err(LifecycleError::Gone);
                }
            }
        }

        Err(StoreError::Contention(id.to_owned()).into())
    }

    /// Physically remove destroyed and expired records. Returns how many.
    pub fn sweep(&self) -> Result<usize, LifecycleError> {
        Ok(self.store.delete_expired(unix_now())?)
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// 128-bit random id, hex encoded.
pub fn generate_secret_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Generate a new admin token in the format `slk_adm_<32 hex chars>`.
pub fn generate_admin_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    format!("{ADMIN_TOKEN_PREFIX}{}", hex::encode(bytes))
}

/// Hash an admin token with SHA-256 for storage.
pub fn hash_admin_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;
    use crate::store::{testing::UnreachableStore, MemoryStore, RedbStore};

    fn manager_on(store: Arc<dyn RecordStore>) -> SecretManager {
        SecretManager::new(store, PinHasher::insecure_fast(), LifecyclePolicy::default())
    }

    fn manager() -> SecretManager {
        manager_on(Arc::new(MemoryStore::new()))
    }

    fn create(m: &SecretManager, pin: Option<&str>) -> CreatedSecret {
        m.create(NewSecret {
            ciphertext: "ZW52ZWxvcGU=".into(),
            pin: pin.map(str::to_owned),
            ttl_secs: Some(3600),
        })
        .unwrap()
    }

    #[test]
    fn create_starts_active_with_full_budget() {
        let m = manager();
        let s = create(&m, Some("1234"));
        assert_eq!(s.id.len(), 32);
        assert!(s.admin_token.starts_with(ADMIN_TOKEN_PREFIX));
        assert_eq!(
            m.check(&s.id).unwrap(),
            SecretCheck {
                requires_pin: true,
                attempts_remaining: 3
            }
        );
    }

    #[test]
    fn create_rejects_empty_content_and_long_ttl() {
        let m = manager();
        let empty = m.create(NewSecret::default());
        assert!(matches!(empty, Err(LifecycleError::Invalid(_))));

        let long = m.create(NewSecret {
            ciphertext: "x".into(),
            pin: None,
            ttl_secs: Some(m.policy().max_ttl_secs + 1),
        });
        assert!(matches!(long, Err(LifecycleError::Invalid(_))));
    }

    #[test]
    fn admin_token_is_not_stored() {
        let store = Arc::new(MemoryStore::new());
        let m = manager_on(store.clone());
        let s = create(&m, None);
        let r = store.get(&s.id).unwrap().unwrap();
        assert_ne!(r.admin_token_hash, s.admin_token.as_bytes());
        assert_eq!(r.admin_token_hash, hash_admin_token(&s.admin_token));
    }

    #[test]
    fn empty_pin_means_no_pin() {
        let m = manager();
        let s = create(&m, Some(""));
        assert!(!m.check(&s.id).unwrap().requires_pin);
        assert_eq!(m.view(&s.id, None).unwrap(), "ZW52ZWxvcGU=");
    }

    #[test]
    fn check_and_status_do_not_mutate() {
        let m = manager();
        let s = create(&m, Some("1234"));
        for _ in 0..5 {
            m.check(&s.id).unwrap();
            let st = m.status(&s.id).unwrap();
            assert!(st.active);
            assert_eq!(st.attempts_left, 3);
        }
        assert_eq!(m.view(&s.id, Some("1234")).unwrap(), "ZW52ZWxvcGU=");
    }

    #[test]
    fn correct_pin_reveals_once() {
        let m = manager();
        let s = create(&m, Some("1234"));
        assert_eq!(m.view(&s.id, Some("1234")).unwrap(), "ZW52ZWxvcGU=");
        assert!(matches!(m.view(&s.id, Some("1234")), Err(LifecycleError::Gone)));
        assert!(matches!(m.view(&s.id, Some("0000")), Err(LifecycleError::Gone)));
        assert!(!m.status(&s.id).unwrap().active);
    }

    #[test]
    fn three_strikes_destroy() {
        let m = manager();
        let s = create(&m, Some("1234"));
        for expected in [2, 1, 0] {
            match m.view(&s.id, Some("9999")) {
                Err(LifecycleError::WrongPin { attempts_remaining }) => {
                    assert_eq!(attempts_remaining, expected)
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(matches!(m.view(&s.id, Some("1234")), Err(LifecycleError::Gone)));
        assert!(matches!(m.check(&s.id), Err(LifecycleError::Gone)));
        assert_eq!(m.status(&s.id).unwrap(), SecretSummary::gone());
    }

    #[test]
    fn missing_pin_counts_as_wrong() {
        let m = manager();
        let s = create(&m, Some("1234"));
        assert!(matches!(
            m.view(&s.id, None),
            Err(LifecycleError::WrongPin {
                attempts_remaining: 2
            })
        ));
    }

    #[test]
    fn configured_strike_budget() {
        let m = SecretManager::new(
            Arc::new(MemoryStore::new()),
            PinHasher::insecure_fast(),
            LifecyclePolicy {
                strike_budget: 5,
                ..LifecyclePolicy::default()
            },
        );
        let s = create(&m, Some("1234"));
        assert_eq!(m.check(&s.id).unwrap().attempts_remaining, 5);
    }

    #[test]
    fn zero_ttl_is_gone_immediately() {
        let m = manager();
        let s = m
            .create(NewSecret {
                ciphertext: "x".into(),
                pin: None,
                ttl_secs: Some(0),
            })
            .unwrap();
        assert!(matches!(m.check(&s.id), Err(LifecycleError::Gone)));
        assert!(matches!(m.view(&s.id, None), Err(LifecycleError::Gone)));
        assert!(matches!(
            m.burn(&s.id, &s.admin_token),
            Err(LifecycleError::Gone)
        ));
        assert_eq!(m.sweep().unwrap(), 1);
    }

    #[test]
    fn burn_requires_token() {
        let m = manager();
        let s = create(&m, Some("1234"));
        assert!(matches!(
            m.burn(&s.id, "slk_adm_wrong"),
            Err(LifecycleError::Unauthorized)
        ));
        assert_eq!(m.check(&s.id).unwrap().attempts_remaining, 3);

        m.burn(&s.id, &s.admin_token).unwrap();
        assert!(matches!(
            m.burn(&s.id, &s.admin_token),
            Err(LifecycleError::Gone)
        ));
        assert!(matches!(m.view(&s.id, Some("1234")), Err(LifecycleError::Gone)));
    }

    #[test]
    fn burn_after_strikes_still_works() {
        let m = manager();
        let s = create(&m, Some("1234"));
        let _ = m.view(&s.id, Some("bad"));
        m.burn(&s.id, &s.admin_token).unwrap();
        assert!(!m.status(&s.id).unwrap().active);
    }

    #[test]
    fn unknown_id_is_gone_everywhere() {
        let m = manager();
        assert!(matches!(m.check("nope"), Err(LifecycleError::Gone)));
        assert!(matches!(m.view("nope", None), Err(LifecycleError::Gone)));
        assert!(matches!(m.burn("nope", "t"), Err(LifecycleError::Gone)));
        assert!(!m.status("nope").unwrap().active);
    }

    fn race_views(
        m: Arc<SecretManager>,
        id: &str,
        pin: Option<&'static str>,
        n: usize,
    ) -> Vec<Result<String, LifecycleError>> {
        let barrier = Arc::new(Barrier::new(n));
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let m = m.clone();
                let barrier = barrier.clone();
                let id = id.to_owned();
                std::thread::spawn(move || {
                    barrier.wait();
                    m.view(&id, pin)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn concurrent_views_reveal_exactly_once() {
        let m = Arc::new(manager());
        let s = create(&m, None);
        let results = race_views(m, &s.id, None, 16);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(LifecycleError::Gone))));
    }

    #[test]
    fn concurrent_views_reveal_exactly_once_on_redb() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(
            &dir.path().join("race.db"),
            crate::store::crypto::generate_key(),
        )
        .unwrap();
        let m = Arc::new(manager_on(Arc::new(store)));
        let s = create(&m, Some("1234"));
        let results = race_views(m, &s.id, Some("1234"), 12);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[test]
    fn concurrent_wrong_guesses_never_overspend() {
        let m = Arc::new(manager());
        let s = create(&m, Some("1234"));
        let results = race_views(m.clone(), &s.id, Some("0000"), 10);

        let mut reported: Vec<u32> = results
            .iter()
            .filter_map(|r| match r {
                Err(LifecycleError::WrongPin { attempts_remaining }) => Some(*attempts_remaining),
                _ => None,
            })
            .collect();
        reported.sort_unstable();
        // Each decrement is observed by exactly one caller.
        assert_eq!(reported, vec![0, 1, 2]);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(LifecycleError::Gone)))
                .count(),
            7
        );
        assert!(matches!(m.view(&s.id, Some("1234")), Err(LifecycleError::Gone)));
    }

    #[test]
    fn token_formats() {
        assert_ne!(generate_secret_id(), generate_secret_id());
        let t = generate_admin_token();
        assert_eq!(t.len(), ADMIN_TOKEN_PREFIX.len() + 32);
        assert!(t[ADMIN_TOKEN_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn store_failures_are_never_reported_as_gone() {
        let m = manager_on(Arc::new(UnreachableStore));
        let id = generate_secret_id();

        let created = m.create(NewSecret {
            ciphertext: "x".into(),
            ..Default::default()
        });
        assert!(matches!(created, Err(LifecycleError::Store(StoreError::Backend(_)))));
        assert!(matches!(m.check(&id), Err(LifecycleError::Store(_))));
        assert!(matches!(m.status(&id), Err(LifecycleError::Store(_))));
        assert!(matches!(m.view(&id, None), Err(LifecycleError::Store(_))));
        assert!(matches!(m.view(&id, Some("1234")), Err(LifecycleError::Store(_))));
        assert!(matches!(
            m.burn(&id, &generate_admin_token()),
            Err(LifecycleError::Store(_))
        ));
        assert!(matches!(m.sweep(), Err(LifecycleError::Store(_))));
    }
}
