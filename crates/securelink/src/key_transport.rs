//! Portable text form of a [`SecretKey`], compatible with WebCrypto's
//! `exportKey("jwk", ...)` for an AES-GCM key.

use base64::{
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::KeyTransportError;
use crate::provider::{SecretKey, KEY_LEN};

const KTY: &str = "oct";
const ALG: &str = "A256GCM";

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct Jwk {
    kty: String,
    k: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ext: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    key_ops: Vec<String>,
}

/// Serialize `key` as a JWK JSON object.
pub fn export(key: &SecretKey) -> Zeroizing<String> {
    let jwk = Jwk {
        kty: KTY.into(),
        k: URL_SAFE_NO_PAD.encode(key.as_bytes()),
        alg: Some(ALG.into()),
        ext: Some(true),
        key_ops: vec!["encrypt".into(), "decrypt".into()],
    };
    // A struct of strings and a bool always serializes.
    Zeroizing::new(serde_json::to_string(&jwk).unwrap_or_default())
}

/// Parse a JWK produced by [`export`] (or by a browser) back into a key.
pub fn import(exported: &str) -> Result<SecretKey, KeyTransportError> {
    let jwk: Jwk = serde_json::from_str(exported)
        .map_err(|e| KeyTransportError::Malformed(format!("not a JWK: {e}")))?;

    if jwk.kty != KTY {
        return Err(KeyTransportError::Malformed(format!(
            "unsupported key type {:?}",
            jwk.kty
        )));
    }
    if let Some(alg) = jwk.alg.as_deref() {
        if alg != ALG {
            return Err(KeyTransportError::Malformed(format!(
                "unsupported algorithm {alg:?}"
            )));
        }
    }

    let k = jwk.k.trim_end_matches('=');
    let raw = Zeroizing::new(
        URL_SAFE_NO_PAD
            .decode(k)
            .or_else(|_| URL_SAFE.decode(&jwk.k))
            .map_err(|_| KeyTransportError::Malformed("key material is not base64url".into()))?,
    );

    let bytes: [u8; KEY_LEN] = raw.as_slice().try_into().map_err(|_| {
        KeyTransportError::Malformed(format!(
            "expected {KEY_LEN} key bytes, got {}",
            raw.len()
        ))
    })?;
    Ok(SecretKey::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> SecretKey {
        let mut bytes = [0u8; KEY_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8 * 7;
        }
        SecretKey::from_bytes(bytes)
    }

    #[test]
    fn export_is_webcrypto_shaped() {
        let exported = export(&sample_key());
        let v: serde_json::Value = serde_json::from_str(&exported).unwrap();
        assert_eq!(v["kty"], "oct");
        assert_eq!(v["alg"], "A256GCM");
        assert_eq!(v["ext"], true);
        assert_eq!(v["key_ops"], serde_json::json!(["encrypt", "decrypt"]));
        let k = v["k"].as_str().unwrap();
        assert!(!k.contains('=') && !k.contains('+') && !k.contains('/'));
    }

    #[test]
    fn import_restores_the_same_key() {
        let key = sample_key();
        let restored = import(&export(&key)).unwrap();
        assert_eq!(restored.as_bytes(), key.as_bytes());
    }

    #[test]
    fn import_accepts_minimal_browser_jwk() {
        let k = URL_SAFE_NO_PAD.encode([9u8; KEY_LEN]);
        let json = format!(r#"{{"kty":"oct","k":"{k}"}}"#);
        assert_eq!(import(&json).unwrap().as_bytes(), &[9u8; KEY_LEN]);
    }

    #[test]
    fn import_rejects_bad_keys() {
        let short = URL_SAFE_NO_PAD.encode([1u8; 16]);
        let cases = [
            "not json".to_string(),
            r#"{"kty":"RSA","k":"AAAA"}"#.to_string(),
            format!(r#"{{"kty":"oct","alg":"A128GCM","k":"{short}"}}"#),
            format!(r#"{{"kty":"oct","k":"{short}"}}"#),
            r#"{"kty":"oct","k":"!!!"}"#.to_string(),
            r#"{"kty":"oct"}"#.to_string(),
        ];
        for case in cases {
            assert!(
                matches!(import(&case), Err(KeyTransportError::Malformed(_))),
                "accepted {case}"
            );
        }
    }
}
