//! Shareable links of the form `<public_base>/?id=<id>#<base64(exported key)>`.
//!
//! The key lives only in the fragment. HTTP clients strip the fragment before
//! sending a request, so the server only ever sees the id.

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine as _,
};
use reqwest::Url;
use zeroize::Zeroizing;

use crate::error::LinkError;

pub struct SecretLink {
    id: String,
    exported_key: Zeroizing<String>,
}

impl std::fmt::Debug for SecretLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretLink")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl SecretLink {
    pub fn new(id: impl Into<String>, exported_key: Zeroizing<String>) -> Self {
        Self {
            id: id.into(),
            exported_key,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The exported key text carried in the fragment (JWK JSON).
    pub fn exported_key(&self) -> &str {
        &self.exported_key
    }

    /// Render the link under `public_base`, e.g. `https://share.example.com`.
    pub fn build(&self, public_base: &str) -> Result<String, LinkError> {
        validate_id(&self.id)?;
        let mut url = Url::parse(public_base.trim())
            .map_err(|e| LinkError::Malformed(format!("bad public url: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(LinkError::Malformed("public url cannot be a base".into()));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url.query_pairs_mut().clear().append_pair("id", &self.id);
        url.set_fragment(Some(&STANDARD.encode(self.exported_key.as_bytes())));
        Ok(url.into())
    }

    /// Parse a full link. The fragment is required.
    pub fn parse(link: &str) -> Result<Self, LinkError> {
        let url = parse_url(link)?;

        let fragment = url.fragment().map(str::trim).unwrap_or_default();
        if fragment.is_empty() {
            return Err(LinkError::MissingKey);
        }
        let id = id_from_url(&url)?;

        let decoded = Zeroizing::new(decode_fragment(fragment)?);
        let exported = std::str::from_utf8(&decoded)
            .map_err(|_| LinkError::Malformed("key fragment is not text".into()))?;
        Ok(Self::new(id, Zeroizing::new(exported.to_owned())))
    }

    /// Extract only the id. Works on links without a fragment, for commands
    /// that never decrypt.
    pub fn parse_id(link: &str) -> Result<String, LinkError> {
        id_from_url(&parse_url(link)?)
    }
}

fn parse_url(link: &str) -> Result<Url, LinkError> {
    Url::parse(link.trim()).map_err(|e| LinkError::Malformed(e.to_string()))
}

fn id_from_url(url: &Url) -> Result<String, LinkError> {
    let id = url
        .query_pairs()
        .find(|(k, _)| *k == "id")
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| LinkError::Malformed("link has no secret id".into()))?;
    validate_id(&id)?;
    Ok(id)
}

fn validate_id(id: &str) -> Result<(), LinkError> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(LinkError::Malformed(format!("invalid secret id {id:?}")));
    }
    Ok(())
}

/// Accepts the standard and URL-safe alphabets, padded or not. Some chat
/// clients percent-encode trailing `=`.
fn decode_fragment(fragment: &str) -> Result<Vec<u8>, LinkError> {
    let mut normalized = Zeroizing::new(fragment.replace("%3D", "=").replace("%3d", "="));
    let unpadded_len = normalized.trim_end_matches('=').len();
    normalized.truncate(unpadded_len);
    let normalized = Zeroizing::new(normalized.replace('-', "+").replace('_', "/"));
    STANDARD_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|_| LinkError::Malformed("key fragment is not base64".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    const JWK: &str = r#"{"kty":"oct","k":"abc","alg":"A256GCM"}"#;

    fn sample() -> SecretLink {
        SecretLink::new("0a1b2c3d", Zeroizing::new(JWK.to_owned()))
    }

    #[test]
    fn build_puts_key_in_fragment_only() {
        let link = sample().build("https://share.example.com").unwrap();
        let (before, fragment) = link.split_once('#').unwrap();
        assert_eq!(before, "https://share.example.com/?id=0a1b2c3d");
        assert_eq!(STANDARD.decode(fragment).unwrap(), JWK.as_bytes());
        assert!(!before.contains("kty"));
    }

    #[test]
    fn build_keeps_base_path() {
        let link = sample().build("http://localhost:8080/app").unwrap();
        assert!(link.starts_with("http://localhost:8080/app/?id=0a1b2c3d#"));
    }

    #[test]
    fn parse_reverses_build() {
        let link = sample().build("http://localhost:8080/").unwrap();
        let parsed = SecretLink::parse(&link).unwrap();
        assert_eq!(parsed.id(), "0a1b2c3d");
        assert_eq!(parsed.exported_key(), JWK);
    }

    #[test]
    fn parse_accepts_url_safe_and_unpadded_fragments() {
        let fragments = [
            URL_SAFE_NO_PAD.encode(JWK),
            STANDARD_NO_PAD.encode(JWK),
            STANDARD.encode(JWK).replace('=', "%3D"),
        ];
        for fragment in fragments {
            let link = format!("https://x.test/?id=abc#{fragment}");
            assert_eq!(SecretLink::parse(&link).unwrap().exported_key(), JWK);
        }
    }

    #[test]
    fn missing_fragment_is_missing_key() {
        for link in ["https://x.test/?id=abc", "https://x.test/?id=abc#", "https://x.test/#"] {
            assert_eq!(SecretLink::parse(link).unwrap_err(), LinkError::MissingKey);
        }
    }

    #[test]
    fn malformed_links_are_rejected() {
        let fragment = STANDARD.encode(JWK);
        let cases = [
            "not a link".to_string(),
            format!("https://x.test/#{fragment}"),
            format!("https://x.test/?id=#{fragment}"),
            format!("https://x.test/?id=../etc#{fragment}"),
            "https://x.test/?id=abc#***".to_string(),
        ];
        for case in cases {
            assert!(
                matches!(SecretLink::parse(&case), Err(LinkError::Malformed(_))),
                "accepted {case}"
            );
        }
    }

    #[test]
    fn parse_id_ignores_fragment() {
        assert_eq!(SecretLink::parse_id("https://x.test/?id=ff00").unwrap(), "ff00");
    }

    #[test]
    fn debug_omits_key() {
        assert!(!format!("{:?}", sample()).contains("kty"));
    }
}
