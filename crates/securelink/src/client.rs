use std::time::Duration;

use reqwest::{Response, StatusCode};
use securelink_server::api::{
    BurnRequest, CheckResponse, CreateRequest, CreateResponse, ErrorBody, StatusResponse,
    ViewRequest, ViewResponse,
};
use serde::de::DeserializeOwned;
use tracing::debug;
use zeroize::Zeroizing;

use crate::envelope::EnvelopeCodec;
use crate::error::ClientError;
use crate::link::SecretLink;

/// Result of a successful upload.
pub struct CreatedLink {
    /// Shareable link, key included in the fragment.
    pub link: String,
    pub id: String,
    pub admin_token: String,
}

impl std::fmt::Debug for CreatedLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedLink")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// HTTP client for a securelink server.
///
/// Encryption and decryption happen here. Requests carry the id, the
/// envelope, and the PIN guess, never the key.
#[derive(Clone)]
pub struct SecureLinkClient {
    http: reqwest::Client,
    api_base: String,
    public_base: String,
    codec: EnvelopeCodec,
}

impl SecureLinkClient {
    /// `api_base` is where the `/api` routes live (`http://host:8080/api`);
    /// `public_base` is the origin links are built under.
    pub fn new(api_base: impl Into<String>, public_base: impl Into<String>) -> Self {
        Self::with_codec(api_base, public_base, EnvelopeCodec::default())
    }

    pub fn with_codec(
        api_base: impl Into<String>,
        public_base: impl Into<String>,
        codec: EnvelopeCodec,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_owned(),
            public_base: public_base.into(),
            codec,
        }
    }

    /// Encrypt `plaintext` under a fresh key, upload the envelope, and build
    /// the link.
    pub async fn create(
        &self,
        plaintext: &str,
        pin: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<CreatedLink, ClientError> {
        let provider = self.codec.provider();
        let key = provider.generate_key();
        let content = self.codec.seal_text(plaintext, &key)?;

        let body = CreateRequest {
            content,
            password: pin.filter(|p| !p.is_empty()).map(str::to_owned),
            ttl: ttl.map(|d| d.as_secs()),
        };
        let resp = self
            .http
            .post(self.endpoint("create", None))
            .json(&body)
            .send()
            .await?;
        let created: CreateResponse = expect_json(resp).await?;
        debug!(id = %created.id, "secret uploaded");

        let link = SecretLink::new(created.id.clone(), provider.export_key(&key))
            .build(&self.public_base)?;
        Ok(CreatedLink {
            link,
            id: created.id,
            admin_token: created.admin_token,
        })
    }

    /// Pre-flight availability check. Does not spend an attempt.
    pub async fn check(&self, id: &str) -> Result<CheckResponse, ClientError> {
        let resp = self.http.get(self.endpoint("check", Some(id))).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::Gone);
        }
        expect_json(resp).await
    }

    pub async fn status(&self, id: &str) -> Result<StatusResponse, ClientError> {
        let resp = self.http.get(self.endpoint("status", Some(id))).send().await?;
        expect_json(resp).await
    }

    /// Reveal the secret behind `link`.
    ///
    /// The link and its key are validated before any request, so a broken
    /// link never costs an attempt. A successful response consumes the
    /// secret server-side even if decryption then fails.
    pub async fn reveal(
        &self,
        link: &str,
        pin: Option<&str>,
    ) -> Result<Zeroizing<String>, ClientError> {
        let parsed = SecretLink::parse(link)?;
        let key = self.codec.provider().import_key(parsed.exported_key())?;

        let body = ViewRequest {
            password: pin.map(str::to_owned),
        };
        let resp = self
            .http
            .post(self.endpoint("view", Some(parsed.id())))
            .json(&body)
            .send()
            .await?;
        let view: ViewResponse = expect_json(resp).await?;
        debug!(id = %parsed.id(), "envelope released");

        Ok(self.codec.open_text(&view.content, &key)?)
    }

    pub async fn burn(&self, id: &str, admin_token: &str) -> Result<(), ClientError> {
        let body = BurnRequest {
            admin_token: Some(admin_token.to_owned()),
        };
        let resp = self
            .http
            .post(self.endpoint("burn", Some(id)))
            .json(&body)
            .send()
            .await?;
        if resp.status().is_success() {
            debug!(%id, "secret burned");
            return Ok(());
        }
        Err(error_from(resp).await)
    }

    fn endpoint(&self, route: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/{route}/{id}", self.api_base),
            None => format!("{}/{route}", self.api_base),
        }
    }
}

async fn expect_json<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    if resp.status().is_success() {
        Ok(resp.json().await?)
    } else {
        Err(error_from(resp).await)
    }
}

/// Map a non-success response to the protocol outcome it encodes.
async fn error_from(resp: Response) -> ClientError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    let body: Option<ErrorBody> = serde_json::from_str(&text).ok();

    match status {
        StatusCode::GONE | StatusCode::NOT_FOUND => ClientError::Gone,
        StatusCode::UNAUTHORIZED => match body.and_then(|b| b.remaining_attempts) {
            Some(attempts_remaining) => ClientError::WrongPin { attempts_remaining },
            None => ClientError::Unauthorized,
        },
        StatusCode::BAD_REQUEST => {
            ClientError::Invalid(body.map(|b| b.error).unwrap_or(text))
        }
        other => ClientError::Server {
            status: other.as_u16(),
            message: body.map(|b| b.error).unwrap_or(text),
        },
    }
}
