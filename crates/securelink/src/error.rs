use thiserror::Error;

/// Envelope sealing/opening failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The envelope did not authenticate under the key, or was malformed.
    /// Nothing about the plaintext is exposed.
    #[error("envelope failed to authenticate")]
    Authentication,

    #[error("encryption failed")]
    Encryption,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyTransportError {
    #[error("malformed key: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("link has no decryption key")]
    MissingKey,

    #[error("malformed link: {0}")]
    Malformed(String),
}

/// Everything the client orchestrator can report to its caller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The link carries no `#fragment`. Detected locally, before any request.
    #[error("link has no decryption key")]
    MissingKey,

    #[error("malformed link: {0}")]
    MalformedLink(String),

    #[error("malformed decryption key: {0}")]
    MalformedKey(String),

    /// Server-reported wrong PIN. The count is the server's, never a local guess.
    #[error("incorrect pin, {attempts_remaining} attempt(s) remaining")]
    WrongPin { attempts_remaining: u32 },

    #[error("secret not found or destroyed")]
    Gone,

    #[error("invalid admin token")]
    Unauthorized,

    /// The ciphertext was released but did not open under the link's key.
    /// The secret is consumed either way.
    #[error("secret could not be decrypted")]
    Authentication,

    #[error("rejected by server: {0}")]
    Invalid(String),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Envelope(EnvelopeError),
}

impl From<LinkError> for ClientError {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::MissingKey => Self::MissingKey,
            LinkError::Malformed(msg) => Self::MalformedLink(msg),
        }
    }
}

impl From<KeyTransportError> for ClientError {
    fn from(e: KeyTransportError) -> Self {
        match e {
            KeyTransportError::Malformed(msg) => Self::MalformedKey(msg),
        }
    }
}

impl From<EnvelopeError> for ClientError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::Authentication => Self::Authentication,
            other => Self::Envelope(other),
        }
    }
}
