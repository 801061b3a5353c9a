//! Client side of securelink: encryption, key transport, links, and the HTTP
//! client that drives the server.

pub mod client;
pub mod envelope;
pub mod error;
pub mod key_transport;
pub mod link;
pub mod provider;

pub use client::{CreatedLink, SecureLinkClient};
pub use envelope::EnvelopeCodec;
pub use error::{ClientError, EnvelopeError, KeyTransportError, LinkError};
pub use link::SecretLink;
pub use provider::{CryptoProvider, OsCryptoProvider, SecretKey};
