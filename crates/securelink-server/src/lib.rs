pub mod api;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod pin;
pub mod server;
pub mod store;

use std::sync::Arc;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<lifecycle::SecretManager>,
}

pub use error::{LifecycleError, StoreError};
pub use lifecycle::{LifecyclePolicy, SecretManager};
pub use pin::PinHasher;
pub use server::{resolve_data_dir, router, run, ServerConfig};
