use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use directories::ProjectDirs;
use tokio::time;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    handlers::{burn_secret, check_secret, create_secret, health, secret_status, view_secret},
    lifecycle::{LifecyclePolicy, SecretManager},
    pin::PinHasher,
    store::{crypto, MemoryStore, RecordStore, RedbStore},
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    /// Keep records in memory only; nothing is written to disk.
    pub ephemeral: bool,
    pub sweep_interval: Duration,
    pub cors_origins: Option<String>,
    pub policy: LifecyclePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let defaults = LifecyclePolicy::default();
        Self {
            host: std::env::var("SECURELINK_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("SECURELINK_PORT").unwrap_or(8080),
            data_dir: std::env::var("SECURELINK_DATA_DIR").ok().map(PathBuf::from),
            ephemeral: false,
            sweep_interval: Duration::from_secs(
                env_parse("SECURELINK_SWEEP_INTERVAL_SECS").unwrap_or(300),
            ),
            cors_origins: std::env::var("SECURELINK_CORS_ORIGINS").ok(),
            policy: LifecyclePolicy {
                strike_budget: env_parse("SECURELINK_STRIKE_BUDGET")
                    .unwrap_or(defaults.strike_budget),
                default_ttl_secs: env_parse("SECURELINK_DEFAULT_TTL_SECS")
                    .unwrap_or(defaults.default_ttl_secs),
                max_ttl_secs: env_parse("SECURELINK_MAX_TTL_SECS")
                    .unwrap_or(defaults.max_ttl_secs),
                max_content_len: defaults.max_content_len,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Directory holding `securelink.db` and `securelink.key`: the configured one
/// (`SECURELINK_DATA_DIR`), else the platform data dir. Created if missing.
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let dir = match data_dir {
        Some(d) => d.clone(),
        None => ProjectDirs::from("", "", "securelink")
            .context("could not determine platform data directory")?
            .data_dir()
            .to_owned(),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create data dir {}", dir.display()))?;
    Ok(dir)
}

/// Build the HTTP router over `state`. Exposed so tests can serve it directly.
pub fn router(state: AppState, cors_origins: Option<&str>) -> Router {
    let api = Router::new()
        .route("/create", post(create_secret))
        .route("/check/{id}", get(check_secret))
        .route("/status/{id}", get(secret_status))
        .route("/view/{id}", post(view_secret))
        .route("/burn/{id}", post(burn_secret));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let store: Arc<dyn RecordStore> = if cfg.ephemeral {
        info!("using in-memory store; secrets are lost on restart");
        Arc::new(MemoryStore::new())
    } else {
        let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
        info!(data_dir = %data_dir.display(), "using data directory");

        let key = load_or_create_key(&data_dir)?;
        let store = RedbStore::open(&data_dir.join("securelink.db"), key).context("open store")?;
        Arc::new(store)
    };

    let pins = PinHasher::interactive().context("configure pin hashing")?;
    let manager = Arc::new(SecretManager::new(store, pins, cfg.policy));
    info!(
        strike_budget = manager.policy().strike_budget,
        default_ttl_secs = manager.policy().default_ttl_secs,
        "lifecycle policy"
    );

    spawn_sweep(manager.clone(), cfg.sweep_interval);

    let app = router(AppState { manager }, cfg.cors_origins.as_deref());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "securelink server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

/// Spawn a background Tokio task that reclaims dead records every `interval`.
pub fn spawn_sweep(manager: Arc<SecretManager>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.tick().await; // skip first immediate tick
        loop {
            ticker.tick().await;
            let m = manager.clone();
            match tokio::task::spawn_blocking(move || m.sweep()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "background sweep error"),
                Err(e) => warn!(error = %e, "background sweep task failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn load_or_create_key(data_dir: &Path) -> Result<crypto::StorageKey> {
    let key_path = data_dir.join("securelink.key");
    if key_path.exists() {
        let bytes = std::fs::read(&key_path).context("read securelink.key")?;
        crypto::load_key(&bytes).ok_or_else(|| {
            anyhow::anyhow!(
                "securelink.key is corrupt (expected 32 bytes, got {})",
                bytes.len()
            )
        })
    } else {
        let key = crypto::generate_key();
        std::fs::write(&key_path, key.as_bytes()).context("write securelink.key")?;
        info!("generated new storage key");
        Ok(key)
    }
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<http::HeaderValue> = o
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn key_is_created_once_and_reloaded() {
        let dir = tempdir().unwrap();
        let first = load_or_create_key(dir.path()).unwrap();
        let second = load_or_create_key(dir.path()).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn corrupt_key_file_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("securelink.key"), b"short").unwrap();
        let err = load_or_create_key(dir.path()).err().unwrap();
        assert!(err.to_string().contains("corrupt"));
    }

    #[test]
    fn explicit_data_dir_is_created() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let resolved = resolve_data_dir(Some(&nested)).unwrap();
        assert_eq!(resolved, nested);
        assert!(nested.is_dir());
    }
}
