use std::io::Read;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use securelink::{ClientError, SecretLink, SecureLinkClient};
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "securelink", about = "Self-destructing, end-to-end encrypted secret links", version)]
struct Cli {
    /// API base URL ($SECURELINK_SERVER)
    #[arg(long, env = "SECURELINK_SERVER", default_value = "http://localhost:8080/api")]
    server: String,

    /// Origin that shared links point at ($SECURELINK_PUBLIC_URL)
    #[arg(long, env = "SECURELINK_PUBLIC_URL", default_value = "http://localhost:8080")]
    public_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the securelink HTTP server
    Serve {
        /// Port to listen on (default: $SECURELINK_PORT or 8080)
        #[arg(long, env = "SECURELINK_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $SECURELINK_HOST or 0.0.0.0)
        #[arg(long, env = "SECURELINK_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Keep secrets in memory only
        #[arg(long)]
        ephemeral: bool,
    },
    /// Encrypt a secret locally, upload it, and print a one-time link
    Create {
        /// Secret text, or `-` / omitted to read stdin
        #[arg(name = "TEXT")]
        text: Option<String>,
        /// PIN the recipient must enter
        #[arg(long)]
        pin: Option<String>,
        /// TTL duration e.g. 1h, 30m, 7d
        #[arg(long)]
        ttl: Option<String>,
    },
    /// Fetch and decrypt a secret. Destroys it on success
    Reveal {
        link: String,
        #[arg(long)]
        pin: Option<String>,
    },
    /// Show whether a secret is still available, without spending an attempt
    Check {
        /// Link or secret id
        target: String,
    },
    /// Creator's view of a secret
    Status {
        /// Link or secret id
        target: String,
    },
    /// Destroy a secret early
    Burn {
        /// Link or secret id
        target: String,
        #[arg(long, env = "SECURELINK_ADMIN_TOKEN")]
        admin_token: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SECURELINK_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let client = SecureLinkClient::new(&cli.server, &cli.public_url);

    match cli.command {
        Commands::Serve {
            port,
            host,
            ephemeral,
        } => cmd_serve(host, port, ephemeral).await,

        Commands::Create { text, pin, ttl } => {
            cmd_create(&client, text, pin.as_deref(), ttl.as_deref()).await
        }

        Commands::Reveal { link, pin } => cmd_reveal(&client, &link, pin.as_deref()).await,

        Commands::Check { target } => cmd_check(&client, &target).await,

        Commands::Status { target } => cmd_status(&client, &target).await,

        Commands::Burn {
            target,
            admin_token,
        } => cmd_burn(&client, &target, &admin_token).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16, ephemeral: bool) -> Result<()> {
    let cfg = securelink_server::ServerConfig {
        host,
        port,
        ephemeral,
        ..Default::default()
    };
    securelink_server::run(cfg).await
}

async fn cmd_create(
    client: &SecureLinkClient,
    text: Option<String>,
    pin: Option<&str>,
    ttl: Option<&str>,
) -> Result<()> {
    let ttl = ttl.map(parse_duration).transpose()?;

    let plaintext = match text.as_deref() {
        Some(t) if t != "-" => zeroize::Zeroizing::new(t.to_owned()),
        _ => {
            let mut buf = zeroize::Zeroizing::new(String::new());
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read secret from stdin")?;
            let trimmed = buf.trim_end_matches(['\r', '\n']).len();
            buf.truncate(trimmed);
            buf
        }
    };
    if plaintext.is_empty() {
        anyhow::bail!("refusing to share an empty secret");
    }

    let created = client
        .create(&plaintext, pin, ttl)
        .await
        .context("create secret")?;

    println!("{}", created.link);
    eprintln!("id:          {}", created.id);
    eprintln!("admin token: {}", created.admin_token);
    Ok(())
}

async fn cmd_reveal(client: &SecureLinkClient, link: &str, pin: Option<&str>) -> Result<()> {
    match client.reveal(link, pin).await {
        Ok(plaintext) => {
            println!("{}", plaintext.as_str());
            Ok(())
        }
        Err(ClientError::WrongPin { attempts_remaining }) if attempts_remaining > 0 => {
            anyhow::bail!("incorrect pin, {attempts_remaining} attempt(s) left")
        }
        Err(ClientError::WrongPin { .. }) => {
            anyhow::bail!("incorrect pin, the secret has been destroyed")
        }
        Err(e) => Err(e).context("reveal secret"),
    }
}

async fn cmd_check(client: &SecureLinkClient, target: &str) -> Result<()> {
    let id = resolve_id(target)?;
    match client.check(&id).await {
        Ok(check) => {
            let pin = if check.requires_password {
                "pin required"
            } else {
                "no pin"
            };
            println!(
                "available: {pin}, {} attempt(s) remaining",
                check.remaining_attempts
            );
            Ok(())
        }
        Err(ClientError::Gone) => {
            println!("not available");
            Ok(())
        }
        Err(e) => Err(e).context("check secret"),
    }
}

async fn cmd_status(client: &SecureLinkClient, target: &str) -> Result<()> {
    let id = resolve_id(target)?;
    let status = client.status(&id).await.context("fetch status")?;

    if !status.active {
        println!("{id}: destroyed");
        return Ok(());
    }
    let expiry = match status.expires_at {
        Some(exp) => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64;
            format!("expires in {}", format_duration((exp - now).max(0) as u64))
        }
        None => "no expiry reported".to_string(),
    };
    println!(
        "{id}: active, {} attempt(s) left, {expiry}",
        status.attempts_left
    );
    Ok(())
}

async fn cmd_burn(client: &SecureLinkClient, target: &str, admin_token: &str) -> Result<()> {
    let id = resolve_id(target)?;
    match client.burn(&id, admin_token).await {
        Ok(()) => {
            println!("✓ burned {id}");
            Ok(())
        }
        Err(ClientError::Gone) => anyhow::bail!("{id} is already gone"),
        Err(e) => Err(e).context("burn secret"),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Accept either a full link or a bare id.
fn resolve_id(target: &str) -> Result<String> {
    if target.contains("://") {
        SecretLink::parse_id(target).context("parse link")
    } else {
        Ok(target.trim().to_owned())
    }
}

/// Parse human duration strings like "1h", "30m", "7d", "5s".
fn parse_duration(s: &str) -> Result<Duration> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.into())
}

fn format_duration(secs: u64) -> String {
    if secs >= 86400 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}
