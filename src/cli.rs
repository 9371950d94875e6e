use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sk_auth::{ApiRequest, Claims, Session, SessionConfig, claims};
use sk_store::{EncryptedBackend, EncryptionKey, FileBackend, StorageBackend};
use tracing::debug;
use url::Url;

const CONFIG_FILE: &str = "session.toml";

#[derive(Parser, Debug)]
#[command(name = "session-keeper", version, about = "Keep a bearer session alive across runs")]
pub struct Cli {
    /// Path to a session.toml (defaults to the platform config dir)
    #[arg(long, env = "SK_CONFIG")]
    pub config: Option<PathBuf>,

    /// API base URL; overrides the config file
    #[arg(long, env = "SK_BASE_URL")]
    pub base_url: Option<Url>,

    /// Directory holding the stored credential
    #[arg(long, env = "SK_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Base64 AES-256 key; when set, stored values are encrypted
    #[arg(long, env = "SK_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store a token pair issued by the sign-in endpoint
    Login {
        #[arg(long, env = "SK_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,
        #[arg(long, env = "SK_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: String,
        #[arg(long)]
        subject_id: String,
    },
    /// Forget the stored credential
    Logout,
    /// Show who is signed in and when the access token expires
    Status,
    /// Send an authenticated GET and print the response body
    Get {
        /// Path relative to the base URL, or an absolute URL
        path: String,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli).await?;
    let backend = open_backend(&cli).await?;
    let session = Session::connect(config, backend)?;

    match cli.command {
        Command::Login {
            access_token,
            refresh_token,
            subject_id,
        } => {
            session
                .login(&access_token, &refresh_token, &subject_id)
                .await?;
            println!("Signed in as {subject_id}");
        }
        Command::Logout => {
            session.logout().await;
            println!("Signed out");
        }
        Command::Status => status(&session).await,
        Command::Get { path } => {
            let response = session.send(ApiRequest::get(path)).await.map_err(|err| {
                anyhow!("{} ({err})", err.user_message())
            })?;
            println!("{}", serde_json::to_string_pretty(&response.body)?);
        }
    }

    Ok(())
}

async fn status(session: &Session) {
    let Some(credential) = session.restore().await else {
        println!("Not signed in");
        return;
    };

    println!("Subject:   {}", credential.subject_id);
    println!("Saved at:  {}", credential.saved_at);
    match claims::inspect(&credential.access_token) {
        Claims::Valid(claims) => {
            let expired = claims.is_expired(Utc::now(), session.config().expiry_margin);
            println!(
                "Expires:   {}{}",
                claims.expires_at,
                if expired { " (refresh due)" } else { "" }
            );
            if let Some(scope) = claims.scope {
                println!("Scope:     {scope}");
            }
        }
        Claims::Malformed => println!("Expires:   unknown (opaque token, refreshed before use)"),
    }
}

async fn load_config(cli: &Cli) -> Result<SessionConfig> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => FileBackend::default_storage_dir()
            .ok()
            .map(|dir| dir.join(CONFIG_FILE))
            .filter(|path| path.exists()),
    };

    let mut config = match (path, &cli.base_url) {
        (Some(path), _) => {
            debug!("Loading configuration from {}", path.display());
            SessionConfig::load(&path)
                .await
                .with_context(|| format!("Failed to load {}", path.display()))?
        }
        (None, Some(base_url)) => SessionConfig::new(base_url.clone()),
        (None, None) => bail!("No configuration found; pass --base-url or --config"),
    };

    if let Some(base_url) = &cli.base_url {
        config.api_base_url = base_url.clone();
    }
    Ok(config)
}

async fn open_backend(cli: &Cli) -> Result<Arc<dyn StorageBackend>> {
    let dir = match &cli.storage_dir {
        Some(dir) => dir.clone(),
        None => FileBackend::default_storage_dir()?,
    };
    let files = FileBackend::new(&dir)
        .await
        .with_context(|| format!("Failed to open storage at {}", dir.display()))?;

    let Some(encoded) = &cli.encryption_key else {
        return Ok(Arc::new(files));
    };
    let bytes: [u8; 32] = STANDARD
        .decode(encoded.trim())
        .context("Encryption key is not valid base64")?
        .try_into()
        .map_err(|_| anyhow!("Encryption key must be 32 bytes"))?;

    Ok(Arc::new(EncryptedBackend::new(
        files,
        EncryptionKey::from_bytes(bytes),
    )))
}
