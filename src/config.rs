use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::crypto::TokenCipher;

/// Retention Insights - channel authorization and retention drop analysis
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "8000")]
    pub port: u16,

    /// API key required on /api routes (optional)
    #[arg(short = 'k', long, env = "API_KEY")]
    pub api_key: Option<String>,

    /// 32-byte key for refresh token encryption (64 hex chars or base64)
    #[arg(long, env = "TOKEN_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    /// Credential store backend (file, sqlite)
    #[arg(long, env = "CREDENTIAL_STORE", default_value = "file")]
    pub store: String,

    /// Path to the credential store
    #[arg(short = 's', long, env = "CREDENTIAL_STORE_PATH", default_value = "credentials.json")]
    pub store_path: String,

    /// OAuth client id
    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[arg(long, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// OAuth redirect URI registered with the platform
    #[arg(
        long,
        env = "GOOGLE_REDIRECT_URI",
        default_value = "http://localhost:8000/oauth2callback"
    )]
    pub redirect_uri: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "60")]
    pub http_timeout: u64,

    /// HTTP max retries
    #[arg(long, env = "HTTP_MAX_RETRIES", default_value = "3")]
    pub http_retries: u32,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Authentication
    pub api_key: Option<String>,

    // Credential store
    pub token_encryption_key: String,
    pub store_backend: StoreBackendKind,
    pub store_path: PathBuf,

    // OAuth client
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_redirect_uri: String,

    // Timeouts
    pub token_refresh_threshold: u64,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub http_max_retries: u32,

    // Retention
    pub recent_uploads_limit: usize,
    pub uploads_cache_ttl: u64,

    // Logging
    pub log_level: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StoreBackendKind {
    File,
    Sqlite,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();

        let config = Config {
            server_host: args.host,
            server_port: args.port,

            api_key: args.api_key.filter(|k| !k.trim().is_empty()),

            token_encryption_key: args
                .encryption_key
                .context("TOKEN_ENCRYPTION_KEY is required (use --encryption-key or set TOKEN_ENCRYPTION_KEY env var)")?,

            store_backend: parse_store_backend(&args.store)?,

            store_path: expand_tilde(&args.store_path),

            oauth_client_id: args
                .client_id
                .context("GOOGLE_CLIENT_ID is required (use --client-id or set GOOGLE_CLIENT_ID env var)")?,

            oauth_client_secret: args.client_secret.context(
                "GOOGLE_CLIENT_SECRET is required (use --client-secret or set GOOGLE_CLIENT_SECRET env var)",
            )?,

            oauth_redirect_uri: args.redirect_uri,

            token_refresh_threshold: env_or("TOKEN_REFRESH_THRESHOLD", 300),

            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 30),

            http_request_timeout: args.http_timeout,

            http_max_retries: args.http_retries,

            recent_uploads_limit: env_or("RECENT_UPLOADS_LIMIT", 10),

            uploads_cache_ttl: env_or("UPLOADS_CACHE_TTL", 120),

            log_level: args.log_level,
        };

        Ok(config)
    }

    /// Validate configuration
    ///
    /// Builds the token cipher once so a bad key fails before the server binds.
    pub fn validate(&self) -> Result<()> {
        TokenCipher::from_encoded(&self.token_encryption_key)
            .context("TOKEN_ENCRYPTION_KEY is invalid")?;

        if self.oauth_client_id.trim().is_empty() {
            anyhow::bail!("GOOGLE_CLIENT_ID cannot be empty");
        }

        if self.recent_uploads_limit == 0 {
            anyhow::bail!("RECENT_UPLOADS_LIMIT must be at least 1");
        }

        Ok(())
    }
}

/// Read a numeric setting from the environment, falling back to `default`
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse store backend from string
fn parse_store_backend(s: &str) -> Result<StoreBackendKind> {
    match s.trim().to_lowercase().as_str() {
        "file" | "json" => Ok(StoreBackendKind::File),
        "sqlite" => Ok(StoreBackendKind::Sqlite),
        other => anyhow::bail!("Unknown CREDENTIAL_STORE '{}' (expected file or sqlite)", other),
    }
}
