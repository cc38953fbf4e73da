use anyhow::{Context, Result};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use retention_insights::auth::OAuthClient;
use retention_insights::config::{Config, StoreBackendKind};
use retention_insights::crypto::TokenCipher;
use retention_insights::http_client::PlatformHttpClient;
use retention_insights::platform::PlatformClient;
use retention_insights::routes;
use retention_insights::store::{CredentialStore, JsonFileBackend, SqliteBackend};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("🚀 Retention Insights starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    // Open the credential store
    let cipher = TokenCipher::from_encoded(&config.token_encryption_key)
        .context("TOKEN_ENCRYPTION_KEY is invalid")?;
    let store = Arc::new(open_store(&config, cipher)?);
    store
        .ensure_initialized()
        .context("Failed to initialize credential store")?;

    let channels = store.channel_ids().context("Failed to read credential store")?;
    if channels.is_empty() {
        tracing::warn!("No channel authorized yet; visit /auth/login to connect one");
    } else {
        tracing::info!("✅ Credential store holds {} channel(s)", channels.len());
    }

    // Initialize HTTP client
    let http_client = Arc::new(PlatformHttpClient::new(
        config.http_connect_timeout,
        config.http_request_timeout,
        config.http_max_retries,
    )?);
    tracing::info!("✅ HTTP client initialized");

    let oauth = Arc::new(OAuthClient::new(
        Arc::clone(&http_client),
        config.oauth_client_id.clone(),
        config.oauth_client_secret.clone(),
        config.oauth_redirect_uri.clone(),
    ));
    let platform = Arc::new(PlatformClient::new(Arc::clone(&http_client)));

    let app_state = routes::AppState::new(Arc::new(config.clone()), store, oauth, platform);

    // Build the application with routes and middleware
    let app = routes::build_router(app_state).layer(TraceLayer::new_for_http());

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    // Print startup banner
    print_startup_banner(&config);

    // Start server with graceful shutdown
    tracing::info!("🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 Server shutdown complete");

    Ok(())
}

/// Open the configured credential store backend
fn open_store(config: &Config, cipher: TokenCipher) -> Result<CredentialStore> {
    let store = match config.store_backend {
        StoreBackendKind::File => {
            CredentialStore::new(JsonFileBackend::new(config.store_path.clone()), cipher)
        }
        StoreBackendKind::Sqlite => {
            let backend = SqliteBackend::open(&config.store_path).with_context(|| {
                format!("Failed to open SQLite store at {}", config.store_path.display())
            })?;
            CredentialStore::new(backend, cipher)
        }
    };

    Ok(store)
}

/// Print startup banner
fn print_startup_banner(config: &Config) {
    let banner = r#"
╔═══════════════════════════════════════════════════════════╗
║                                                           ║
║              📈 Retention Insights                        ║
║                                                           ║
║  Channel authorization and audience retention analysis   ║
║                                                           ║
╚═══════════════════════════════════════════════════════════╝
"#;

    println!("{}", banner);
    println!("  Version:     {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:      http://{}:{}",
        config.server_host, config.server_port
    );
    println!(
        "  Store:       {:?} ({})",
        config.store_backend,
        config.store_path.display()
    );
    println!(
        "  API Key:     {}",
        if config.api_key.is_some() {
            "required"
        } else {
            "disabled"
        }
    );
    println!("  Log Level:   {}", config.log_level);
    println!();
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
