use std::sync::Arc;
use std::time::Duration;

use parley_server::{AppState, ServerConfig};
use parley_store::{database, RowStore, SqliteStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

const BUCKET_PURGE_INTERVAL: Duration = Duration::from_secs(300);
const BUCKET_MAX_IDLE: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store
    // -----------------------------------------------------------------------
    let db_path = match &config.database_path {
        Some(path) => path.clone(),
        None => database::default_path()?,
    };
    let store: Arc<dyn RowStore> = Arc::new(SqliteStore::open_at(&db_path)?);
    info!(path = %db_path.display(), "Store opened");

    let http_addr = config.http_addr;
    let app_state = AppState::new(config, store);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    let limiter = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(BUCKET_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            limiter.purge_idle(BUCKET_MAX_IDLE).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server until shutdown
    // -----------------------------------------------------------------------
    tokio::select! {
        result = parley_server::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
