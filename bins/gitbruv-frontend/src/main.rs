use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use gitbruv_frontend::auth::{AuthRateLimiter, LocalValidator, MemoryAuthStore};
use gitbruv_frontend::{router, AppState, FrontendConfig, StaticCatalog};

#[derive(Parser, Debug)]
#[command(name = "gitbruv-frontend")]
#[command(about = "gitbruv - smart HTTP git server and browsing API")]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "GITBRUV_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "GITBRUV_LISTEN_ADDR")]
    listen_addr: Option<SocketAddr>,

    #[arg(long, env = "GITBRUV_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Prometheus exporter address; metrics are not exported when unset.
    #[arg(long, env = "GITBRUV_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

impl Args {
    fn load_config(&self) -> Result<FrontendConfig> {
        let mut config = match &self.config {
            Some(path) => FrontendConfig::load(path)?,
            None => FrontendConfig::default(),
        };
        if let Some(addr) = self.listen_addr {
            config = config.with_listen_addr(addr);
        }
        if let Some(dir) = &self.data_dir {
            config = config.with_data_dir(dir.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.load_config()?;

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| anyhow::anyhow!("metrics init failed: {}", e))?;
        tracing::info!(%addr, "Metrics server started");
    }

    std::fs::create_dir_all(&config.data_dir)?;

    let auth_store = Arc::new(MemoryAuthStore::new(
        config.users.clone(),
        config.tokens.clone(),
    ));
    let rate_limiter = Arc::new(AuthRateLimiter::from_config(&config.auth));
    let validator = Arc::new(LocalValidator::new(auth_store, rate_limiter));
    let catalog = Arc::new(StaticCatalog::new(config.repositories.clone()));

    let listen_addr = config.listen_addr;
    tracing::info!(
        %listen_addr,
        data_dir = %config.data_dir.display(),
        repositories = config.repositories.len(),
        users = config.users.len(),
        "Starting gitbruv frontend"
    );

    let app = router(AppState::new(config, catalog, validator));
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down frontend server");
        })
        .await?;

    Ok(())
}
