use std::sync::Arc;

use {
    clap::Parser,
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    atelier_accounts::{ActiveAccount, AuthStore},
    atelier_gateway::{GatewayState, ws::PoolProbe},
    atelier_pool::{CdpDriver, ContextPoolManager, PoolPolicy, detect},
    atelier_registry::ConnectionRegistry,
    atelier_rotation::RotationController,
};

#[derive(Parser)]
#[command(name = "atelier", about = "atelier — studio-backed model API proxy")]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Config file path (overrides standard discovery).
    #[arg(long, env = "ATELIER_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Address to bind to (overrides config value).
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long)]
    port: Option<u16>,

    /// Credential directory (overrides config value).
    #[arg(long, env = "ATELIER_AUTH_DIR")]
    auth_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut config = match &cli.config {
        Some(path) => atelier_config::load_config(path)?,
        None => atelier_config::discover_and_load(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(auth_dir) = cli.auth_dir {
        config.pool.auth_dir = auth_dir;
    }

    // Fatal startup check: without a browser binary there is nothing to
    // drive.
    let detection = detect::detect_browser(config.pool.browser_path.as_deref());
    if !detection.found {
        error!("no browser binary found");
        anyhow::bail!("{}", detection.install_hint);
    }

    let store = Arc::new(AuthStore::new(config.pool.auth_dir.clone()));
    if let Err(e) = store.reload().await {
        // An unreadable credential directory with no accounts at all is
        // fatal; a readable-but-empty one is not.
        anyhow::bail!(
            "credential directory {} is unreadable: {e}",
            config.pool.auth_dir.display()
        );
    }
    let initial = store.initial_indices().await;
    info!(accounts = initial.len(), dir = %config.pool.auth_dir.display(), "credential store loaded");

    let active = Arc::new(ActiveAccount::new());
    let registry = ConnectionRegistry::new(Arc::clone(&active));
    let policy = PoolPolicy::from_config(&config);
    let driver = CdpDriver::new(policy.browser_path.clone());
    let pool = ContextPoolManager::new(
        driver,
        Arc::clone(&store),
        Arc::clone(&active),
        policy,
    );
    registry.set_probe(Arc::new(PoolProbe(Arc::clone(&pool)))).await;
    let rotation = RotationController::new(
        Arc::clone(&store),
        Arc::clone(&pool),
        Arc::clone(&active),
    );

    pool.launch().await.map_err(|e| anyhow::anyhow!("browser launch failed: {e}"))?;

    let order = store.rotation_indices().await;
    if order.is_empty() {
        warn!("no usable accounts yet; add credential files through the admin API");
    } else {
        match pool.preload(&order).await {
            Ok(index) => info!(auth_index = index, "startup preload complete"),
            Err(e) => warn!(error = %e, "startup preload failed; serving anyway"),
        }
    }

    let state = GatewayState::new(config, store, active, pool, registry, rotation);
    let bind = state.config.server.bind.clone();
    let port = state.config.server.port;
    atelier_gateway::run(state, &bind, port).await
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
