use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use customs::config::{CustomsConfig, StoreBackend};
use customs::http::HttpServer;
use customs::policy::DecisionEngine;
use customs::store::{CounterStore, MemoryStore, RedisStore};

/// Abuse-prevention decision service.
#[derive(Debug, Parser)]
#[command(name = "customs", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Override the counter store backend
    #[arg(long, value_enum)]
    store: Option<StoreArg>,

    /// Override the Redis URL
    #[arg(long)]
    redis_url: Option<String>,

    /// Mount the administrative /reset route
    #[arg(long)]
    allow_reset: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreArg {
    Memory,
    Redis,
}

impl From<StoreArg> for StoreBackend {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Memory => StoreBackend::Memory,
            StoreArg::Redis => StoreBackend::Redis,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting Customs abuse-prevention service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = CustomsConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.http_addr {
        config.server.http_addr = addr;
    }
    if let Some(store) = cli.store {
        config.store.backend = store.into();
    }
    if let Some(url) = cli.redis_url {
        config.store.redis_url = url;
    }
    if cli.allow_reset {
        config.server.allow_reset = true;
    }

    info!(
        http_addr = %config.server.http_addr,
        backend = ?config.store.backend,
        max_verify_codes = config.limits.max_verify_codes,
        max_distinct_emails_per_ip = config.limits.max_distinct(),
        rate_limit_interval_secs = config.limits.rate_limit_interval_secs,
        ip_rate_limit_interval_secs = config.limits.ip_rate_limit_interval_secs,
        ip_rate_limit_ban_duration_secs = config.limits.ip_rate_limit_ban_duration_secs,
        "Configuration loaded"
    );

    let store = build_store(&config).await?;
    let engine = Arc::new(DecisionEngine::new(store, &config.limits));
    info!("Decision engine initialized");

    HttpServer::new(config.server.http_addr, engine)
        .with_reset(config.server.allow_reset)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Customs abuse-prevention service stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).with_thread_ids(true))
            .with(filter)
            .init(),
    }
}

/// Connect the configured counter store.
async fn build_store(config: &CustomsConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());

            let sweeper = store.clone();
            let interval = config.store.sweep_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    sweeper.purge_expired();
                }
            });

            info!("Using in-memory counter store");
            Ok(store as Arc<dyn CounterStore>)
        }
        StoreBackend::Redis => {
            let store = RedisStore::connect(
                &config.store.redis_url,
                &config.store.key_prefix,
                config.store.timeout(),
            )
            .await?;

            info!(prefix = %config.store.key_prefix, "Using Redis counter store");
            Ok(Arc::new(store))
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
