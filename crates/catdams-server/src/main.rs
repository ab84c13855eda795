use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rusqlite::Connection;
use tracing::{info, warn};

use catdams_core::config::{CatdamsConfig, SHUTDOWN_DRAIN_SECS};
use catdams_engine::Orchestrator;
use catdams_providers::AnalysisGateway;
use catdams_sink::VerdictSink;
use catdams_store::InteractionStore;

mod app;
mod http;
mod ws;

/// How often the retention task sweeps old records.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Parser)]
#[command(name = "catdams-server", about = "CATDAMS detection core server")]
struct Args {
    /// Path to catdams.toml (default: ~/.catdams/catdams.toml).
    #[arg(long)]
    config: Option<String>,
    /// Override the bind address from config.
    #[arg(long)]
    bind: Option<String>,
    /// Override the port from config.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catdams=info,catdams_server=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = CatdamsConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CatdamsConfig::default()
    });
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Two connections onto the same database file: the interaction log and
    // the verdict log are independent tables with independent lock scopes.
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store_conn = Connection::open(&config.database.path)?;
    catdams_store::db::init_db(&store_conn)?;
    let store = Arc::new(InteractionStore::new(store_conn));

    let sink_conn = Connection::open(&config.database.path)?;
    catdams_sink::db::init_db(&sink_conn)?;
    let sink = Arc::new(VerdictSink::new(sink_conn));

    let gateway = Arc::new(AnalysisGateway::from_config(
        &config.gateway,
        &config.circuit,
        &config.cache,
    ));
    if !gateway.llm_available() && !gateway.text_available() {
        warn!("no analysis providers configured, running keyword-only");
    }

    let orchestrator = Orchestrator::new(&config, store.clone(), gateway, sink.clone());
    spawn_retention_task(store, sink, &config);

    let bind = config.server.bind.clone();
    let port = config.server.port;
    let state = Arc::new(app::AppState::new(config, orchestrator.clone()));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("CATDAMS detection core listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain what's already queued, then reject the rest.
    orchestrator.begin_shutdown();
    if orchestrator
        .drain(Duration::from_secs(SHUTDOWN_DRAIN_SECS))
        .await
    {
        info!("drained cleanly");
    } else {
        warn!("drain deadline hit, in-flight events abandoned");
    }

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

/// Hourly sweep enforcing the two retention windows.
fn spawn_retention_task(
    store: Arc<InteractionStore>,
    sink: Arc<VerdictSink>,
    config: &CatdamsConfig,
) {
    let interaction_days = config.retention.interaction_days as i64;
    let verdict_days = config.retention.verdict_days as i64;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let now = chrono::Utc::now();
            match store.prune_before(now - chrono::Duration::days(interaction_days)) {
                Ok(0) => {}
                Ok(n) => info!(removed = n, "pruned old interaction records"),
                Err(e) => warn!(error = %e, "interaction prune failed"),
            }
            match sink.prune_before(now - chrono::Duration::days(verdict_days)) {
                Ok(0) => {}
                Ok(n) => info!(removed = n, "pruned old verdicts"),
                Err(e) => warn!(error = %e, "verdict prune failed"),
            }
        }
    });
}
