//! # Rollcall - cluster membership control plane
//!
//! Assigns small integer identities to data nodes, keeps the coordinator's
//! roster of connected nodes in step with the membership table, and holds
//! the replication log of pending changes.
//!
//! ## Architecture
//! ```text
//! Agent ──RPC──▶ Coordinator ──▶ Redis (identity state)
//!   ▲               │   ▲
//!   └───Ping────────┘   └── Postgres (membership, LISTEN node, sync log)
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod agent;
mod config;
mod db;
mod registry;
mod roster;
mod routes;
mod rpc;
mod state;
mod store;
mod synclog;

use agent::{Agent, Registration};
use config::AppConfig;
use registry::Registry;
use roster::{
    LoggingSync, NotificationDispatcher, NotificationListener, PgMembership, PgNodeConnector,
    Roster,
};
use rollcall_common::constants::NODE_CHANNEL;
use rpc::{RpcClient, RpcServer};
use state::AppState;
use store::{IdentityStore, MemoryIdentityStore, RedisIdentityStore};
use synclog::{MemorySyncLog, PgSyncLog, SyncLog};

/// Rollcall - node identity arbitration, roster sync and replication log
#[derive(Parser, Debug)]
#[command(name = "rollcall")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/rollcall.toml")]
    config: String,

    /// Redis URL (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Postgres connection string (overrides config)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Admin HTTP listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// RPC listen address (overrides config)
    #[arg(long, env = "RPC_ADDR")]
    rpc_addr: Option<String>,

    /// Coordinator RPC address for the agent (overrides config)
    #[arg(long, env = "COORDINATOR_ADDR")]
    coordinator: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,

    /// Keep identity state and the sync log in memory
    #[arg(long, default_value = "false")]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Run the coordinator: registry, roster, replication log, admin HTTP
    Coordinator,
    /// Run a node agent: register with the coordinator and answer pings
    Agent,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up a local .env before clap reads the environment
    let _ = dotenvy::dotenv();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("🔥 Starting Rollcall v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!("📋 Configuration loaded from {}", args.config);

    match args.command {
        Command::Coordinator => run_coordinator(config).await,
        Command::Agent => run_agent(config).await,
    }
}

async fn run_coordinator(config: AppConfig) -> Result<()> {
    // Create shutdown broadcast channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let client = Arc::new(db::connect(&config.database_url).await?);
    db::ensure_schema(&client).await?;
    info!("✅ Postgres connected, schema ensured");

    let (redis, identity_store, sync_log) = if config.dry_run {
        warn!("🧪 Dry run: identity state and sync log are kept in memory");
        (
            None,
            Arc::new(MemoryIdentityStore::new()) as Arc<dyn IdentityStore>,
            Arc::new(MemorySyncLog::new()) as Arc<dyn SyncLog>,
        )
    } else {
        let redis = state::connect_redis(&config.redis_url).await?;
        info!("✅ Redis connected: {}", config.redis_url);
        (
            Some(redis.clone()),
            Arc::new(RedisIdentityStore::new(redis)) as Arc<dyn IdentityStore>,
            Arc::new(PgSyncLog::new(client.clone())) as Arc<dyn SyncLog>,
        )
    };

    // Control-plane registry, served over RPC
    let registry = Arc::new(Registry::new(
        identity_store,
        Arc::new(RpcClient::new(config.rpc_timeout())),
    ));
    let rpc_server = RpcServer::bind(&config.rpc_addr)
        .await?
        .with_idle_timeout(config.rpc_idle());
    let rpc_task = tokio::spawn(rpc_server.serve(registry.clone(), shutdown_tx.subscribe()));

    // Node roster: subscribe first so changes made during the scan are replayed
    let roster = Arc::new(Roster::new(
        Arc::new(PgMembership::new(client.clone())),
        Arc::new(PgNodeConnector),
        Arc::new(LoggingSync),
        config.roster.page_size,
    ));

    let (notify_tx, notify_rx) = mpsc::channel(config.queue_capacity());
    let _listener = NotificationListener::spawn(&config.database_url, NODE_CHANNEL, notify_tx).await?;

    let dispatcher = Arc::new(NotificationDispatcher::new(
        roster.clone(),
        config.queue_capacity(),
        config.idle_worker(),
    ));
    let dispatcher_shutdown = shutdown_tx.subscribe();
    let consumer_failed = Arc::new(Notify::new());
    let consumer = {
        let failed = consumer_failed.clone();
        tokio::spawn(async move {
            let result = dispatcher.run(notify_rx, dispatcher_shutdown).await;
            if result.is_err() {
                failed.notify_one();
            }
            result
        })
    };

    let loaded = roster.bootstrap().await.context("Roster bootstrap failed")?;
    info!(loaded, "🗂️ Roster bootstrapped");

    // Initialize application state
    let state = AppState::new(config.clone(), redis, registry, roster, sync_log);

    // Build router
    let app = routes::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("🚀 Rollcall coordinator listening on {}", config.listen_addr);

    // A dead notification consumer stops the coordinator like Ctrl+C does
    let stop = {
        let shutdown_tx = shutdown_tx.clone();
        async move {
            tokio::select! {
                _ = shutdown_signal(shutdown_tx.clone()) => {}
                _ = consumer_failed.notified() => {
                    error!("🛑 Membership notifications lost; shutting down");
                    let _ = shutdown_tx.send(());
                }
            }
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(stop)
        .await
        .context("Server error")?;

    join_rpc(rpc_task).await;
    consumer
        .await
        .context("Notification consumer panicked")?
        .context("Notification consumer failed")?;
    info!("👋 Rollcall coordinator shutdown complete");
    Ok(())
}

async fn run_agent(config: AppConfig) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let registration = Registration {
        cluster_name: config.agent.cluster_name.clone(),
        max_nodes: config.agent.max_nodes,
        service: config.agent.service.clone(),
        host: config.agent_host()?,
        port: config.agent_port()?,
    };
    let agent = Arc::new(Agent::new(
        registration,
        config.agent.coordinator_addr.clone(),
        RpcClient::new(config.rpc_timeout()),
    ));

    // Answer pings before asking for an identity
    let rpc_server = RpcServer::bind(&config.rpc_addr)
        .await?
        .with_idle_timeout(config.rpc_idle());
    let rpc_task = tokio::spawn(rpc_server.serve(agent.clone(), shutdown_tx.subscribe()));

    let id = agent
        .register()
        .await
        .with_context(|| format!("Registration with {} failed", config.agent.coordinator_addr))?;
    info!(
        id,
        instance = %agent.instance_id(),
        last_seen = agent.last_seen(),
        "🚀 Rollcall agent registered"
    );

    if let Some(secs) = config.agent.renew_interval_secs.filter(|s| *s > 0) {
        let renewing = agent.clone();
        let renew_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            renewing
                .run_renewal(Duration::from_secs(secs), renew_shutdown)
                .await;
        });
    }

    shutdown_signal(shutdown_tx).await;

    join_rpc(rpc_task).await;
    info!("👋 Rollcall agent shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C, then tell every background task to stop
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C; shutting down");
    }
    info!("🛑 Shutdown signal received");
    let _ = shutdown_tx.send(());
}

async fn join_rpc(task: tokio::task::JoinHandle<Result<()>>) {
    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "RPC server failed"),
        Err(e) => error!(error = %e, "RPC server task panicked"),
    }
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
