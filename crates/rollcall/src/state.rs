//! Application state and shared resources.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::registry::Registry;
use crate::roster::Roster;
use crate::synclog::SyncLog;

/// Shared coordinator state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Redis connection manager (auto-reconnecting); `None` when the
    /// identity store is not Redis-backed
    pub redis: Option<ConnectionManager>,

    /// Control-plane registry
    pub registry: Arc<Registry>,

    /// Connected data nodes
    pub roster: Arc<Roster>,

    /// Replication log
    pub sync_log: Arc<dyn SyncLog>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        redis: Option<ConnectionManager>,
        registry: Arc<Registry>,
        roster: Arc<Roster>,
        sync_log: Arc<dyn SyncLog>,
    ) -> Self {
        Self {
            config,
            redis,
            registry,
            roster,
            sync_log,
        }
    }
}

/// Connect to Redis with a connection manager (handles reconnection)
pub async fn connect_redis(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

    ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")
}
