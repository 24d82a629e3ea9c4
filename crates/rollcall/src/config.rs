//! Configuration management for Rollcall.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use rollcall_common::constants::{
    DEFAULT_DATABASE_URL, DEFAULT_LISTEN_ADDR, DEFAULT_REDIS_URL, DEFAULT_RPC_ADDR,
    DEFAULT_RPC_IDLE_SECS, DEFAULT_RPC_TIMEOUT_MS, NODE_QUEUE_CAPACITY, NODE_WORKER_IDLE_SECS, ROSTER_PAGE_SIZE,
};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection URL (identity store)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Postgres connection string (membership table, sync log)
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Admin HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// RPC listen address
    #[serde(default = "default_rpc_addr")]
    pub rpc_addr: String,

    /// Keep identity state and the sync log in memory (Redis is not used)
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub roster: RosterConfig,

    #[serde(default)]
    pub agent: AgentConfig,
}

/// RPC transport configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Deadline for one round trip, in milliseconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_ms: u64,

    /// Seconds a served connection may idle between requests
    #[serde(default = "default_rpc_idle")]
    pub idle_timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_rpc_timeout(),
            idle_timeout_secs: default_rpc_idle(),
        }
    }
}

/// Node roster configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
    /// Rows per bootstrap page
    #[serde(default = "default_page_size")]
    pub page_size: i64,

    /// Pending notifications per node before the consumer waits
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds before an idle per-node worker exits
    #[serde(default = "default_idle_worker")]
    pub idle_worker_secs: u64,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            queue_capacity: default_queue_capacity(),
            idle_worker_secs: default_idle_worker(),
        }
    }
}

/// Agent (node role) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Coordinator RPC address
    #[serde(default = "default_rpc_addr")]
    pub coordinator_addr: String,

    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Requested identity bound
    #[serde(default = "default_max_nodes")]
    pub max_nodes: u32,

    #[serde(default = "default_service")]
    pub service: String,

    /// Host advertised to the coordinator; defaults to `$HOSTNAME`.
    /// Peers probe it as `<host>.<service>`, so it must be a resolvable
    /// host name, not an IP address.
    #[serde(default)]
    pub host: Option<String>,

    /// Port advertised to the coordinator; defaults to the RPC listen port
    #[serde(default)]
    pub port: Option<u16>,

    /// Re-register on this interval; unset disables renewal
    #[serde(default)]
    pub renew_interval_secs: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: default_rpc_addr(),
            cluster_name: default_cluster_name(),
            max_nodes: default_max_nodes(),
            service: default_service(),
            host: None,
            port: None,
            renew_interval_secs: None,
        }
    }
}

// Default value functions
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_database_url() -> String { DEFAULT_DATABASE_URL.to_string() }
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_rpc_addr() -> String { DEFAULT_RPC_ADDR.to_string() }
fn default_rpc_timeout() -> u64 { DEFAULT_RPC_TIMEOUT_MS }
fn default_rpc_idle() -> u64 { DEFAULT_RPC_IDLE_SECS }
fn default_page_size() -> i64 { ROSTER_PAGE_SIZE }
fn default_queue_capacity() -> usize { NODE_QUEUE_CAPACITY }
fn default_idle_worker() -> u64 { NODE_WORKER_IDLE_SECS }
fn default_cluster_name() -> String { "default".to_string() }
fn default_max_nodes() -> u32 { 3 }
fn default_service() -> String { "rollcall".to_string() }

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.redis_url = redis_url.clone();
        }
        if let Some(ref database_url) = args.database_url {
            config.database_url = database_url.clone();
        }
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(ref rpc_addr) = args.rpc_addr {
            config.rpc_addr = rpc_addr.clone();
        }
        if let Some(ref coordinator) = args.coordinator {
            config.agent.coordinator_addr = coordinator.clone();
        }
        if args.dry_run {
            config.dry_run = true;
        }

        Ok(config)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.timeout_ms)
    }

    pub fn rpc_idle(&self) -> Duration {
        Duration::from_secs(self.rpc.idle_timeout_secs.max(1))
    }

    /// Per-node queue and notification channel capacity, at least 1
    pub fn queue_capacity(&self) -> usize {
        self.roster.queue_capacity.max(1)
    }

    pub fn idle_worker(&self) -> Duration {
        Duration::from_secs(self.roster.idle_worker_secs)
    }

    /// Host the agent advertises: explicit, else `$HOSTNAME`
    pub fn agent_host(&self) -> Result<String> {
        let host = match &self.agent.host {
            Some(host) => host.clone(),
            None => std::env::var("HOSTNAME")
                .ok()
                .filter(|h| !h.is_empty())
                .context("agent.host is not set and HOSTNAME is unavailable")?,
        };
        if host.parse::<std::net::IpAddr>().is_ok() {
            anyhow::bail!("agent.host must be a host name, got IP address {host}");
        }
        Ok(host)
    }

    /// Port the agent advertises: explicit, else the RPC listen port
    pub fn agent_port(&self) -> Result<u16> {
        if let Some(port) = self.agent.port {
            return Ok(port);
        }
        self.rpc_addr
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .with_context(|| format!("Cannot derive agent port from rpc_addr {}", self.rpc_addr))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            database_url: default_database_url(),
            listen_addr: default_listen_addr(),
            rpc_addr: default_rpc_addr(),
            dry_run: false,
            rpc: RpcConfig::default(),
            roster: RosterConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Args;
    use clap::Parser;

    #[test]
    fn test_missing_file_uses_defaults_with_overrides() {
        let args = Args::parse_from([
            "rollcall",
            "--config",
            "/nonexistent/rollcall.toml",
            "--redis-url",
            "redis://cache:6379",
            "--coordinator",
            "10.0.0.1:7070",
            "agent",
        ]);
        let config = AppConfig::load(&args.config, &args).unwrap();

        assert_eq!(config.redis_url, "redis://cache:6379");
        assert_eq!(config.agent.coordinator_addr, "10.0.0.1:7070");
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.roster.page_size, 30);
        assert_eq!(config.rpc_timeout(), Duration::from_secs(3));
        assert_eq!(config.agent_port().unwrap(), 7070);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_toml_sections() {
        let path = std::env::temp_dir().join(format!("rollcall-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
rpc_addr = "0.0.0.0:9100"

[rpc]
timeout_ms = 250

[roster]
page_size = 5

[agent]
cluster_name = "alpha"
renew_interval_secs = 10
"#,
        )
        .unwrap();

        let path = path.to_string_lossy().to_string();
        let args = Args::parse_from([
            "rollcall",
            "--config",
            path.as_str(),
            "--dry-run",
            "coordinator",
        ]);
        let config = AppConfig::load(&path, &args).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.rpc.timeout_ms, 250);
        assert_eq!(config.roster.page_size, 5);
        assert_eq!(config.roster.queue_capacity, NODE_QUEUE_CAPACITY);
        assert_eq!(config.agent.cluster_name, "alpha");
        assert_eq!(config.agent.renew_interval_secs, Some(10));
        assert_eq!(config.agent_port().unwrap(), 9100);
        assert!(config.dry_run);
    }

    #[test]
    fn test_zero_queue_capacity_is_clamped() {
        let mut config = AppConfig::default();
        config.roster.queue_capacity = 0;
        assert_eq!(config.queue_capacity(), 1);
    }

    #[test]
    fn test_agent_host_must_be_a_name() {
        let mut config = AppConfig::default();
        config.agent.host = Some("db-0".into());
        assert_eq!(config.agent_host().unwrap(), "db-0");

        config.agent.host = Some("127.0.0.1".into());
        assert!(config.agent_host().is_err());
    }
}
