//! Shared constants for Rollcall components.

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default Postgres connection string (membership table + sync log)
pub const DEFAULT_DATABASE_URL: &str = "host=127.0.0.1 port=5432 user=rollcall dbname=rollcall";

/// Default admin HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8888";

/// Default RPC listen address (coordinator and agent)
pub const DEFAULT_RPC_ADDR: &str = "127.0.0.1:7070";

/// Default deadline for a single RPC round trip (milliseconds)
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 3_000;

/// Largest RPC frame accepted, newline excluded
pub const MAX_RPC_FRAME_BYTES: usize = 64 * 1024;

/// Seconds an RPC connection may sit between requests before it is closed
pub const DEFAULT_RPC_IDLE_SECS: u64 = 60;

/// Page size used by the roster bootstrap scan
pub const ROSTER_PAGE_SIZE: i64 = 30;

/// Bounded capacity of each per-node notification queue
pub const NODE_QUEUE_CAPACITY: usize = 64;

/// Seconds an idle per-node worker waits before exiting
pub const NODE_WORKER_IDLE_SECS: u64 = 30;

/// Database change-notification channel for membership rows
pub const NODE_CHANNEL: &str = "node";

/// Redis key prefixes
pub mod redis_keys {
    /// Control-plane state blob: rollcall:cluster:{name}
    pub const CLUSTER_PREFIX: &str = "rollcall:cluster:";

    /// Build the key holding one cluster's control-plane state
    pub fn cluster(name: &str) -> String {
        format!("{}{}", CLUSTER_PREFIX, name)
    }
}

/// Relational table and column names
pub mod tables {
    /// Membership table scanned by the roster
    pub const NODE: &str = "node";

    /// Replication log table
    pub const SYNC: &str = "sync";

    /// Sequence backing SyncRecord::seq
    pub const SYNC_SEQ: &str = "sync_seq";
}

/// RPC method names
pub mod methods {
    /// Registry-facing identity assignment
    pub const ASSIGN_IDENTITY: &str = "AssignIdentity";

    /// Agent-facing liveness probe
    pub const PING: &str = "Ping";
}
