//! Core types shared across Rollcall components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{RollcallError, RollcallResult};
use crate::fields::FieldMap;

/// A node registered in a cluster's control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Cluster-assigned identity (1-based)
    pub id: u32,

    /// Process-instance token; changes when the process restarts
    pub instance_id: String,

    /// Last registration/renewal (Unix epoch seconds)
    pub last_seen: i64,

    /// Service name, used as a DNS-label suffix when probing
    pub service: String,

    /// Node hostname
    pub host: String,

    /// Agent RPC port
    pub port: u16,
}

impl NodeInfo {
    /// Address the registry probes: `<host>.<service>:<port>`
    pub fn probe_addr(&self) -> String {
        format!("{}.{}:{}", self.host, self.service, self.port)
    }
}

/// Persisted control-plane state for one cluster name
///
/// Nodes are keyed by identity, so a second holder of the same identity
/// cannot exist; recording a node under an identity replaces the previous
/// holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneState {
    /// Cluster name
    pub name: String,

    /// Upper bound on roster size (last writer wins)
    pub max_nodes: u32,

    /// Roster, in identity order
    #[serde(default)]
    pub nodes: BTreeMap<u32, NodeInfo>,

    /// Bumped on every save; used for compare-and-swap
    #[serde(default)]
    pub version: u64,
}

impl ControlPlaneState {
    pub fn new(name: impl Into<String>, max_nodes: u32) -> Self {
        Self {
            name: name.into(),
            max_nodes,
            nodes: BTreeMap::new(),
            version: 0,
        }
    }

    /// Identity currently held by the given process instance
    pub fn find_instance(&self, instance_id: &str) -> Option<u32> {
        self.nodes
            .values()
            .find(|n| n.instance_id == instance_id)
            .map(|n| n.id)
    }

    /// Next identity to hand out without reclaiming, if any
    ///
    /// Normally `len + 1`. When a reclamation left that identity occupied,
    /// falls back to the lowest free identity within the bound.
    pub fn candidate(&self) -> Option<u32> {
        let next = self.nodes.len() as u32 + 1;
        if next > self.max_nodes {
            return None;
        }
        if !self.nodes.contains_key(&next) {
            return Some(next);
        }
        (1..=self.max_nodes).find(|id| !self.nodes.contains_key(id))
    }

    /// Insert or replace the holder of `info.id`
    pub fn record(&mut self, info: NodeInfo) -> Option<NodeInfo> {
        self.nodes.insert(info.id, info)
    }
}

/// `AssignIdentity` RPC parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignRequest {
    /// Cluster name
    pub name: String,
    /// Caller's view of the roster bound
    pub max_nodes: u32,
    pub host: String,
    pub port: u16,
    pub instance_id: String,
    pub service: String,
}

/// `AssignIdentity` RPC result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignReply {
    pub id: u32,
}

/// `Ping` RPC parameters: the identity the registry believes the node holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    pub id: u32,
}

/// `Ping` RPC result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingReply {
    /// Identity the agent last received (0 before first assignment)
    pub id: u32,
    /// The agent's process-instance token
    pub instance_id: String,
}

/// Row-level change kind, shared by notifications and the sync log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = RollcallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(RollcallError::InvalidInput(format!("unknown action: {other}"))),
        }
    }
}

/// Payload published on the `node` notification channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeNotification {
    pub action: Action,
    pub node: String,
}

/// Runtime status of a roster node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Not connected / unloaded
    #[default]
    Idle,
    /// Connected and ready
    Active,
    /// Applying replicated changes
    Working,
    /// Running its bootstrap synchronization
    Sync,
    /// Failed; only Idle (unload) leaves this state
    Error,
}

impl NodeStatus {
    /// Whether a node may move from `self` to `next`
    ///
    /// Idle→Active on load, Active↔Working and Active↔Sync during use,
    /// any→Error on failure, any→Idle on unload.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (_, Error)
                | (_, Idle)
                | (Idle, Active)
                | (Active, Working)
                | (Working, Active)
                | (Active, Sync)
                | (Sync, Active)
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Working => "working",
            Self::Sync => "sync",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Connection descriptor carried in a membership row's payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub driver: String,
    pub host: String,
    pub port: u16,
    #[serde(alias = "dbname", alias = "name")]
    pub database: String,
    #[serde(default, alias = "username")]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl NodeDescriptor {
    /// Decode the row payload once, at the boundary
    pub fn from_payload(payload: &serde_json::Value) -> RollcallResult<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| RollcallError::Configuration(format!("invalid node descriptor: {e}")))
    }

    /// URL for logs and admin output; never contains the password
    pub fn redacted_url(&self) -> String {
        format!(
            "{}://{}@{}:{}/{}",
            self.driver, self.user, self.host, self.port, self.database
        )
    }
}

/// One row of the membership table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipRow {
    pub id: String,
    pub mode: i32,
    pub payload: serde_json::Value,
    /// Monotonic index column; stable for the life of the row
    pub index: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One replication log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub schema: String,
    pub table: String,
    pub action: Action,
    /// Unique key; resubmission updates in place
    pub transaction_id: String,
    pub payload: FieldMap,
    /// Resolved SQL text
    pub sql: String,
    pub origin_node: String,
    /// Log-wide monotonic sequence index
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: u32, instance: &str) -> NodeInfo {
        NodeInfo {
            id,
            instance_id: instance.to_string(),
            last_seen: 0,
            service: "db".to_string(),
            host: format!("host-{id}"),
            port: 7070,
        }
    }

    #[test]
    fn test_candidate_fills_hole_left_by_reclaim() {
        let mut state = ControlPlaneState::new("c", 3);
        state.record(info(1, "a"));
        state.record(info(3, "c"));
        // len + 1 == 3 is taken, 2 is free
        assert_eq!(state.candidate(), Some(2));

        state.record(info(2, "b"));
        assert_eq!(state.candidate(), None);
    }

    #[test]
    fn test_record_replaces_holder() {
        let mut state = ControlPlaneState::new("c", 2);
        state.record(info(1, "old"));
        let previous = state.record(info(1, "new"));
        assert_eq!(previous.unwrap().instance_id, "old");
        assert_eq!(state.nodes.len(), 1);
        assert_eq!(state.find_instance("new"), Some(1));
        assert_eq!(state.find_instance("old"), None);
    }

    #[test]
    fn test_state_blob_roundtrip_keeps_integer_keys() {
        let mut state = ControlPlaneState::new("c", 2);
        state.record(info(2, "b"));
        let json = serde_json::to_string(&state).unwrap();
        let parsed: ControlPlaneState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn test_probe_addr_uses_service_label() {
        assert_eq!(info(1, "a").probe_addr(), "host-1.db:7070");
    }

    #[test]
    fn test_status_transitions() {
        use NodeStatus::*;
        assert!(Idle.can_transition_to(Active));
        assert!(Active.can_transition_to(Sync));
        assert!(Sync.can_transition_to(Active));
        assert!(Working.can_transition_to(Error));
        assert!(Error.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Working));
        assert!(!Error.can_transition_to(Active));
        assert!(!Sync.can_transition_to(Working));
    }

    #[test]
    fn test_notification_payload() {
        let n: NodeNotification =
            serde_json::from_str(r#"{"action":"DELETE","node":"n-7"}"#).unwrap();
        assert_eq!(n.action, Action::Delete);
        assert_eq!(n.node, "n-7");
        assert_eq!("update".parse::<Action>().unwrap(), Action::Update);
    }

    #[test]
    fn test_descriptor_accepts_dbname_alias() {
        let payload = serde_json::json!({
            "driver": "postgres",
            "host": "10.0.0.5",
            "port": 5432,
            "dbname": "shard1",
            "user": "app",
            "password": "secret"
        });
        let d = NodeDescriptor::from_payload(&payload).unwrap();
        assert_eq!(d.database, "shard1");
        assert!(!d.redacted_url().contains("secret"));

        let bad = serde_json::json!({ "driver": "postgres" });
        assert!(matches!(
            NodeDescriptor::from_payload(&bad),
            Err(RollcallError::Configuration(_))
        ));
    }
}
