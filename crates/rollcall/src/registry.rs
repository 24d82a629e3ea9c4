//! Control-plane registry (coordinator role).
//!
//! Hands out small integer identities per cluster name and reclaims them
//! from dead nodes ("life-proof"). State lives in the [`IdentityStore`];
//! every operation is a load-modify-save cycle. Cycles for the same
//! cluster name are serialized by a per-name lock held across the whole
//! cycle, and the store's compare-and-swap catches writers in other
//! processes.

use async_trait::async_trait;
use rollcall_common::constants::methods;
use rollcall_common::{
    AssignReply, AssignRequest, ControlPlaneState, NodeInfo, PingReply, RollcallError,
    RollcallResult,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::rpc::{RpcClient, RpcHandler, decode_params, encode_result, unknown_method};
use crate::store::IdentityStore;

/// Asks a registered node who it is
#[async_trait]
pub trait LivenessProber: Send + Sync {
    async fn probe(&self, addr: &str, id: u32) -> RollcallResult<PingReply>;
}

#[async_trait]
impl LivenessProber for RpcClient {
    async fn probe(&self, addr: &str, id: u32) -> RollcallResult<PingReply> {
        self.ping(addr, id).await
    }
}

/// Identity assignment and reclamation
pub struct Registry {
    store: Arc<dyn IdentityStore>,
    prober: Arc<dyn LivenessProber>,
    /// One lock per cluster name
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Registry {
    pub fn new(store: Arc<dyn IdentityStore>, prober: Arc<dyn LivenessProber>) -> Self {
        Self {
            store,
            prober,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn cluster_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Assign an identity to the caller, reclaiming one if the roster is full.
    ///
    /// A caller whose `instance_id` already holds an identity gets the same
    /// identity back with a refreshed `last_seen`.
    ///
    /// When every registered node answers its probe, the stored bound is
    /// raised by one and [`RollcallError::Exhaustion`] carries the new bound.
    pub async fn assign_or_reclaim(&self, req: &AssignRequest) -> RollcallResult<u32> {
        if req.name.is_empty() {
            return Err(RollcallError::InvalidInput("cluster name is empty".into()));
        }
        if req.instance_id.is_empty() {
            return Err(RollcallError::InvalidInput("instance id is empty".into()));
        }

        let lock = self.cluster_lock(&req.name).await;
        let _guard = lock.lock().await;

        let mut state = self
            .store
            .load(&req.name)
            .await?
            .unwrap_or_else(|| ControlPlaneState::new(&req.name, req.max_nodes));

        if state.max_nodes != req.max_nodes {
            tracing::debug!(
                cluster = %req.name,
                old = state.max_nodes,
                new = req.max_nodes,
                "Roster bound overwritten"
            );
        }
        state.max_nodes = req.max_nodes;

        let id = if let Some(id) = state.find_instance(&req.instance_id) {
            tracing::debug!(cluster = %req.name, id, instance = %req.instance_id, "Identity renewed");
            id
        } else if let Some(id) = state.candidate() {
            id
        } else {
            match self.life_proof(&state).await {
                Some(id) => id,
                None => {
                    state.max_nodes = state.max_nodes.saturating_add(1);
                    self.store.save(&state).await?;
                    tracing::warn!(
                        cluster = %req.name,
                        new_bound = state.max_nodes,
                        "All nodes alive; roster bound raised"
                    );
                    return Err(RollcallError::Exhaustion {
                        name: req.name.clone(),
                        new_bound: state.max_nodes,
                    });
                }
            }
        };

        let previous = state.record(NodeInfo {
            id,
            instance_id: req.instance_id.clone(),
            last_seen: chrono::Utc::now().timestamp(),
            service: req.service.clone(),
            host: req.host.clone(),
            port: req.port,
        });
        self.store.save(&state).await?;

        match previous {
            Some(prev) if prev.instance_id != req.instance_id => tracing::info!(
                cluster = %req.name,
                id,
                from = %prev.instance_id,
                to = %req.instance_id,
                "Identity reclaimed"
            ),
            Some(_) => {}
            None => tracing::info!(
                cluster = %req.name,
                id,
                host = %req.host,
                instance = %req.instance_id,
                "Identity assigned"
            ),
        }

        Ok(id)
    }

    /// First node, in identity order, that is unreachable or answers with a
    /// different instance token
    async fn life_proof(&self, state: &ControlPlaneState) -> Option<u32> {
        for node in state.nodes.values() {
            let addr = node.probe_addr();
            match self.prober.probe(&addr, node.id).await {
                Ok(reply) if reply.instance_id == node.instance_id => {
                    tracing::trace!(cluster = %state.name, id = node.id, "Probe ok");
                }
                Ok(reply) => {
                    tracing::info!(
                        cluster = %state.name,
                        id = node.id,
                        stored = %node.instance_id,
                        answered = %reply.instance_id,
                        "Instance token mismatch; identity reclaimable"
                    );
                    return Some(node.id);
                }
                Err(e) => {
                    tracing::warn!(
                        cluster = %state.name,
                        id = node.id,
                        addr = %addr,
                        error = %e,
                        "Probe failed; identity reclaimable"
                    );
                    return Some(node.id);
                }
            }
        }
        None
    }

    /// Drop all persisted state for a cluster
    pub async fn reset(&self, name: &str) -> RollcallResult<bool> {
        let lock = self.cluster_lock(name).await;
        let _guard = lock.lock().await;

        let removed = self.store.delete(name).await?;
        tracing::info!(cluster = %name, removed, "Control-plane state reset");
        Ok(removed)
    }

    /// Current persisted state for a cluster
    pub async fn state(&self, name: &str) -> RollcallResult<ControlPlaneState> {
        self.store
            .load(name)
            .await?
            .ok_or_else(|| RollcallError::NotFound(format!("cluster {name}")))
    }
}

#[async_trait]
impl RpcHandler for Registry {
    async fn call(&self, method: &str, params: Value) -> RollcallResult<Value> {
        match method {
            methods::ASSIGN_IDENTITY => {
                let req: AssignRequest = decode_params(method, params)?;
                let id = self.assign_or_reclaim(&req).await?;
                encode_result(&AssignReply { id })
            }
            other => Err(unknown_method(other)),
        }
    }
}
