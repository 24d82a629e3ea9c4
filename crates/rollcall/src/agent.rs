//! Control-plane agent (node role).
//!
//! Registers this process with the coordinator and answers the
//! coordinator's liveness probes with the identity it was last given.

use async_trait::async_trait;
use rollcall_common::constants::methods;
use rollcall_common::{AssignRequest, PingReply, PingRequest, RollcallResult};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use crate::rpc::{RpcClient, RpcHandler, decode_params, encode_result, unknown_method};

/// What the agent tells the coordinator about itself
#[derive(Debug, Clone)]
pub struct Registration {
    pub cluster_name: String,
    pub max_nodes: u32,
    pub service: String,
    /// Advertised host (the registry appends `.<service>` when probing)
    pub host: String,
    /// Advertised agent RPC port
    pub port: u16,
}

/// Node-side half of the control plane
pub struct Agent {
    registration: Registration,
    coordinator_addr: String,
    client: RpcClient,
    /// This process's instance token
    instance_id: String,
    /// Last assigned identity (0 = none yet)
    identity: AtomicU32,
    /// Unix seconds of the last successful assignment
    last_seen: AtomicI64,
}

impl Agent {
    pub fn new(registration: Registration, coordinator_addr: String, client: RpcClient) -> Self {
        Self {
            registration,
            coordinator_addr,
            client,
            instance_id: generate_instance_id(),
            identity: AtomicU32::new(0),
            last_seen: AtomicI64::new(0),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn identity(&self) -> u32 {
        self.identity.load(Ordering::SeqCst)
    }

    pub fn last_seen(&self) -> i64 {
        self.last_seen.load(Ordering::SeqCst)
    }

    /// Call `AssignIdentity` on the coordinator and cache the result
    pub async fn register(&self) -> RollcallResult<u32> {
        let req = AssignRequest {
            name: self.registration.cluster_name.clone(),
            max_nodes: self.registration.max_nodes,
            host: self.registration.host.clone(),
            port: self.registration.port,
            instance_id: self.instance_id.clone(),
            service: self.registration.service.clone(),
        };

        let id = self
            .client
            .assign_identity(&self.coordinator_addr, &req)
            .await?;

        let previous = self.identity.swap(id, Ordering::SeqCst);
        self.last_seen
            .store(chrono::Utc::now().timestamp(), Ordering::SeqCst);

        if previous != id {
            tracing::info!(
                cluster = %self.registration.cluster_name,
                previous,
                id,
                "🪪 Identity assigned"
            );
        } else {
            tracing::debug!(id, "Identity renewed");
        }

        Ok(id)
    }

    /// Re-register on a fixed interval until shutdown; failures are logged
    pub async fn run_renewal(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        tracing::info!(interval = ?interval, "🔁 Identity renewal started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.register().await {
                        tracing::warn!(error = %e, retryable = e.is_retryable(), "Identity renewal failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("🔁 Identity renewal shutting down");
                    break;
                }
            }
        }
    }

    fn ping_reply(&self) -> PingReply {
        PingReply {
            id: self.identity(),
            instance_id: self.instance_id.clone(),
        }
    }
}

#[async_trait]
impl RpcHandler for Agent {
    async fn call(&self, method: &str, params: Value) -> RollcallResult<Value> {
        match method {
            methods::PING => {
                // Params are optional; older callers send none
                let asked: PingRequest = if params.is_null() {
                    PingRequest::default()
                } else {
                    decode_params(method, params)?
                };
                let reply = self.ping_reply();
                if asked.id != 0 && asked.id != reply.id {
                    tracing::debug!(asked = asked.id, holding = reply.id, "Probed for a different identity");
                }
                encode_result(&reply)
            }
            other => Err(unknown_method(other)),
        }
    }
}

fn generate_instance_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    format!("{:016x}", rng.random::<u64>())
}
