//! Node identity store.
//!
//! Persists one [`ControlPlaneState`] blob per cluster name. Writes are
//! compare-and-swap on `ControlPlaneState::version`: a save only succeeds
//! when the stored version still matches the one that was loaded, so a
//! writer in another process cannot silently overwrite a newer roster.

use async_trait::async_trait;
use rollcall_common::{ControlPlaneState, RollcallResult};

mod memory;
mod redis_store;

pub use memory::MemoryIdentityStore;
pub use redis_store::RedisIdentityStore;

/// Load/save/delete of control-plane state
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Load the state for `name`, `None` if never saved
    async fn load(&self, name: &str) -> RollcallResult<Option<ControlPlaneState>>;

    /// Save `state` if the stored version equals `state.version`.
    ///
    /// The persisted blob carries `state.version + 1`, which is returned.
    /// A missing key counts as version 0.
    async fn save(&self, state: &ControlPlaneState) -> RollcallResult<u64>;

    /// Delete the state for `name`; returns whether anything was removed
    async fn delete(&self, name: &str) -> RollcallResult<bool>;
}

/// Serialize `state` as it will be stored, with the next version
pub(crate) fn encode_next(state: &ControlPlaneState) -> RollcallResult<(u64, String)> {
    let next = state.version + 1;
    let mut stored = state.clone();
    stored.version = next;
    Ok((next, serde_json::to_string(&stored)?))
}

/// Parse a stored blob
pub(crate) fn decode(name: &str, blob: &str) -> RollcallResult<ControlPlaneState> {
    serde_json::from_str(blob).map_err(|e| {
        rollcall_common::RollcallError::Consistency(format!(
            "control-plane state for {name} is unreadable: {e}"
        ))
    })
}
