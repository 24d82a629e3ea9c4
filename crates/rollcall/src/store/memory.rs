//! In-process identity store, used by tests and single-process runs.

use async_trait::async_trait;
use rollcall_common::{ControlPlaneState, RollcallError, RollcallResult};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{IdentityStore, decode, encode_next};

/// Keeps serialized blobs so the same encode/decode path as Redis is exercised
#[derive(Default)]
pub struct MemoryIdentityStore {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw blob, bypassing encoding
    #[cfg(test)]
    pub async fn put_raw(&self, name: &str, blob: &str) {
        self.blobs
            .lock()
            .await
            .insert(name.to_string(), blob.to_string());
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn load(&self, name: &str) -> RollcallResult<Option<ControlPlaneState>> {
        let blobs = self.blobs.lock().await;
        blobs.get(name).map(|b| decode(name, b)).transpose()
    }

    async fn save(&self, state: &ControlPlaneState) -> RollcallResult<u64> {
        let mut blobs = self.blobs.lock().await;

        let stored_version = match blobs.get(&state.name) {
            Some(blob) => decode(&state.name, blob)?.version,
            None => 0,
        };
        if stored_version != state.version {
            return Err(RollcallError::Conflict(format!(
                "control-plane state for {} changed since version {}",
                state.name, state.version
            )));
        }

        let (next, blob) = encode_next(state)?;
        blobs.insert(state.name.clone(), blob);
        Ok(next)
    }

    async fn delete(&self, name: &str) -> RollcallResult<bool> {
        Ok(self.blobs.lock().await.remove(name).is_some())
    }
}
