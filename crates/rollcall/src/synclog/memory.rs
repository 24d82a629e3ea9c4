//! In-process replication log.

use async_trait::async_trait;
use chrono::Utc;
use rollcall_common::{RollcallError, RollcallResult, SyncRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;

use super::{AppendRequest, SyncLog};

/// Atomic sequence plus a map keyed by transaction id
#[derive(Default)]
pub struct MemorySyncLog {
    seq: AtomicI64,
    records: Mutex<HashMap<String, SyncRecord>>,
}

impl MemorySyncLog {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl SyncLog for MemorySyncLog {
    async fn append(&self, req: AppendRequest) -> RollcallResult<i64> {
        req.validate()?;
        let next = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();

        let mut records = self.records.lock().await;
        let record = records
            .entry(req.transaction_id.clone())
            .and_modify(|r| {
                r.action = req.action;
                r.payload = req.payload.clone();
                r.sql = req.sql.clone();
                r.origin_node = req.origin_node.clone();
                r.seq = next;
                r.updated_at = now;
            })
            .or_insert_with(|| SyncRecord {
                schema: req.schema.clone(),
                table: req.table.clone(),
                action: req.action,
                transaction_id: req.transaction_id.clone(),
                payload: req.payload.clone(),
                sql: req.sql.clone(),
                origin_node: req.origin_node.clone(),
                seq: next,
                created_at: now,
                updated_at: now,
            });
        Ok(record.seq)
    }

    async fn get(&self, transaction_id: &str) -> RollcallResult<Option<SyncRecord>> {
        Ok(self.records.lock().await.get(transaction_id).cloned())
    }

    async fn pending(&self, limit: i64) -> RollcallResult<Vec<SyncRecord>> {
        let mut records: Vec<_> = self.records.lock().await.values().cloned().collect();
        records.sort_by_key(|r| r.seq);
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }

    async fn delete(&self, seq: i64) -> RollcallResult<()> {
        let mut records = self.records.lock().await;
        let key = records
            .iter()
            .find(|(_, r)| r.seq == seq)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| RollcallError::NotFound(format!("sync record {seq}")))?;
        records.remove(&key);
        Ok(())
    }
}
