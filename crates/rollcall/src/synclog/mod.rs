//! Replication log.
//!
//! A durable record of pending mutations, keyed by a caller-supplied
//! transaction identifier. Appending the same identifier again rewrites
//! the entry in place, so replaying a change never duplicates it. Entries
//! stay until a consumer deletes them by sequence index.

use async_trait::async_trait;
use rollcall_common::{Action, FieldMap, RollcallError, RollcallResult, SyncRecord};

mod memory;
mod postgres;
pub mod sql;

pub use memory::MemorySyncLog;
pub use postgres::PgSyncLog;
pub use sql::SqlTarget;

/// One change to record
#[derive(Debug, Clone, PartialEq)]
pub struct AppendRequest {
    pub schema: String,
    pub table: String,
    pub action: Action,
    pub origin_node: String,
    pub transaction_id: String,
    pub payload: FieldMap,
    /// Resolved SQL text
    pub sql: String,
}

impl AppendRequest {
    fn validate(&self) -> RollcallResult<()> {
        if self.transaction_id.is_empty() {
            return Err(RollcallError::InvalidInput("transaction id is empty".into()));
        }
        if self.table.is_empty() {
            return Err(RollcallError::InvalidInput("table is empty".into()));
        }
        Ok(())
    }
}

/// Storage for [`SyncRecord`]s
#[async_trait]
pub trait SyncLog: Send + Sync {
    /// Upsert by transaction id; returns the entry's sequence index.
    ///
    /// Every call takes the next value of the log-wide sequence. On
    /// conflict, action, payload, sql, origin node and sequence index are
    /// overwritten; the transaction id and creation time are kept.
    async fn append(&self, req: AppendRequest) -> RollcallResult<i64>;

    async fn get(&self, transaction_id: &str) -> RollcallResult<Option<SyncRecord>>;

    /// Oldest entries first
    async fn pending(&self, limit: i64) -> RollcallResult<Vec<SyncRecord>>;

    /// Remove an applied entry
    async fn delete(&self, seq: i64) -> RollcallResult<()>;
}

/// Resolve the SQL for a change and append it to `log`.
///
/// `key_column` names the target table's transaction-id column.
pub async fn record_change(
    log: &dyn SyncLog,
    target: SqlTarget<'_>,
    action: Action,
    origin_node: &str,
    transaction_id: &str,
    payload: FieldMap,
) -> RollcallResult<i64> {
    let sql = sql::statement(action, target, &payload)?;
    let seq = log
        .append(AppendRequest {
            schema: target.schema.to_string(),
            table: target.table.to_string(),
            action,
            origin_node: origin_node.to_string(),
            transaction_id: transaction_id.to_string(),
            payload,
            sql,
        })
        .await?;

    tracing::debug!(
        table = %target.table,
        action = %action,
        transaction = %transaction_id,
        seq,
        "Change recorded"
    );
    Ok(seq)
}
