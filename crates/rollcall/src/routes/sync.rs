//! Replication log endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rollcall_common::{Action, FieldMap, RollcallError, SyncRecord};
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::state::AppState;
use crate::synclog::{SqlTarget, record_change};

const DEFAULT_PENDING: i64 = 100;
const MAX_PENDING: i64 = 1_000;

#[derive(Deserialize)]
pub struct PendingQuery {
    limit: Option<i64>,
}

/// Oldest pending entries first
pub async fn pending(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<Vec<SyncRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PENDING).clamp(1, MAX_PENDING);
    Ok(Json(state.sync_log.pending(limit).await?))
}

pub async fn get_record(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<SyncRecord>, ApiError> {
    state
        .sync_log
        .get(&transaction_id)
        .await?
        .map(Json)
        .ok_or_else(|| RollcallError::NotFound(format!("sync record {transaction_id}")).into())
}

fn default_key_column() -> String {
    "id".to_string()
}

#[derive(Deserialize)]
pub struct RecordChange {
    #[serde(default)]
    schema: String,
    table: String,
    /// Column holding the transaction id in the target table
    #[serde(default = "default_key_column")]
    key_column: String,
    action: Action,
    origin_node: String,
    transaction_id: String,
    payload: FieldMap,
}

#[derive(Serialize)]
pub struct Recorded {
    seq: i64,
    transaction_id: String,
}

/// Resolve the change's SQL and append it to the log
pub async fn record(
    State(state): State<AppState>,
    Json(body): Json<RecordChange>,
) -> Result<(StatusCode, Json<Recorded>), ApiError> {
    let RecordChange {
        schema,
        table,
        key_column,
        action,
        origin_node,
        transaction_id,
        payload,
    } = body;

    let target = SqlTarget {
        schema: &schema,
        table: &table,
        key_column: &key_column,
    };
    let seq = record_change(
        state.sync_log.as_ref(),
        target,
        action,
        &origin_node,
        &transaction_id,
        payload,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(Recorded { seq, transaction_id })))
}

/// Consumer acknowledgement: drop an applied entry
pub async fn delete_record(
    State(state): State<AppState>,
    Path(seq): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.sync_log.delete(seq).await?;
    tracing::debug!(seq, "Sync record deleted");
    Ok(StatusCode::NO_CONTENT)
}
