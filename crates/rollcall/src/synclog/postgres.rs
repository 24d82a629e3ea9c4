//! Postgres-backed replication log (`sync` table, `sync_seq` sequence).

use async_trait::async_trait;
use rollcall_common::constants::tables;
use rollcall_common::fields::{decode_field_map, encode_field_map};
use rollcall_common::{Action, RollcallError, RollcallResult, SyncRecord};
use std::sync::Arc;
use tokio_postgres::{Client, Row};

use super::{AppendRequest, SyncLog};

fn db_error(err: tokio_postgres::Error) -> RollcallError {
    RollcallError::Connection(format!("postgres: {err}"))
}

pub struct PgSyncLog {
    client: Arc<Client>,
}

impl PgSyncLog {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    async fn next_seq(&self) -> RollcallResult<i64> {
        let row = self
            .client
            .query_one(&format!("SELECT nextval('{}')", tables::SYNC_SEQ), &[])
            .await
            .map_err(db_error)?;
        row.try_get(0).map_err(db_error)
    }
}

const COLUMNS: &str =
    "schema_name, table_name, action, transaction_id, payload, sql, origin_node, seq, created_at, updated_at";

fn sync_record(row: &Row) -> RollcallResult<SyncRecord> {
    let shape = |e: tokio_postgres::Error| {
        RollcallError::Consistency(format!("unexpected sync row shape: {e}"))
    };
    let action: String = row.try_get("action").map_err(shape)?;
    let payload: serde_json::Value = row.try_get("payload").map_err(shape)?;
    let transaction_id: String = row.try_get("transaction_id").map_err(shape)?;

    Ok(SyncRecord {
        schema: row.try_get("schema_name").map_err(shape)?,
        table: row.try_get("table_name").map_err(shape)?,
        action: action.parse::<Action>()?,
        payload: decode_field_map(payload).ok_or_else(|| {
            RollcallError::Consistency(format!("payload of {transaction_id} is not an object"))
        })?,
        transaction_id,
        sql: row.try_get("sql").map_err(shape)?,
        origin_node: row.try_get("origin_node").map_err(shape)?,
        seq: row.try_get("seq").map_err(shape)?,
        created_at: row.try_get("created_at").map_err(shape)?,
        updated_at: row.try_get("updated_at").map_err(shape)?,
    })
}

#[async_trait]
impl SyncLog for PgSyncLog {
    async fn append(&self, req: AppendRequest) -> RollcallResult<i64> {
        req.validate()?;
        let seq = self.next_seq().await?;
        let payload = encode_field_map(&req.payload);

        let sql = format!(
            "INSERT INTO {} (schema_name, table_name, action, transaction_id, payload, sql, origin_node, seq) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (transaction_id) DO UPDATE SET \
                 action = EXCLUDED.action, \
                 payload = EXCLUDED.payload, \
                 sql = EXCLUDED.sql, \
                 origin_node = EXCLUDED.origin_node, \
                 seq = EXCLUDED.seq, \
                 updated_at = now() \
             RETURNING seq",
            tables::SYNC
        );

        let row = self
            .client
            .query_one(
                &sql,
                &[
                    &req.schema,
                    &req.table,
                    &req.action.as_str(),
                    &req.transaction_id,
                    &payload,
                    &req.sql,
                    &req.origin_node,
                    &seq,
                ],
            )
            .await
            .map_err(db_error)?;
        row.try_get(0).map_err(db_error)
    }

    async fn get(&self, transaction_id: &str) -> RollcallResult<Option<SyncRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE transaction_id = $1",
            tables::SYNC
        );
        let row = self
            .client
            .query_opt(&sql, &[&transaction_id])
            .await
            .map_err(db_error)?;
        row.as_ref().map(sync_record).transpose()
    }

    async fn pending(&self, limit: i64) -> RollcallResult<Vec<SyncRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM {} ORDER BY seq LIMIT $1", tables::SYNC);
        let rows = self
            .client
            .query(&sql, &[&limit])
            .await
            .map_err(db_error)?;
        rows.iter().map(sync_record).collect()
    }

    async fn delete(&self, seq: i64) -> RollcallResult<()> {
        let sql = format!("DELETE FROM {} WHERE seq = $1", tables::SYNC);
        let removed = self
            .client
            .execute(&sql, &[&seq])
            .await
            .map_err(db_error)?;
        if removed == 0 {
            return Err(RollcallError::NotFound(format!("sync record {seq}")));
        }
        Ok(())
    }
}
