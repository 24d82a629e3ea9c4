//! Postgres-backed membership source, node connector and notification listener.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use rollcall_common::constants::tables;
use rollcall_common::{MembershipRow, NodeDescriptor, RollcallError, RollcallResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, Client, NoTls, Row};

use super::{MembershipSource, NodeConnection, NodeConnector};

fn db_error(err: tokio_postgres::Error) -> RollcallError {
    RollcallError::Connection(format!("postgres: {err}"))
}

/// Reads the `node` membership table
pub struct PgMembership {
    client: Arc<Client>,
}

impl PgMembership {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

fn membership_row(row: &Row) -> RollcallResult<MembershipRow> {
    let decode = |e: tokio_postgres::Error| {
        RollcallError::Consistency(format!("unexpected membership row shape: {e}"))
    };
    Ok(MembershipRow {
        id: row.try_get("id").map_err(decode)?,
        mode: row.try_get("mode").map_err(decode)?,
        payload: row.try_get("payload").map_err(decode)?,
        index: row.try_get("idx").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

#[async_trait]
impl MembershipSource for PgMembership {
    async fn fetch_page(&self, offset: i64, limit: i64) -> RollcallResult<Vec<MembershipRow>> {
        let sql = format!(
            "SELECT id, mode, payload, idx, created_at, updated_at FROM {} \
             ORDER BY idx LIMIT $1 OFFSET $2",
            tables::NODE
        );
        let rows = self
            .client
            .query(&sql, &[&limit, &offset])
            .await
            .map_err(db_error)?;
        rows.iter().map(membership_row).collect()
    }

    async fn fetch(&self, id: &str) -> RollcallResult<Option<MembershipRow>> {
        let sql = format!(
            "SELECT id, mode, payload, idx, created_at, updated_at FROM {} WHERE id = $1",
            tables::NODE
        );
        let row = self
            .client
            .query_opt(&sql, &[&id])
            .await
            .map_err(db_error)?;
        row.as_ref().map(membership_row).transpose()
    }
}

/// A live connection to a Postgres data node
pub struct PgConnection {
    client: Option<Client>,
    driver: JoinHandle<()>,
}

#[async_trait]
impl NodeConnection for PgConnection {
    async fn close(&mut self) {
        // Dropping the client ends the session; the driver task then finishes
        self.client.take();
        self.driver.abort();
    }

    fn is_closed(&self) -> bool {
        self.client.as_ref().is_none_or(Client::is_closed)
    }
}

/// Connects to data nodes whose descriptor names the postgres driver
pub struct PgNodeConnector;

#[async_trait]
impl NodeConnector for PgNodeConnector {
    async fn connect(&self, d: &NodeDescriptor) -> RollcallResult<Box<dyn NodeConnection>> {
        if !matches!(d.driver.as_str(), "postgres" | "postgresql") {
            return Err(RollcallError::Configuration(format!(
                "unsupported node driver: {}",
                d.driver
            )));
        }

        let mut config = tokio_postgres::Config::new();
        config
            .host(&d.host)
            .port(d.port)
            .dbname(&d.database)
            .user(&d.user);
        if let Some(password) = &d.password {
            config.password(password);
        }

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| RollcallError::Connection(format!("{}: {e}", d.redacted_url())))?;

        let url = d.redacted_url();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(url = %url, error = %e, "Node connection error");
            }
        });

        Ok(Box::new(PgConnection {
            client: Some(client),
            driver,
        }))
    }
}

/// A dedicated session LISTENing on one channel
pub struct NotificationListener {
    /// Keeps the session, and with it the LISTEN, alive
    _client: Client,
    task: JoinHandle<()>,
}

impl NotificationListener {
    /// LISTEN on `channel` and forward every payload into `tx`.
    ///
    /// Forwarding stops when the connection fails or the receiving side
    /// of `tx` is dropped.
    pub async fn spawn(
        database_url: &str,
        channel: &str,
        tx: mpsc::Sender<String>,
    ) -> Result<Self> {
        let (client, mut connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .context("Failed to open notification connection")?;

        let listen_channel = channel.to_string();
        let task = tokio::spawn(async move {
            let mut messages = futures::stream::poll_fn(move |cx| connection.poll_message(cx));

            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notification(n)) => {
                        tracing::trace!(channel = %n.channel(), payload = %n.payload(), "Notification");
                        if tx.send(n.payload().to_string()).await.is_err() {
                            break;
                        }
                    }
                    Ok(AsyncMessage::Notice(notice)) => {
                        tracing::debug!(notice = %notice.message(), "Postgres notice");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Notification connection failed");
                        break;
                    }
                }
            }

            tracing::info!(channel = %listen_channel, "Notification listener stopped");
        });

        client
            .batch_execute(&format!("LISTEN \"{channel}\""))
            .await
            .with_context(|| format!("Failed to LISTEN on {channel}"))?;
        tracing::info!(channel = %channel, "👂 Listening for membership notifications");

        Ok(Self {
            _client: client,
            task,
        })
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}
