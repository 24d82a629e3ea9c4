//! Postgres session setup for the coordinator.

use anyhow::{Context, Result};
use tokio_postgres::{Client, NoTls};

const SCHEMA: &str = include_str!("../sql/schema.sql");

/// Connect and drive the connection in the background
pub async fn connect(database_url: &str) -> Result<Client> {
    let (client, connection) = tokio_postgres::connect(database_url, NoTls)
        .await
        .context("Failed to connect to Postgres")?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(error = %e, "Postgres connection error");
        }
    });

    Ok(client)
}

/// Create the membership table, its notify trigger and the sync log
pub async fn ensure_schema(client: &Client) -> Result<()> {
    client
        .batch_execute(SCHEMA)
        .await
        .context("Failed to apply schema")?;
    tracing::debug!("Schema ensured");
    Ok(())
}
