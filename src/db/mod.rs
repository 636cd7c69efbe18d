//! PostgreSQL persistence
//!
//! Implements [`StateStore`] and [`CheckpointStore`] on top of a sqlx pool so
//! that message state and the source-chain cursor survive restarts.

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use tracing::error;

pub mod models;

pub use models::*;

use crate::config::DatabaseConfig;
use crate::store::{check_transition, CheckpointStore, StateStore};
use crate::types::{MessageState, Status};

const STATE_COLUMNS: &str = "lookup_id, kind, status, source_domain, dest_domain, nonce::TEXT AS nonce, \
    source_tx_hash, dest_tx_hash, raw_envelope, destination_caller, forwarding_channel, \
    attestation, attestation_attempts, failure, created_at, updated_at";

/// Create a database connection pool
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Message state and cursor store backed by PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bring the schema up to date
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = create_pool(config).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StateStore for PgStore {
    async fn insert_new(&self, state: &MessageState) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_states (lookup_id, kind, status, source_domain, dest_domain,
                nonce, source_tx_hash, dest_tx_hash, raw_envelope, destination_caller,
                forwarding_channel, attestation, attestation_attempts, failure, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (lookup_id) DO NOTHING
            "#,
        )
        .bind(&state.lookup_id)
        .bind(state.kind.as_str())
        .bind(state.status.as_str())
        .bind(i64::from(state.source_domain))
        .bind(i64::from(state.dest_domain))
        .bind(state.nonce.to_string())
        .bind(&state.source_tx_hash)
        .bind(&state.dest_tx_hash)
        .bind(&state.raw_envelope)
        .bind(state.destination_caller.as_slice())
        .bind(&state.forwarding_channel)
        .bind(&state.attestation)
        .bind(state.attestation_attempts as i32)
        .bind(encode_failure(&state.failure)?)
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to insert message {}", state.lookup_id))?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, lookup_id: &str) -> Result<Option<MessageState>> {
        let row = sqlx::query_as::<_, MessageStateRow>(&format!(
            "SELECT {} FROM message_states WHERE lookup_id = $1",
            STATE_COLUMNS
        ))
        .bind(lookup_id)
        .fetch_optional(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to get message {}", lookup_id))?;

        row.map(MessageState::try_from).transpose()
    }

    async fn update(&self, state: &MessageState, expected: Status) -> Result<()> {
        check_transition(state, expected)?;

        let result = sqlx::query(
            r#"
            UPDATE message_states
            SET status = $2, dest_tx_hash = $3, attestation = $4, attestation_attempts = $5,
                failure = $6, updated_at = $7
            WHERE lookup_id = $1 AND status = $8
            "#,
        )
        .bind(&state.lookup_id)
        .bind(state.status.as_str())
        .bind(&state.dest_tx_hash)
        .bind(&state.attestation)
        .bind(state.attestation_attempts as i32)
        .bind(encode_failure(&state.failure)?)
        .bind(state.updated_at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .wrap_err_with(|| {
            format!(
                "Failed to update message {} to {}",
                state.lookup_id, state.status
            )
        })?;

        if result.rows_affected() == 0 {
            return Err(eyre!(
                "Stale update for {}: stored status is not {}",
                state.lookup_id,
                expected
            ));
        }

        Ok(())
    }

    async fn resumable(&self) -> Result<Vec<MessageState>> {
        let rows = sqlx::query_as::<_, MessageStateRow>(&format!(
            "SELECT {} FROM message_states WHERE status IN ('pending', 'attested') ORDER BY created_at",
            STATE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("SQL error getting resumable messages: {:?}", e);
            e
        })
        .wrap_err("Failed to get resumable messages")?;

        rows.into_iter().map(MessageState::try_from).collect()
    }

    async fn count_by_status(&self) -> Result<HashMap<Status, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as(r#"SELECT status, COUNT(*) FROM message_states GROUP BY status"#)
                .fetch_all(&self.pool)
                .await
                .wrap_err("Failed to count messages by status")?;

        let mut counts = HashMap::new();
        for (status, count) in rows {
            let status = status.parse::<Status>().map_err(|e| eyre!(e))?;
            counts.insert(status, count.max(0) as u64);
        }
        Ok(counts)
    }
}

#[async_trait]
impl CheckpointStore for PgStore {
    async fn last_height(&self, chain: &str) -> Result<Option<u64>> {
        let row: Option<(i64,)> =
            sqlx::query_as(r#"SELECT last_processed_block FROM chain_cursors WHERE chain = $1"#)
                .bind(chain)
                .fetch_optional(&self.pool)
                .await
                .wrap_err("Failed to get last processed block")?;

        Ok(row.map(|r| r.0.max(0) as u64))
    }

    async fn set_height(&self, chain: &str, height: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chain_cursors (chain, last_processed_block)
            VALUES ($1, $2)
            ON CONFLICT (chain) DO UPDATE SET last_processed_block = $2, updated_at = NOW()
            "#,
        )
        .bind(chain)
        .bind(height as i64)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to update last processed block for {}", chain))?;

        Ok(())
    }
}
