use chrono::{DateTime, Utc};
use eyre::{eyre, Result, WrapErr};
use sqlx::FromRow;

use crate::types::{FailureReason, MessageKind, MessageState, Status};

// Postgres has no unsigned integers. Domains are u32 and fit a BIGINT; the
// u64 nonce lives in a NUMERIC(20, 0) column and crosses the wire as text.
// `failure` is the JSON form of FailureReason.

/// A row of `message_states`
#[derive(Debug, Clone, FromRow)]
pub struct MessageStateRow {
    pub lookup_id: String,
    pub kind: String,
    pub status: String,
    pub source_domain: i64,
    pub dest_domain: i64,
    /// Decimal text of the NUMERIC column
    pub nonce: String,
    pub source_tx_hash: String,
    pub dest_tx_hash: Option<String>,
    pub raw_envelope: Vec<u8>,
    pub destination_caller: Vec<u8>,
    pub forwarding_channel: Option<String>,
    pub attestation: Option<Vec<u8>>,
    pub attestation_attempts: i32,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<MessageStateRow> for MessageState {
    type Error = eyre::Report;

    fn try_from(row: MessageStateRow) -> Result<Self> {
        let destination_caller: [u8; 32] = row
            .destination_caller
            .as_slice()
            .try_into()
            .map_err(|_| {
                eyre!(
                    "destination_caller of {} is {} bytes, expected 32",
                    row.lookup_id,
                    row.destination_caller.len()
                )
            })?;

        let failure = row
            .failure
            .as_deref()
            .map(serde_json::from_str::<FailureReason>)
            .transpose()
            .wrap_err_with(|| format!("Invalid failure reason for {}", row.lookup_id))?;

        Ok(MessageState {
            kind: row.kind.parse::<MessageKind>().map_err(|e| eyre!(e))?,
            status: row.status.parse::<Status>().map_err(|e| eyre!(e))?,
            source_domain: u32::try_from(row.source_domain)
                .wrap_err("source_domain out of range")?,
            dest_domain: u32::try_from(row.dest_domain).wrap_err("dest_domain out of range")?,
            nonce: row
                .nonce
                .parse::<u64>()
                .wrap_err_with(|| format!("Invalid nonce '{}' for {}", row.nonce, row.lookup_id))?,
            source_tx_hash: row.source_tx_hash,
            dest_tx_hash: row.dest_tx_hash,
            raw_envelope: row.raw_envelope,
            destination_caller,
            forwarding_channel: row.forwarding_channel,
            attestation: row.attestation,
            attestation_attempts: u32::try_from(row.attestation_attempts).unwrap_or(0),
            failure,
            created_at: row.created_at,
            updated_at: row.updated_at,
            lookup_id: row.lookup_id,
        })
    }
}

/// Serialize a failure reason for the `failure` column
pub fn encode_failure(failure: &Option<FailureReason>) -> Result<Option<String>> {
    failure
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .wrap_err("Failed to serialize failure reason")
}
