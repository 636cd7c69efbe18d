//! Message state and lifecycle
//!
//! ```text
//! Created ─┬─> Pending ─┬─> Attested ─┬─> Complete
//!          │     ^  │   │             └─> Failed
//!          │     └──┘   └─> Failed
//!          └─> Filtered
//! ```
//!
//! Complete, Failed and Filtered are terminal. Pending may re-enter Pending
//! while the attestation is not ready.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::codec::DecodedMessage;

/// Processing status of a tracked message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Created,
    Pending,
    Attested,
    Complete,
    Failed,
    Filtered,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Created,
        Status::Pending,
        Status::Attested,
        Status::Complete,
        Status::Failed,
        Status::Filtered,
    ];

    /// Get the status as a lowercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::Pending => "pending",
            Status::Attested => "attested",
            Status::Complete => "complete",
            Status::Failed => "failed",
            Status::Filtered => "filtered",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Complete | Status::Failed | Status::Filtered)
    }

    pub fn can_transition_to(&self, next: Status) -> bool {
        use Status::*;
        matches!(
            (self, next),
            (Created, Pending)
                | (Created, Filtered)
                | (Pending, Pending)
                | (Pending, Attested)
                | (Pending, Failed)
                | (Attested, Complete)
                | (Attested, Failed)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status '{}'", s))
    }
}

/// What the destination chain will do with the minted funds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Mint,
    Forward,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Mint => "mint",
            MessageKind::Forward => "forward",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mint" => Ok(MessageKind::Mint),
            "forward" => Ok(MessageKind::Forward),
            other => Err(format!("unknown message kind '{}'", other)),
        }
    }
}

/// Why a message ended up Failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// The attestation service rejected the lookup itself
    AttestationInvalid { detail: String },
    /// Attestation never became ready within the attempt budget
    AttestationExhausted { attempts: u32 },
    /// The destination chain refused the message
    Rejected {
        code: u32,
        codespace: String,
        log: String,
    },
    /// Retryable submission errors outlasted the retry budget
    SubmissionExhausted { attempts: u32, last_error: String },
}

impl FailureReason {
    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::AttestationInvalid { .. } => "attestation_invalid",
            FailureReason::AttestationExhausted { .. } => "attestation_exhausted",
            FailureReason::Rejected { .. } => "rejected",
            FailureReason::SubmissionExhausted { .. } => "submission_exhausted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition {from} -> {to} for {lookup_id}")]
pub struct TransitionError {
    pub lookup_id: String,
    pub from: Status,
    pub to: Status,
}

/// The unit of work tracked through the relay pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageState {
    /// keccak256 of the raw envelope; the at-most-once relay key
    pub lookup_id: String,
    pub kind: MessageKind,
    pub status: Status,
    pub source_domain: u32,
    pub dest_domain: u32,
    pub nonce: u64,
    pub source_tx_hash: String,
    pub dest_tx_hash: Option<String>,
    pub raw_envelope: Vec<u8>,
    pub destination_caller: [u8; 32],
    /// `channel-<n>`, only for forwards
    pub forwarding_channel: Option<String>,
    /// Populated once Attested
    pub attestation: Option<Vec<u8>>,
    pub attestation_attempts: u32,
    pub failure: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageState {
    /// New Created state for a freshly decoded message
    pub fn from_decoded(decoded: &DecodedMessage, source_tx_hash: &str) -> Self {
        let now = Utc::now();
        Self {
            lookup_id: decoded.lookup_id.clone(),
            kind: decoded.payload.kind(),
            status: Status::Created,
            source_domain: decoded.envelope.source_domain,
            dest_domain: decoded.envelope.destination_domain,
            nonce: decoded.envelope.nonce,
            source_tx_hash: source_tx_hash.to_string(),
            dest_tx_hash: None,
            raw_envelope: decoded.raw.clone(),
            destination_caller: decoded.envelope.destination_caller,
            forwarding_channel: decoded.payload.forwarding_channel(),
            attestation: None,
            attestation_attempts: 0,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn advance(&mut self, next: Status) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                lookup_id: self.lookup_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Created -> Pending, or Pending -> Pending on a not-ready attempt
    pub fn mark_pending(&mut self) -> Result<(), TransitionError> {
        self.advance(Status::Pending)
    }

    pub fn mark_filtered(&mut self) -> Result<(), TransitionError> {
        self.advance(Status::Filtered)
    }

    pub fn mark_attested(&mut self, attestation: Vec<u8>) -> Result<(), TransitionError> {
        self.advance(Status::Attested)?;
        self.attestation = Some(attestation);
        Ok(())
    }

    pub fn mark_complete(&mut self, dest_tx_hash: String) -> Result<(), TransitionError> {
        self.advance(Status::Complete)?;
        self.dest_tx_hash = Some(dest_tx_hash);
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: FailureReason) -> Result<(), TransitionError> {
        self.advance(Status::Failed)?;
        self.failure = Some(reason);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_state(lookup_id: &str) -> MessageState {
    let now = Utc::now();
    MessageState {
        lookup_id: lookup_id.to_string(),
        kind: MessageKind::Mint,
        status: Status::Created,
        source_domain: 0,
        dest_domain: 4,
        nonce: 1,
        source_tx_hash: "0xabc".to_string(),
        dest_tx_hash: None,
        raw_envelope: vec![1, 2, 3],
        destination_caller: [0u8; 32],
        forwarding_channel: None,
        attestation: None,
        attestation_attempts: 0,
        failure: None,
        created_at: now,
        updated_at: now,
    }
}
