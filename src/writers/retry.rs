//! Backoff schedule and error classification for destination-chain submission
//!
//! The same exponential schedule drives attestation polling and source
//! reconnects; only the limits differ.

use std::time::Duration;

use crate::config::{AttestationConfig, SourceConfig, SubmissionConfig};

/// Cosmos SDK root codespace
pub const SDK_CODESPACE: &str = "sdk";
/// ErrTxInMempoolCache
pub const CODE_TX_IN_MEMPOOL: u32 = 19;
/// ErrWrongSequence
pub const CODE_WRONG_SEQUENCE: u32 = 32;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn for_submission(config: &SubmissionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            ..Self::default()
        }
    }

    /// `max_retries` carries the attempt budget; 0 means unlimited
    pub fn for_attestation(config: &AttestationConfig) -> Self {
        Self {
            max_retries: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            ..Self::default()
        }
    }

    /// Reconnects are never abandoned, so `max_retries` is unused
    pub fn for_reconnect(config: &SourceConfig) -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(config.reconnect_initial_ms),
            max_backoff: Duration::from_millis(config.reconnect_max_ms),
            ..Self::default()
        }
    }

    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(64) as i32;
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Classifies a failed submission for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Our cached account sequence is stale - refresh it and retry
    SequenceMismatch,
    /// Temporary failure - retry with backoff (network, mempool)
    Transient,
    /// The chain refused the message itself - never retry
    Rejected,
}

impl ErrorClass {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClass::SequenceMismatch => "sequence_mismatch",
            ErrorClass::Transient => "transient",
            ErrorClass::Rejected => "rejected",
        }
    }
}

fn mentions_sequence_mismatch(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("account sequence mismatch") || lower.contains("incorrect account sequence")
}

/// Classify a broadcast response; `None` for success
pub fn classify_response(code: u32, codespace: &str, raw_log: &str) -> Option<ErrorClass> {
    if code == 0 {
        return None;
    }

    if codespace == SDK_CODESPACE || codespace.is_empty() {
        match code {
            CODE_WRONG_SEQUENCE => return Some(ErrorClass::SequenceMismatch),
            CODE_TX_IN_MEMPOOL => return Some(ErrorClass::Transient),
            _ => {}
        }
    }

    if mentions_sequence_mismatch(raw_log) {
        return Some(ErrorClass::SequenceMismatch);
    }

    Some(ErrorClass::Rejected)
}

/// Classify an error that prevented getting any broadcast response
pub fn classify_error(error: &str) -> ErrorClass {
    if mentions_sequence_mismatch(error) {
        ErrorClass::SequenceMismatch
    } else {
        ErrorClass::Transient
    }
}
