//! Message state and checkpoint storage
//!
//! The pipeline only talks to these traits. [`MemoryStore`] keeps everything
//! in process memory; [`crate::db::PgStore`] persists to PostgreSQL so that
//! Pending and Attested entries survive a restart.

use async_trait::async_trait;
use eyre::{eyre, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;

use crate::types::{MessageState, Status, TransitionError};
use crate::writers::RetryConfig;

/// Table of tracked messages keyed by lookup id
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert a freshly created entry. Returns false, leaving the store
    /// untouched, if the lookup id is already known in any status.
    async fn insert_new(&self, state: &MessageState) -> Result<bool>;

    async fn get(&self, lookup_id: &str) -> Result<Option<MessageState>>;

    /// Overwrite an entry whose stored status is `expected`. Fails if the
    /// stored status differs or `expected -> state.status` is not a legal
    /// transition.
    async fn update(&self, state: &MessageState, expected: Status) -> Result<()>;

    /// Entries a restarted pipeline must pick up again (Pending and Attested)
    async fn resumable(&self) -> Result<Vec<MessageState>>;

    async fn count_by_status(&self) -> Result<HashMap<Status, u64>>;
}

/// Last fully processed block per source chain
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn last_height(&self, chain: &str) -> Result<Option<u64>>;
    async fn set_height(&self, chain: &str, height: u64) -> Result<()>;
}

pub(crate) fn check_transition(state: &MessageState, expected: Status) -> Result<()> {
    if !expected.can_transition_to(state.status) {
        return Err(TransitionError {
            lookup_id: state.lookup_id.clone(),
            from: expected,
            to: state.status,
        }
        .into());
    }
    Ok(())
}

/// Persist `state` over an entry stored as `expected`, waiting out store
/// outages with `retry` backoff for as long as they last. A write that landed
/// but whose acknowledgement was lost counts as done. Fails only when the
/// transition is illegal or another writer moved the entry elsewhere.
pub async fn update_with_retry(
    store: &dyn StateStore,
    state: &MessageState,
    expected: Status,
    retry: &RetryConfig,
) -> Result<()> {
    check_transition(state, expected)?;

    let mut attempt: u32 = 0;
    loop {
        let error = match store.update(state, expected).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        match store.get(&state.lookup_id).await {
            Ok(Some(stored))
                if stored.status == state.status
                    && stored.attestation_attempts == state.attestation_attempts =>
            {
                return Ok(());
            }
            Ok(Some(stored)) if stored.status != expected => {
                return Err(eyre!(
                    "Stale update for {}: stored status is {}, expected {}",
                    state.lookup_id,
                    stored.status,
                    expected
                ));
            }
            Ok(None) => return Err(eyre!("Unknown message {}", state.lookup_id)),
            _ => {}
        }

        let backoff = retry.backoff_for_attempt(attempt);
        warn!(
            lookup_id = %state.lookup_id,
            status = %state.status,
            attempt = attempt + 1,
            ?backoff,
            error = %error,
            "State store write failed, retrying"
        );
        tokio::time::sleep(backoff).await;
        attempt = attempt.saturating_add(1);
    }
}

/// Read an entry, waiting out store outages with `retry` backoff
pub async fn get_with_retry(
    store: &dyn StateStore,
    lookup_id: &str,
    retry: &RetryConfig,
) -> Option<MessageState> {
    let mut attempt: u32 = 0;
    loop {
        match store.get(lookup_id).await {
            Ok(found) => return found,
            Err(e) => {
                let backoff = retry.backoff_for_attempt(attempt);
                warn!(
                    lookup_id,
                    attempt = attempt + 1,
                    ?backoff,
                    error = %e,
                    "State store read failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// In-process store; contents are lost on restart
#[derive(Default)]
pub struct MemoryStore {
    states: RwLock<HashMap<String, MessageState>>,
    cursors: RwLock<HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn insert_new(&self, state: &MessageState) -> Result<bool> {
        let mut states = self.states.write().await;
        if states.contains_key(&state.lookup_id) {
            return Ok(false);
        }
        states.insert(state.lookup_id.clone(), state.clone());
        Ok(true)
    }

    async fn get(&self, lookup_id: &str) -> Result<Option<MessageState>> {
        Ok(self.states.read().await.get(lookup_id).cloned())
    }

    async fn update(&self, state: &MessageState, expected: Status) -> Result<()> {
        check_transition(state, expected)?;

        let mut states = self.states.write().await;
        let stored = states
            .get_mut(&state.lookup_id)
            .ok_or_else(|| eyre!("Unknown message {}", state.lookup_id))?;

        if stored.status != expected {
            return Err(eyre!(
                "Stale update for {}: stored status is {}, expected {}",
                state.lookup_id,
                stored.status,
                expected
            ));
        }

        *stored = state.clone();
        Ok(())
    }

    async fn resumable(&self) -> Result<Vec<MessageState>> {
        let states = self.states.read().await;
        let mut resumable: Vec<MessageState> = states
            .values()
            .filter(|s| matches!(s.status, Status::Pending | Status::Attested))
            .cloned()
            .collect();
        resumable.sort_by_key(|s| s.created_at);
        Ok(resumable)
    }

    async fn count_by_status(&self) -> Result<HashMap<Status, u64>> {
        let states = self.states.read().await;
        let mut counts = HashMap::new();
        for state in states.values() {
            *counts.entry(state.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn last_height(&self, chain: &str) -> Result<Option<u64>> {
        Ok(self.cursors.read().await.get(chain).copied())
    }

    async fn set_height(&self, chain: &str, height: u64) -> Result<()> {
        self.cursors.write().await.insert(chain.to_string(), height);
        Ok(())
    }
}
