//! Source-chain watcher
//!
//! Reads MessageSent logs block range by block range from a [`LogSource`],
//! decodes and filters each one, records it in the state store and hands
//! relayable messages to the attestation queue. The checkpoint advances only
//! after a whole range has been handled, so a crash or reconnect replays at
//! most one range; replayed logs are deduplicated by lookup ID.

use async_trait::async_trait;
use eyre::{eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub mod evm;

pub use evm::EvmLogSource;

use crate::codec::decode_log_data;
use crate::config::{FilterConfig, SourceConfig};
use crate::filters;
use crate::hash::message_sent_topic;
use crate::metrics;
use crate::store::{CheckpointStore, StateStore};
use crate::types::{MessageState, Status};
use crate::writers::RetryConfig;

/// A log as delivered by the source chain, stripped to what decoding needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub tx_hash: String,
    pub block_number: u64,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
}

/// Where MessageSent logs come from
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Highest block considered final
    async fn safe_head(&self) -> Result<u64>;

    /// MessageSent logs of the transmitter contract in `[from, to]`
    async fn message_sent_logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>>;

    /// Switch to the next endpoint after a failure
    fn rotate_endpoint(&self) {}
}

/// Outcome of one poll step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollProgress {
    /// A range was processed and more blocks are already available
    Behind(u64),
    /// Processed up to the safe head, or nothing new
    CaughtUp,
}

pub struct ChainWatcher {
    name: String,
    source: Arc<dyn LogSource>,
    states: Arc<dyn StateStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    filters: FilterConfig,
    /// CCTP domain this pipeline delivers to
    destination_domain: u32,
    attest_tx: mpsc::Sender<MessageState>,
    poll_interval: Duration,
    max_block_range: u64,
    start_block: Option<u64>,
    reconnect: RetryConfig,
}

impl ChainWatcher {
    pub fn new(
        config: &SourceConfig,
        destination_domain: u32,
        filters: FilterConfig,
        source: Arc<dyn LogSource>,
        states: Arc<dyn StateStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        attest_tx: mpsc::Sender<MessageState>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            source,
            states,
            checkpoints,
            filters,
            destination_domain,
            attest_tx,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_block_range: config.max_block_range.max(1),
            start_block: config.start_block,
            reconnect: RetryConfig::for_reconnect(config),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Watch until shutdown. Source errors never end the loop; they trigger a
    /// backoff, an endpoint rotation and a resume from the last checkpoint.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(chain = %self.name, "Chain watcher started");
        let mut failures: u32 = 0;

        loop {
            let step = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                step = self.poll_once() => step,
            };

            let pause = match step {
                Ok(PollProgress::Behind(_)) => {
                    failures = 0;
                    continue;
                }
                Ok(PollProgress::CaughtUp) => {
                    failures = 0;
                    self.poll_interval
                }
                Err(e) => {
                    let backoff = self.reconnect.backoff_for_attempt(failures);
                    failures = failures.saturating_add(1);
                    metrics::record_reconnect(&self.name);
                    self.source.rotate_endpoint();
                    warn!(
                        chain = %self.name,
                        attempt = failures,
                        ?backoff,
                        error = %e,
                        "Source connection lost, reconnecting"
                    );
                    backoff
                }
            };

            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(chain = %self.name, "Chain watcher stopped");
        Ok(())
    }

    /// Process the next unhandled block range, if any
    pub async fn poll_once(&self) -> Result<PollProgress> {
        let head = self.source.safe_head().await?;

        let from = match self.checkpoints.last_height(&self.name).await? {
            Some(height) => height + 1,
            None => match self.start_block {
                Some(start) => start,
                None => {
                    // Nothing to resume from: follow new messages only
                    info!(chain = %self.name, height = head, "No checkpoint, starting at safe head");
                    self.checkpoints.set_height(&self.name, head).await?;
                    return Ok(PollProgress::CaughtUp);
                }
            },
        };

        if from > head {
            return Ok(PollProgress::CaughtUp);
        }

        let to = head.min(from.saturating_add(self.max_block_range - 1));
        let logs = self.source.message_sent_logs(from, to).await?;
        debug!(chain = %self.name, from, to, logs = logs.len(), "Fetched logs");

        for log in &logs {
            self.handle_log(log).await?;
        }

        self.checkpoints.set_height(&self.name, to).await?;
        metrics::record_block_processed(&self.name, to);

        if to < head {
            Ok(PollProgress::Behind(to))
        } else {
            Ok(PollProgress::CaughtUp)
        }
    }

    /// Decode, store, filter and enqueue one log. Only store and queue
    /// failures are errors; undecodable logs are skipped.
    async fn handle_log(&self, log: &RawLog) -> Result<()> {
        if log.topics.first() != Some(&message_sent_topic()) {
            debug!(tx_hash = %log.tx_hash, "Ignoring log with foreign topic");
            return Ok(());
        }

        let decoded = match decode_log_data(&log.data) {
            Ok(decoded) => decoded,
            Err(e) => {
                metrics::record_decode_failure(&self.name);
                warn!(
                    chain = %self.name,
                    tx_hash = %log.tx_hash,
                    block = log.block_number,
                    error = %e,
                    "Skipping undecodable MessageSent log"
                );
                return Ok(());
            }
        };
        let mut state = MessageState::from_decoded(&decoded, &log.tx_hash);
        if state.dest_domain != self.destination_domain {
            debug!(
                chain = %self.name,
                tx_hash = %log.tx_hash,
                dest_domain = state.dest_domain,
                "Ignoring message for another destination"
            );
            return Ok(());
        }
        metrics::record_message_observed(&self.name);

        if !self.states.insert_new(&state).await? {
            // Re-delivered log. Continue only if a previous run stopped
            // before deciding what to do with it.
            match self.states.get(&state.lookup_id).await? {
                Some(existing) if existing.status == Status::Created => state = existing,
                _ => {
                    debug!(lookup_id = %state.lookup_id, "Already tracked, skipping");
                    return Ok(());
                }
            }
        }

        if let Some(reason) = filters::evaluate(&state, &self.filters) {
            info!(
                lookup_id = %state.lookup_id,
                source_domain = state.source_domain,
                dest_domain = state.dest_domain,
                nonce = state.nonce,
                reason = reason.label(),
                "Message filtered"
            );
            metrics::record_filtered(reason.label());
            state.mark_filtered()?;
            return self.states.update(&state, Status::Created).await;
        }

        state.mark_pending()?;
        self.states.update(&state, Status::Created).await?;

        info!(
            lookup_id = %state.lookup_id,
            source_domain = state.source_domain,
            dest_domain = state.dest_domain,
            nonce = state.nonce,
            kind = %state.kind,
            tx_hash = %state.source_tx_hash,
            "Message queued for attestation"
        );
        metrics::record_enqueued(state.kind.as_str());
        metrics::set_queue_depth(
            "attestation",
            self.attest_tx.max_capacity() - self.attest_tx.capacity(),
        );

        // Blocks while the queue is full; nothing is ever dropped
        self.attest_tx
            .send(state)
            .await
            .map_err(|_| eyre!("Attestation queue closed"))
    }
}
