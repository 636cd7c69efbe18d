//! Attestation polling
//!
//! Every Pending message gets its own task that polls the attestation
//! service with exponential backoff until the attestation is ready, the
//! service rejects the lookup, or the attempt budget runs out. A semaphore
//! caps how many requests are in flight at once; sleeping tasks hold no
//! permit, so a slow message never delays another.

use async_trait::async_trait;
use eyre::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub mod iris;

pub use iris::IrisClient;

use crate::metrics;
use crate::store::{update_with_retry, StateStore};
use crate::types::{FailureReason, MessageState, Status};
use crate::writers::RetryConfig;

/// Result of one attestation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationOutcome {
    /// Attestation bytes are available
    Ready(Vec<u8>),
    /// Try again later
    NotReady(String),
    /// The service reports the request itself is invalid
    Invalid(String),
}

impl AttestationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AttestationOutcome::Ready(_) => "ready",
            AttestationOutcome::NotReady(_) => "not_ready",
            AttestationOutcome::Invalid(_) => "invalid",
        }
    }
}

#[async_trait]
pub trait AttestationSource: Send + Sync {
    /// Issue one request for `lookup_id`; never fails, transport errors are NotReady
    async fn fetch(&self, lookup_id: &str) -> AttestationOutcome;
}

pub struct AttestationPoller {
    source: Arc<dyn AttestationSource>,
    states: Arc<dyn StateStore>,
    /// `max_retries` is the attempt budget, 0 = unlimited
    retry: RetryConfig,
    permits: Arc<Semaphore>,
    submit_tx: mpsc::Sender<MessageState>,
}

impl AttestationPoller {
    pub fn new(
        source: Arc<dyn AttestationSource>,
        states: Arc<dyn StateStore>,
        retry: RetryConfig,
        max_concurrent: usize,
        submit_tx: mpsc::Sender<MessageState>,
    ) -> Self {
        Self {
            source,
            states,
            retry,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            submit_tx,
        }
    }

    /// Spawn a polling task per received message until shutdown
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<MessageState>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut tasks = JoinSet::new();
        let mut queue_open = true;

        loop {
            if !queue_open && tasks.is_empty() {
                break;
            }
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!(in_flight = tasks.len(), "Stopping attestation poller");
                    tasks.abort_all();
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Attestation task panicked");
                        }
                    }
                }
                next = rx.recv(), if queue_open => match next {
                    Some(state) => {
                        let poller = self.clone();
                        tasks.spawn(async move {
                            metrics::ATTESTATIONS_IN_FLIGHT.inc();
                            let lookup_id = state.lookup_id.clone();
                            if let Err(e) = poller.poll_message(state).await {
                                error!(lookup_id = %lookup_id, error = %e, "Attestation polling aborted");
                            }
                            metrics::ATTESTATIONS_IN_FLIGHT.dec();
                        });
                    }
                    None => queue_open = false,
                },
            }
        }

        Ok(())
    }

    /// Poll until the message leaves Pending; returns the status it ends in
    pub async fn poll_message(&self, mut state: MessageState) -> Result<Status> {
        if state.status != Status::Pending {
            debug!(lookup_id = %state.lookup_id, status = %state.status, "Not pending, skipping");
            return Ok(state.status);
        }

        loop {
            let outcome = {
                let _permit = self.permits.acquire().await?;
                self.source.fetch(&state.lookup_id).await
            };
            state.attestation_attempts += 1;
            metrics::record_attestation_attempt(outcome.label());

            match outcome {
                AttestationOutcome::Ready(attestation) => {
                    state.mark_attested(attestation)?;
                    self.persist(&state).await?;
                    info!(
                        lookup_id = %state.lookup_id,
                        attempts = state.attestation_attempts,
                        "Attestation received"
                    );

                    metrics::set_queue_depth(
                        "submission",
                        self.submit_tx.max_capacity() - self.submit_tx.capacity(),
                    );
                    if self.submit_tx.send(state).await.is_err() {
                        // Left Attested in the store; picked up again on restart
                        warn!("Submission queue closed");
                    }
                    return Ok(Status::Attested);
                }
                AttestationOutcome::Invalid(detail) => {
                    error!(
                        lookup_id = %state.lookup_id,
                        detail = %detail,
                        "Attestation service rejected lookup"
                    );
                    let reason = FailureReason::AttestationInvalid { detail };
                    metrics::record_failed(reason.label());
                    state.mark_failed(reason)?;
                    self.persist(&state).await?;
                    return Ok(Status::Failed);
                }
                AttestationOutcome::NotReady(why) => {
                    let attempts = state.attestation_attempts;
                    if self.retry.max_retries != 0 && attempts >= self.retry.max_retries {
                        error!(
                            lookup_id = %state.lookup_id,
                            attempts,
                            "Attestation never became ready"
                        );
                        let reason = FailureReason::AttestationExhausted { attempts };
                        metrics::record_failed(reason.label());
                        state.mark_failed(reason)?;
                        self.persist(&state).await?;
                        return Ok(Status::Failed);
                    }

                    state.mark_pending()?;
                    self.persist(&state).await?;

                    let backoff = self.retry.backoff_for_attempt(attempts - 1);
                    debug!(
                        lookup_id = %state.lookup_id,
                        attempt = attempts,
                        reason = %why,
                        ?backoff,
                        "Attestation not ready"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Store outages are waited out, never a reason to drop the message
    async fn persist(&self, state: &MessageState) -> Result<()> {
        update_with_retry(self.states.as_ref(), state, Status::Pending, &self.retry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::FlakyStore;
    use crate::store::MemoryStore;
    use crate::types::sample_state;
    use std::collections::VecDeque;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Scripted {
        outcomes: Mutex<VecDeque<AttestationOutcome>>,
    }

    #[async_trait]
    impl AttestationSource for Scripted {
        async fn fetch(&self, _lookup_id: &str) -> AttestationOutcome {
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| AttestationOutcome::NotReady("script exhausted".to_string()))
        }
    }

    fn poller(
        outcomes: Vec<AttestationOutcome>,
        store: Arc<MemoryStore>,
        max_attempts: u32,
    ) -> (AttestationPoller, mpsc::Receiver<MessageState>) {
        let (tx, rx) = mpsc::channel(8);
        let retry = RetryConfig {
            max_retries: max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(400),
            backoff_multiplier: 2.0,
        };
        let source = Arc::new(Scripted {
            outcomes: Mutex::new(outcomes.into()),
        });
        (AttestationPoller::new(source, store, retry, 4, tx), rx)
    }

    async fn pending(store: &MemoryStore, id: &str) -> MessageState {
        let mut state = sample_state(id);
        store.insert_new(&state).await.unwrap();
        state.mark_pending().unwrap();
        store.update(&state, Status::Created).await.unwrap();
        state
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_hands_off_to_submission() {
        let store = Arc::new(MemoryStore::new());
        let (poller, mut rx) = poller(
            vec![AttestationOutcome::Ready(vec![1, 2, 3])],
            store.clone(),
            0,
        );

        let state = pending(&store, "a").await;
        assert_eq!(poller.poll_message(state).await.unwrap(), Status::Attested);

        let handed = rx.recv().await.unwrap();
        assert_eq!(handed.status, Status::Attested);
        assert_eq!(handed.attestation, Some(vec![1, 2, 3]));
        assert_eq!(store.get("a").await.unwrap().unwrap(), handed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_fails_immediately() {
        let store = Arc::new(MemoryStore::new());
        let (poller, mut rx) = poller(
            vec![AttestationOutcome::Invalid("bad hash".to_string())],
            store.clone(),
            0,
        );

        let state = pending(&store, "a").await;
        assert_eq!(poller.poll_message(state).await.unwrap(), Status::Failed);
        assert!(rx.try_recv().is_err());

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.attestation_attempts, 1);
        assert!(matches!(
            stored.failure,
            Some(FailureReason::AttestationInvalid { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_budget_exhausted() {
        let store = Arc::new(MemoryStore::new());
        let (poller, _rx) = poller(vec![], store.clone(), 3);

        let state = pending(&store, "a").await;
        assert_eq!(poller.poll_message(state).await.unwrap(), Status::Failed);

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(
            stored.failure,
            Some(FailureReason::AttestationExhausted { attempts: 3 })
        );
    }

    /// Answers not-ready a fixed number of times and records when each request lands
    struct Timed {
        not_ready: u32,
        seen: Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait]
    impl AttestationSource for Timed {
        async fn fetch(&self, _lookup_id: &str) -> AttestationOutcome {
            let mut seen = self.seen.lock().unwrap();
            seen.push(tokio::time::Instant::now());
            if seen.len() as u32 <= self.not_ready {
                AttestationOutcome::NotReady("pending_confirmations".to_string())
            } else {
                AttestationOutcome::Ready(vec![7])
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_spaced_by_growing_backoff() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(Timed {
            not_ready: 3,
            seen: Mutex::new(Vec::new()),
        });
        let (tx, mut rx) = mpsc::channel(1);
        let retry = RetryConfig {
            max_retries: 0,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(150),
            backoff_multiplier: 2.0,
        };
        let poller = AttestationPoller::new(source.clone(), store.clone(), retry, 1, tx);

        let state = pending(&store, "a").await;
        assert_eq!(poller.poll_message(state).await.unwrap(), Status::Attested);
        assert_eq!(rx.recv().await.unwrap().attestation_attempts, 4);

        let seen = source.seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        let gaps: Vec<Duration> = seen.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.iter().all(|gap| *gap >= Duration::from_millis(100)));
        // 100ms, then 200ms capped to 150ms
        assert!(gaps[1] >= Duration::from_millis(150));
        assert!(gaps[2] >= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_queue_until_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let (poller, mut submit_rx) = poller(
            vec![
                AttestationOutcome::Ready(vec![1]),
                AttestationOutcome::Ready(vec![2]),
            ],
            store.clone(),
            0,
        );
        let (tx, rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::new(poller).run(rx, stop_rx));

        tx.send(pending(&store, "a").await).await.unwrap();
        tx.send(pending(&store, "b").await).await.unwrap();

        let mut handed = vec![
            submit_rx.recv().await.unwrap().lookup_id,
            submit_rx.recv().await.unwrap().lookup_id,
        ];
        handed.sort();
        assert_eq!(handed, vec!["a".to_string(), "b".to_string()]);

        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_outage_does_not_strand_message() {
        let store = Arc::new(FlakyStore::new(0));
        let (tx, mut rx) = mpsc::channel(1);
        let retry = RetryConfig {
            max_retries: 0,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(400),
            backoff_multiplier: 2.0,
        };
        let source = Arc::new(Scripted {
            outcomes: Mutex::new(
                vec![
                    AttestationOutcome::NotReady("pending_confirmations".to_string()),
                    AttestationOutcome::Ready(vec![9]),
                ]
                .into(),
            ),
        });
        let poller = AttestationPoller::new(source.clone(), store.clone(), retry, 1, tx);

        let state = pending(&store.inner, "a").await;
        // The write after the not-ready answer hits a dropped connection
        store.update_failures.store(1, Ordering::SeqCst);

        assert_eq!(poller.poll_message(state).await.unwrap(), Status::Attested);
        let handed = rx.recv().await.unwrap();
        assert_eq!(handed.attestation, Some(vec![9]));
        assert_eq!(handed.attestation_attempts, 2);
        assert!(source.outcomes.lock().unwrap().is_empty());

        let stored = store.inner.get("a").await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Attested);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_pending_message_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let (poller, _rx) = poller(vec![], store.clone(), 0);
        let state = sample_state("a");
        assert_eq!(poller.poll_message(state).await.unwrap(), Status::Created);
    }
}
