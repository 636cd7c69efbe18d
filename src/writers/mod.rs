//! Destination-chain submission
//!
//! One [`SubmissionEngine`] runs per signing account. It owns that account's
//! sequence number and handles one message at a time, so broadcasts from the
//! same signer are strictly ordered.

use async_trait::async_trait;
use chrono::Utc;
use eyre::{eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub mod msgs;
pub mod noble;
pub mod retry;

pub use noble::NobleClient;
pub use retry::{classify_error, classify_response, ErrorClass, RetryConfig};

use crate::bounded_cache::BoundedIdCache;
use crate::metrics;
use crate::store::{get_with_retry, update_with_retry, StateStore};
use crate::types::{FailureReason, MessageState, Status};

/// Signer account state as reported by the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
    pub account_number: u64,
    /// Transaction sequence number (nonce)
    pub sequence: u64,
}

/// Result of a broadcast the chain answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResponse {
    pub code: u32,
    pub codespace: String,
    pub txhash: String,
    pub raw_log: String,
}

/// Builds, signs and broadcasts the finalize transaction
#[async_trait]
pub trait Submitter: Send + Sync {
    fn address(&self) -> String;

    async fn account_info(&self) -> Result<AccountInfo>;

    /// Submit one receive transaction at the given sequence. `Err` means no
    /// answer was obtained; a chain-level failure is an `Ok` with a non-zero code.
    async fn receive_message(
        &self,
        message: &[u8],
        attestation: &[u8],
        account: &AccountInfo,
    ) -> Result<TxResponse>;
}

/// Serializes submissions for a single signer
pub struct SubmissionEngine {
    submitter: Arc<dyn Submitter>,
    states: Arc<dyn StateStore>,
    retry: RetryConfig,
    completed: BoundedIdCache,
    account: Option<AccountInfo>,
}

impl SubmissionEngine {
    pub fn new(
        submitter: Arc<dyn Submitter>,
        states: Arc<dyn StateStore>,
        retry: RetryConfig,
        completed: BoundedIdCache,
    ) -> Self {
        Self {
            submitter,
            states,
            retry,
            completed,
            account: None,
        }
    }

    /// Process attested messages until the queue closes or shutdown is signalled
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<MessageState>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!(signer = %self.submitter.address(), "Submission engine started");

        loop {
            let state = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                next = rx.recv() => match next {
                    Some(state) => state,
                    None => break,
                },
            };

            let lookup_id = state.lookup_id.clone();
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => {
                    warn!(lookup_id = %lookup_id, "Shutdown during submission, message stays attested");
                    break;
                }
                result = self.process(state) => {
                    if let Err(e) = result {
                        error!(lookup_id = %lookup_id, error = %e, "Submission aborted");
                    }
                }
            }
        }

        info!("Submission engine stopped");
        Ok(())
    }

    /// Drive one attested message to Complete or Failed; returns the final status
    pub async fn process(&mut self, state: MessageState) -> Result<Status> {
        let lookup_id = state.lookup_id;

        if self.completed.contains(&lookup_id) {
            debug!(lookup_id = %lookup_id, "Already completed in this run, skipping");
            return Ok(Status::Complete);
        }

        // The queued copy may be stale; the store is authoritative
        let mut current = get_with_retry(self.states.as_ref(), &lookup_id, &self.retry)
            .await
            .ok_or_else(|| eyre!("Message {} is not in the store", lookup_id))?;

        match current.status {
            Status::Attested => {}
            Status::Complete => {
                self.completed.insert(lookup_id);
                return Ok(Status::Complete);
            }
            other => {
                debug!(lookup_id = %lookup_id, status = %other, "Not attested, skipping");
                return Ok(other);
            }
        }

        let attestation = current
            .attestation
            .clone()
            .ok_or_else(|| eyre!("Attested message {} has no attestation", lookup_id))?;

        let mut attempt: u32 = 0;
        loop {
            let (class, last_error) = match self.submit(&current.raw_envelope, &attestation).await
            {
                Ok(resp) => match classify_response(resp.code, &resp.codespace, &resp.raw_log) {
                    None => {
                        self.complete(&mut current, resp.txhash).await?;
                        return Ok(Status::Complete);
                    }
                    Some(ErrorClass::Rejected) => {
                        metrics::record_submission(ErrorClass::Rejected.label());
                        error!(
                            lookup_id = %current.lookup_id,
                            code = resp.code,
                            codespace = %resp.codespace,
                            raw_log = %resp.raw_log,
                            "Destination chain rejected message"
                        );
                        let reason = FailureReason::Rejected {
                            code: resp.code,
                            codespace: resp.codespace,
                            log: resp.raw_log,
                        };
                        self.fail(&mut current, reason).await?;
                        return Ok(Status::Failed);
                    }
                    Some(class) => (
                        class,
                        format!(
                            "code {} ({}): {}",
                            resp.code, resp.codespace, resp.raw_log
                        ),
                    ),
                },
                Err(e) => {
                    let message = format!("{:#}", e);
                    (classify_error(&message), message)
                }
            };

            metrics::record_submission(class.label());
            if class == ErrorClass::SequenceMismatch {
                self.account = None;
            }

            if !self.retry.should_retry(attempt) {
                let reason = FailureReason::SubmissionExhausted {
                    attempts: attempt + 1,
                    last_error,
                };
                error!(
                    lookup_id = %current.lookup_id,
                    attempts = attempt + 1,
                    "Submission retries exhausted"
                );
                self.fail(&mut current, reason).await?;
                return Ok(Status::Failed);
            }

            let backoff = self.retry.backoff_for_attempt(attempt);
            warn!(
                lookup_id = %current.lookup_id,
                attempt = attempt + 1,
                max = self.retry.max_retries,
                class = class.label(),
                ?backoff,
                error = %last_error,
                "Submission failed, retrying after backoff"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn submit(&mut self, message: &[u8], attestation: &[u8]) -> Result<TxResponse> {
        let account = match self.account {
            Some(account) => account,
            None => {
                let account = self.submitter.account_info().await?;
                debug!(
                    sequence = account.sequence,
                    account_number = account.account_number,
                    "Loaded signer account"
                );
                self.account = Some(account);
                account
            }
        };

        self.submitter
            .receive_message(message, attestation, &account)
            .await
    }

    async fn complete(&mut self, state: &mut MessageState, tx_hash: String) -> Result<()> {
        if let Some(account) = self.account.as_mut() {
            account.sequence += 1;
        }
        self.completed.insert(state.lookup_id.clone());

        state.mark_complete(tx_hash)?;
        // The transaction is on chain; losing this write would resubmit it after a restart
        update_with_retry(self.states.as_ref(), state, Status::Attested, &self.retry).await?;

        metrics::record_submission("success");
        let latency = (Utc::now() - state.created_at).num_milliseconds() as f64 / 1000.0;
        metrics::record_relay_latency(latency);

        info!(
            lookup_id = %state.lookup_id,
            source_domain = state.source_domain,
            dest_domain = state.dest_domain,
            nonce = state.nonce,
            tx_hash = state.dest_tx_hash.as_deref().unwrap_or_default(),
            "Message relayed"
        );
        Ok(())
    }

    async fn fail(&mut self, state: &mut MessageState, reason: FailureReason) -> Result<()> {
        metrics::record_failed(reason.label());
        state.mark_failed(reason)?;
        update_with_retry(self.states.as_ref(), state, Status::Attested, &self.retry).await
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

    /// Replays scripted results and records the sequence used for each call
    struct ScriptedSubmitter {
        script: Mutex<VecDeque<Result<TxResponse>>>,
        sequences: Mutex<Vec<u64>>,
        account_queries: Mutex<u32>,
    }

    impl ScriptedSubmitter {
        fn new(script: Vec<Result<TxResponse>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                sequences: Mutex::new(Vec::new()),
                account_queries: Mutex::new(0),
            })
        }

        fn calls(&self) -> Vec<u64> {
            self.sequences.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Submitter for ScriptedSubmitter {
        fn address(&self) -> String {
            "noble1test".to_string()
        }

        async fn account_info(&self) -> Result<AccountInfo> {
            let mut queries = self.account_queries.lock().unwrap();
            *queries += 1;
            // The chain's view advances by one per query
            Ok(AccountInfo {
                account_number: 1,
                sequence: 9 + u64::from(*queries),
            })
        }

        async fn receive_message(
            &self,
            _message: &[u8],
            _attestation: &[u8],
            account: &AccountInfo,
        ) -> Result<TxResponse> {
            self.sequences.lock().unwrap().push(account.sequence);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(response(0, "", "")))
        }
    }

    fn response(code: u32, codespace: &str, raw_log: &str) -> TxResponse {
        TxResponse {
            code,
            codespace: codespace.to_string(),
            txhash: format!("TX{}", code),
            raw_log: raw_log.to_string(),
        }
    }

    async fn attested(store: &MemoryStore, id: &str) -> MessageState {
        let mut state = sample_state(id);
        state.status = Status::Pending;
        store.insert_new(&state).await.unwrap();
        state.mark_attested(vec![0xaa; 65]).unwrap();
        store.update(&state, Status::Pending).await.unwrap();
        state
    }

    fn engine(submitter: Arc<ScriptedSubmitter>, store: Arc<MemoryStore>) -> SubmissionEngine {
        let retry = RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            backoff_multiplier: 2.0,
        };
        SubmissionEngine::new(submitter, store, retry, BoundedIdCache::new(100, 3600))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_completes_with_tx_hash() {
        let store = Arc::new(MemoryStore::new());
        let submitter = ScriptedSubmitter::new(vec![Ok(response(0, "", ""))]);
        let mut engine = engine(submitter.clone(), store.clone());

        let state = attested(&store, "a").await;
        assert_eq!(engine.process(state).await.unwrap(), Status::Complete);

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Complete);
        assert_eq!(stored.dest_tx_hash.as_deref(), Some("TX0"));
        assert_eq!(submitter.calls(), vec![10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_fails_without_retry() {
        let store = Arc::new(MemoryStore::new());
        let submitter =
            ScriptedSubmitter::new(vec![Ok(response(5, "cctp", "nonce already used"))]);
        let mut engine = engine(submitter.clone(), store.clone());

        let state = attested(&store, "a").await;
        assert_eq!(engine.process(state).await.unwrap(), Status::Failed);

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Failed);
        assert!(matches!(
            stored.failure,
            Some(FailureReason::Rejected { code: 5, .. })
        ));
        assert_eq!(submitter.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_mismatch_refreshes_account() {
        let store = Arc::new(MemoryStore::new());
        let submitter = ScriptedSubmitter::new(vec![
            Ok(response(32, "sdk", "account sequence mismatch")),
            Ok(response(0, "", "")),
        ]);
        let mut engine = engine(submitter.clone(), store.clone());

        let state = attested(&store, "a").await;
        assert_eq!(engine.process(state).await.unwrap(), Status::Complete);
        assert_eq!(*submitter.account_queries.lock().unwrap(), 2);
        assert_eq!(submitter.calls(), vec![10, 11]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_increments_after_success() {
        let store = Arc::new(MemoryStore::new());
        let submitter = ScriptedSubmitter::new(vec![]);
        let mut engine = engine(submitter.clone(), store.clone());

        for id in ["a", "b", "c"] {
            let state = attested(&store, id).await;
            engine.process(state).await.unwrap();
        }
        assert_eq!(submitter.calls(), vec![10, 11, 12]);
        assert_eq!(*submitter.account_queries.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_exhaust_budget() {
        let store = Arc::new(MemoryStore::new());
        let submitter = ScriptedSubmitter::new(vec![
            Err(eyre!("connection refused")),
            Err(eyre!("connection refused")),
            Err(eyre!("connection refused")),
        ]);
        let mut engine = engine(submitter.clone(), store.clone());

        let state = attested(&store, "a").await;
        assert_eq!(engine.process(state).await.unwrap(), Status::Failed);

        let stored = store.get("a").await.unwrap().unwrap();
        assert!(matches!(
            stored.failure,
            Some(FailureReason::SubmissionExhausted { attempts: 3, .. })
        ));
        assert_eq!(submitter.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_notifications_submit_once() {
        let store = Arc::new(MemoryStore::new());
        let submitter = ScriptedSubmitter::new(vec![]);
        let mut engine = engine(submitter.clone(), store.clone());

        let state = attested(&store, "a").await;
        for _ in 0..3 {
            assert_eq!(
                engine.process(state.clone()).await.unwrap(),
                Status::Complete
            );
        }
        assert_eq!(submitter.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_outage_after_broadcast_still_records_completion() {
        let store = Arc::new(FlakyStore::new(0));
        let submitter = ScriptedSubmitter::new(vec![]);
        let retry = RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            backoff_multiplier: 2.0,
        };
        let mut engine = SubmissionEngine::new(
            submitter.clone(),
            store.clone(),
            retry,
            BoundedIdCache::new(100, 3600),
        );

        let state = attested(&store.inner, "a").await;
        store.get_failures.store(1, Ordering::SeqCst);
        store.update_failures.store(4, Ordering::SeqCst);

        assert_eq!(engine.process(state).await.unwrap(), Status::Complete);
        assert_eq!(submitter.calls().len(), 1);

        let stored = store.inner.get("a").await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Complete);
        assert_eq!(stored.dest_tx_hash.as_deref(), Some("TX0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_in_store_is_not_resubmitted() {
        let store = Arc::new(MemoryStore::new());
        let submitter = ScriptedSubmitter::new(vec![]);
        let state = attested(&store, "a").await;

        let mut done = state.clone();
        done.mark_complete("EARLIER".to_string()).unwrap();
        store.update(&done, Status::Attested).await.unwrap();

        // A fresh engine (as after restart) must consult the store
        let mut engine = engine(submitter.clone(), store.clone());
        assert_eq!(engine.process(state).await.unwrap(), Status::Complete);
        assert!(submitter.calls().is_empty());
    }
}
