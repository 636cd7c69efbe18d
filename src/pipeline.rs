//! Relay pipeline wiring
//!
//! ```text
//! ChainWatcher --attestation queue--> AttestationPoller --submission queue--> SubmissionEngine
//! ```
//!
//! Both queues are bounded; a full queue blocks its producer. Every stage
//! watches the same shutdown signal.

use eyre::{eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::attestation::{AttestationPoller, AttestationSource};
use crate::bounded_cache::BoundedIdCache;
use crate::config::Config;
use crate::store::{CheckpointStore, StateStore};
use crate::types::{MessageState, Status};
use crate::watchers::{ChainWatcher, LogSource};
use crate::writers::{RetryConfig, SubmissionEngine, Submitter};

pub struct Pipeline {
    watcher: ChainWatcher,
    poller: Arc<AttestationPoller>,
    engine: SubmissionEngine,
    states: Arc<dyn StateStore>,
    resume_retry: RetryConfig,
    attest_tx: mpsc::Sender<MessageState>,
    attest_rx: mpsc::Receiver<MessageState>,
    submit_tx: mpsc::Sender<MessageState>,
    submit_rx: mpsc::Receiver<MessageState>,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        logs: Arc<dyn LogSource>,
        attestations: Arc<dyn AttestationSource>,
        submitter: Arc<dyn Submitter>,
        states: Arc<dyn StateStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let capacity = config.pipeline.queue_capacity.max(1);
        let (attest_tx, attest_rx) = mpsc::channel(capacity);
        let (submit_tx, submit_rx) = mpsc::channel(capacity);

        let watcher = ChainWatcher::new(
            &config.source,
            config.destination.domain,
            config.filters.clone(),
            logs,
            states.clone(),
            checkpoints,
            attest_tx.clone(),
        );

        let poller = Arc::new(AttestationPoller::new(
            attestations,
            states.clone(),
            RetryConfig::for_attestation(&config.attestation),
            config.attestation.max_concurrent,
            submit_tx.clone(),
        ));

        let engine = SubmissionEngine::new(
            submitter,
            states.clone(),
            RetryConfig::for_submission(&config.submission),
            BoundedIdCache::from_config(&config.pipeline),
        );

        Self {
            watcher,
            poller,
            engine,
            states,
            resume_retry: RetryConfig::for_reconnect(&config.source),
            attest_tx,
            attest_rx,
            submit_tx,
            submit_rx,
        }
    }

    /// Run every stage until shutdown. A stage that stops on its own before
    /// shutdown is an error.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Self {
            watcher,
            poller,
            engine,
            states,
            resume_retry,
            attest_tx,
            attest_rx,
            submit_tx,
            submit_rx,
        } = self;

        let mut join_set: JoinSet<(&'static str, Result<()>)> = JoinSet::new();

        let stop = shutdown.clone();
        join_set.spawn(async move { ("submission engine", engine.run(submit_rx, stop).await) });

        let stop = shutdown.clone();
        join_set.spawn(async move { ("attestation poller", poller.run(attest_rx, stop).await) });

        // Consumers are running, so resuming cannot deadlock on full queues
        let mut stop = shutdown.clone();
        join_set.spawn(async move {
            let resumed = tokio::select! {
                _ = stop.wait_for(|stop| *stop) => Ok(()),
                resumed = resume_unfinished(
                    states.as_ref(),
                    &attest_tx,
                    &submit_tx,
                    &resume_retry,
                ) => resumed,
            };
            ("resume", resumed)
        });

        let stop = shutdown.clone();
        join_set.spawn(async move { ("chain watcher", watcher.run(stop).await) });

        info!("Relay pipeline started");

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Shutdown signal received, stopping pipeline");
                    break;
                }
                joined = join_set.join_next() => match joined {
                    Some(Ok(("resume", Ok(())))) => {}
                    Some(Ok(("resume", Err(e)))) => {
                        // Only a closed queue ends up here; the consuming stage reports itself
                        warn!(error = %e, "Failed to resume unfinished messages");
                    }
                    Some(Ok((stage, Ok(())))) => {
                        error!(stage, "Pipeline stage exited unexpectedly");
                        join_set.abort_all();
                        return Err(eyre!("{} exited unexpectedly", stage));
                    }
                    Some(Ok((stage, Err(e)))) => {
                        error!(stage, error = %e, "Pipeline stage failed");
                        join_set.abort_all();
                        return Err(e.wrap_err(format!("{} failed", stage)));
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Pipeline task panicked");
                        join_set.abort_all();
                        return Err(eyre!("pipeline task panicked: {}", e));
                    }
                    None => return Err(eyre!("all pipeline tasks exited unexpectedly")),
                },
            }
        }

        // Every stage observes the same signal and winds down by itself
        while let Some(joined) = join_set.join_next().await {
            if let Ok((stage, Err(e))) = joined {
                warn!(stage, error = %e, "Stage reported an error while stopping");
            }
        }

        info!("Relay pipeline stopped");
        Ok(())
    }
}

/// Re-enqueue messages a previous run left in flight. A store outage is
/// waited out with `retry` backoff.
pub async fn resume_unfinished(
    states: &dyn StateStore,
    attest_tx: &mpsc::Sender<MessageState>,
    submit_tx: &mpsc::Sender<MessageState>,
    retry: &RetryConfig,
) -> Result<()> {
    let mut attempt: u32 = 0;
    let unfinished = loop {
        match states.resumable().await {
            Ok(unfinished) => break unfinished,
            Err(e) => {
                let backoff = retry.backoff_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    ?backoff,
                    error = %e,
                    "Failed to load unfinished messages, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt = attempt.saturating_add(1);
            }
        }
    };
    if unfinished.is_empty() {
        return Ok(());
    }

    let (mut pending, mut attested) = (0usize, 0usize);
    for state in unfinished {
        let queue = match state.status {
            Status::Pending => {
                pending += 1;
                attest_tx
            }
            Status::Attested => {
                attested += 1;
                submit_tx
            }
            _ => continue,
        };
        queue
            .send(state)
            .await
            .map_err(|_| eyre!("queue closed while resuming"))?;
    }

    info!(pending, attested, "Resumed unfinished messages");
    Ok(())
}
