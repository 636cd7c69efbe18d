//! Prometheus metrics for the relayer
//!
//! Registered in the default registry and exposed on `/metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram, CounterVec,
    Gauge, GaugeVec, Histogram,
};

lazy_static! {
    // Source chain
    pub static ref LATEST_BLOCK: GaugeVec = register_gauge_vec!(
        "cctp_relayer_latest_block",
        "Latest source block fully processed",
        &["chain"]
    ).expect("constant metric definition is valid");

    pub static ref MESSAGES_OBSERVED: CounterVec = register_counter_vec!(
        "cctp_relayer_messages_observed_total",
        "MessageSent logs seen on the source chain",
        &["chain"]
    ).expect("constant metric definition is valid");

    pub static ref DECODE_FAILURES: CounterVec = register_counter_vec!(
        "cctp_relayer_decode_failures_total",
        "MessageSent logs dropped because they could not be decoded",
        &["chain"]
    ).expect("constant metric definition is valid");

    pub static ref WATCHER_RECONNECTS: CounterVec = register_counter_vec!(
        "cctp_relayer_watcher_reconnects_total",
        "Times the source subscription was re-established after an error",
        &["chain"]
    ).expect("constant metric definition is valid");

    // Pipeline
    pub static ref MESSAGES_FILTERED: CounterVec = register_counter_vec!(
        "cctp_relayer_messages_filtered_total",
        "Messages excluded from relay, by filter",
        &["reason"]
    ).expect("constant metric definition is valid");

    pub static ref MESSAGES_ENQUEUED: CounterVec = register_counter_vec!(
        "cctp_relayer_messages_enqueued_total",
        "Messages accepted for attestation polling",
        &["kind"]
    ).expect("constant metric definition is valid");

    pub static ref QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "cctp_relayer_queue_depth",
        "Entries waiting in an internal work queue",
        &["queue"]
    ).expect("constant metric definition is valid");

    // Attestation
    pub static ref ATTESTATION_ATTEMPTS: CounterVec = register_counter_vec!(
        "cctp_relayer_attestation_attempts_total",
        "Attestation service requests, by outcome",
        &["outcome"]
    ).expect("constant metric definition is valid");

    pub static ref ATTESTATIONS_IN_FLIGHT: Gauge = register_gauge!(
        "cctp_relayer_attestations_in_flight",
        "Messages currently being polled for an attestation"
    ).expect("constant metric definition is valid");

    // Submission
    pub static ref SUBMISSIONS: CounterVec = register_counter_vec!(
        "cctp_relayer_submissions_total",
        "Destination chain broadcasts, by outcome",
        &["outcome"]
    ).expect("constant metric definition is valid");

    pub static ref MESSAGES_FAILED: CounterVec = register_counter_vec!(
        "cctp_relayer_messages_failed_total",
        "Messages that reached Failed, by reason",
        &["reason"]
    ).expect("constant metric definition is valid");

    pub static ref RELAY_LATENCY: Histogram = register_histogram!(
        "cctp_relayer_relay_latency_seconds",
        "Time from first observation to destination confirmation",
        vec![10.0, 30.0, 60.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0]
    ).expect("constant metric definition is valid");

    // Health
    pub static ref UP: Gauge = register_gauge!(
        "cctp_relayer_up",
        "Whether the relayer is up and running"
    ).expect("constant metric definition is valid");
}

/// Record a fully processed source block
pub fn record_block_processed(chain: &str, block_number: u64) {
    LATEST_BLOCK
        .with_label_values(&[chain])
        .set(block_number as f64);
}

pub fn record_message_observed(chain: &str) {
    MESSAGES_OBSERVED.with_label_values(&[chain]).inc();
}

pub fn record_decode_failure(chain: &str) {
    DECODE_FAILURES.with_label_values(&[chain]).inc();
}

pub fn record_reconnect(chain: &str) {
    WATCHER_RECONNECTS.with_label_values(&[chain]).inc();
}

pub fn record_filtered(reason: &str) {
    MESSAGES_FILTERED.with_label_values(&[reason]).inc();
}

pub fn record_enqueued(kind: &str) {
    MESSAGES_ENQUEUED.with_label_values(&[kind]).inc();
}

pub fn set_queue_depth(queue: &str, depth: usize) {
    QUEUE_DEPTH.with_label_values(&[queue]).set(depth as f64);
}

pub fn record_attestation_attempt(outcome: &str) {
    ATTESTATION_ATTEMPTS.with_label_values(&[outcome]).inc();
}

pub fn record_submission(outcome: &str) {
    SUBMISSIONS.with_label_values(&[outcome]).inc();
}

pub fn record_failed(reason: &str) {
    MESSAGES_FAILED.with_label_values(&[reason]).inc();
}

/// Record end-to-end latency of a completed relay
pub fn record_relay_latency(seconds: f64) {
    RELAY_LATENCY.observe(seconds.max(0.0));
}
