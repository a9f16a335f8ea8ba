use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

// All counters are labelled by subscription name

pub static MESSAGES_RECEIVED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relay_messages_received_total",
        "Total number of messages delivered by the transport",
        &["subscription"]
    )
    .expect("Failed to register relay_messages_received_total metric")
});

pub static MESSAGES_ACKED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relay_messages_acked_total",
        "Total number of acknowledged messages",
        &["subscription"]
    )
    .expect("Failed to register relay_messages_acked_total metric")
});

pub static MESSAGES_NACKED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relay_messages_nacked_total",
        "Total number of negatively acknowledged messages",
        &["subscription"]
    )
    .expect("Failed to register relay_messages_nacked_total metric")
});

pub static DECODE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relay_decode_failures_total",
        "Total number of message payloads that failed to decode",
        &["subscription"]
    )
    .expect("Failed to register relay_decode_failures_total metric")
});

pub static PROCESS_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relay_process_failures_total",
        "Total number of failed batch processor invocations",
        &["subscription"]
    )
    .expect("Failed to register relay_process_failures_total metric")
});

pub static RETRIES_EXHAUSTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relay_retries_exhausted_total",
        "Total number of messages given up on after reaching the retry ceiling",
        &["subscription"]
    )
    .expect("Failed to register relay_retries_exhausted_total metric")
});

pub static BACKEND_UNAVAILABLE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relay_backend_unavailable_total",
        "Total number of receive restarts after a backend unavailable error",
        &["subscription"]
    )
    .expect("Failed to register relay_backend_unavailable_total metric")
});

/// Render every registered metric in the Prometheus text format
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
