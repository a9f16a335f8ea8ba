// ============================================================================
// Relay Config - Environment-driven settings
// ============================================================================
//
// Settings for the relay consumer, loaded from environment variables with
// sensible defaults. Values that are missing or malformed are NOT rejected
// here: the consumer validates its full configuration in one place and
// reports every problem at once.
//
// ============================================================================

mod constants;
mod consumer;
mod kafka;

pub use constants::DEFAULT_MAX_RETRIES;
pub use consumer::ConsumerSettings;
pub use kafka::KafkaSettings;

/// Read a variable through `lookup`, treating blank values as unset
pub(crate) fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
