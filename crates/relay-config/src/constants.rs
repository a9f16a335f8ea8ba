// ============================================================================
// Configuration Constants
// ============================================================================

// Retry ceiling: a message is given up on after this many retries
// (the failure that exceeds it is the last one)
pub const DEFAULT_MAX_RETRIES: u32 = 2;

pub(crate) const DEFAULT_RUST_LOG: &str = "info";
pub(crate) const DEFAULT_KAFKA_BROKERS: &str = "localhost:9092";
pub(crate) const DEFAULT_KAFKA_SESSION_TIMEOUT_MS: u32 = 30_000;
