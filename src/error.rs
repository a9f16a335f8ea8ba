use std::fmt;

use thiserror::Error;

pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Errors returned synchronously by the consumer group.
///
/// Per-message failures (decode, processing) never show up here: they are
/// settled against the transport and reported through the logging sink.
#[derive(Error, Debug)]
pub enum ConsumerError {
    // ===== Construction Errors =====
    #[error("invalid consumer config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("failed creating consumer: {0}")]
    Connect(#[source] TransportError),

    // ===== Lifecycle Errors =====
    #[error("consumer already started")]
    AlreadyStarted,

    // ===== Runtime Errors =====
    #[error("transport error: {0}")]
    Transport(#[source] TransportError),

    #[error("receive loop task failed: {0}")]
    TaskFailed(String),
}

impl ConsumerError {
    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ConsumerError::InvalidConfig(_) => "INVALID_CONFIG",
            ConsumerError::Connect(_) => "CONNECT_FAILED",
            ConsumerError::AlreadyStarted => "ALREADY_STARTED",
            ConsumerError::Transport(_) => "TRANSPORT_ERROR",
            ConsumerError::TaskFailed(_) => "TASK_FAILED",
        }
    }
}

/// Errors reported by a transport client.
///
/// `BackendUnavailable` is the only transient condition: receive loops
/// re-enter `receive` on it instead of terminating.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("backend unavailable")]
    BackendUnavailable,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("subscription closed")]
    Closed,
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::BackendUnavailable)
    }
}

/// A single problem found while validating a consumer configuration
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigViolation {
    #[error("at least one topic must be set")]
    NoTopics,

    #[error("project must be set")]
    MissingProject,

    #[error("region must be set")]
    MissingRegion,

    #[error("decoder must be set")]
    MissingDecoder,

    #[error("logger must be set")]
    MissingLogger,

    #[error("processor must be set")]
    MissingProcessor,

    #[error("delivery is not valid")]
    InvalidDelivery,
}

/// Every violation found in a consumer configuration, in field order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    violations: Vec<ConfigViolation>,
}

impl ConfigError {
    pub(crate) fn new(violations: Vec<ConfigViolation>) -> Self {
        Self { violations }
    }

    pub fn violations(&self) -> &[ConfigViolation] {
        &self.violations
    }

    pub fn contains(&self, violation: ConfigViolation) -> bool {
        self.violations.contains(&violation)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", violation)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}
