// ============================================================================
// Logging Sink
// ============================================================================
//
// The consumer never installs a global subscriber. Every record it emits is
// routed to the Dispatch handed over in ConsumerConfig::logger, so several
// consumers in one process can log to different sinks.
//
// ============================================================================

use tracing::Dispatch;
use tracing_subscriber::layer::SubscriberExt;

/// Standard sink: `RUST_LOG`-style filter directives and the fmt layer
pub fn dispatch_from_filter(filter: &str) -> Dispatch {
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer());
    Dispatch::new(subscriber)
}

/// A sink that drops every record
pub fn discard() -> Dispatch {
    Dispatch::none()
}
