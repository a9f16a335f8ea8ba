// ============================================================================
// relay - publish-subscribe consumption adapter
// ============================================================================
//
// Bridges a publish-subscribe transport to an application batch processor:
// - config:     consumer group configuration and validation
// - delivery:   per-subscription decode -> process -> settle policy
// - consumer:   supervisor running one receive loop per subscription
// - retry:      per-message failed attempt counts
// - transport:  transport seam plus in-memory and Kafka implementations
// - logging:    sink construction
// - metrics:    Prometheus counters
//
// ============================================================================

pub mod config;
pub mod consumer;
pub mod context;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod processing;
pub mod retry;
pub mod transport;

pub use config::{ConsumerConfig, Subscription};
pub use consumer::{Consumer, ConsumerState};
pub use context::ProcessContext;
pub use delivery::{DeliveryPolicy, Disposition, SubscriptionConsumer};
pub use error::{ConfigError, ConfigViolation, ConsumerError, ConsumerResult, TransportError};
pub use processing::{BatchProcessor, Decoder, JsonDecoder};
pub use retry::RetryTracker;
pub use transport::{
    AckReply, Acknowledger, Connector, Message, MessageHandler, MessageMetadata, SubscriberClient,
};

pub use relay_config::{ConsumerSettings, KafkaSettings};
pub use relay_types::{Batch, DeliveryType, Event, Topic};
