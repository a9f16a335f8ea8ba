// ============================================================================
// Consumer Configuration
// ============================================================================
//
// ConsumerConfig is validated once, at construction. Validation collects
// EVERY violation before reporting, so a misconfigured deployment learns
// about all of its problems in one go.
//
// ============================================================================

use std::fmt;
use std::sync::Arc;

use relay_config::{ConsumerSettings, DEFAULT_MAX_RETRIES};
use relay_types::{DeliveryType, Topic};
use tracing::Dispatch;

use crate::error::{ConfigError, ConfigViolation};
use crate::processing::{BatchProcessor, Decoder};

/// Configuration of a consumer group
#[derive(Clone)]
pub struct ConsumerConfig {
    /// Region where the subscriptions are located
    pub region: String,
    /// Project where the subscriptions are located
    pub project: String,
    /// Subscriptions to consume from, one receive loop each
    pub topics: Vec<Topic>,
    /// Decodes message payloads into events
    pub decoder: Option<Arc<dyn Decoder>>,
    /// Sink for every record the consumer emits
    pub logger: Option<Dispatch>,
    /// Processes each decoded event.
    /// May be called from multiple tasks and needs to be safe for concurrent use.
    pub processor: Option<Arc<dyn BatchProcessor>>,
    /// Acknowledgement policy. `None` is rejected by validation.
    pub delivery: Option<DeliveryType>,
    /// Retry ceiling for at-least-once delivery: the failure that pushes a
    /// message's attempt count above this value gives up on the message
    pub max_retries: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            project: String::new(),
            topics: Vec::new(),
            decoder: None,
            logger: None,
            processor: None,
            delivery: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ConsumerConfig {
    /// Start from environment settings; decoder, processor and logger still
    /// have to be wired in by the caller.
    pub fn from_settings(settings: &ConsumerSettings) -> Self {
        Self {
            region: settings.region.clone(),
            project: settings.project.clone(),
            topics: settings.topics.clone(),
            delivery: settings.delivery,
            max_retries: settings.max_retries,
            ..Self::default()
        }
    }

    /// Ensure the configuration is usable, reporting every violation at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check().map(|_| ())
    }

    /// Validate and hand back the wiring with every optional part present
    pub(crate) fn check(&self) -> Result<ValidatedConfig, ConfigError> {
        let violations = self.violations();
        match (&self.decoder, &self.logger, &self.processor, self.delivery) {
            (Some(decoder), Some(logger), Some(processor), Some(delivery))
                if violations.is_empty() =>
            {
                Ok(ValidatedConfig {
                    decoder: Arc::clone(decoder),
                    logger: logger.clone(),
                    processor: Arc::clone(processor),
                    delivery,
                })
            }
            _ => Err(ConfigError::new(violations)),
        }
    }

    fn violations(&self) -> Vec<ConfigViolation> {
        let mut violations = Vec::new();

        if self.topics.is_empty() {
            violations.push(ConfigViolation::NoTopics);
        }
        if self.project.is_empty() {
            violations.push(ConfigViolation::MissingProject);
        }
        if self.region.is_empty() {
            violations.push(ConfigViolation::MissingRegion);
        }
        if self.decoder.is_none() {
            violations.push(ConfigViolation::MissingDecoder);
        }
        if self.logger.is_none() {
            violations.push(ConfigViolation::MissingLogger);
        }
        if self.processor.is_none() {
            violations.push(ConfigViolation::MissingProcessor);
        }
        match self.delivery {
            Some(DeliveryType::AtMostOnce) | Some(DeliveryType::AtLeastOnce) => {}
            None => violations.push(ConfigViolation::InvalidDelivery),
        }

        violations
    }

    /// Subscription addressed by `topic` within this config's project and region
    pub fn subscription(&self, topic: &Topic) -> Subscription {
        Subscription {
            project: self.project.clone(),
            region: self.region.clone(),
            name: topic.as_str().to_string(),
        }
    }
}

impl fmt::Debug for ConsumerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerConfig")
            .field("region", &self.region)
            .field("project", &self.project)
            .field("topics", &self.topics)
            .field("decoder", &self.decoder.is_some())
            .field("logger", &self.logger.is_some())
            .field("processor", &self.processor.is_some())
            .field("delivery", &self.delivery)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// The required wiring of a config that passed validation
pub(crate) struct ValidatedConfig {
    pub decoder: Arc<dyn Decoder>,
    pub logger: Dispatch,
    pub processor: Arc<dyn BatchProcessor>,
    pub delivery: DeliveryType,
}

/// A subscription, addressed by project, region and name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub project: String,
    pub region: String,
    pub name: String,
}

impl fmt::Display for Subscription {
    /// Canonical resource path used to address the transport
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/locations/{}/subscriptions/{}",
            self.project, self.region, self.name
        )
    }
}
