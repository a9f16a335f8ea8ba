// ============================================================================
// Kafka Transport
// ============================================================================
//
// One StreamConsumer per subscription:
// - topic     = subscription name
// - group.id  = canonical subscription path
// - offsets are committed manually (enable.auto.commit=false)
//
// Settlement on a partitioned log:
// - ack:   commit offset + 1
// - nack:  a single record can't be rejected, so log it and commit past it
// - neither (handler dropped the reply): seek the partition back to the
//   record so the next recv() delivers it again. A failed seek is logged
//   and receiving goes on.
//
// Records are handed to the handler one at a time, in partition order.
//
// ============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Headers};
use rdkafka::{Message as _, Offset, TopicPartitionList};
use relay_config::KafkaSettings;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Subscription;
use crate::error::TransportError;
use crate::transport::{
    AckReply, Acknowledger, Connector, Message, MessageHandler, MessageMetadata, SubscriberClient,
};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Creates a `ClientConfig` from connection settings.
///
/// Plaintext unless SSL is enabled; SASL is configured only when mechanism,
/// username and password are all present.
pub fn create_client_config(settings: &KafkaSettings) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &settings.brokers);
    client_config.set("security.protocol", "plaintext");

    if settings.ssl_enabled {
        info!("Enabling SSL/TLS for Kafka connection");
        client_config.set("security.protocol", "ssl");
        if let Some(ca_location) = &settings.ssl_ca_location {
            client_config.set("ssl.ca.location", ca_location);
        }
    }

    if let Some((mechanism, username, password)) = settings.sasl() {
        info!(sasl_mechanism = %mechanism, "Configuring SASL authentication");
        client_config
            .set("sasl.mechanism", mechanism)
            .set("sasl.username", username)
            .set("sasl.password", password);

        if settings.ssl_enabled {
            client_config.set("security.protocol", "sasl_ssl");
        } else {
            client_config.set("security.protocol", "sasl_plaintext");
        }
    }

    client_config
}

/// Whether `error` means the cluster is temporarily out of reach
pub fn is_backend_unavailable(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(RDKafkaErrorCode::AllBrokersDown)
            | Some(RDKafkaErrorCode::BrokerTransportFailure)
            | Some(RDKafkaErrorCode::BrokerNotAvailable)
    )
}

fn map_receive_error(error: KafkaError) -> TransportError {
    if is_backend_unavailable(&error) {
        TransportError::BackendUnavailable
    } else {
        TransportError::Receive(error.to_string())
    }
}

/// Binds Kafka consumers to subscriptions
#[derive(Debug, Clone)]
pub struct KafkaConnector {
    settings: KafkaSettings,
}

impl KafkaConnector {
    pub fn new(settings: KafkaSettings) -> Self {
        Self { settings }
    }

    pub fn from_env() -> Self {
        Self::new(KafkaSettings::from_env())
    }

    /// Full consumer configuration for one subscription
    pub fn consumer_config(&self, subscription: &Subscription) -> ClientConfig {
        let mut client_config = create_client_config(&self.settings);
        client_config
            .set("group.id", subscription.to_string())
            // Offsets are committed on settlement only
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("fetch.min.bytes", "1")
            .set("fetch.wait.max.ms", "500")
            .set("session.timeout.ms", self.settings.session_timeout_ms.to_string())
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000");
        client_config
    }
}

#[async_trait]
impl Connector for KafkaConnector {
    async fn connect(
        &self,
        subscription: &Subscription,
    ) -> Result<Arc<dyn SubscriberClient>, TransportError> {
        info!(
            brokers = %self.settings.brokers,
            subscription = %subscription,
            "Initializing Kafka consumer"
        );

        let consumer: StreamConsumer = self
            .consumer_config(subscription)
            .create()
            .map_err(|e| {
                TransportError::Connect(format!("Failed to create Kafka consumer: {e}"))
            })?;

        consumer
            .subscribe(&[subscription.name.as_str()])
            .map_err(|e| {
                TransportError::Connect(format!("Failed to subscribe to Kafka topic: {e}"))
            })?;

        let client: Arc<dyn SubscriberClient> = Arc::new(KafkaSubscriber {
            consumer: Arc::new(consumer),
            topic: subscription.name.clone(),
        });
        Ok(client)
    }
}

/// A Kafka consumer subscribed to one topic
pub struct KafkaSubscriber {
    consumer: Arc<StreamConsumer>,
    topic: String,
}

/// Owned copy of a received record
struct Record {
    metadata: MessageMetadata,
    data: Bytes,
    attributes: HashMap<String, String>,
}

impl Record {
    fn from_borrowed(message: &BorrowedMessage<'_>) -> Self {
        let mut attributes = HashMap::new();
        if let Some(headers) = message.headers() {
            for header in headers.iter() {
                if let Some(value) = header.value {
                    attributes.insert(
                        header.key.to_string(),
                        String::from_utf8_lossy(value).into_owned(),
                    );
                }
            }
        }

        Self {
            metadata: MessageMetadata::new(message.partition(), message.offset()),
            data: Bytes::copy_from_slice(message.payload().unwrap_or_default()),
            attributes,
        }
    }
}

#[async_trait]
impl SubscriberClient for KafkaSubscriber {
    async fn receive(
        &self,
        cancel: CancellationToken,
        handler: MessageHandler,
    ) -> Result<(), TransportError> {
        loop {
            let record = {
                let received = tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    received = self.consumer.recv() => received,
                };
                match received {
                    Ok(message) => Record::from_borrowed(&message),
                    Err(e) => {
                        error!(error = %e, topic = %self.topic, "Kafka consumer error");
                        return Err(map_receive_error(e));
                    }
                }
            };

            let settled = Arc::new(AtomicBool::new(false));
            let message = Message {
                id: record.metadata.to_string(),
                data: record.data,
                attributes: record.attributes,
                reply: AckReply::new(KafkaAcker {
                    consumer: Arc::clone(&self.consumer),
                    topic: self.topic.clone(),
                    metadata: record.metadata,
                    settled: Arc::clone(&settled),
                }),
            };

            handler(message).await;

            if !settled.load(Ordering::SeqCst) {
                self.rewind(record.metadata);
            }
        }
    }
}

impl KafkaSubscriber {
    /// Move the partition back so the record is fetched again
    fn rewind(&self, metadata: MessageMetadata) {
        debug!(
            topic = %self.topic,
            partition = metadata.partition,
            offset = metadata.offset,
            "rewinding to unsettled record"
        );
        let result = self.consumer.seek(
            &self.topic,
            metadata.partition,
            Offset::Offset(metadata.offset),
            SEEK_TIMEOUT,
        );
        log_rewind_failure(&self.topic, metadata, result);
    }
}

/// A failed seek is not fatal: the partition was most likely revoked by a
/// rebalance, and its next owner resumes from the last committed offset.
///
/// Returns whether the rewind took effect.
fn log_rewind_failure(topic: &str, metadata: MessageMetadata, result: KafkaResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(
                error = %e,
                topic = %topic,
                partition = metadata.partition,
                offset = metadata.offset,
                "Failed to rewind to unsettled record, leaving it to the partition owner"
            );
            false
        }
    }
}

struct KafkaAcker {
    consumer: Arc<StreamConsumer>,
    topic: String,
    metadata: MessageMetadata,
    settled: Arc<AtomicBool>,
}

impl KafkaAcker {
    fn commit(&self) {
        self.settled.store(true, Ordering::SeqCst);

        let mut offsets = TopicPartitionList::new();
        let next = Offset::Offset(self.metadata.offset + 1);
        if let Err(e) = offsets.add_partition_offset(&self.topic, self.metadata.partition, next) {
            error!(error = %e, topic = %self.topic, "Failed to build commit offsets");
            return;
        }
        if let Err(e) = self.consumer.commit(&offsets, CommitMode::Async) {
            error!(
                error = %e,
                topic = %self.topic,
                partition = self.metadata.partition,
                offset = self.metadata.offset,
                "Failed to commit offset"
            );
        }
    }
}

impl Acknowledger for KafkaAcker {
    fn ack(&self) {
        self.commit();
    }

    fn nack(&self) {
        warn!(
            topic = %self.topic,
            partition = self.metadata.partition,
            offset = self.metadata.offset,
            "handling nacked message"
        );
        self.commit();
    }
}
