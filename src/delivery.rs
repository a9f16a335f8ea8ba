// ============================================================================
// Per-Subscription Delivery Policy
// ============================================================================
//
// For every message the transport delivers:
// 1. Decode. A payload that can't be decoded is nacked immediately and never
//    enters retry tracking (retrying a malformed payload cannot succeed).
// 2. Build a one-event batch, attach the message attributes to the context.
// 3. AtMostOnce:  ack BEFORE processing. Processing failures are logged only.
//    AtLeastOnce: process first, then settle from the outcome:
//    - success:  forget any recorded failures, ack
//    - failure:  count the attempt; above the retry ceiling nack and forget,
//                otherwise leave the message unsettled so the transport
//                redelivers it
//
// Settlement after processing is a separate step fed the processing outcome,
// see `SubscriptionConsumer::settle_at_least_once`.
//
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::FutureExt;
use relay_types::{Batch, DeliveryType};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, info_span, warn, Dispatch, Instrument, Span};

use crate::config::Subscription;
use crate::context::ProcessContext;
use crate::metrics;
use crate::processing::{BatchProcessor, Decoder};
use crate::retry::RetryTracker;
use crate::transport::{Message, MessageHandler, MessageMetadata, SubscriberClient};

/// How a message is settled once processing is over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
    /// Neither ack nor nack: the transport redelivers later
    Withhold,
}

/// Settlement of a failed message given its attempt count.
///
/// The failure that pushes the count above `max_retries` gives up.
pub fn disposition_after_failure(attempt: u32, max_retries: u32) -> Disposition {
    if attempt > max_retries {
        Disposition::Nack
    } else {
        Disposition::Withhold
    }
}

/// Acknowledgement policy of one subscription consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub delivery: DeliveryType,
    pub max_retries: u32,
}

/// Applies decode -> process -> settle to the messages of one subscription
pub struct SubscriptionConsumer {
    subscription: Subscription,
    client: Arc<dyn SubscriberClient>,
    decoder: Arc<dyn Decoder>,
    processor: Arc<dyn BatchProcessor>,
    policy: DeliveryPolicy,
    retries: RetryTracker,
    logger: Dispatch,
    span: Span,
}

impl SubscriptionConsumer {
    pub fn new(
        subscription: Subscription,
        client: Arc<dyn SubscriberClient>,
        decoder: Arc<dyn Decoder>,
        processor: Arc<dyn BatchProcessor>,
        policy: DeliveryPolicy,
        logger: Dispatch,
    ) -> Self {
        // Created under the sink so records in this span reach it
        let span = tracing::dispatcher::with_default(&logger, || {
            info_span!(
                "subscription",
                subscription = %subscription.name,
                region = %subscription.region,
                project = %subscription.project,
            )
        });

        Self {
            subscription,
            client,
            decoder,
            processor,
            policy,
            retries: RetryTracker::new(),
            logger,
            span,
        }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn client(&self) -> &Arc<dyn SubscriberClient> {
        &self.client
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    pub fn retries(&self) -> &RetryTracker {
        &self.retries
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    /// Handler to pass to the transport. Every invocation runs inside this
    /// subscription's span and logs to its sink.
    pub fn handler(self: &Arc<Self>, cancel: CancellationToken) -> MessageHandler {
        let consumer = Arc::clone(self);
        Arc::new(move |message: Message| {
            let span = consumer.span.clone();
            let logger = consumer.logger.clone();
            let consumer = Arc::clone(&consumer);
            let cancel = cancel.clone();
            async move { consumer.process_message(&cancel, message).await }
                .instrument(span)
                .with_subscriber(logger)
                .boxed()
        })
    }

    /// Decode, process and settle one message
    pub async fn process_message(&self, cancel: &CancellationToken, message: Message) {
        let meta = message.metadata();
        let Message {
            id,
            data,
            attributes,
            reply,
        } = message;
        let name = self.subscription.name.as_str();
        metrics::MESSAGES_RECEIVED_TOTAL.with_label_values(&[name]).inc();

        let event = match self.decoder.decode(&data) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    error = %format!("{e:#}"),
                    payload = %String::from_utf8_lossy(&data),
                    offset = meta.offset,
                    partition = meta.partition,
                    attributes = ?attributes,
                    "unable to decode message data into event"
                );
                metrics::DECODE_FAILURES_TOTAL.with_label_values(&[name]).inc();
                metrics::MESSAGES_NACKED_TOTAL.with_label_values(&[name]).inc();
                reply.nack();
                return;
            }
        };

        let mut batch: Batch = vec![event];
        let ctx = ProcessContext::new(cancel.clone()).with_metadata(attributes.clone());

        let pending = match self.policy.delivery {
            DeliveryType::AtMostOnce => {
                reply.ack();
                metrics::MESSAGES_ACKED_TOTAL.with_label_values(&[name]).inc();
                None
            }
            DeliveryType::AtLeastOnce => Some(reply),
        };

        let outcome = self.processor.process_batch(&ctx, &mut batch).await;
        if let Err(e) = &outcome {
            error!(
                error = %format!("{e:#}"),
                offset = meta.offset,
                partition = meta.partition,
                attributes = ?attributes,
                "unable to process event"
            );
            metrics::PROCESS_FAILURES_TOTAL.with_label_values(&[name]).inc();
        }

        let Some(reply) = pending else {
            return;
        };

        match self.settle_at_least_once(&id, &attributes, &outcome) {
            Disposition::Ack => {
                reply.ack();
                metrics::MESSAGES_ACKED_TOTAL.with_label_values(&[name]).inc();
            }
            Disposition::Nack => {
                reply.nack();
                metrics::MESSAGES_NACKED_TOTAL.with_label_values(&[name]).inc();
            }
            // Dropping the reply leaves the message to the transport
            Disposition::Withhold => drop(reply),
        }
    }

    /// Decide how an at-least-once message is settled from its processing
    /// outcome, updating the retry tracker accordingly.
    pub fn settle_at_least_once<T, E>(
        &self,
        id: &str,
        attributes: &HashMap<String, String>,
        outcome: &Result<T, E>,
    ) -> Disposition {
        let meta = MessageMetadata::from_id(id);

        if outcome.is_ok() {
            if let Some(attempts) = self.retries.clear(id) {
                info!(
                    offset = meta.offset,
                    partition = meta.partition,
                    attempts,
                    attributes = ?attributes,
                    "processed previously failed event"
                );
            }
            return Disposition::Ack;
        }

        let attempt = self.retries.record_failure(id);
        let disposition = disposition_after_failure(attempt, self.policy.max_retries);
        match disposition {
            Disposition::Nack => {
                self.retries.clear(id);
                metrics::RETRIES_EXHAUSTED_TOTAL
                    .with_label_values(&[self.subscription.name.as_str()])
                    .inc();
                warn!(
                    offset = meta.offset,
                    partition = meta.partition,
                    attempt,
                    max_retries = self.policy.max_retries,
                    attributes = ?attributes,
                    "giving up on event after exceeding max retries"
                );
            }
            _ => {
                debug!(
                    offset = meta.offset,
                    partition = meta.partition,
                    attempt,
                    max_retries = self.policy.max_retries,
                    "event left for redelivery"
                );
            }
        }
        disposition
    }
}
