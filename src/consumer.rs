// ============================================================================
// Consumer Group Supervisor
// ============================================================================
//
// Owns one SubscriptionConsumer per configured topic and runs their receive
// loops as a group:
// - run() starts every loop under one shared cancellation token derived from
//   the caller's token, and may only be called once
// - a loop re-enters receive() when the transport reports the backend as
//   unavailable; any other error ends the loop
// - the first loop to fail cancels its siblings; run() waits for all of them
//   and returns that first error
// - close() cancels the shared token; before run() it does nothing
//
// ============================================================================

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, warn, Dispatch, Instrument};

use crate::config::ConsumerConfig;
use crate::delivery::{DeliveryPolicy, SubscriptionConsumer};
use crate::error::{ConsumerError, ConsumerResult};
use crate::metrics;
use crate::transport::Connector;

/// Lifecycle of a [`Consumer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Constructed, run() not called yet
    Created,
    /// run() in progress
    Running,
    /// run() returned
    Stopped,
}

struct Lifecycle {
    state: ConsumerState,
    stop: Option<CancellationToken>,
}

/// Consumes a set of subscriptions and feeds their messages to one processor
pub struct Consumer {
    lifecycle: Mutex<Lifecycle>,
    consumers: Vec<Arc<SubscriptionConsumer>>,
    logger: Dispatch,
}

impl Consumer {
    /// Validate `config` and bind one transport client per topic.
    ///
    /// Fails with every configuration violation at once, or with the first
    /// connection failure.
    pub async fn new(config: ConsumerConfig, connector: &dyn Connector) -> ConsumerResult<Self> {
        let validated = config.check()?;
        let policy = DeliveryPolicy {
            delivery: validated.delivery,
            max_retries: config.max_retries,
        };

        let mut consumers = Vec::with_capacity(config.topics.len());
        for topic in &config.topics {
            let subscription = config.subscription(topic);
            let client = connector
                .connect(&subscription)
                .await
                .map_err(ConsumerError::Connect)?;

            consumers.push(Arc::new(SubscriptionConsumer::new(
                subscription,
                client,
                Arc::clone(&validated.decoder),
                Arc::clone(&validated.processor),
                policy,
                validated.logger.clone(),
            )));
        }

        tracing::dispatcher::with_default(&validated.logger, || {
            debug!(
                subscriptions = consumers.len(),
                delivery = %policy.delivery,
                max_retries = policy.max_retries,
                "consumer created"
            );
        });

        Ok(Self {
            lifecycle: Mutex::new(Lifecycle {
                state: ConsumerState::Created,
                stop: None,
            }),
            consumers,
            logger: validated.logger,
        })
    }

    /// Receive from every subscription until `parent` is cancelled, close()
    /// is called, or a receive loop fails.
    ///
    /// Blocks until all receive loops have returned. Returns the first fatal
    /// error; a second call fails with [`ConsumerError::AlreadyStarted`].
    pub async fn run(&self, parent: CancellationToken) -> ConsumerResult<()> {
        let cancel = {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.state != ConsumerState::Created {
                return Err(ConsumerError::AlreadyStarted);
            }
            let cancel = parent.child_token();
            lifecycle.stop = Some(cancel.clone());
            lifecycle.state = ConsumerState::Running;
            cancel
        };

        tracing::dispatcher::with_default(&self.logger, || {
            info!(subscriptions = self.consumers.len(), "starting consumer");
        });

        let mut loops = JoinSet::new();
        for consumer in &self.consumers {
            let span = consumer.span().clone();
            loops.spawn(
                receive_loop(Arc::clone(consumer), cancel.clone())
                    .instrument(span)
                    .with_subscriber(self.logger.clone()),
            );
        }

        let mut first_error = None;
        while let Some(joined) = loops.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(ConsumerError::TaskFailed(e.to_string())));
            if let Err(e) = result {
                if first_error.is_none() {
                    // Unwind the sibling loops
                    cancel.cancel();
                    first_error = Some(e);
                }
            }
        }

        {
            let mut lifecycle = lock(&self.lifecycle);
            lifecycle.state = ConsumerState::Stopped;
        }

        tracing::dispatcher::with_default(&self.logger, || match &first_error {
            Some(e) => error!(error = %e, error_code = e.error_code(), "consumer stopped"),
            None => info!("consumer stopped"),
        });

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop a running consumer. Idempotent; does nothing before run().
    pub fn close(&self) -> ConsumerResult<()> {
        let lifecycle = lock(&self.lifecycle);
        if let Some(stop) = &lifecycle.stop {
            stop.cancel();
        }
        Ok(())
    }

    /// Liveness of the consumer group, checked within the caller's
    /// cancellation scope. Currently always healthy.
    pub fn healthy(&self, _cancel: &CancellationToken) -> ConsumerResult<()> {
        Ok(())
    }

    pub fn state(&self) -> ConsumerState {
        lock(&self.lifecycle).state
    }

    /// The per-subscription consumers, in topic order
    pub fn subscriptions(&self) -> &[Arc<SubscriptionConsumer>] {
        &self.consumers
    }
}

/// Keep one subscription receiving until cancelled or failed
async fn receive_loop(
    consumer: Arc<SubscriptionConsumer>,
    cancel: CancellationToken,
) -> ConsumerResult<()> {
    let handler = consumer.handler(cancel.clone());

    loop {
        match consumer.client().receive(cancel.clone(), Arc::clone(&handler)).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() => {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                metrics::BACKEND_UNAVAILABLE_TOTAL
                    .with_label_values(&[consumer.subscription().name.as_str()])
                    .inc();
                warn!(error = %e, "backend unavailable, restarting receive");
            }
            Err(e) => {
                error!(error = %e, "receive failed");
                return Err(ConsumerError::Transport(e));
            }
        }
    }
}

fn lock(mutex: &Mutex<Lifecycle>) -> MutexGuard<'_, Lifecycle> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessContext;
    use crate::error::{ConfigViolation, TransportError};
    use crate::processing::{BatchProcessor, JsonDecoder};
    use crate::transport::memory::MemoryTransport;
    use crate::transport::SubscriberClient;
    use async_trait::async_trait;
    use relay_types::{Batch, DeliveryType, Topic};

    struct NoopProcessor;

    #[async_trait]
    impl BatchProcessor for NoopProcessor {
        async fn process_batch(
            &self,
            _ctx: &ProcessContext,
            _batch: &mut Batch,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(
            &self,
            _subscription: &crate::config::Subscription,
        ) -> Result<Arc<dyn SubscriberClient>, TransportError> {
            Err(TransportError::Connect("connection refused".to_string()))
        }
    }

    fn config(topics: &[&str]) -> ConsumerConfig {
        ConsumerConfig {
            region: "local".to_string(),
            project: "acme".to_string(),
            topics: topics.iter().map(|name| Topic::from(*name)).collect(),
            decoder: Some(Arc::new(JsonDecoder)),
            logger: Some(Dispatch::none()),
            processor: Some(Arc::new(NoopProcessor)),
            delivery: Some(DeliveryType::AtLeastOnce),
            ..ConsumerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let transport = MemoryTransport::new();
        let err = Consumer::new(ConsumerConfig::default(), &transport)
            .await
            .err()
            .unwrap();

        match err {
            ConsumerError::InvalidConfig(config_err) => {
                assert!(config_err.contains(ConfigViolation::NoTopics));
                assert_eq!(config_err.violations().len(), 7);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_new_reports_connect_failure() {
        let err = Consumer::new(config(&["spans"]), &RefusingConnector)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ConsumerError::Connect(TransportError::Connect(_))));
        assert_eq!(err.error_code(), "CONNECT_FAILED");
    }

    #[tokio::test]
    async fn test_one_subscription_consumer_per_topic() {
        let transport = MemoryTransport::new();
        let consumer = Consumer::new(config(&["spans", "logs"]), &transport)
            .await
            .unwrap();

        let names: Vec<_> = consumer
            .subscriptions()
            .iter()
            .map(|sub| sub.subscription().name.clone())
            .collect();
        assert_eq!(names, vec!["spans", "logs"]);
        assert_eq!(consumer.state(), ConsumerState::Created);
        assert!(consumer.healthy(&CancellationToken::new()).is_ok());
    }

    #[tokio::test]
    async fn test_close_before_run_is_noop() {
        let transport = MemoryTransport::new();
        let consumer = Consumer::new(config(&["spans"]), &transport).await.unwrap();

        assert!(consumer.close().is_ok());
        assert!(consumer.close().is_ok());
        assert_eq!(consumer.state(), ConsumerState::Created);
    }

    #[tokio::test]
    async fn test_cancelled_parent_stops_run() {
        let transport = MemoryTransport::new();
        let consumer = Consumer::new(config(&["spans", "logs"]), &transport)
            .await
            .unwrap();

        let parent = CancellationToken::new();
        parent.cancel();

        assert!(consumer.run(parent).await.is_ok());
        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert!(matches!(
            consumer.run(CancellationToken::new()).await,
            Err(ConsumerError::AlreadyStarted)
        ));
    }
}
