use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use relay::transport::kafka::KafkaConnector;
use relay::{
    Batch, BatchProcessor, Consumer, ConsumerConfig, ConsumerSettings, JsonDecoder,
    KafkaSettings, ProcessContext,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Logs every event it receives
struct TailProcessor;

#[async_trait]
impl BatchProcessor for TailProcessor {
    async fn process_batch(&self, ctx: &ProcessContext, batch: &mut Batch) -> Result<()> {
        // Runs under the consumer's sink
        for event in batch.iter() {
            info!(
                id = event.id.as_deref().unwrap_or("-"),
                kind = %event.kind,
                attributes = ?ctx.metadata(),
                body = %event.body,
                "event"
            );
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = ConsumerSettings::from_env();
    let logger = relay::logging::dispatch_from_filter(&settings.rust_log);

    let kafka = KafkaSettings::from_env();
    tracing::dispatcher::with_default(&logger, || {
        info!(brokers = %kafka.brokers, topics = ?settings.topics, "Starting relay tail");
    });

    let config = ConsumerConfig {
        decoder: Some(Arc::new(JsonDecoder)),
        logger: Some(logger.clone()),
        processor: Some(Arc::new(TailProcessor)),
        ..ConsumerConfig::from_settings(&settings)
    };

    let consumer = Consumer::new(config, &KafkaConnector::new(kafka))
        .await
        .context("Failed to create consumer")?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        let logger = logger.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::dispatcher::with_default(&logger, || {
                    info!("Shutdown signal received. Shutting down...");
                });
                shutdown.cancel();
            }
        });
    }

    let result = consumer.run(shutdown).await;

    tracing::dispatcher::with_default(&logger, || match &result {
        Ok(()) => info!("Relay tail stopped"),
        Err(e) => error!(error = %e, "Relay tail failed"),
    });

    result.context("Consumer stopped with an error")
}
