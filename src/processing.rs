// ============================================================================
// Decoder & Batch Processor Seams
// ============================================================================
//
// Both are supplied by the application and shared (Arc) by every
// subscription consumer. The transport may invoke the message handler from
// many tasks at once and the consumer does NOT serialize calls, so
// implementations must be safe for concurrent use.
//
// ============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use relay_types::{Batch, Event};

use crate::context::ProcessContext;

/// Turns a raw message payload into an [`Event`]
pub trait Decoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<Event>;
}

impl<F> Decoder for F
where
    F: Fn(&[u8]) -> Result<Event> + Send + Sync,
{
    fn decode(&self, data: &[u8]) -> Result<Event> {
        self(data)
    }
}

/// Performs the domain work for a batch of events.
///
/// The batch is mutable so processors can enrich or drop events in place.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process_batch(&self, ctx: &ProcessContext, batch: &mut Batch) -> Result<()>;
}

/// Decodes JSON payloads into [`Event`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, data: &[u8]) -> Result<Event> {
        serde_json::from_slice(data).context("Failed to deserialize event payload")
    }
}
