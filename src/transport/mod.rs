// ============================================================================
// Transport Seam
// ============================================================================
//
// The consumer only needs a handful of things from a publish-subscribe
// client:
// - a Connector that binds a client to a subscription
// - a blocking receive() that dispatches messages to a handler, possibly
//   from many tasks at once, until cancelled or failed
// - ack / nack on each delivered message
// - message ids that encode partition and offset
// - a transient "backend unavailable" error, distinct from fatal ones
//
// Implementations:
// - memory: in-process transport for tests and local development
// - kafka:  rdkafka-backed transport (feature = "kafka")
//
// ============================================================================

pub mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::config::Subscription;
use crate::error::TransportError;

/// Callback a transport invokes for every delivered message
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Binds transport clients to subscriptions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        subscription: &Subscription,
    ) -> Result<Arc<dyn SubscriberClient>, TransportError>;
}

/// A client bound to one subscription
#[async_trait]
pub trait SubscriberClient: Send + Sync {
    /// Deliver messages to `handler` until `cancel` fires (`Ok`) or the
    /// transport fails (`Err`).
    async fn receive(
        &self,
        cancel: CancellationToken,
        handler: MessageHandler,
    ) -> Result<(), TransportError>;
}

/// Transport-side settlement of one delivered message
pub trait Acknowledger: Send + Sync {
    fn ack(&self);
    fn nack(&self);
}

/// Settles a message exactly once: both operations consume the reply.
///
/// Dropping a reply without settling leaves the message to the transport's
/// redelivery policy.
pub struct AckReply {
    inner: Box<dyn Acknowledger>,
}

impl AckReply {
    pub fn new(inner: impl Acknowledger + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    pub fn ack(self) {
        self.inner.ack();
    }

    pub fn nack(self) {
        self.inner.nack();
    }
}

impl fmt::Debug for AckReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AckReply")
    }
}

/// A message delivered by a transport
#[derive(Debug)]
pub struct Message {
    /// Opaque identifier, stable across redeliveries of the same message
    pub id: String,
    pub data: Bytes,
    pub attributes: HashMap<String, String>,
    pub reply: AckReply,
}

impl Message {
    /// Partition and offset encoded in the id (zero values if unparseable)
    pub fn metadata(&self) -> MessageMetadata {
        MessageMetadata::from_id(&self.id)
    }
}

/// Partition and offset of a message, encoded as `"{partition}:{offset}"`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MessageMetadata {
    pub partition: i32,
    pub offset: i64,
}

impl MessageMetadata {
    pub fn new(partition: i32, offset: i64) -> Self {
        Self { partition, offset }
    }

    /// Parse a message id for diagnostics. If the metadata can't be parsed,
    /// zero values are returned.
    pub fn from_id(id: &str) -> Self {
        id.parse().unwrap_or_default()
    }
}

impl fmt::Display for MessageMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition, self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid message metadata: {0:?}")]
pub struct InvalidMetadata(pub String);

impl FromStr for MessageMetadata {
    type Err = InvalidMetadata;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidMetadata(s.to_string());
        let (partition, offset) = s.split_once(':').ok_or_else(invalid)?;

        Ok(Self {
            partition: partition.parse().map_err(|_| invalid())?,
            offset: offset.parse().map_err(|_| invalid())?,
        })
    }
}
