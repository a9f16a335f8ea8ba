// ============================================================================
// In-Memory Transport
// ============================================================================
//
// An in-process stand-in for a managed publish-subscribe service, used by
// tests and local development.
//
// Behaviour:
// - every published message is dispatched on its own task (handlers run
//   concurrently, like a partitioned subscriber would call them)
// - ack/nack outcomes are recorded in settlement order
// - a message the handler leaves unsettled is redelivered with the same id
//   (can be switched off to simulate a transport that waits for a
//   reconnect before redelivering)
// - nacked messages are NOT redelivered
// - receive errors can be scripted; each receive() call pops one
//
// ============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Subscription;
use crate::error::TransportError;
use crate::transport::{
    AckReply, Acknowledger, Connector, Message, MessageHandler, SubscriberClient,
};

/// Final state of a delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Nacked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub id: String,
    pub outcome: Outcome,
}

/// Hands out one [`MemorySubscription`] per canonical subscription path
#[derive(Default)]
pub struct MemoryTransport {
    subscriptions: Mutex<HashMap<String, Arc<MemorySubscription>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the subscription addressed by `subscription`
    pub fn subscription(&self, subscription: &Subscription) -> Arc<MemorySubscription> {
        let mut subscriptions = lock(&self.subscriptions);
        Arc::clone(
            subscriptions
                .entry(subscription.to_string())
                .or_insert_with(|| Arc::new(MemorySubscription::new())),
        )
    }
}

#[async_trait]
impl Connector for MemoryTransport {
    async fn connect(
        &self,
        subscription: &Subscription,
    ) -> Result<Arc<dyn SubscriberClient>, TransportError> {
        let client: Arc<dyn SubscriberClient> = self.subscription(subscription);
        Ok(client)
    }
}

#[derive(Debug, Clone)]
struct Delivery {
    id: String,
    data: Bytes,
    attributes: HashMap<String, String>,
}

struct Shared {
    sender: mpsc::UnboundedSender<Delivery>,
    settlements: Mutex<Vec<Settlement>>,
    handled: AtomicUsize,
    redeliveries: AtomicUsize,
    redeliver_unsettled: AtomicBool,
    changed: Notify,
}

impl Shared {
    fn settle(&self, id: &str, outcome: Outcome) {
        lock(&self.settlements).push(Settlement {
            id: id.to_string(),
            outcome,
        });
        self.changed.notify_waiters();
    }
}

/// One subscription of the in-memory transport
pub struct MemorySubscription {
    shared: Arc<Shared>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    scripted_errors: Mutex<VecDeque<TransportError>>,
    receive_calls: AtomicUsize,
}

impl MemorySubscription {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                sender,
                settlements: Mutex::new(Vec::new()),
                handled: AtomicUsize::new(0),
                redeliveries: AtomicUsize::new(0),
                redeliver_unsettled: AtomicBool::new(true),
                changed: Notify::new(),
            }),
            receiver: tokio::sync::Mutex::new(receiver),
            scripted_errors: Mutex::new(VecDeque::new()),
            receive_calls: AtomicUsize::new(0),
        }
    }

    /// Queue a message for delivery
    pub fn publish(&self, id: impl Into<String>, data: impl Into<Bytes>) {
        self.publish_with_attributes(id, data, HashMap::new());
    }

    pub fn publish_with_attributes(
        &self,
        id: impl Into<String>,
        data: impl Into<Bytes>,
        attributes: HashMap<String, String>,
    ) {
        // The receiver lives as long as self, so sending cannot fail
        let _ = self.shared.sender.send(Delivery {
            id: id.into(),
            data: data.into(),
            attributes,
        });
    }

    /// Make the next receive() call fail with `error` before delivering anything
    pub fn fail_next_receive(&self, error: TransportError) {
        lock(&self.scripted_errors).push_back(error);
    }

    pub fn set_redeliver_unsettled(&self, redeliver: bool) {
        self.shared
            .redeliver_unsettled
            .store(redeliver, Ordering::SeqCst);
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        lock(&self.shared.settlements).clone()
    }

    /// Settlements recorded for one message id, in order
    pub fn outcomes_for(&self, id: &str) -> Vec<Outcome> {
        lock(&self.shared.settlements)
            .iter()
            .filter(|settlement| settlement.id == id)
            .map(|settlement| settlement.outcome)
            .collect()
    }

    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    /// Number of handler invocations that have returned
    pub fn handled(&self) -> usize {
        self.shared.handled.load(Ordering::SeqCst)
    }

    pub fn redeliveries(&self) -> usize {
        self.shared.redeliveries.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` messages were settled
    pub async fn wait_for_settlements(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, || lock(&self.shared.settlements).len() >= count)
            .await
    }

    /// Wait until at least `count` handler invocations have returned
    pub async fn wait_for_handled(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, || self.handled() >= count).await
    }

    async fn wait_until<F>(&self, timeout: Duration, condition: F) -> bool
    where
        F: Fn() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let changed = self.shared.changed.notified();
            if condition() {
                return true;
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return condition();
            }
        }
    }
}

#[async_trait]
impl SubscriberClient for MemorySubscription {
    async fn receive(
        &self,
        cancel: CancellationToken,
        handler: MessageHandler,
    ) -> Result<(), TransportError> {
        self.receive_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.scripted_errors).pop_front() {
            return Err(error);
        }

        let mut receiver = self.receiver.lock().await;
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                delivery = receiver.recv() => {
                    let Some(delivery) = delivery else {
                        return Err(TransportError::Closed);
                    };
                    in_flight.spawn(dispatch(
                        Arc::clone(&self.shared),
                        Arc::clone(&handler),
                        delivery,
                    ));
                }
            }
        }

        // Let in-flight handlers finish before handing the subscription back
        while in_flight.join_next().await.is_some() {}
        Ok(())
    }
}

async fn dispatch(shared: Arc<Shared>, handler: MessageHandler, delivery: Delivery) {
    let settled = Arc::new(AtomicBool::new(false));
    let message = Message {
        id: delivery.id.clone(),
        data: delivery.data.clone(),
        attributes: delivery.attributes.clone(),
        reply: AckReply::new(MemoryAcker {
            id: delivery.id.clone(),
            shared: Arc::clone(&shared),
            settled: Arc::clone(&settled),
        }),
    };

    handler(message).await;

    let redeliver = !settled.load(Ordering::SeqCst)
        && shared.redeliver_unsettled.load(Ordering::SeqCst);
    if redeliver {
        debug!(id = %delivery.id, "redelivering unsettled message");
        shared.redeliveries.fetch_add(1, Ordering::SeqCst);
        let _ = shared.sender.send(delivery);
    }

    shared.handled.fetch_add(1, Ordering::SeqCst);
    shared.changed.notify_waiters();
}

struct MemoryAcker {
    id: String,
    shared: Arc<Shared>,
    settled: Arc<AtomicBool>,
}

impl Acknowledger for MemoryAcker {
    fn ack(&self) {
        self.settled.store(true, Ordering::SeqCst);
        self.shared.settle(&self.id, Outcome::Acked);
    }

    fn nack(&self) {
        self.settled.store(true, Ordering::SeqCst);
        self.shared.settle(&self.id, Outcome::Nacked);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    fn subscription(name: &str) -> Subscription {
        Subscription {
            project: "acme".to_string(),
            region: "local".to_string(),
            name: name.to_string(),
        }
    }

    fn acking_handler() -> MessageHandler {
        Arc::new(|message: Message| async move { message.reply.ack() }.boxed())
    }

    #[test]
    fn test_same_subscription_is_shared() {
        let transport = MemoryTransport::new();
        let a = transport.subscription(&subscription("spans"));
        let b = transport.subscription(&subscription("spans"));
        let c = transport.subscription(&subscription("logs"));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_scripted_error_is_returned_once() {
        let sub = MemoryTransport::new().subscription(&subscription("spans"));
        sub.fail_next_receive(TransportError::BackendUnavailable);

        let result = sub
            .receive(CancellationToken::new(), acking_handler())
            .await;
        assert_eq!(result, Err(TransportError::BackendUnavailable));
        assert_eq!(sub.receive_calls(), 1);
    }

    #[tokio::test]
    async fn test_delivers_and_records_acks() {
        let sub = MemoryTransport::new().subscription(&subscription("spans"));
        sub.publish("0:1", "a");
        sub.publish("0:2", "b");

        let cancel = CancellationToken::new();
        let receiving = {
            let sub = Arc::clone(&sub);
            let cancel = cancel.clone();
            tokio::spawn(async move { sub.receive(cancel, acking_handler()).await })
        };

        assert!(sub.wait_for_settlements(2, Duration::from_secs(5)).await);
        cancel.cancel();
        assert_eq!(receiving.await.unwrap(), Ok(()));

        assert_eq!(sub.outcomes_for("0:1"), vec![Outcome::Acked]);
        assert_eq!(sub.outcomes_for("0:2"), vec![Outcome::Acked]);
        assert_eq!(sub.redeliveries(), 0);
    }

    #[tokio::test]
    async fn test_unsettled_message_is_redelivered() {
        let sub = MemoryTransport::new().subscription(&subscription("spans"));
        sub.publish("0:1", "a");

        let seen = Arc::new(AtomicUsize::new(0));
        let handler: MessageHandler = {
            let seen = Arc::clone(&seen);
            Arc::new(move |message: Message| {
                let seen = Arc::clone(&seen);
                async move {
                    // Leave the first delivery unsettled
                    if seen.fetch_add(1, Ordering::SeqCst) > 0 {
                        message.reply.ack();
                    }
                }
                .boxed()
            })
        };

        let cancel = CancellationToken::new();
        let receiving = {
            let sub = Arc::clone(&sub);
            let cancel = cancel.clone();
            tokio::spawn(async move { sub.receive(cancel, handler).await })
        };

        assert!(sub.wait_for_settlements(1, Duration::from_secs(5)).await);
        cancel.cancel();
        receiving.await.unwrap().unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(sub.redeliveries(), 1);
        assert_eq!(sub.outcomes_for("0:1"), vec![Outcome::Acked]);
    }

    #[tokio::test]
    async fn test_unsettled_message_stays_put_without_redelivery() {
        let sub = MemoryTransport::new().subscription(&subscription("spans"));
        sub.set_redeliver_unsettled(false);
        sub.publish("0:1", "withheld");
        sub.publish("0:2", "acked");

        let handler: MessageHandler = Arc::new(|message: Message| {
            async move {
                if message.id == "0:2" {
                    message.reply.ack();
                }
            }
            .boxed()
        });

        let cancel = CancellationToken::new();
        let receiving = {
            let sub = Arc::clone(&sub);
            let cancel = cancel.clone();
            tokio::spawn(async move { sub.receive(cancel, handler).await })
        };

        assert!(sub.wait_for_handled(2, Duration::from_secs(5)).await);
        cancel.cancel();
        receiving.await.unwrap().unwrap();

        assert_eq!(sub.redeliveries(), 0);
        assert_eq!(sub.handled(), 2);
        assert!(sub.outcomes_for("0:1").is_empty());
        assert_eq!(
            sub.settlements(),
            vec![Settlement {
                id: "0:2".to_string(),
                outcome: Outcome::Acked,
            }]
        );
    }
}
