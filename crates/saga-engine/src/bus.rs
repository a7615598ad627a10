//! Message bus abstraction and in-process implementations.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::error::BusError;
use crate::workflow::Message;

/// Publishes messages to whoever consumes them.
///
/// Delivery is at-least-once; consumers must tolerate duplicates.
#[async_trait]
pub trait MessageBus<M: Message>: Send + Sync {
    /// Publishes one message.
    async fn publish(&self, message: M) -> Result<(), BusError>;
}

#[derive(Debug)]
struct BusInner<M> {
    queue: VecDeque<M>,
    published: Vec<M>,
    fail_on_publish: bool,
}

/// A queue-backed bus for tests and single-process drains.
///
/// Published messages are queued for consumption and also kept in a log.
#[derive(Debug, Clone)]
pub struct InMemoryBus<M> {
    inner: Arc<Mutex<BusInner<M>>>,
}

impl<M: Message> InMemoryBus<M> {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                queue: VecDeque::new(),
                published: Vec::new(),
                fail_on_publish: false,
            })),
        }
    }

    /// Pops the oldest undelivered message.
    pub async fn next(&self) -> Option<M> {
        self.inner.lock().await.queue.pop_front()
    }

    /// Returns every message ever published, in order.
    pub async fn published(&self) -> Vec<M> {
        self.inner.lock().await.published.clone()
    }

    /// Returns the published messages of one type.
    pub async fn published_of_type(&self, message_type: &str) -> Vec<M> {
        self.inner
            .lock()
            .await
            .published
            .iter()
            .filter(|m| m.message_type() == message_type)
            .cloned()
            .collect()
    }

    /// Returns the number of undelivered messages.
    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    /// Makes every publish fail until reset.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.inner.lock().await.fail_on_publish = fail;
    }
}

impl<M: Message> Default for InMemoryBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M: Message> MessageBus<M> for InMemoryBus<M> {
    async fn publish(&self, message: M) -> Result<(), BusError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_on_publish {
            return Err(BusError::Rejected("publishing disabled".to_string()));
        }
        inner.published.push(message.clone());
        inner.queue.push_back(message);
        Ok(())
    }
}

/// A bus backed by an unbounded tokio channel.
///
/// The receiving half is handed to [`crate::SagaRuntime::run`].
#[derive(Debug, Clone)]
pub struct ChannelBus<M> {
    sender: mpsc::UnboundedSender<M>,
}

impl<M: Message> ChannelBus<M> {
    /// Creates a bus and the receiver its messages arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<M>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl<M: Message> MessageBus<M> for ChannelBus<M> {
    async fn publish(&self, message: M) -> Result<(), BusError> {
        self.sender.send(message).map_err(|_| BusError::Closed)
    }
}
