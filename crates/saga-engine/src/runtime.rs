//! Fan-out of inbound messages to the workflows that consume them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::CorrelationId;
use saga_store::SagaStore;
use tokio::sync::mpsc;

use crate::bus::InMemoryBus;
use crate::error::SagaError;
use crate::executor::TransitionExecutor;
use crate::workflow::{Message, Workflow};

/// Kind of change a message caused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Transitioned,
    Finalized,
    Ignored,
}

/// Workflow-independent description of an [`crate::Outcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeSummary {
    pub kind: OutcomeKind,
    pub correlation_id: Option<CorrelationId>,
    pub from: Option<&'static str>,
    pub to: Option<&'static str>,
}

/// A workflow as seen by the runtime.
#[async_trait]
pub trait WorkflowHandler<M: Message>: Send + Sync {
    /// Returns the workflow name.
    fn name(&self) -> &'static str;

    /// Returns the message types the workflow consumes.
    fn message_types(&self) -> Vec<&'static str>;

    /// Handles one message.
    async fn handle_message(&self, message: &M) -> Result<OutcomeSummary, SagaError>;
}

#[async_trait]
impl<W: Workflow, S: SagaStore> WorkflowHandler<W::Message> for TransitionExecutor<W, S> {
    fn name(&self) -> &'static str {
        W::NAME
    }

    fn message_types(&self) -> Vec<&'static str> {
        self.definition().message_types()
    }

    async fn handle_message(&self, message: &W::Message) -> Result<OutcomeSummary, SagaError> {
        self.handle(message).await.map(|outcome| outcome.summary())
    }
}

/// Result of delivering a message to one workflow.
#[derive(Debug)]
pub struct Delivery {
    pub workflow: &'static str,
    pub result: Result<OutcomeSummary, SagaError>,
}

/// Routes each message to every workflow subscribed to its type.
///
/// Workflows consume independently: a failure in one does not stop delivery
/// to the others.
pub struct SagaRuntime<M: Message> {
    handlers: Vec<Arc<dyn WorkflowHandler<M>>>,
    subscriptions: HashMap<&'static str, Vec<usize>>,
    max_attempts: u32,
    backoff: Duration,
}

impl<M: Message> SagaRuntime<M> {
    /// Creates a runtime with no workflows.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            subscriptions: HashMap::new(),
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }

    /// Registers a workflow.
    pub fn register(mut self, handler: Arc<dyn WorkflowHandler<M>>) -> Self {
        let index = self.handlers.len();
        for message_type in handler.message_types() {
            self.subscriptions.entry(message_type).or_default().push(index);
        }
        tracing::info!(
            workflow = handler.name(),
            subscriptions = ?handler.message_types(),
            "workflow registered"
        );
        self.handlers.push(handler);
        self
    }

    /// Sets how often [`run`](Self::run) delivers a message that failed with
    /// a retryable error, and the base delay between attempts.
    pub fn with_redelivery(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// Returns the names of the workflows consuming a message type.
    pub fn subscribers(&self, message_type: &str) -> Vec<&'static str> {
        self.subscriptions
            .get(message_type)
            .map(|indexes| indexes.iter().map(|&i| self.handlers[i].name()).collect())
            .unwrap_or_default()
    }

    fn handlers_for(&self, message: &M) -> Vec<Arc<dyn WorkflowHandler<M>>> {
        self.subscriptions
            .get(message.message_type())
            .map(|indexes| indexes.iter().map(|&i| Arc::clone(&self.handlers[i])).collect())
            .unwrap_or_default()
    }

    /// Delivers a message once to every subscribed workflow.
    pub async fn handle(&self, message: &M) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for handler in self.handlers_for(message) {
            deliveries.push(Delivery {
                workflow: handler.name(),
                result: handler.handle_message(message).await,
            });
        }
        deliveries
    }

    /// Handles queued messages until the bus is empty, including messages
    /// published while draining.
    ///
    /// Stops at the first failed delivery. Returns the number of messages handled.
    pub async fn drain(&self, bus: &InMemoryBus<M>) -> Result<usize, SagaError> {
        let mut handled = 0;
        while let Some(message) = bus.next().await {
            for delivery in self.handle(&message).await {
                delivery.result?;
            }
            handled += 1;
        }
        Ok(handled)
    }

    /// Consumes messages until the channel closes, handling each in its own task.
    ///
    /// Retryable failures are redelivered with linear backoff up to the
    /// configured number of attempts; anything else is logged and dropped.
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<M>) {
        tracing::info!("saga runtime started");
        while let Some(message) = receiver.recv().await {
            let runtime = Arc::clone(&self);
            tokio::spawn(async move {
                for handler in runtime.handlers_for(&message) {
                    runtime.deliver(handler.as_ref(), &message).await;
                }
            });
        }
        tracing::info!("saga runtime stopped");
    }

    async fn deliver(&self, handler: &dyn WorkflowHandler<M>, message: &M) {
        for attempt in 1..=self.max_attempts {
            match handler.handle_message(message).await {
                Ok(_) => return,
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    tracing::warn!(
                        workflow = handler.name(),
                        message_type = message.message_type(),
                        attempt,
                        error = %e,
                        "redelivering message"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => {
                    tracing::error!(
                        workflow = handler.name(),
                        message_type = message.message_type(),
                        attempt,
                        error = %e,
                        "message dropped"
                    );
                    return;
                }
            }
        }
    }
}

impl<M: Message> Default for SagaRuntime<M> {
    fn default() -> Self {
        Self::new()
    }
}
