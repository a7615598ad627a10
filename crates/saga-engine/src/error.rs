//! Engine error types.

use common::CorrelationId;
use saga_store::StoreError;
use thiserror::Error;

/// Errors raised while handling a message.
///
/// A message with no matching transition is not an error; it surfaces as
/// [`crate::Outcome::Ignored`].
#[derive(Debug, Error)]
pub enum SagaError {
    /// The instance changed concurrently and the single retry also lost.
    #[error("Concurrency conflict on {workflow} instance {correlation_id}")]
    ConcurrencyConflict {
        workflow: String,
        correlation_id: CorrelationId,
    },

    /// Predicate routing matched more than one instance.
    #[error(
        "Ambiguous correlation: {message_type} matched {matches} {workflow} instances"
    )]
    AmbiguousCorrelation {
        workflow: &'static str,
        message_type: &'static str,
        matches: usize,
    },

    /// The message does not carry the field its correlation rule names.
    #[error("Message {message_type} has no correlation field '{field}'")]
    MissingCorrelation {
        message_type: &'static str,
        field: &'static str,
    },

    /// An outbound message could not be published.
    #[error("Publish failed: {0}")]
    Publish(#[from] BusError),

    /// A timer could not be scheduled or canceled.
    #[error("Scheduler failed: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Saga store error.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted state name is not a state of the workflow.
    #[error("Unknown state '{state}' for workflow {workflow}")]
    UnknownState { workflow: String, state: String },

    /// An action was bound to a transition for a different message type.
    #[error("Unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: &'static str,
    },

    /// A message payload could not be interpreted by an action.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The workflow definition is inconsistent.
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),
}

impl SagaError {
    /// Returns true if redelivering the message may succeed.
    ///
    /// Publish and scheduler failures happen after the transition committed;
    /// they are repaired by outbox recovery, not by redelivery.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SagaError::ConcurrencyConflict { .. } | SagaError::Store(_)
        )
    }
}

impl From<StoreError> for SagaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrencyConflict {
                workflow,
                correlation_id,
                ..
            } => SagaError::ConcurrencyConflict {
                workflow,
                correlation_id,
            },
            other => SagaError::Store(other),
        }
    }
}

/// Errors detected while building a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// Two transitions are bound to the same `(stage, message type)` key.
    #[error("Duplicate transition for ({stage}, {message_type})")]
    DuplicateTransition {
        stage: String,
        message_type: &'static str,
    },

    /// A message type was declared twice.
    #[error("Message type {0} declared more than once")]
    DuplicateEvent(&'static str),

    /// A transition references a message type that was never declared.
    #[error("Transition references undeclared message type {0}")]
    UndeclaredEvent(&'static str),

    /// A transition out of the new stage uses a non-initiating message type.
    #[error("Message type {0} is not initiating but has a transition from New")]
    NonInitiatingFromNew(&'static str),

    /// An initiating message type has no transition out of the new stage.
    #[error("Initiating message type {0} has no transition from New")]
    InitiatingWithoutRow(&'static str),

    /// Predicate correlation cannot name the key of a new instance.
    #[error("Message type {0} correlates by predicate and cannot be initiating")]
    PredicateInitiating(&'static str),

    /// A transition out of the new stage targets something other than the
    /// initial state or Finalize.
    #[error("Transition from New on {message_type} must target {initial} or Finalize")]
    InitialNotTargeted {
        message_type: &'static str,
        initial: &'static str,
    },

    /// A declared state cannot be reached from the initial state.
    #[error("State {0} is unreachable from the initial state")]
    Unreachable(&'static str),
}

/// Errors raised by a message bus.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The bus no longer accepts messages.
    #[error("message bus is closed")]
    Closed,

    /// The transport refused the message.
    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// Errors raised by a timeout scheduler.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// The scheduler is not accepting work.
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),

    /// The delivery time cannot be represented.
    #[error("invalid delivery time: {0}")]
    InvalidDeliveryTime(String),
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, SagaError>;
