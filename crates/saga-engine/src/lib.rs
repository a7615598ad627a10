//! Orchestration engine for long-running, correlated saga instances.
//!
//! A workflow is declared once as a [`WorkflowDefinition`]: its states, the
//! message types it consumes (each with a [`CorrelationRule`]) and a
//! transition table keyed by `(state, message type)`. The
//! [`TransitionExecutor`] drives one instance per inbound message:
//!
//! 1. The [`CorrelationRouter`] resolves the owning instance (or a new one
//!    for initiating messages).
//! 2. The matching transition's actions run against the instance data and
//!    collect outbound [`Effect`]s.
//! 3. The instance change and its effects are persisted atomically with an
//!    optimistic version check; a conflict is retried once.
//! 4. Only then does the [`OutboxRelay`] publish messages and arm or cancel
//!    timers.
//!
//! A message with no transition for the instance's current state is a
//! silent no-op, which is what makes at-least-once redelivery safe.

pub mod bus;
pub mod clock;
pub mod correlation;
pub mod definition;
pub mod effect;
pub mod error;
pub mod executor;
pub mod instance;
pub mod outbox;
pub mod runtime;
pub mod scheduler;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use bus::{ChannelBus, InMemoryBus, MessageBus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use common::{CorrelationId, TokenId};
pub use correlation::{CorrelationRouter, CorrelationRule, PredicateField, Resolution};
pub use definition::{
    Action, EventDecl, Target, TransitionBuilder, TransitionSpec, WorkflowDefinition,
    WorkflowDefinitionBuilder,
};
pub use effect::{ActionContext, Effect};
pub use error::{BusError, DefinitionError, SagaError, SchedulerError};
pub use executor::{IgnoreReason, Outcome, TransitionExecutor};
pub use instance::SagaInstance;
pub use outbox::OutboxRelay;
pub use runtime::{Delivery, OutcomeKind, OutcomeSummary, SagaRuntime, WorkflowHandler};
pub use saga_store::{SagaStore, Version};
pub use scheduler::{InMemoryScheduler, Scheduler, TokioScheduler};
pub use workflow::{Message, Stage, Workflow, WorkflowState};
