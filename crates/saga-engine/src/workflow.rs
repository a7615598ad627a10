//! Core workflow, state and message traits.

use std::fmt::Debug;
use std::hash::Hash;

use common::CorrelationId;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for the named states of a workflow.
///
/// States persist by name, so `as_str` must be stable across releases.
pub trait WorkflowState: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Every state of the workflow.
    const ALL: &'static [Self];

    /// Returns the state name.
    fn as_str(&self) -> &'static str;

    /// Looks a state up by name.
    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }
}

/// Trait for messages consumed and published by workflows.
///
/// Messages are facts that already happened, so they are named in past tense
/// (or as requests, for commands arriving from outside).
pub trait Message: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns the message type name used for subscriptions and routing.
    fn message_type(&self) -> &'static str;

    /// Returns the value of a correlation-capable field, if the message has it.
    fn correlation_value(&self, field: &str) -> Option<CorrelationId>;
}

/// Trait tying together the types of one saga workflow.
pub trait Workflow: Send + Sync + Sized + 'static {
    /// The states an instance can be in.
    type State: WorkflowState;

    /// Workflow-specific instance fields.
    type Data: Default + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// The message type this workflow consumes and publishes.
    type Message: Message;

    /// Workflow name, used as the store partition.
    const NAME: &'static str;
}

/// Where an instance is when a message arrives.
///
/// `New` is the pseudo-stage of an instance that does not exist yet; only
/// initiating message types have transitions out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage<S> {
    /// No instance exists for the correlation key.
    New,

    /// The instance exists in this state.
    In(S),
}

impl<S: WorkflowState> Stage<S> {
    /// Returns the stage name (`"New"` or the state name).
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::New => "New",
            Stage::In(state) => state.as_str(),
        }
    }

    /// Returns the state, if the instance exists.
    pub fn state(&self) -> Option<S> {
        match self {
            Stage::New => None,
            Stage::In(state) => Some(*state),
        }
    }
}

impl<S: WorkflowState> std::fmt::Display for Stage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
