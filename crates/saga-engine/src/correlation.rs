//! Correlation rules and the router that resolves messages to instances.

use std::sync::Arc;

use common::CorrelationId;
use saga_store::{FieldMatch, SagaStore};

use crate::definition::WorkflowDefinition;
use crate::error::SagaError;
use crate::instance::SagaInstance;
use crate::workflow::{Message, Workflow, WorkflowState};

/// Pairs a message field with the instance data field it must equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateField {
    pub message_field: &'static str,
    pub instance_field: &'static str,
}

/// How a message type is routed to an instance of one workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationRule {
    /// The message field's value is the correlation key.
    ByField(&'static str),

    /// The owning instance is the one whose data fields equal the message's
    /// fields, optionally restricted to some states. Used when a message is
    /// keyed by another workflow's identifier.
    ByPredicate {
        fields: Vec<PredicateField>,
        states: Vec<&'static str>,
    },
}

/// What a rule needs from the store to find the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Load by correlation key.
    Key(CorrelationId),

    /// Search by instance data fields.
    Matches(Vec<FieldMatch>),
}

impl CorrelationRule {
    /// Correlates on a message field holding the correlation key.
    pub fn by_field(field: &'static str) -> Self {
        CorrelationRule::ByField(field)
    }

    /// Correlates on `(message_field, instance_field)` equalities.
    pub fn by_predicate(fields: &[(&'static str, &'static str)]) -> Self {
        CorrelationRule::ByPredicate {
            fields: fields
                .iter()
                .map(|&(message_field, instance_field)| PredicateField {
                    message_field,
                    instance_field,
                })
                .collect(),
            states: Vec::new(),
        }
    }

    /// Restricts a predicate rule to instances in the given states.
    ///
    /// Has no effect on field rules.
    pub fn in_states<S: WorkflowState>(self, states: &[S]) -> Self {
        match self {
            CorrelationRule::ByPredicate { fields, .. } => CorrelationRule::ByPredicate {
                fields,
                states: states.iter().map(|s| s.as_str()).collect(),
            },
            rule => rule,
        }
    }

    /// Returns true if this rule searches by predicate.
    pub fn is_predicate(&self) -> bool {
        matches!(self, CorrelationRule::ByPredicate { .. })
    }

    /// Returns what to look up in the store for this message.
    pub fn lookup<M: Message>(&self, message: &M) -> Result<Lookup, SagaError> {
        match self {
            CorrelationRule::ByField(field) => message
                .correlation_value(field)
                .map(Lookup::Key)
                .ok_or(SagaError::MissingCorrelation {
                    message_type: message.message_type(),
                    field,
                }),
            CorrelationRule::ByPredicate { fields, .. } => fields
                .iter()
                .map(|f| {
                    message
                        .correlation_value(f.message_field)
                        .map(|value| FieldMatch::new(f.instance_field, value))
                        .ok_or(SagaError::MissingCorrelation {
                            message_type: message.message_type(),
                            field: f.message_field,
                        })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Lookup::Matches),
        }
    }

    /// Returns true if an instance in `state` may be selected by this rule.
    pub fn admits_state(&self, state: &str) -> bool {
        match self {
            CorrelationRule::ByField(_) => true,
            CorrelationRule::ByPredicate { states, .. } => {
                states.is_empty() || states.contains(&state)
            }
        }
    }
}

/// Outcome of routing one message to one workflow.
pub enum Resolution<W: Workflow> {
    /// The message belongs to this existing instance.
    Existing(SagaInstance<W>),

    /// No instance exists and the message may create one with this key.
    /// Nothing is persisted until the transition commits.
    New(CorrelationId),

    /// No instance exists and the message cannot create one.
    Unmatched,
}

impl<W: Workflow> std::fmt::Debug for Resolution<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Existing(instance) => f.debug_tuple("Existing").field(instance).finish(),
            Resolution::New(id) => f.debug_tuple("New").field(id).finish(),
            Resolution::Unmatched => f.write_str("Unmatched"),
        }
    }
}

/// Resolves inbound messages to the instance they belong to.
pub struct CorrelationRouter<W: Workflow, S: SagaStore> {
    definition: Arc<WorkflowDefinition<W>>,
    store: S,
}

impl<W: Workflow, S: SagaStore> CorrelationRouter<W, S> {
    /// Creates a router over a definition and a store.
    pub fn new(definition: Arc<WorkflowDefinition<W>>, store: S) -> Self {
        Self { definition, store }
    }

    /// Resolves a message to an existing instance, a new one, or nothing.
    ///
    /// A predicate that matches more than one instance is a data-integrity
    /// fault and fails with `AmbiguousCorrelation`.
    #[tracing::instrument(skip(self, message), fields(workflow = W::NAME, message_type = message.message_type()))]
    pub async fn resolve(&self, message: &W::Message) -> Result<Resolution<W>, SagaError> {
        let Some(decl) = self.definition.event(message.message_type()) else {
            return Ok(Resolution::Unmatched);
        };

        match decl.correlation().lookup(message)? {
            Lookup::Key(correlation_id) => {
                match self.store.get(W::NAME, correlation_id).await? {
                    Some(record) => Ok(Resolution::Existing(SagaInstance::from_record(record)?)),
                    None if decl.is_initiating() => Ok(Resolution::New(correlation_id)),
                    None => Ok(Resolution::Unmatched),
                }
            }
            Lookup::Matches(matches) => {
                let mut found: Vec<_> = self
                    .store
                    .find(W::NAME, &matches)
                    .await?
                    .into_iter()
                    .filter(|r| decl.correlation().admits_state(&r.state))
                    .collect();

                match found.len() {
                    0 => Ok(Resolution::Unmatched),
                    1 => {
                        let record = found.remove(0);
                        Ok(Resolution::Existing(SagaInstance::from_record(record)?))
                    }
                    n => {
                        tracing::error!(matches = n, "predicate correlation is ambiguous");
                        Err(SagaError::AmbiguousCorrelation {
                            workflow: W::NAME,
                            message_type: decl.message_type(),
                            matches: n,
                        })
                    }
                }
            }
        }
    }
}
