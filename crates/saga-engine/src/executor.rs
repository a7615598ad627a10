//! Executes one transition per inbound message.

use std::sync::Arc;

use common::CorrelationId;
use saga_store::{OutboxEntry, SagaStore, Version};

use crate::bus::MessageBus;
use crate::clock::Clock;
use crate::correlation::{CorrelationRouter, Resolution};
use crate::definition::WorkflowDefinition;
use crate::effect::{ActionContext, Effect};
use crate::error::SagaError;
use crate::instance::SagaInstance;
use crate::outbox::OutboxRelay;
use crate::runtime::{OutcomeKind, OutcomeSummary};
use crate::scheduler::Scheduler;
use crate::workflow::{Message, Stage, Workflow, WorkflowState};

/// Why a message caused no change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The workflow does not consume this message type.
    NotSubscribed,

    /// No instance matched and the message cannot create one.
    NoInstance,

    /// The instance's current stage has no transition for this message type.
    NoTransition {
        correlation_id: CorrelationId,
        stage: &'static str,
    },
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<S, M> {
    /// The instance was created or updated.
    Transitioned {
        correlation_id: CorrelationId,
        from: Stage<S>,
        to: S,
        version: Version,
        effects: Vec<Effect<M>>,
    },

    /// The instance was deleted.
    Finalized {
        correlation_id: CorrelationId,
        from: Stage<S>,
        effects: Vec<Effect<M>>,
    },

    /// Nothing changed.
    Ignored(IgnoreReason),
}

impl<S: WorkflowState, M> Outcome<S, M> {
    /// Returns true if nothing changed.
    pub fn is_ignored(&self) -> bool {
        matches!(self, Outcome::Ignored(_))
    }

    /// Returns the effects produced, empty if ignored.
    pub fn effects(&self) -> &[Effect<M>] {
        match self {
            Outcome::Transitioned { effects, .. } | Outcome::Finalized { effects, .. } => effects,
            Outcome::Ignored(_) => &[],
        }
    }

    /// Returns a workflow-independent summary.
    pub fn summary(&self) -> OutcomeSummary {
        match self {
            Outcome::Transitioned {
                correlation_id,
                from,
                to,
                ..
            } => OutcomeSummary {
                kind: OutcomeKind::Transitioned,
                correlation_id: Some(*correlation_id),
                from: Some(from.as_str()),
                to: Some(to.as_str()),
            },
            Outcome::Finalized {
                correlation_id,
                from,
                ..
            } => OutcomeSummary {
                kind: OutcomeKind::Finalized,
                correlation_id: Some(*correlation_id),
                from: Some(from.as_str()),
                to: None,
            },
            Outcome::Ignored(reason) => OutcomeSummary {
                kind: OutcomeKind::Ignored,
                correlation_id: match reason {
                    IgnoreReason::NoTransition { correlation_id, .. } => Some(*correlation_id),
                    _ => None,
                },
                from: match reason {
                    IgnoreReason::NoTransition { stage, .. } => Some(*stage),
                    _ => None,
                },
                to: None,
            },
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::Transitioned { .. } => "transitioned",
            Outcome::Finalized { .. } => "finalized",
            Outcome::Ignored(_) => "ignored",
        }
    }
}

/// Drives instances of one workflow through their transition table.
///
/// Each message is resolved to an instance, the matching transition's
/// actions run against a copy of the instance data, and the result is
/// persisted with its outbox entries under an optimistic version check.
/// A lost race is retried once against freshly loaded state.
pub struct TransitionExecutor<W: Workflow, S: SagaStore> {
    definition: Arc<WorkflowDefinition<W>>,
    router: CorrelationRouter<W, S>,
    store: S,
    relay: OutboxRelay<W::Message, S>,
    clock: Arc<dyn Clock>,
}

impl<W: Workflow, S: SagaStore + Clone> TransitionExecutor<W, S> {
    /// Creates an executor.
    pub fn new(
        definition: WorkflowDefinition<W>,
        store: S,
        bus: Arc<dyn MessageBus<W::Message>>,
        scheduler: Arc<dyn Scheduler<W::Message>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let definition = Arc::new(definition);
        Self {
            router: CorrelationRouter::new(Arc::clone(&definition), store.clone()),
            relay: OutboxRelay::new(store.clone(), bus, scheduler),
            definition,
            store,
            clock,
        }
    }
}

impl<W: Workflow, S: SagaStore> TransitionExecutor<W, S> {
    /// Returns the workflow definition.
    pub fn definition(&self) -> &WorkflowDefinition<W> {
        &self.definition
    }

    /// Loads an instance for inspection.
    pub async fn load(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Option<SagaInstance<W>>, SagaError> {
        self.store
            .get(W::NAME, correlation_id)
            .await?
            .map(SagaInstance::from_record)
            .transpose()
    }

    /// Loads every instance currently in one of `states`.
    pub async fn instances_in(
        &self,
        states: &[W::State],
    ) -> Result<Vec<SagaInstance<W>>, SagaError> {
        let names: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
        self.store
            .find(W::NAME, &[])
            .await?
            .into_iter()
            .filter(|record| names.contains(&record.state.as_str()))
            .map(SagaInstance::from_record)
            .collect()
    }

    /// Handles one message.
    ///
    /// Messages with no matching instance or transition are ignored, never
    /// rejected. Effects are delivered only after the change is committed.
    #[tracing::instrument(
        skip(self, message),
        fields(workflow = W::NAME, message_type = message.message_type())
    )]
    pub async fn handle(
        &self,
        message: &W::Message,
    ) -> Result<Outcome<W::State, W::Message>, SagaError> {
        if !self.definition.subscribes_to(message.message_type()) {
            return Ok(Outcome::Ignored(IgnoreReason::NotSubscribed));
        }

        let start = std::time::Instant::now();
        let result = match self.attempt(message).await {
            Err(SagaError::ConcurrencyConflict { correlation_id, .. }) => {
                metrics::counter!("saga_concurrency_conflicts_total", "workflow" => W::NAME)
                    .increment(1);
                tracing::warn!(%correlation_id, "concurrent update, retrying once");
                self.attempt(message).await
            }
            other => other,
        };

        metrics::histogram!("saga_handle_duration_seconds", "workflow" => W::NAME)
            .record(start.elapsed().as_secs_f64());
        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "failed",
        };
        metrics::counter!("saga_events_total", "workflow" => W::NAME, "outcome" => label)
            .increment(1);

        if let Err(e) = &result {
            tracing::error!(error = %e, "message handling failed");
        }
        result
    }

    async fn attempt(
        &self,
        message: &W::Message,
    ) -> Result<Outcome<W::State, W::Message>, SagaError> {
        let (correlation_id, stage, version, mut data) = match self.router.resolve(message).await? {
            Resolution::Existing(instance) => (
                instance.correlation_id,
                Stage::In(instance.state),
                instance.version,
                instance.data,
            ),
            Resolution::New(correlation_id) => (
                correlation_id,
                Stage::New,
                Version::initial(),
                W::Data::default(),
            ),
            Resolution::Unmatched => {
                tracing::debug!("no instance for message");
                return Ok(Outcome::Ignored(IgnoreReason::NoInstance));
            }
        };

        let Some(spec) = self.definition.transition(stage, message.message_type()) else {
            tracing::debug!(%correlation_id, stage = stage.as_str(), "no transition, ignoring");
            return Ok(Outcome::Ignored(IgnoreReason::NoTransition {
                correlation_id,
                stage: stage.as_str(),
            }));
        };

        let mut ctx = ActionContext::new(correlation_id, stage, &mut data, message, self.clock.now());
        spec.run(&mut ctx)?;
        let effects = ctx.into_effects();

        let entries = effects
            .iter()
            .enumerate()
            .map(|(sequence, effect)| {
                Ok(OutboxEntry::new(
                    W::NAME,
                    correlation_id,
                    sequence as i32,
                    serde_json::to_value(effect)?,
                ))
            })
            .collect::<Result<Vec<_>, SagaError>>()?;

        match spec.resolve_target(stage) {
            Some(Stage::In(to)) => {
                let instance = SagaInstance::<W> {
                    correlation_id,
                    state: to,
                    version,
                    data,
                };
                let version = self
                    .store
                    .save(instance.to_record()?, version, entries.clone())
                    .await?;

                metrics::counter!(
                    "saga_transitions_total",
                    "workflow" => W::NAME,
                    "from" => stage.as_str(),
                    "to" => to.as_str()
                )
                .increment(1);
                tracing::info!(
                    %correlation_id,
                    from = stage.as_str(),
                    to = to.as_str(),
                    %version,
                    effects = effects.len(),
                    "transition committed"
                );

                self.relay.dispatch(&entries).await?;
                Ok(Outcome::Transitioned {
                    correlation_id,
                    from: stage,
                    to,
                    version,
                    effects,
                })
            }
            // Staying in New persists nothing, like finalizing from New.
            Some(Stage::New) | None => {
                self.store
                    .delete(W::NAME, correlation_id, version, entries.clone())
                    .await?;

                metrics::counter!(
                    "saga_transitions_total",
                    "workflow" => W::NAME,
                    "from" => stage.as_str(),
                    "to" => "Final"
                )
                .increment(1);
                tracing::info!(
                    %correlation_id,
                    from = stage.as_str(),
                    effects = effects.len(),
                    "instance finalized"
                );

                self.relay.dispatch(&entries).await?;
                Ok(Outcome::Finalized {
                    correlation_id,
                    from: stage,
                    effects,
                })
            }
        }
    }
}
