//! Declarative workflow definitions: message declarations and the
//! transition table.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::correlation::CorrelationRule;
use crate::effect::ActionContext;
use crate::error::{DefinitionError, SagaError};
use crate::workflow::{Stage, Workflow, WorkflowState};

/// A step run while a transition executes.
///
/// Actions mutate the instance data and record effects through the context.
/// An error aborts the transition before anything is persisted.
pub type Action<W> =
    Arc<dyn Fn(&mut ActionContext<'_, W>) -> Result<(), SagaError> + Send + Sync>;

/// Where a transition leaves the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<S> {
    /// Move to this state.
    To(S),

    /// Keep the current state (data and effects still apply).
    Stay,

    /// Delete the instance.
    Finalize,
}

/// One row of the transition table.
pub struct TransitionSpec<W: Workflow> {
    actions: Vec<Action<W>>,
    target: Target<W::State>,
}

impl<W: Workflow> TransitionSpec<W> {
    /// Returns the target of this transition.
    pub fn target(&self) -> Target<W::State> {
        self.target
    }

    /// Runs the actions in declaration order, stopping at the first error.
    pub fn run(&self, ctx: &mut ActionContext<'_, W>) -> Result<(), SagaError> {
        for action in &self.actions {
            action(ctx)?;
        }
        Ok(())
    }

    /// Returns the state the instance ends up in, or `None` if it is finalized.
    pub fn resolve_target(&self, from: Stage<W::State>) -> Option<Stage<W::State>> {
        match self.target {
            Target::To(state) => Some(Stage::In(state)),
            Target::Stay => Some(from),
            Target::Finalize => None,
        }
    }
}

impl<W: Workflow> Clone for TransitionSpec<W> {
    fn clone(&self) -> Self {
        Self {
            actions: self.actions.clone(),
            target: self.target,
        }
    }
}

impl<W: Workflow> std::fmt::Debug for TransitionSpec<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionSpec")
            .field("actions", &self.actions.len())
            .field("target", &self.target)
            .finish()
    }
}

/// Builds the actions and target of one transition.
pub struct TransitionBuilder<W: Workflow> {
    actions: Vec<Action<W>>,
    target: Target<W::State>,
}

impl<W: Workflow> TransitionBuilder<W> {
    fn new() -> Self {
        Self {
            actions: Vec::new(),
            target: Target::Stay,
        }
    }

    /// Appends an action.
    pub fn then<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut ActionContext<'_, W>) -> Result<(), SagaError> + Send + Sync + 'static,
    {
        self.actions.push(Arc::new(action));
        self
    }

    /// Moves the instance to `state`.
    pub fn transition_to(mut self, state: W::State) -> Self {
        self.target = Target::To(state);
        self
    }

    /// Keeps the current state. This is the default.
    pub fn stay(mut self) -> Self {
        self.target = Target::Stay;
        self
    }

    /// Deletes the instance once the actions have run.
    pub fn finalize(mut self) -> Self {
        self.target = Target::Finalize;
        self
    }

    fn build(self) -> TransitionSpec<W> {
        TransitionSpec {
            actions: self.actions,
            target: self.target,
        }
    }
}

/// Declaration of one message type a workflow consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDecl {
    message_type: &'static str,
    initiating: bool,
    correlation: CorrelationRule,
}

impl EventDecl {
    /// Returns the message type name.
    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    /// Returns true if this message may create a new instance.
    pub fn is_initiating(&self) -> bool {
        self.initiating
    }

    /// Returns the correlation rule.
    pub fn correlation(&self) -> &CorrelationRule {
        &self.correlation
    }
}

/// The validated, immutable description of a workflow.
pub struct WorkflowDefinition<W: Workflow> {
    initial: W::State,
    events: HashMap<&'static str, EventDecl>,
    transitions: HashMap<(Stage<W::State>, &'static str), TransitionSpec<W>>,
}

impl<W: Workflow> WorkflowDefinition<W> {
    /// Starts a definition whose instances begin in `initial`.
    pub fn builder(initial: W::State) -> WorkflowDefinitionBuilder<W> {
        WorkflowDefinitionBuilder {
            initial,
            events: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// Returns the workflow name.
    pub fn name(&self) -> &'static str {
        W::NAME
    }

    /// Returns the initial state.
    pub fn initial(&self) -> W::State {
        self.initial
    }

    /// Returns the declaration of a message type.
    pub fn event(&self, message_type: &str) -> Option<&EventDecl> {
        self.events.get(message_type)
    }

    /// Returns true if the workflow consumes this message type.
    pub fn subscribes_to(&self, message_type: &str) -> bool {
        self.events.contains_key(message_type)
    }

    /// Returns every consumed message type, sorted.
    pub fn message_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.events.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Looks up the transition for a stage and message type.
    pub fn transition(
        &self,
        stage: Stage<W::State>,
        message_type: &str,
    ) -> Option<&TransitionSpec<W>> {
        let decl = self.events.get(message_type)?;
        self.transitions.get(&(stage, decl.message_type))
    }
}

impl<W: Workflow> std::fmt::Debug for WorkflowDefinition<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &W::NAME)
            .field("initial", &self.initial)
            .field("events", &self.message_types())
            .field("transitions", &self.transitions.len())
            .finish()
    }
}

/// Collects declarations and validates them on [`build`](Self::build).
pub struct WorkflowDefinitionBuilder<W: Workflow> {
    initial: W::State,
    events: Vec<EventDecl>,
    transitions: Vec<(Stage<W::State>, &'static str, TransitionSpec<W>)>,
}

impl<W: Workflow> WorkflowDefinitionBuilder<W> {
    /// Declares a consumed message type that never creates instances.
    pub fn event(self, message_type: &'static str, correlation: CorrelationRule) -> Self {
        self.declare(message_type, false, correlation)
    }

    /// Declares a consumed message type that creates an instance when none exists.
    pub fn initiating_event(self, message_type: &'static str, correlation: CorrelationRule) -> Self {
        self.declare(message_type, true, correlation)
    }

    fn declare(
        mut self,
        message_type: &'static str,
        initiating: bool,
        correlation: CorrelationRule,
    ) -> Self {
        self.events.push(EventDecl {
            message_type,
            initiating,
            correlation,
        });
        self
    }

    /// Adds the transition taken when no instance exists yet.
    pub fn initially<F>(self, message_type: &'static str, f: F) -> Self
    where
        F: FnOnce(TransitionBuilder<W>) -> TransitionBuilder<W>,
    {
        self.row(Stage::New, message_type, f)
    }

    /// Adds the transition taken from `state` on `message_type`.
    pub fn during<F>(self, state: W::State, message_type: &'static str, f: F) -> Self
    where
        F: FnOnce(TransitionBuilder<W>) -> TransitionBuilder<W>,
    {
        self.row(Stage::In(state), message_type, f)
    }

    fn row<F>(mut self, stage: Stage<W::State>, message_type: &'static str, f: F) -> Self
    where
        F: FnOnce(TransitionBuilder<W>) -> TransitionBuilder<W>,
    {
        let spec = f(TransitionBuilder::new()).build();
        self.transitions.push((stage, message_type, spec));
        self
    }

    /// Validates the declarations and produces the definition.
    pub fn build(self) -> Result<WorkflowDefinition<W>, DefinitionError> {
        let mut events = HashMap::new();
        for decl in self.events {
            if decl.initiating && decl.correlation.is_predicate() {
                return Err(DefinitionError::PredicateInitiating(decl.message_type));
            }
            if events.insert(decl.message_type, decl.clone()).is_some() {
                return Err(DefinitionError::DuplicateEvent(decl.message_type));
            }
        }

        let mut transitions = HashMap::new();
        for (stage, message_type, spec) in self.transitions {
            let decl = events
                .get(message_type)
                .ok_or(DefinitionError::UndeclaredEvent(message_type))?;

            if stage == Stage::New {
                if !decl.initiating {
                    return Err(DefinitionError::NonInitiatingFromNew(message_type));
                }
                match spec.target {
                    Target::To(state) if state == self.initial => {}
                    Target::Finalize => {}
                    _ => {
                        return Err(DefinitionError::InitialNotTargeted {
                            message_type,
                            initial: self.initial.as_str(),
                        });
                    }
                }
            }

            if transitions.insert((stage, message_type), spec).is_some() {
                return Err(DefinitionError::DuplicateTransition {
                    stage: stage.as_str().to_string(),
                    message_type,
                });
            }
        }

        for decl in events.values() {
            if decl.initiating && !transitions.contains_key(&(Stage::New, decl.message_type)) {
                return Err(DefinitionError::InitiatingWithoutRow(decl.message_type));
            }
        }

        let reachable = reachable_states(self.initial, &transitions);
        if let Some(state) = W::State::ALL.iter().find(|s| !reachable.contains(*s)) {
            return Err(DefinitionError::Unreachable(state.as_str()));
        }

        Ok(WorkflowDefinition {
            initial: self.initial,
            events,
            transitions,
        })
    }
}

fn reachable_states<W: Workflow>(
    initial: W::State,
    transitions: &HashMap<(Stage<W::State>, &'static str), TransitionSpec<W>>,
) -> HashSet<W::State> {
    let mut seen = HashSet::from([initial]);
    let mut queue = VecDeque::from([initial]);

    while let Some(state) = queue.pop_front() {
        for ((stage, _), spec) in transitions {
            if *stage != Stage::In(state) {
                continue;
            }
            if let Target::To(next) = spec.target
                && seen.insert(next)
            {
                queue.push_back(next);
            }
        }
    }
    seen
}
