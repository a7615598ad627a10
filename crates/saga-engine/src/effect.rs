//! Outbound effects and the context actions run in.

use chrono::{DateTime, Duration, Utc};
use common::{CorrelationId, TokenId};
use serde::{Deserialize, Serialize};

use crate::error::SagaError;
use crate::workflow::{Stage, Workflow};

/// An externally visible side effect produced by a transition.
///
/// Effects are staged in the outbox with the instance change and delivered
/// only after the change is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect<M> {
    /// Publish a message on the bus.
    Publish { message: M },

    /// Deliver a message at a later time, identified by a token.
    Schedule {
        token: TokenId,
        deliver_at: DateTime<Utc>,
        message: M,
    },

    /// Cancel a previously scheduled message.
    Unschedule { token: TokenId },
}

impl<M> Effect<M> {
    /// Returns the effect kind as a string.
    pub fn kind(&self) -> &'static str {
        match self {
            Effect::Publish { .. } => "publish",
            Effect::Schedule { .. } => "schedule",
            Effect::Unschedule { .. } => "unschedule",
        }
    }
}

/// What an action sees and may change while a transition runs.
///
/// Actions mutate `data` directly and record outbound effects through the
/// context; nothing leaves the process until the transition is persisted.
pub struct ActionContext<'a, W: Workflow> {
    correlation_id: CorrelationId,
    stage: Stage<W::State>,
    message: &'a W::Message,
    now: DateTime<Utc>,
    /// The instance fields being transitioned.
    pub data: &'a mut W::Data,
    effects: Vec<Effect<W::Message>>,
}

impl<'a, W: Workflow> ActionContext<'a, W> {
    /// Creates a context for one transition.
    pub fn new(
        correlation_id: CorrelationId,
        stage: Stage<W::State>,
        data: &'a mut W::Data,
        message: &'a W::Message,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id,
            stage,
            message,
            now,
            data,
            effects: Vec::new(),
        }
    }

    /// Returns the correlation key of the instance.
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Returns the stage the instance was in when the message arrived.
    pub fn stage(&self) -> Stage<W::State> {
        self.stage
    }

    /// Returns the inbound message.
    pub fn message(&self) -> &'a W::Message {
        self.message
    }

    /// Returns the time the transition runs at.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Publishes a message once the transition commits.
    pub fn publish(&mut self, message: W::Message) {
        self.effects.push(Effect::Publish { message });
    }

    /// Schedules a message `delay` from now and returns its token.
    ///
    /// A `previous` token is canceled first; timers for one purpose never stack.
    /// Fails with `InvalidMessage` if the deadline is not a representable time.
    pub fn schedule(
        &mut self,
        previous: Option<TokenId>,
        delay: Duration,
        message: W::Message,
    ) -> Result<TokenId, SagaError> {
        let deliver_at = self.now.checked_add_signed(delay).ok_or_else(|| {
            SagaError::InvalidMessage(format!("timer delay {delay} overflows the clock"))
        })?;
        Ok(self.schedule_at(previous, deliver_at, message))
    }

    /// Schedules a message at an absolute time and returns its token.
    pub fn schedule_at(
        &mut self,
        previous: Option<TokenId>,
        deliver_at: DateTime<Utc>,
        message: W::Message,
    ) -> TokenId {
        if let Some(previous) = previous {
            self.unschedule(previous);
        }
        let token = TokenId::new();
        self.effects.push(Effect::Schedule {
            token,
            deliver_at,
            message,
        });
        token
    }

    /// Cancels a scheduled message once the transition commits.
    pub fn unschedule(&mut self, token: TokenId) {
        self.effects.push(Effect::Unschedule { token });
    }

    /// Returns the effects recorded so far.
    pub fn effects(&self) -> &[Effect<W::Message>] {
        &self.effects
    }

    /// Consumes the context, returning the recorded effects in order.
    pub fn into_effects(self) -> Vec<Effect<W::Message>> {
        self.effects
    }
}
