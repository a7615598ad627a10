//! A small ticket-triage workflow used by the engine's unit tests.

use chrono::Duration;
use common::{CorrelationId, TokenId};
use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationRule;
use crate::definition::WorkflowDefinition;
use crate::error::SagaError;
use crate::workflow::{Message, Workflow, WorkflowState};

pub mod message_types {
    pub const TICKET_OPENED: &str = "TicketOpened";
    pub const TICKET_ASSIGNED: &str = "TicketAssigned";
    pub const ASSIGNEE_NOTIFIED: &str = "AssigneeNotified";
    pub const REMINDER_DUE: &str = "ReminderDue";
    pub const TICKET_CLOSED: &str = "TicketClosed";
    pub const AGENT_LEFT: &str = "AgentLeft";
}

use message_types::*;

pub struct TicketWorkflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketState {
    Open,
    Assigned,
}

impl WorkflowState for TicketState {
    const ALL: &'static [Self] = &[TicketState::Open, TicketState::Assigned];

    fn as_str(&self) -> &'static str {
        match self {
            TicketState::Open => "Open",
            TicketState::Assigned => "Assigned",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketData {
    pub title: String,
    pub agent_id: Option<CorrelationId>,
    pub reminder: Option<TokenId>,
    pub touches: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TicketMessage {
    TicketOpened {
        ticket_id: CorrelationId,
        title: String,
    },
    TicketAssigned {
        ticket_id: CorrelationId,
        agent_id: CorrelationId,
    },
    AssigneeNotified {
        ticket_id: CorrelationId,
        agent_id: CorrelationId,
    },
    ReminderDue {
        ticket_id: CorrelationId,
    },
    TicketClosed {
        ticket_id: CorrelationId,
    },
    AgentLeft {
        agent_id: CorrelationId,
    },
}

impl Message for TicketMessage {
    fn message_type(&self) -> &'static str {
        match self {
            TicketMessage::TicketOpened { .. } => TICKET_OPENED,
            TicketMessage::TicketAssigned { .. } => TICKET_ASSIGNED,
            TicketMessage::AssigneeNotified { .. } => ASSIGNEE_NOTIFIED,
            TicketMessage::ReminderDue { .. } => REMINDER_DUE,
            TicketMessage::TicketClosed { .. } => TICKET_CLOSED,
            TicketMessage::AgentLeft { .. } => AGENT_LEFT,
        }
    }

    fn correlation_value(&self, field: &str) -> Option<CorrelationId> {
        match (self, field) {
            (TicketMessage::TicketOpened { ticket_id, .. }, "ticket_id")
            | (TicketMessage::TicketAssigned { ticket_id, .. }, "ticket_id")
            | (TicketMessage::AssigneeNotified { ticket_id, .. }, "ticket_id")
            | (TicketMessage::ReminderDue { ticket_id }, "ticket_id")
            | (TicketMessage::TicketClosed { ticket_id }, "ticket_id") => Some(*ticket_id),
            (TicketMessage::TicketAssigned { agent_id, .. }, "agent_id")
            | (TicketMessage::AssigneeNotified { agent_id, .. }, "agent_id")
            | (TicketMessage::AgentLeft { agent_id }, "agent_id") => Some(*agent_id),
            _ => None,
        }
    }
}

impl Workflow for TicketWorkflow {
    type State = TicketState;
    type Data = TicketData;
    type Message = TicketMessage;

    const NAME: &'static str = "Ticket";
}

pub fn definition() -> WorkflowDefinition<TicketWorkflow> {
    WorkflowDefinition::<TicketWorkflow>::builder(TicketState::Open)
        .initiating_event(TICKET_OPENED, CorrelationRule::by_field("ticket_id"))
        .event(TICKET_ASSIGNED, CorrelationRule::by_field("ticket_id"))
        .event(REMINDER_DUE, CorrelationRule::by_field("ticket_id"))
        .event(TICKET_CLOSED, CorrelationRule::by_field("ticket_id"))
        .event(
            AGENT_LEFT,
            CorrelationRule::by_predicate(&[("agent_id", "agent_id")])
                .in_states(&[TicketState::Assigned]),
        )
        .initially(TICKET_OPENED, |t| {
            t.then(|ctx| match ctx.message() {
                TicketMessage::TicketOpened { title, .. } => {
                    ctx.data.title = title.clone();
                    Ok(())
                }
                other => Err(unexpected(TICKET_OPENED, other)),
            })
            .transition_to(TicketState::Open)
        })
        .during(TicketState::Open, TICKET_ASSIGNED, |t| {
            t.then(|ctx| {
                let TicketMessage::TicketAssigned { agent_id, .. } = ctx.message() else {
                    return Err(unexpected(TICKET_ASSIGNED, ctx.message()));
                };
                let ticket_id = ctx.correlation_id();
                ctx.data.agent_id = Some(*agent_id);
                ctx.publish(TicketMessage::AssigneeNotified {
                    ticket_id,
                    agent_id: *agent_id,
                });
                let previous = ctx.data.reminder;
                let token = ctx.schedule(
                    previous,
                    Duration::hours(1),
                    TicketMessage::ReminderDue { ticket_id },
                )?;
                ctx.data.reminder = Some(token);
                Ok(())
            })
            .transition_to(TicketState::Assigned)
        })
        .during(TicketState::Assigned, REMINDER_DUE, |t| {
            t.then(|ctx| {
                ctx.data.touches += 1;
                ctx.data.reminder = None;
                Ok(())
            })
            .stay()
        })
        .during(TicketState::Assigned, TICKET_CLOSED, |t| {
            t.then(|ctx| {
                if let Some(token) = ctx.data.reminder.take() {
                    ctx.unschedule(token);
                }
                Ok(())
            })
            .finalize()
        })
        .during(TicketState::Assigned, AGENT_LEFT, |t| {
            t.then(|ctx| {
                ctx.data.agent_id = None;
                if let Some(token) = ctx.data.reminder.take() {
                    ctx.unschedule(token);
                }
                Ok(())
            })
            .transition_to(TicketState::Open)
        })
        .build()
        .expect("ticket definition is valid")
}

fn unexpected(expected: &'static str, actual: &TicketMessage) -> SagaError {
    SagaError::UnexpectedMessage {
        expected,
        actual: actual.message_type(),
    }
}

pub fn opened(ticket_id: CorrelationId) -> TicketMessage {
    TicketMessage::TicketOpened {
        ticket_id,
        title: "printer on fire".to_string(),
    }
}

pub fn assigned(ticket_id: CorrelationId, agent_id: CorrelationId) -> TicketMessage {
    TicketMessage::TicketAssigned {
        ticket_id,
        agent_id,
    }
}
