//! Reservation lifecycle workflow.
//!
//! | State | Message | Effect | Next |
//! |---|---|---|---|
//! | new | ReservationRequested | record request | Requested |
//! | new | ReservationExpired | | Finalize |
//! | Requested | BookReserved | record reserved time, arm expiry at reserved time + hold | Reserved |
//! | Reserved | ReservationExpired | publish BookReservationCanceled | Finalize |
//! | Reserved | ReservationCancellationRequested | publish BookReservationCanceled, disarm expiry | Finalize |
//! | Reserved | BookCheckedOut (by book id) | disarm expiry | Finalize |
//!
//! The `new + ReservationExpired` row swallows an expiry that fires after
//! the reservation it targeted is gone.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::{CorrelationId, TokenId};
use saga_engine::{
    ActionContext, CorrelationRule, DefinitionError, SagaError, Workflow, WorkflowDefinition,
    WorkflowState,
};
use serde::{Deserialize, Serialize};

use crate::book::unexpected;
use crate::config::LibraryConfig;
use crate::contracts::{BookReservationCanceledData, LibraryMessage, MemberId, message_types::*};

/// The Reservation workflow.
pub struct Reservation;

/// States of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationState {
    Requested,
    Reserved,
}

impl WorkflowState for ReservationState {
    const ALL: &'static [Self] = &[ReservationState::Requested, ReservationState::Reserved];

    fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Requested => "Requested",
            ReservationState::Reserved => "Reserved",
        }
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fields of a reservation instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReservationData {
    pub created: Option<DateTime<Utc>>,
    pub reserved: Option<DateTime<Utc>>,
    pub member_id: Option<MemberId>,
    pub book_id: Option<CorrelationId>,

    /// Hold requested by the member, if any.
    pub duration: Option<Duration>,

    /// When the armed expiry timer fires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Token of the armed expiry timer.
    pub expiration_token_id: Option<TokenId>,
}

impl Workflow for Reservation {
    type State = ReservationState;
    type Data = ReservationData;
    type Message = LibraryMessage;

    const NAME: &'static str = "Reservation";
}

/// Builds the Reservation workflow definition.
pub fn definition(config: &LibraryConfig) -> Result<WorkflowDefinition<Reservation>, DefinitionError> {
    let by_reservation = || CorrelationRule::by_field("reservation_id");
    let default_hold = config.default_reservation_duration;

    WorkflowDefinition::builder(ReservationState::Requested)
        .initiating_event(RESERVATION_REQUESTED, by_reservation())
        .initiating_event(RESERVATION_EXPIRED, by_reservation())
        .event(BOOK_RESERVED, by_reservation())
        .event(RESERVATION_CANCELLATION_REQUESTED, by_reservation())
        .event(
            BOOK_CHECKED_OUT,
            CorrelationRule::by_predicate(&[("book_id", "book_id")])
                .in_states(&[ReservationState::Reserved]),
        )
        .initially(RESERVATION_REQUESTED, |t| {
            t.then(record_request)
                .transition_to(ReservationState::Requested)
        })
        .initially(RESERVATION_EXPIRED, |t| t.finalize())
        .during(ReservationState::Requested, BOOK_RESERVED, |t| {
            t.then(move |ctx| hold_book(ctx, default_hold))
                .transition_to(ReservationState::Reserved)
        })
        .during(ReservationState::Reserved, RESERVATION_EXPIRED, |t| {
            t.then(|ctx| {
                ctx.data.expiration_token_id = None;
                ctx.data.expires_at = None;
                release_book(ctx)
            })
            .finalize()
        })
        .during(ReservationState::Reserved, RESERVATION_CANCELLATION_REQUESTED, |t| {
            t.then(release_book).then(disarm_expiry).finalize()
        })
        .during(ReservationState::Reserved, BOOK_CHECKED_OUT, |t| {
            t.then(disarm_expiry).finalize()
        })
        .build()
}

fn record_request(ctx: &mut ActionContext<'_, Reservation>) -> Result<(), SagaError> {
    let LibraryMessage::ReservationRequested(requested) = ctx.message() else {
        return Err(unexpected(RESERVATION_REQUESTED, ctx.message()));
    };
    ctx.data.created = Some(requested.timestamp);
    ctx.data.book_id = Some(requested.book_id);
    ctx.data.member_id = Some(requested.member_id);
    ctx.data.duration = requested.duration;
    Ok(())
}

fn hold_book(
    ctx: &mut ActionContext<'_, Reservation>,
    default_hold: Duration,
) -> Result<(), SagaError> {
    let LibraryMessage::BookReserved(reserved) = ctx.message() else {
        return Err(unexpected(BOOK_RESERVED, ctx.message()));
    };
    let hold = ctx.data.duration.unwrap_or(default_hold);
    let expires_at = TimeDelta::from_std(hold)
        .ok()
        .and_then(|delay| reserved.timestamp.checked_add_signed(delay))
        .ok_or_else(|| {
            SagaError::InvalidMessage(format!(
                "reservation hold of {}s overflows the clock",
                hold.as_secs()
            ))
        })?;

    let expired = LibraryMessage::reservation_expired(ctx.correlation_id());
    let previous = ctx.data.expiration_token_id;
    let token = ctx.schedule_at(previous, expires_at, expired);
    ctx.data.reserved = Some(reserved.timestamp);
    ctx.data.expires_at = Some(expires_at);
    ctx.data.expiration_token_id = Some(token);
    tracing::debug!(
        reservation_id = %ctx.correlation_id(),
        %token,
        %expires_at,
        "reservation expiry armed"
    );
    Ok(())
}

fn release_book(ctx: &mut ActionContext<'_, Reservation>) -> Result<(), SagaError> {
    let book_id = ctx.data.book_id.ok_or_else(|| {
        SagaError::InvalidMessage(format!(
            "reservation {} has no book to release",
            ctx.correlation_id()
        ))
    })?;
    let canceled = LibraryMessage::BookReservationCanceled(BookReservationCanceledData {
        reservation_id: ctx.correlation_id(),
        book_id,
    });
    ctx.publish(canceled);
    tracing::info!(reservation_id = %ctx.correlation_id(), %book_id, "releasing reserved book");
    Ok(())
}

fn disarm_expiry(ctx: &mut ActionContext<'_, Reservation>) -> Result<(), SagaError> {
    ctx.data.expires_at = None;
    if let Some(token) = ctx.data.expiration_token_id.take() {
        ctx.unschedule(token);
    }
    Ok(())
}
