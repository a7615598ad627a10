//! Book availability workflow.
//!
//! | State | Message | Effect | Next |
//! |---|---|---|---|
//! | new | BookAdded | copy title, isbn, date added | Available |
//! | Available | ReservationRequested | publish BookReserved | Reserved |
//! | Reserved | BookReservationCanceled | | Available |
//! | Reserved | BookCheckedOut | | CheckedOut |
//!
//! A reservation request for a book that is already reserved has no row and
//! is ignored.

use chrono::NaiveDate;
use saga_engine::{
    ActionContext, CorrelationRule, DefinitionError, SagaError, Workflow, WorkflowDefinition,
    WorkflowState,
};
use serde::{Deserialize, Serialize};

use crate::contracts::{BookReservedData, LibraryMessage, message_types::*};

/// The Book workflow.
pub struct Book;

/// States of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookState {
    Available,
    Reserved,
    CheckedOut,
}

impl WorkflowState for BookState {
    const ALL: &'static [Self] = &[BookState::Available, BookState::Reserved, BookState::CheckedOut];

    fn as_str(&self) -> &'static str {
        match self {
            BookState::Available => "Available",
            BookState::Reserved => "Reserved",
            BookState::CheckedOut => "CheckedOut",
        }
    }
}

impl std::fmt::Display for BookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fields of a book instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookData {
    pub title: String,
    pub isbn: String,
    pub date_added: Option<NaiveDate>,
}

impl Workflow for Book {
    type State = BookState;
    type Data = BookData;
    type Message = LibraryMessage;

    const NAME: &'static str = "Book";
}

/// Builds the Book workflow definition.
pub fn definition() -> Result<WorkflowDefinition<Book>, DefinitionError> {
    let by_book = || CorrelationRule::by_field("book_id");

    WorkflowDefinition::builder(BookState::Available)
        .initiating_event(BOOK_ADDED, by_book())
        .event(RESERVATION_REQUESTED, by_book())
        .event(BOOK_RESERVATION_CANCELED, by_book())
        .event(BOOK_CHECKED_OUT, by_book())
        .initially(BOOK_ADDED, |t| {
            t.then(copy_catalog_data)
                .transition_to(BookState::Available)
        })
        .during(BookState::Available, RESERVATION_REQUESTED, |t| {
            t.then(accept_reservation)
                .transition_to(BookState::Reserved)
        })
        .during(BookState::Reserved, BOOK_RESERVATION_CANCELED, |t| {
            t.transition_to(BookState::Available)
        })
        .during(BookState::Reserved, BOOK_CHECKED_OUT, |t| {
            t.transition_to(BookState::CheckedOut)
        })
        .build()
}

fn copy_catalog_data(ctx: &mut ActionContext<'_, Book>) -> Result<(), SagaError> {
    let LibraryMessage::BookAdded(added) = ctx.message() else {
        return Err(unexpected(BOOK_ADDED, ctx.message()));
    };
    ctx.data.title = added.title.clone();
    ctx.data.isbn = added.isbn.clone();
    ctx.data.date_added = Some(added.timestamp.date_naive());
    Ok(())
}

fn accept_reservation(ctx: &mut ActionContext<'_, Book>) -> Result<(), SagaError> {
    let LibraryMessage::ReservationRequested(requested) = ctx.message() else {
        return Err(unexpected(RESERVATION_REQUESTED, ctx.message()));
    };
    let reserved = LibraryMessage::BookReserved(BookReservedData {
        reservation_id: requested.reservation_id,
        member_id: requested.member_id,
        book_id: requested.book_id,
        timestamp: ctx.now(),
    });
    tracing::info!(
        book_id = %ctx.correlation_id(),
        reservation_id = %requested.reservation_id,
        "book reserved"
    );
    ctx.publish(reserved);
    Ok(())
}

pub(crate) fn unexpected(expected: &'static str, actual: &LibraryMessage) -> SagaError {
    use saga_engine::Message;

    SagaError::UnexpectedMessage {
        expected,
        actual: actual.message_type(),
    }
}
