//! Library messages and their payloads.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::CorrelationId;
use saga_engine::Message;
use serde::{Deserialize, Serialize};

use super::MemberId;

/// Message type names, as used for subscriptions.
pub mod message_types {
    pub const BOOK_ADDED: &str = "BookAdded";
    pub const RESERVATION_REQUESTED: &str = "ReservationRequested";
    pub const BOOK_RESERVED: &str = "BookReserved";
    pub const BOOK_RESERVATION_CANCELED: &str = "BookReservationCanceled";
    pub const BOOK_CHECKED_OUT: &str = "BookCheckedOut";
    pub const RESERVATION_EXPIRED: &str = "ReservationExpired";
    pub const RESERVATION_CANCELLATION_REQUESTED: &str = "ReservationCancellationRequested";
}

use message_types::*;

/// Every message the library workflows consume or publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LibraryMessage {
    /// A book was added to the catalog.
    BookAdded(BookAddedData),

    /// A member asked to reserve a book.
    ReservationRequested(ReservationRequestedData),

    /// The book accepted a reservation.
    BookReserved(BookReservedData),

    /// A reservation on the book ended without checkout.
    BookReservationCanceled(BookReservationCanceledData),

    /// A member took the book out.
    BookCheckedOut(BookCheckedOutData),

    /// A reservation hold ran out.
    ReservationExpired(ReservationExpiredData),

    /// A member asked to cancel a reservation.
    ReservationCancellationRequested(ReservationCancellationRequestedData),
}

impl LibraryMessage {
    /// Creates a BookAdded message.
    pub fn book_added(
        book_id: CorrelationId,
        isbn: impl Into<String>,
        title: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        LibraryMessage::BookAdded(BookAddedData {
            book_id,
            isbn: isbn.into(),
            title: title.into(),
            timestamp,
        })
    }

    /// Creates a ReservationRequested message.
    pub fn reservation_requested(
        reservation_id: CorrelationId,
        book_id: CorrelationId,
        member_id: MemberId,
        timestamp: DateTime<Utc>,
        duration: Option<Duration>,
    ) -> Self {
        LibraryMessage::ReservationRequested(ReservationRequestedData {
            reservation_id,
            member_id,
            book_id,
            timestamp,
            duration,
        })
    }

    /// Creates a BookCheckedOut message.
    pub fn book_checked_out(
        book_id: CorrelationId,
        member_id: MemberId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        LibraryMessage::BookCheckedOut(BookCheckedOutData {
            member_id,
            book_id,
            timestamp,
        })
    }

    /// Creates a ReservationCancellationRequested message.
    pub fn cancellation_requested(reservation_id: CorrelationId, timestamp: DateTime<Utc>) -> Self {
        LibraryMessage::ReservationCancellationRequested(ReservationCancellationRequestedData {
            reservation_id,
            timestamp,
        })
    }

    /// Creates a ReservationExpired message.
    pub fn reservation_expired(reservation_id: CorrelationId) -> Self {
        LibraryMessage::ReservationExpired(ReservationExpiredData { reservation_id })
    }

    fn book_id(&self) -> Option<CorrelationId> {
        match self {
            LibraryMessage::BookAdded(d) => Some(d.book_id),
            LibraryMessage::ReservationRequested(d) => Some(d.book_id),
            LibraryMessage::BookReserved(d) => Some(d.book_id),
            LibraryMessage::BookReservationCanceled(d) => Some(d.book_id),
            LibraryMessage::BookCheckedOut(d) => Some(d.book_id),
            LibraryMessage::ReservationExpired(_)
            | LibraryMessage::ReservationCancellationRequested(_) => None,
        }
    }

    fn reservation_id(&self) -> Option<CorrelationId> {
        match self {
            LibraryMessage::ReservationRequested(d) => Some(d.reservation_id),
            LibraryMessage::BookReserved(d) => Some(d.reservation_id),
            LibraryMessage::BookReservationCanceled(d) => Some(d.reservation_id),
            LibraryMessage::ReservationExpired(d) => Some(d.reservation_id),
            LibraryMessage::ReservationCancellationRequested(d) => Some(d.reservation_id),
            LibraryMessage::BookAdded(_) | LibraryMessage::BookCheckedOut(_) => None,
        }
    }
}

impl Message for LibraryMessage {
    fn message_type(&self) -> &'static str {
        match self {
            LibraryMessage::BookAdded(_) => BOOK_ADDED,
            LibraryMessage::ReservationRequested(_) => RESERVATION_REQUESTED,
            LibraryMessage::BookReserved(_) => BOOK_RESERVED,
            LibraryMessage::BookReservationCanceled(_) => BOOK_RESERVATION_CANCELED,
            LibraryMessage::BookCheckedOut(_) => BOOK_CHECKED_OUT,
            LibraryMessage::ReservationExpired(_) => RESERVATION_EXPIRED,
            LibraryMessage::ReservationCancellationRequested(_) => {
                RESERVATION_CANCELLATION_REQUESTED
            }
        }
    }

    fn correlation_value(&self, field: &str) -> Option<CorrelationId> {
        match field {
            "book_id" => self.book_id(),
            "reservation_id" => self.reservation_id(),
            _ => None,
        }
    }
}

/// Data for BookAdded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookAddedData {
    pub book_id: CorrelationId,
    pub isbn: String,
    pub title: String,
    pub timestamp: DateTime<Utc>,
}

/// Data for ReservationRequested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRequestedData {
    pub reservation_id: CorrelationId,
    pub member_id: MemberId,
    pub book_id: CorrelationId,
    pub timestamp: DateTime<Utc>,

    /// How long the book is held once reserved; the configured default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
}

/// Data for BookReserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookReservedData {
    pub reservation_id: CorrelationId,
    pub member_id: MemberId,
    pub book_id: CorrelationId,

    /// When the book accepted the reservation (not when it was requested).
    pub timestamp: DateTime<Utc>,
}

/// Data for BookReservationCanceled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookReservationCanceledData {
    pub reservation_id: CorrelationId,
    pub book_id: CorrelationId,
}

/// Data for BookCheckedOut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookCheckedOutData {
    pub member_id: MemberId,
    pub book_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
}

/// Data for ReservationExpired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationExpiredData {
    pub reservation_id: CorrelationId,
}

/// Data for ReservationCancellationRequested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationCancellationRequestedData {
    pub reservation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
}
