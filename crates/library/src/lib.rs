//! Library reservation system built on the saga engine.
//!
//! Two workflows coordinate purely through messages:
//! - [`Book`] tracks availability and answers reservation requests with
//!   `BookReserved`.
//! - [`Reservation`] tracks one member's hold, arms an expiry timer once the
//!   book is reserved, and releases the book on expiry or cancellation.

pub mod book;
pub mod config;
pub mod contracts;
pub mod reservation;
pub mod runtime;

pub use book::{Book, BookData, BookState};
pub use config::LibraryConfig;
pub use contracts::{LibraryMessage, MemberId, message_types};
pub use reservation::{Reservation, ReservationData, ReservationState};
pub use runtime::LibraryRuntime;
