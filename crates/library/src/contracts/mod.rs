//! Message contracts exchanged by the library workflows.

mod messages;
mod value_objects;

pub use messages::{
    BookAddedData, BookCheckedOutData, BookReservationCanceledData, BookReservedData,
    LibraryMessage, ReservationCancellationRequestedData, ReservationExpiredData,
    ReservationRequestedData, message_types,
};
pub use value_objects::MemberId;
