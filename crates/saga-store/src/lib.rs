//! Saga instance store.
//!
//! Instances are persisted as one row per `(workflow, correlation_id)` with a
//! version used for optimistic concurrency. Outbound effects produced by a
//! transition are staged in an outbox inside the same atomic write, so a
//! crash can never persist one without the other.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::{CorrelationId, TokenId};
pub use error::{Result, StoreError};
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use record::{FieldMatch, OutboxEntry, OutboxId, SagaRecord, Version};
pub use store::{SagaStore, SagaStoreExt, validate_outbox};
