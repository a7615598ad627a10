//! Identifier types shared by the saga store, the engine and the workflows.

pub mod types;

pub use types::{CorrelationId, TokenId};
