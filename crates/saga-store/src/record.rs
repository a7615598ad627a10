use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CorrelationId;

/// Version number of a saga instance, used for optimistic concurrency control.
///
/// A version of 0 means "never persisted". The first save produces version 1
/// and every later save increments it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of an instance that does not exist yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version (1) written by the first save.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// The persisted form of one saga instance.
///
/// The store is agnostic of workflow types: the current state is kept as its
/// name and the workflow-specific fields as a JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    /// Name of the workflow definition that owns this instance.
    pub workflow: String,

    /// Correlation key, unique per workflow.
    pub correlation_id: CorrelationId,

    /// Name of the current state.
    pub state: String,

    /// Version this record was read at (or written as).
    pub version: Version,

    /// Workflow-specific instance fields.
    pub data: serde_json::Value,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    /// Creates a record that has not been persisted yet.
    pub fn new(
        workflow: impl Into<String>,
        correlation_id: CorrelationId,
        state: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            workflow: workflow.into(),
            correlation_id,
            state: state.into(),
            version: Version::initial(),
            data,
            updated_at: Utc::now(),
        }
    }

    /// Returns the text value of a top-level data field.
    ///
    /// Mirrors PostgreSQL's `data ->> field`: strings are returned as-is,
    /// other scalars in their JSON text form, `null` and missing fields as `None`.
    pub fn field_text(&self, field: &str) -> Option<String> {
        match self.data.get(field)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Returns true if every field match holds for this record.
    pub fn matches(&self, matches: &[FieldMatch]) -> bool {
        matches
            .iter()
            .all(|m| self.field_text(&m.field).as_deref() == Some(m.value.as_str()))
    }
}

/// Equality condition on one instance data field, used for secondary lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMatch {
    /// Top-level field name in the instance data.
    pub field: String,

    /// Expected text value of that field.
    pub value: String,
}

impl FieldMatch {
    /// Creates a field match.
    pub fn new(field: impl Into<String>, value: impl ToString) -> Self {
        Self {
            field: field.into(),
            value: value.to_string(),
        }
    }
}

/// Unique identifier for an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(Uuid);

impl OutboxId {
    /// Creates a new random outbox ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an outbox ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An outbound effect staged together with the instance write that produced it.
///
/// Entries outlive the instance: a transition that finalizes (deletes) an
/// instance still leaves its staged effects behind until they are dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Unique identifier for this entry.
    pub id: OutboxId,

    /// Workflow whose transition produced the effect.
    pub workflow: String,

    /// Instance whose transition produced the effect.
    pub correlation_id: CorrelationId,

    /// Position of the effect within its transition (0-based).
    pub sequence: i32,

    /// The serialized effect.
    pub effect: serde_json::Value,

    /// When the entry was staged.
    pub created_at: DateTime<Utc>,

    /// When the entry was delivered, if it has been.
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Creates a pending outbox entry.
    pub fn new(
        workflow: impl Into<String>,
        correlation_id: CorrelationId,
        sequence: i32,
        effect: serde_json::Value,
    ) -> Self {
        Self {
            id: OutboxId::new(),
            workflow: workflow.into(),
            correlation_id,
            sequence,
            effect,
            created_at: Utc::now(),
            dispatched_at: None,
        }
    }

    /// Returns true if the entry has not been delivered yet.
    pub fn is_pending(&self) -> bool {
        self.dispatched_at.is_none()
    }
}
