//! Typed view of a persisted saga instance.

use common::CorrelationId;
use saga_store::{SagaRecord, Version};

use crate::error::SagaError;
use crate::workflow::{Workflow, WorkflowState};

/// One live execution of a workflow, keyed by its correlation id.
pub struct SagaInstance<W: Workflow> {
    /// Correlation key, unique per workflow.
    pub correlation_id: CorrelationId,

    /// Current state.
    pub state: W::State,

    /// Version the instance was loaded at.
    pub version: Version,

    /// Workflow-specific fields.
    pub data: W::Data,
}

impl<W: Workflow> SagaInstance<W> {
    /// Decodes a stored record.
    pub fn from_record(record: SagaRecord) -> Result<Self, SagaError> {
        let state =
            W::State::from_name(&record.state).ok_or_else(|| SagaError::UnknownState {
                workflow: record.workflow.clone(),
                state: record.state.clone(),
            })?;
        let data = serde_json::from_value(record.data)?;

        Ok(Self {
            correlation_id: record.correlation_id,
            state,
            version: record.version,
            data,
        })
    }

    /// Encodes the instance for storage.
    pub fn to_record(&self) -> Result<SagaRecord, SagaError> {
        let mut record = SagaRecord::new(
            W::NAME,
            self.correlation_id,
            self.state.as_str(),
            serde_json::to_value(&self.data)?,
        );
        record.version = self.version;
        Ok(record)
    }
}

impl<W: Workflow> Clone for SagaInstance<W> {
    fn clone(&self) -> Self {
        Self {
            correlation_id: self.correlation_id,
            state: self.state,
            version: self.version,
            data: self.data.clone(),
        }
    }
}

impl<W: Workflow> std::fmt::Debug for SagaInstance<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaInstance")
            .field("workflow", &W::NAME)
            .field("correlation_id", &self.correlation_id)
            .field("state", &self.state)
            .field("version", &self.version)
            .field("data", &self.data)
            .finish()
    }
}
