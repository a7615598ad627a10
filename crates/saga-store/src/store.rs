use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{CorrelationId, FieldMatch, OutboxEntry, OutboxId, Result, SagaRecord, StoreError, Version};

/// Core trait for saga instance store implementations.
///
/// Every write is checked against the version the caller loaded the instance
/// at, and stages the outbox entries produced by the transition atomically
/// with the instance change. All implementations must be thread-safe.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Loads an instance by its correlation key.
    ///
    /// Returns None if no instance exists.
    async fn get(
        &self,
        workflow: &str,
        correlation_id: CorrelationId,
    ) -> Result<Option<SagaRecord>>;

    /// Finds instances of a workflow whose data fields satisfy every match.
    async fn find(&self, workflow: &str, matches: &[FieldMatch]) -> Result<Vec<SagaRecord>>;

    /// Inserts or updates an instance and stages its outbox entries.
    ///
    /// Fails with `ConcurrencyConflict` if the stored version differs from
    /// `expected` (`Version::initial()` expects the instance to be absent).
    /// Returns the new version of the instance.
    async fn save(
        &self,
        record: SagaRecord,
        expected: Version,
        outbox: Vec<OutboxEntry>,
    ) -> Result<Version>;

    /// Deletes an instance and stages its outbox entries.
    ///
    /// Deletion is terminal. With `expected == Version::initial()` the
    /// instance must be absent and only the outbox entries are written.
    async fn delete(
        &self,
        workflow: &str,
        correlation_id: CorrelationId,
        expected: Version,
        outbox: Vec<OutboxEntry>,
    ) -> Result<()>;

    /// Returns every outbox entry not yet dispatched, oldest first.
    async fn pending_outbox(&self) -> Result<Vec<OutboxEntry>>;

    /// Marks an outbox entry as delivered. Marking twice is not an error.
    async fn mark_dispatched(&self, id: OutboxId) -> Result<()>;

    /// Deletes entries dispatched before `before`.
    ///
    /// Returns the number of entries removed.
    async fn purge_dispatched(&self, before: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
impl<T: SagaStore + ?Sized> SagaStore for Arc<T> {
    async fn get(
        &self,
        workflow: &str,
        correlation_id: CorrelationId,
    ) -> Result<Option<SagaRecord>> {
        (**self).get(workflow, correlation_id).await
    }

    async fn find(&self, workflow: &str, matches: &[FieldMatch]) -> Result<Vec<SagaRecord>> {
        (**self).find(workflow, matches).await
    }

    async fn save(
        &self,
        record: SagaRecord,
        expected: Version,
        outbox: Vec<OutboxEntry>,
    ) -> Result<Version> {
        (**self).save(record, expected, outbox).await
    }

    async fn delete(
        &self,
        workflow: &str,
        correlation_id: CorrelationId,
        expected: Version,
        outbox: Vec<OutboxEntry>,
    ) -> Result<()> {
        (**self).delete(workflow, correlation_id, expected, outbox).await
    }

    async fn pending_outbox(&self) -> Result<Vec<OutboxEntry>> {
        (**self).pending_outbox().await
    }

    async fn mark_dispatched(&self, id: OutboxId) -> Result<()> {
        (**self).mark_dispatched(id).await
    }

    async fn purge_dispatched(&self, before: DateTime<Utc>) -> Result<u64> {
        (**self).purge_dispatched(before).await
    }
}

/// Extension trait providing convenience methods for saga stores.
#[async_trait]
pub trait SagaStoreExt: SagaStore {
    /// Checks if an instance exists.
    async fn exists(&self, workflow: &str, correlation_id: CorrelationId) -> Result<bool> {
        Ok(self.get(workflow, correlation_id).await?.is_some())
    }

    /// Returns the stored version of an instance, or `Version::initial()` if absent.
    async fn current_version(
        &self,
        workflow: &str,
        correlation_id: CorrelationId,
    ) -> Result<Version> {
        Ok(self
            .get(workflow, correlation_id)
            .await?
            .map(|r| r.version)
            .unwrap_or_else(Version::initial))
    }
}

// Blanket implementation for all SagaStore implementations
impl<T: SagaStore + ?Sized> SagaStoreExt for T {}

/// Validates outbox entries staged with a write to one instance.
///
/// All entries must belong to the written instance and carry sequential
/// sequence numbers starting at 0.
pub fn validate_outbox(
    workflow: &str,
    correlation_id: CorrelationId,
    outbox: &[OutboxEntry],
) -> Result<()> {
    for (index, entry) in outbox.iter().enumerate() {
        if entry.workflow != workflow || entry.correlation_id != correlation_id {
            return Err(StoreError::InvalidOutbox(format!(
                "entry {} belongs to {} instance {}, not {} instance {}",
                entry.id, entry.workflow, entry.correlation_id, workflow, correlation_id
            )));
        }
        if entry.sequence != index as i32 {
            return Err(StoreError::InvalidOutbox(format!(
                "outbox sequence must be contiguous. Expected {}, got {}",
                index, entry.sequence
            )));
        }
    }
    Ok(())
}
