use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    CorrelationId, FieldMatch, OutboxEntry, OutboxId, Result, SagaRecord, StoreError, Version,
    store::{SagaStore, validate_outbox},
};

type InstanceKey = (String, CorrelationId);

/// In-memory saga store implementation for testing and single-process hosts.
///
/// Provides the same version-checked, outbox-staging semantics as the
/// PostgreSQL implementation. Writes take the instance lock before the
/// outbox lock so both change under one critical section. Dispatched outbox
/// entries are dropped at once instead of being kept for a later purge.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    instances: Arc<RwLock<HashMap<InstanceKey, SagaRecord>>>,
    outbox: Arc<RwLock<Vec<OutboxEntry>>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live instances of a workflow.
    pub async fn instance_count(&self, workflow: &str) -> usize {
        self.instances
            .read()
            .await
            .keys()
            .filter(|(w, _)| w == workflow)
            .count()
    }

    /// Returns every outbox entry still held, in staging order.
    pub async fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.outbox.read().await.clone()
    }

    /// Clears all instances and outbox entries.
    pub async fn clear(&self) {
        self.instances.write().await.clear();
        self.outbox.write().await.clear();
    }

    fn check_version(
        workflow: &str,
        correlation_id: CorrelationId,
        current: Version,
        expected: Version,
    ) -> Result<()> {
        if current != expected {
            return Err(StoreError::ConcurrencyConflict {
                workflow: workflow.to_string(),
                correlation_id,
                expected,
                actual: current,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn get(
        &self,
        workflow: &str,
        correlation_id: CorrelationId,
    ) -> Result<Option<SagaRecord>> {
        let instances = self.instances.read().await;
        Ok(instances
            .get(&(workflow.to_string(), correlation_id))
            .cloned())
    }

    async fn find(&self, workflow: &str, matches: &[FieldMatch]) -> Result<Vec<SagaRecord>> {
        let instances = self.instances.read().await;
        let mut found: Vec<_> = instances
            .values()
            .filter(|r| r.workflow == workflow && r.matches(matches))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.correlation_id);
        Ok(found)
    }

    async fn save(
        &self,
        mut record: SagaRecord,
        expected: Version,
        outbox: Vec<OutboxEntry>,
    ) -> Result<Version> {
        validate_outbox(&record.workflow, record.correlation_id, &outbox)?;

        let key = (record.workflow.clone(), record.correlation_id);
        let mut instances = self.instances.write().await;

        let current = instances
            .get(&key)
            .map(|r| r.version)
            .unwrap_or(Version::initial());
        Self::check_version(&record.workflow, record.correlation_id, current, expected)?;

        let new_version = expected.next();
        record.version = new_version;
        record.updated_at = Utc::now();

        let mut staged = self.outbox.write().await;
        instances.insert(key, record);
        staged.extend(outbox);

        Ok(new_version)
    }

    async fn delete(
        &self,
        workflow: &str,
        correlation_id: CorrelationId,
        expected: Version,
        outbox: Vec<OutboxEntry>,
    ) -> Result<()> {
        validate_outbox(workflow, correlation_id, &outbox)?;

        let key = (workflow.to_string(), correlation_id);
        let mut instances = self.instances.write().await;

        let current = instances
            .get(&key)
            .map(|r| r.version)
            .unwrap_or(Version::initial());
        Self::check_version(workflow, correlation_id, current, expected)?;

        let mut staged = self.outbox.write().await;
        instances.remove(&key);
        staged.extend(outbox);

        Ok(())
    }

    async fn pending_outbox(&self) -> Result<Vec<OutboxEntry>> {
        let staged = self.outbox.read().await;
        Ok(staged.iter().filter(|e| e.is_pending()).cloned().collect())
    }

    async fn mark_dispatched(&self, id: OutboxId) -> Result<()> {
        self.outbox.write().await.retain(|e| e.id != id);
        Ok(())
    }

    async fn purge_dispatched(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut staged = self.outbox.write().await;
        let held = staged.len();
        staged.retain(|e| !matches!(e.dispatched_at, Some(at) if at < before));
        Ok((held - staged.len()) as u64)
    }
}
