//! Delivery of staged effects to the bus and scheduler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use saga_store::{OutboxEntry, SagaStore};

use crate::bus::MessageBus;
use crate::effect::Effect;
use crate::error::SagaError;
use crate::scheduler::Scheduler;
use crate::workflow::Message;

/// Moves committed outbox entries onto the bus and scheduler.
///
/// Entries are delivered in order and marked dispatched one by one. Delivery
/// stops at the first failure, leaving the rest pending for
/// [`recover`](Self::recover). Redelivery is safe: consumers ignore
/// duplicates and schedulers ignore retired tokens.
pub struct OutboxRelay<M: Message, S: SagaStore> {
    store: S,
    bus: Arc<dyn MessageBus<M>>,
    scheduler: Arc<dyn Scheduler<M>>,
}

impl<M: Message, S: SagaStore + Clone> Clone for OutboxRelay<M, S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            bus: Arc::clone(&self.bus),
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}

impl<M: Message, S: SagaStore> OutboxRelay<M, S> {
    /// Creates a relay.
    pub fn new(store: S, bus: Arc<dyn MessageBus<M>>, scheduler: Arc<dyn Scheduler<M>>) -> Self {
        Self {
            store,
            bus,
            scheduler,
        }
    }

    /// Delivers the given entries in order. Returns how many were delivered.
    pub async fn dispatch(&self, entries: &[OutboxEntry]) -> Result<usize, SagaError> {
        for entry in entries {
            let effect: Effect<M> = serde_json::from_value(entry.effect.clone())?;
            let kind = effect.kind();

            match effect {
                Effect::Publish { message } => self.bus.publish(message).await?,
                Effect::Schedule {
                    token,
                    deliver_at,
                    message,
                } => self.scheduler.schedule(token, deliver_at, message).await?,
                Effect::Unschedule { token } => self.scheduler.cancel(token).await?,
            }

            self.store.mark_dispatched(entry.id).await?;
            metrics::counter!("saga_outbox_dispatched_total", "kind" => kind).increment(1);
            tracing::debug!(
                outbox_id = %entry.id,
                workflow = %entry.workflow,
                correlation_id = %entry.correlation_id,
                kind,
                "outbox entry dispatched"
            );
        }
        Ok(entries.len())
    }

    /// Delivers every pending entry in the store, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize, SagaError> {
        let pending = self.store.pending_outbox().await?;
        if pending.is_empty() {
            return Ok(0);
        }
        tracing::info!(pending = pending.len(), "recovering undelivered outbox entries");
        self.dispatch(&pending).await
    }

    /// Drops entries dispatched before `before`. Returns how many were removed.
    pub async fn purge(&self, before: DateTime<Utc>) -> Result<u64, SagaError> {
        Ok(self.store.purge_dispatched(before).await?)
    }
}
