//! Wiring of both library workflows onto one runtime.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::CorrelationId;
use saga_engine::{
    Clock, Delivery, InMemoryBus, MessageBus, OutboxRelay, SagaError, SagaInstance, SagaRuntime,
    SagaStore, Scheduler, TransitionExecutor,
};

use crate::book::{self, Book};
use crate::config::LibraryConfig;
use crate::contracts::LibraryMessage;
use crate::reservation::{self, Reservation, ReservationState};

/// The Book and Reservation workflows sharing one store, bus and scheduler.
///
/// Reservation is registered first, so a `ReservationRequested` creates the
/// reservation before the book's `BookReserved` reply can arrive for it.
pub struct LibraryRuntime<S: SagaStore + Clone> {
    books: Arc<TransitionExecutor<Book, S>>,
    reservations: Arc<TransitionExecutor<Reservation, S>>,
    runtime: Arc<SagaRuntime<LibraryMessage>>,
    scheduler: Arc<dyn Scheduler<LibraryMessage>>,
    relay: OutboxRelay<LibraryMessage, S>,
}

impl<S: SagaStore + Clone + 'static> LibraryRuntime<S> {
    /// Builds both workflow definitions and registers them.
    pub fn new(
        config: &LibraryConfig,
        store: S,
        bus: Arc<dyn MessageBus<LibraryMessage>>,
        scheduler: Arc<dyn Scheduler<LibraryMessage>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SagaError> {
        let reservations = Arc::new(TransitionExecutor::new(
            reservation::definition(config)?,
            store.clone(),
            Arc::clone(&bus),
            Arc::clone(&scheduler),
            Arc::clone(&clock),
        ));
        let books = Arc::new(TransitionExecutor::new(
            book::definition()?,
            store.clone(),
            Arc::clone(&bus),
            Arc::clone(&scheduler),
            clock,
        ));
        let runtime = Arc::new(
            SagaRuntime::new()
                .register(reservations.clone())
                .register(books.clone()),
        );

        Ok(Self {
            books,
            reservations,
            runtime,
            scheduler: Arc::clone(&scheduler),
            relay: OutboxRelay::new(store, bus, scheduler),
        })
    }

    /// Returns the shared runtime, for pumping a bus receiver.
    pub fn runtime(&self) -> Arc<SagaRuntime<LibraryMessage>> {
        Arc::clone(&self.runtime)
    }

    /// Delivers a message to every interested workflow.
    pub async fn handle(&self, message: &LibraryMessage) -> Vec<Delivery> {
        self.runtime.handle(message).await
    }

    /// Handles queued messages until the bus is empty.
    pub async fn drain(&self, bus: &InMemoryBus<LibraryMessage>) -> Result<usize, SagaError> {
        self.runtime.drain(bus).await
    }

    /// Loads a book instance.
    pub async fn book(&self, book_id: CorrelationId) -> Result<Option<SagaInstance<Book>>, SagaError> {
        self.books.load(book_id).await
    }

    /// Loads a reservation instance.
    pub async fn reservation(
        &self,
        reservation_id: CorrelationId,
    ) -> Result<Option<SagaInstance<Reservation>>, SagaError> {
        self.reservations.load(reservation_id).await
    }

    /// Redelivers outbox entries left behind by failed dispatches.
    pub async fn recover_outbox(&self) -> Result<usize, SagaError> {
        self.relay.recover().await
    }

    /// Drops outbox entries dispatched before `before`.
    pub async fn purge_outbox(&self, before: DateTime<Utc>) -> Result<u64, SagaError> {
        self.relay.purge(before).await
    }

    /// Arms the expiry timer of every held reservation again.
    ///
    /// Timers do not survive a restart; the token and deadline stored on the
    /// reservation are enough to rebuild them. Already armed tokens are
    /// left alone. Returns the number of timers handed to the scheduler.
    pub async fn rearm_expirations(&self) -> Result<usize, SagaError> {
        let held = self
            .reservations
            .instances_in(&[ReservationState::Reserved])
            .await?;
        let mut rearmed = 0;
        for reservation in held {
            let (Some(token), Some(expires_at)) = (
                reservation.data.expiration_token_id,
                reservation.data.expires_at,
            ) else {
                tracing::warn!(
                    reservation_id = %reservation.correlation_id,
                    "held reservation has no expiry timer"
                );
                continue;
            };
            self.scheduler
                .schedule(
                    token,
                    expires_at,
                    LibraryMessage::reservation_expired(reservation.correlation_id),
                )
                .await?;
            rearmed += 1;
        }
        tracing::info!(rearmed, "re-armed reservation expiry timers");
        Ok(rearmed)
    }
}
