//! End-to-end tests of the Book and Reservation workflows on in-memory
//! collaborators, with simulated time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use common::CorrelationId;
use library::contracts::{BookReservationCanceledData, BookReservedData};
use library::{
    BookData, BookState, LibraryConfig, LibraryMessage, LibraryRuntime, MemberId,
    ReservationData, ReservationState, book, message_types::*, reservation,
};
use saga_engine::{
    Clock, InMemoryBus, InMemoryScheduler, ManualClock, MessageBus, OutcomeKind, SagaError,
    SagaInstance, SagaStore, Stage, TransitionExecutor, Version, Workflow, WorkflowDefinition,
    WorkflowState,
};
use saga_store::InMemorySagaStore;

struct Harness {
    store: InMemorySagaStore,
    bus: InMemoryBus<LibraryMessage>,
    scheduler: InMemoryScheduler<LibraryMessage>,
    clock: ManualClock,
    library: LibraryRuntime<InMemorySagaStore>,
}

impl Harness {
    fn new() -> Self {
        let store = InMemorySagaStore::new();
        let bus = InMemoryBus::new();
        let scheduler = InMemoryScheduler::new(Arc::new(bus.clone()));
        let clock = ManualClock::new(Utc::now());
        let library = LibraryRuntime::new(
            &LibraryConfig::default(),
            store.clone(),
            Arc::new(bus.clone()),
            Arc::new(scheduler.clone()),
            Arc::new(clock.clone()),
        )
        .unwrap();
        Self {
            store,
            bus,
            scheduler,
            clock,
            library,
        }
    }

    /// Publishes a message and processes everything it triggers.
    async fn send(&self, message: LibraryMessage) {
        self.bus.publish(message).await.unwrap();
        self.library.drain(&self.bus).await.unwrap();
    }

    /// Moves simulated time forward, firing due timers.
    async fn elapse(&self, by: TimeDelta) {
        let now = self.clock.advance(by);
        self.scheduler.advance_to(now).await.unwrap();
        self.library.drain(&self.bus).await.unwrap();
    }

    async fn add_book(&self, book_id: CorrelationId) {
        self.send(LibraryMessage::book_added(
            book_id,
            "0307969959",
            "Neuromancer",
            self.clock.now(),
        ))
        .await;
    }

    async fn request(
        &self,
        reservation_id: CorrelationId,
        book_id: CorrelationId,
        member_id: MemberId,
        duration: Option<Duration>,
    ) {
        self.send(LibraryMessage::reservation_requested(
            reservation_id,
            book_id,
            member_id,
            self.clock.now(),
            duration,
        ))
        .await;
    }

    async fn book_state(&self, book_id: CorrelationId) -> Option<BookState> {
        self.library.book(book_id).await.unwrap().map(|b| b.state)
    }

    async fn reservation_state(&self, reservation_id: CorrelationId) -> Option<ReservationState> {
        self.library
            .reservation(reservation_id)
            .await
            .unwrap()
            .map(|r| r.state)
    }

    async fn published(&self, message_type: &str) -> usize {
        self.bus.published_of_type(message_type).await.len()
    }
}

#[tokio::test]
async fn added_book_is_available() {
    let h = Harness::new();
    let book_id = CorrelationId::new();
    h.add_book(book_id).await;

    let book = h.library.book(book_id).await.unwrap().unwrap();
    assert_eq!(book.state, BookState::Available);
    assert_eq!(book.data.title, "Neuromancer");
    assert_eq!(book.data.isbn, "0307969959");
    assert_eq!(book.data.date_added, Some(h.clock.now().date_naive()));
}

#[tokio::test]
async fn reservation_request_reserves_book_and_reservation() {
    let h = Harness::new();
    let book_id = CorrelationId::new();
    let reservation_id = CorrelationId::new();
    let member_id = MemberId::new();
    h.add_book(book_id).await;
    h.request(reservation_id, book_id, member_id, None).await;

    assert_eq!(h.book_state(book_id).await, Some(BookState::Reserved));

    let reservation = h.library.reservation(reservation_id).await.unwrap().unwrap();
    assert_eq!(reservation.state, ReservationState::Reserved);
    assert_eq!(reservation.data.book_id, Some(book_id));
    assert_eq!(reservation.data.member_id, Some(member_id));
    assert!(reservation.data.reserved.is_some());
    assert!(reservation.data.expiration_token_id.is_some());

    let reserved = h.bus.published_of_type(BOOK_RESERVED).await;
    assert_eq!(reserved.len(), 1);
    assert!(matches!(
        &reserved[0],
        LibraryMessage::BookReserved(d)
            if d.reservation_id == reservation_id
                && d.book_id == book_id
                && d.member_id == member_id
    ));
}

#[tokio::test]
async fn requested_duration_expires_exactly_once() {
    let h = Harness::new();
    let book_id = CorrelationId::new();
    let reservation_id = CorrelationId::new();
    h.add_book(book_id).await;
    h.request(
        reservation_id,
        book_id,
        MemberId::new(),
        Some(Duration::from_secs(8 * 3600)),
    )
    .await;

    h.elapse(TimeDelta::hours(7)).await;
    assert_eq!(
        h.reservation_state(reservation_id).await,
        Some(ReservationState::Reserved)
    );

    for _ in 0..17 {
        h.elapse(TimeDelta::hours(1)).await;
    }

    assert_eq!(h.published(RESERVATION_EXPIRED).await, 1);
    assert_eq!(h.published(BOOK_RESERVATION_CANCELED).await, 1);
    assert_eq!(h.reservation_state(reservation_id).await, None);
    assert_eq!(h.book_state(book_id).await, Some(BookState::Available));
    assert_eq!(h.scheduler.pending_count(), 0);
}

#[tokio::test]
async fn default_duration_applies_when_none_requested() {
    let h = Harness::new();
    let book_id = CorrelationId::new();
    let reservation_id = CorrelationId::new();
    h.add_book(book_id).await;
    h.request(reservation_id, book_id, MemberId::new(), None).await;

    h.elapse(TimeDelta::hours(23)).await;
    assert_eq!(
        h.reservation_state(reservation_id).await,
        Some(ReservationState::Reserved)
    );

    h.elapse(TimeDelta::hours(1)).await;
    assert_eq!(h.reservation_state(reservation_id).await, None);
    assert_eq!(h.book_state(book_id).await, Some(BookState::Available));
}

#[tokio::test]
async fn cancellation_after_expiry_is_a_no_op() {
    let h = Harness::new();
    let book_id = CorrelationId::new();
    let reservation_id = CorrelationId::new();
    h.add_book(book_id).await;
    h.request(
        reservation_id,
        book_id,
        MemberId::new(),
        Some(Duration::from_secs(3600)),
    )
    .await;
    h.elapse(TimeDelta::hours(2)).await;
    assert_eq!(h.published(BOOK_RESERVATION_CANCELED).await, 1);

    let cancel = LibraryMessage::cancellation_requested(reservation_id, h.clock.now());
    let deliveries = h.library.handle(&cancel).await;
    assert_eq!(deliveries.len(), 1);
    let summary = deliveries[0].result.as_ref().unwrap();
    assert_eq!(summary.kind, OutcomeKind::Ignored);

    h.library.drain(&h.bus).await.unwrap();
    assert_eq!(h.published(BOOK_RESERVATION_CANCELED).await, 1);
    assert_eq!(h.reservation_state(reservation_id).await, None);
}

#[tokio::test]
async fn cancellation_releases_book_and_disarms_expiry() {
    let h = Harness::new();
    let book_id = CorrelationId::new();
    let reservation_id = CorrelationId::new();
    h.add_book(book_id).await;
    h.request(reservation_id, book_id, MemberId::new(), None).await;
    assert_eq!(h.scheduler.pending_count(), 1);

    h.send(LibraryMessage::cancellation_requested(
        reservation_id,
        h.clock.now(),
    ))
    .await;

    assert_eq!(h.reservation_state(reservation_id).await, None);
    assert_eq!(h.book_state(book_id).await, Some(BookState::Available));
    assert_eq!(h.scheduler.pending_count(), 0);

    h.elapse(TimeDelta::days(2)).await;
    assert_eq!(h.published(RESERVATION_EXPIRED).await, 0);
}

#[tokio::test]
async fn replayed_book_added_does_not_reset_reserved_book() {
    let h = Harness::new();
    let book_id = CorrelationId::new();
    h.add_book(book_id).await;
    h.request(CorrelationId::new(), book_id, MemberId::new(), None)
        .await;
    let before = h.library.book(book_id).await.unwrap().unwrap();

    h.add_book(book_id).await;

    let after = h.library.book(book_id).await.unwrap().unwrap();
    assert_eq!(after.state, BookState::Reserved);
    assert_eq!(after.version, before.version);
}

#[tokio::test]
async fn second_request_for_reserved_book_is_ignored_by_book() {
    let h = Harness::new();
    let book_id = CorrelationId::new();
    let first = CorrelationId::new();
    let second = CorrelationId::new();
    h.add_book(book_id).await;
    h.request(first, book_id, MemberId::new(), None).await;
    h.request(second, book_id, MemberId::new(), None).await;

    assert_eq!(h.published(BOOK_RESERVED).await, 1);
    assert_eq!(h.reservation_state(first).await, Some(ReservationState::Reserved));
    assert_eq!(h.reservation_state(second).await, Some(ReservationState::Requested));
}

#[tokio::test]
async fn checkout_finalizes_reservation_by_book_id() {
    let h = Harness::new();
    let book_id = CorrelationId::new();
    let reservation_id = CorrelationId::new();
    let member_id = MemberId::new();
    h.add_book(book_id).await;
    h.request(reservation_id, book_id, member_id, None).await;

    h.send(LibraryMessage::book_checked_out(
        book_id,
        member_id,
        h.clock.now(),
    ))
    .await;

    assert_eq!(h.book_state(book_id).await, Some(BookState::CheckedOut));
    assert_eq!(h.reservation_state(reservation_id).await, None);
    assert_eq!(h.scheduler.pending_count(), 0);

    h.elapse(TimeDelta::days(2)).await;
    assert_eq!(h.book_state(book_id).await, Some(BookState::CheckedOut));
    assert_eq!(h.published(BOOK_RESERVATION_CANCELED).await, 0);
}

#[tokio::test]
async fn checkout_ignores_reservations_still_requested() {
    let h = Harness::new();
    let book_id = CorrelationId::new();
    let holder = CorrelationId::new();
    let waiting = CorrelationId::new();
    let member_id = MemberId::new();
    h.add_book(book_id).await;
    h.request(holder, book_id, member_id, None).await;
    h.request(waiting, book_id, MemberId::new(), None).await;

    h.send(LibraryMessage::book_checked_out(
        book_id,
        member_id,
        h.clock.now(),
    ))
    .await;

    assert_eq!(h.reservation_state(holder).await, None);
    assert_eq!(h.reservation_state(waiting).await, Some(ReservationState::Requested));
}

#[tokio::test]
async fn late_expiry_for_unknown_reservation_is_swallowed() {
    let h = Harness::new();
    let reservation_id = CorrelationId::new();

    let deliveries = h
        .library
        .handle(&LibraryMessage::reservation_expired(reservation_id))
        .await;
    assert_eq!(deliveries.len(), 1);
    assert_eq!(
        deliveries[0].result.as_ref().unwrap().kind,
        OutcomeKind::Finalized
    );
    assert_eq!(h.store.instance_count("Reservation").await, 0);
    assert!(h.bus.published().await.is_empty());
}

#[tokio::test]
async fn publish_failure_is_recovered_from_outbox() {
    let h = Harness::new();
    let book_id = CorrelationId::new();
    let reservation_id = CorrelationId::new();
    h.add_book(book_id).await;

    let request = LibraryMessage::reservation_requested(
        reservation_id,
        book_id,
        MemberId::new(),
        h.clock.now(),
        None,
    );
    h.bus.set_fail_on_publish(true).await;
    let deliveries = h.library.handle(&request).await;
    assert!(deliveries.iter().any(|d| d.result.is_err()));
    assert_eq!(h.book_state(book_id).await, Some(BookState::Reserved));

    h.bus.set_fail_on_publish(false).await;
    assert_eq!(h.library.recover_outbox().await.unwrap(), 1);
    h.library.drain(&h.bus).await.unwrap();

    assert_eq!(
        h.reservation_state(reservation_id).await,
        Some(ReservationState::Reserved)
    );
}

#[tokio::test]
async fn hold_past_the_end_of_time_arms_nothing() {
    let h = Harness::new();
    let book_id = CorrelationId::new();
    let reservation_id = CorrelationId::new();
    h.add_book(book_id).await;

    h.bus
        .publish(LibraryMessage::reservation_requested(
            reservation_id,
            book_id,
            MemberId::new(),
            h.clock.now(),
            Some(Duration::from_secs(10_000_000_000 * 3600)),
        ))
        .await
        .unwrap();
    let err = h.library.drain(&h.bus).await.unwrap_err();

    assert!(matches!(err, SagaError::InvalidMessage(_)));
    assert_eq!(
        h.reservation_state(reservation_id).await,
        Some(ReservationState::Requested)
    );
    assert_eq!(h.scheduler.pending_count(), 0);
}

#[tokio::test]
async fn restart_rearms_held_reservation_expiry() {
    let h = Harness::new();
    let book_id = CorrelationId::new();
    let reservation_id = CorrelationId::new();
    h.add_book(book_id).await;
    h.request(
        reservation_id,
        book_id,
        MemberId::new(),
        Some(Duration::from_secs(2 * 3600)),
    )
    .await;
    let held = h.library.reservation(reservation_id).await.unwrap().unwrap();
    let token = held.data.expiration_token_id.unwrap();

    // A fresh process: same store and bus, empty scheduler.
    let scheduler = InMemoryScheduler::new(Arc::new(h.bus.clone()));
    let restarted = LibraryRuntime::new(
        &LibraryConfig::default(),
        h.store.clone(),
        Arc::new(h.bus.clone()),
        Arc::new(scheduler.clone()),
        Arc::new(h.clock.clone()),
    )
    .unwrap();
    assert_eq!(scheduler.pending_count(), 0);

    assert_eq!(restarted.rearm_expirations().await.unwrap(), 1);
    assert_eq!(restarted.rearm_expirations().await.unwrap(), 1);
    assert_eq!(scheduler.pending_count(), 1);
    assert_eq!(scheduler.deliver_at(token), held.data.expires_at);

    let now = h.clock.advance(TimeDelta::hours(1));
    scheduler.advance_to(now).await.unwrap();
    assert_eq!(
        h.reservation_state(reservation_id).await,
        Some(ReservationState::Reserved)
    );

    let now = h.clock.advance(TimeDelta::hours(1));
    assert_eq!(scheduler.advance_to(now).await.unwrap(), 1);
    restarted.drain(&h.bus).await.unwrap();

    assert_eq!(h.reservation_state(reservation_id).await, None);
    assert_eq!(h.book_state(book_id).await, Some(BookState::Available));
    assert_eq!(h.published(BOOK_RESERVATION_CANCELED).await, 1);
}

#[tokio::test]
async fn restart_without_held_reservations_arms_nothing() {
    let h = Harness::new();
    let book_id = CorrelationId::new();
    h.add_book(book_id).await;
    h.request(CorrelationId::new(), book_id, MemberId::new(), None)
        .await;
    h.request(CorrelationId::new(), book_id, MemberId::new(), None)
        .await;

    // One reservation is held and already armed; the waiting one has no timer.
    assert_eq!(h.library.rearm_expirations().await.unwrap(), 1);
    assert_eq!(h.scheduler.pending_count(), 1);
}

fn message_of_type(
    message_type: &str,
    reservation_id: CorrelationId,
    book_id: CorrelationId,
    member_id: MemberId,
    now: chrono::DateTime<Utc>,
) -> LibraryMessage {
    match message_type {
        BOOK_ADDED => LibraryMessage::book_added(book_id, "0307969959", "Neuromancer", now),
        RESERVATION_REQUESTED => {
            LibraryMessage::reservation_requested(reservation_id, book_id, member_id, now, None)
        }
        BOOK_RESERVED => LibraryMessage::BookReserved(BookReservedData {
            reservation_id,
            member_id,
            book_id,
            timestamp: now,
        }),
        BOOK_RESERVATION_CANCELED => {
            LibraryMessage::BookReservationCanceled(BookReservationCanceledData {
                reservation_id,
                book_id,
            })
        }
        BOOK_CHECKED_OUT => LibraryMessage::book_checked_out(book_id, member_id, now),
        RESERVATION_EXPIRED => LibraryMessage::reservation_expired(reservation_id),
        RESERVATION_CANCELLATION_REQUESTED => {
            LibraryMessage::cancellation_requested(reservation_id, now)
        }
        other => panic!("no sample for {other}"),
    }
}

/// Seeds one instance per (state, message type) pair without a transition
/// row, delivers the message and checks that nothing moved.
async fn assert_unlisted_pairs_change_nothing<W>(
    definition: WorkflowDefinition<W>,
    data: W::Data,
    ids: impl Fn(CorrelationId) -> (CorrelationId, CorrelationId),
) -> usize
where
    W: Workflow<Message = LibraryMessage>,
{
    let pairs: Vec<(W::State, &'static str)> = W::State::ALL
        .iter()
        .flat_map(|state| {
            definition
                .message_types()
                .into_iter()
                .map(move |message_type| (*state, message_type))
        })
        .filter(|(state, message_type)| {
            definition
                .transition(Stage::In(*state), message_type)
                .is_none()
        })
        .collect();

    let store = InMemorySagaStore::new();
    let bus = InMemoryBus::new();
    let scheduler = InMemoryScheduler::new(Arc::new(bus.clone()));
    let clock = ManualClock::new(Utc::now());
    let executor = TransitionExecutor::new(
        definition,
        store.clone(),
        Arc::new(bus.clone()),
        Arc::new(scheduler.clone()),
        Arc::new(clock.clone()),
    );

    for (state, message_type) in &pairs {
        let correlation_id = CorrelationId::new();
        let seeded = SagaInstance::<W> {
            correlation_id,
            state: *state,
            version: Version::initial(),
            data: data.clone(),
        };
        let version = store
            .save(seeded.to_record().unwrap(), Version::initial(), Vec::new())
            .await
            .unwrap();

        let (reservation_id, book_id) = ids(correlation_id);
        let message = message_of_type(
            message_type,
            reservation_id,
            book_id,
            MemberId::new(),
            clock.now(),
        );
        let outcome = executor.handle(&message).await.unwrap();

        assert!(outcome.is_ignored(), "{state:?} + {message_type}: {outcome:?}");
        assert!(outcome.effects().is_empty());
        let after = executor.load(correlation_id).await.unwrap().unwrap();
        assert_eq!(after.state, *state, "{state:?} + {message_type}");
        assert_eq!(after.version, version, "{state:?} + {message_type}");
    }

    assert!(bus.published().await.is_empty());
    assert_eq!(scheduler.pending_count(), 0);
    assert!(store.pending_outbox().await.unwrap().is_empty());
    pairs.len()
}

#[tokio::test]
async fn book_ignores_messages_without_a_transition_row() {
    let data = BookData {
        title: "Neuromancer".to_string(),
        isbn: "0307969959".to_string(),
        date_added: None,
    };
    let checked = assert_unlisted_pairs_change_nothing(book::definition().unwrap(), data, |id| {
        (CorrelationId::new(), id)
    })
    .await;

    // Available: 3 of 4, Reserved: 2 of 4, CheckedOut: 4 of 4.
    assert_eq!(checked, 9);
}

#[tokio::test]
async fn reservation_ignores_messages_without_a_transition_row() {
    let book_id = CorrelationId::new();
    let data = ReservationData {
        book_id: Some(book_id),
        member_id: Some(MemberId::new()),
        ..ReservationData::default()
    };
    let definition = reservation::definition(&LibraryConfig::default()).unwrap();
    let checked =
        assert_unlisted_pairs_change_nothing(definition, data, |id| (id, book_id)).await;

    // Requested: 4 of 5, Reserved: 2 of 5.
    assert_eq!(checked, 6);
}
