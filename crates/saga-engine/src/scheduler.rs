//! Timeout scheduling: deliver a message at a future time unless canceled.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use common::TokenId;
use tokio::task::AbortHandle;

use crate::bus::MessageBus;
use crate::clock::Clock;
use crate::error::{BusError, SchedulerError};
use crate::workflow::Message;

/// Arms and cancels delayed deliveries.
///
/// Both operations are idempotent per token. Once a token has fired or been
/// canceled it is retired and cannot be armed again for the retention window,
/// so replaying an outbox entry cannot resurrect a timer.
#[async_trait]
pub trait Scheduler<M: Message>: Send + Sync {
    /// Delivers `message` on the bus at `deliver_at`.
    async fn schedule(
        &self,
        token: TokenId,
        deliver_at: DateTime<Utc>,
        message: M,
    ) -> Result<(), SchedulerError>;

    /// Cancels a pending delivery. Unknown tokens are ignored.
    async fn cancel(&self, token: TokenId) -> Result<(), SchedulerError>;
}

/// Hours a fired or canceled token is remembered by default.
pub const DEFAULT_RETIRED_RETENTION_HOURS: i64 = 24;

/// Fired and canceled tokens, forgotten once older than the retention window.
#[derive(Debug)]
struct RetiredTokens {
    tokens: HashSet<TokenId>,
    order: VecDeque<(DateTime<Utc>, TokenId)>,
    retention: TimeDelta,
}

impl RetiredTokens {
    fn new(retention: TimeDelta) -> Self {
        Self {
            tokens: HashSet::new(),
            order: VecDeque::new(),
            retention,
        }
    }

    fn contains(&self, token: &TokenId) -> bool {
        self.tokens.contains(token)
    }

    fn retire(&mut self, token: TokenId, at: DateTime<Utc>) {
        if self.tokens.insert(token) {
            self.order.push_back((at, token));
        }
        self.prune(at);
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let Some(cutoff) = now.checked_sub_signed(self.retention) else {
            return;
        };
        while let Some((at, token)) = self.order.front().copied() {
            if at >= cutoff {
                break;
            }
            self.order.pop_front();
            self.tokens.remove(&token);
        }
    }

    fn len(&self) -> usize {
        self.tokens.len()
    }
}

#[derive(Debug)]
struct Timer<M> {
    deliver_at: DateTime<Utc>,
    seq: u64,
    message: M,
}

#[derive(Debug)]
struct TimerTable<M> {
    pending: HashMap<TokenId, Timer<M>>,
    retired: RetiredTokens,
    // Latest time passed to `advance_to`.
    watermark: DateTime<Utc>,
    next_seq: u64,
    fail: bool,
}

impl<M> TimerTable<M> {
    fn new(retention: TimeDelta) -> Self {
        Self {
            pending: HashMap::new(),
            retired: RetiredTokens::new(retention),
            watermark: DateTime::<Utc>::MIN_UTC,
            next_seq: 0,
            fail: false,
        }
    }
}

/// A scheduler driven by explicit calls to [`advance_to`](Self::advance_to).
///
/// Time never passes on its own, which makes expiry tests deterministic.
#[derive(Clone)]
pub struct InMemoryScheduler<M: Message> {
    bus: Arc<dyn MessageBus<M>>,
    table: Arc<Mutex<TimerTable<M>>>,
}

impl<M: Message> InMemoryScheduler<M> {
    /// Creates a scheduler that delivers onto `bus`.
    pub fn new(bus: Arc<dyn MessageBus<M>>) -> Self {
        Self::with_retention(bus, TimeDelta::hours(DEFAULT_RETIRED_RETENTION_HOURS))
    }

    /// Creates a scheduler that forgets retired tokens after `retention`.
    pub fn with_retention(bus: Arc<dyn MessageBus<M>>, retention: TimeDelta) -> Self {
        Self {
            bus,
            table: Arc::new(Mutex::new(TimerTable::new(retention))),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, TimerTable<M>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publishes every timer due at or before `now`, earliest first.
    ///
    /// Returns the number of messages delivered.
    pub async fn advance_to(&self, now: DateTime<Utc>) -> Result<usize, BusError> {
        {
            let mut table = self.table();
            table.watermark = table.watermark.max(now);
            table.retired.prune(now);
        }
        let mut delivered = 0;
        loop {
            let due = {
                let table = self.table();
                table
                    .pending
                    .iter()
                    .filter(|(_, timer)| timer.deliver_at <= now)
                    .min_by_key(|(_, timer)| (timer.deliver_at, timer.seq))
                    .map(|(token, timer)| (*token, timer.message.clone()))
            };
            let Some((token, message)) = due else {
                return Ok(delivered);
            };

            self.bus.publish(message).await?;

            let mut table = self.table();
            table.pending.remove(&token);
            table.retired.retire(token, now);
            delivered += 1;
            tracing::debug!(%token, "timer fired");
        }
    }

    /// Returns the number of armed timers.
    pub fn pending_count(&self) -> usize {
        self.table().pending.len()
    }

    /// Returns true if the token is armed.
    pub fn is_scheduled(&self, token: TokenId) -> bool {
        self.table().pending.contains_key(&token)
    }

    /// Returns the delivery time of an armed token.
    pub fn deliver_at(&self, token: TokenId) -> Option<DateTime<Utc>> {
        self.table().pending.get(&token).map(|t| t.deliver_at)
    }

    /// Returns the number of tokens remembered as fired or canceled.
    pub fn retired_count(&self) -> usize {
        self.table().retired.len()
    }

    /// Makes every schedule and cancel fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.table().fail = fail;
    }
}

#[async_trait]
impl<M: Message> Scheduler<M> for InMemoryScheduler<M> {
    async fn schedule(
        &self,
        token: TokenId,
        deliver_at: DateTime<Utc>,
        message: M,
    ) -> Result<(), SchedulerError> {
        let mut table = self.table();
        if table.fail {
            return Err(SchedulerError::Unavailable("scheduling disabled".to_string()));
        }
        if table.retired.contains(&token) || table.pending.contains_key(&token) {
            return Ok(());
        }
        let seq = table.next_seq;
        table.next_seq += 1;
        table.pending.insert(
            token,
            Timer {
                deliver_at,
                seq,
                message,
            },
        );
        Ok(())
    }

    async fn cancel(&self, token: TokenId) -> Result<(), SchedulerError> {
        let mut table = self.table();
        if table.fail {
            return Err(SchedulerError::Unavailable("scheduling disabled".to_string()));
        }
        table.pending.remove(&token);
        let at = table.watermark;
        table.retired.retire(token, at);
        Ok(())
    }
}

#[derive(Debug)]
struct TaskTable {
    tasks: HashMap<TokenId, AbortHandle>,
    retired: RetiredTokens,
}

/// A scheduler backed by one sleeping tokio task per timer.
///
/// Timers live in process memory. After a restart the host re-arms them
/// from saga state.
#[derive(Clone)]
pub struct TokioScheduler<M: Message> {
    bus: Arc<dyn MessageBus<M>>,
    clock: Arc<dyn Clock>,
    table: Arc<Mutex<TaskTable>>,
}

impl<M: Message> TokioScheduler<M> {
    /// Creates a scheduler that delivers onto `bus`, measuring delays with `clock`.
    pub fn new(bus: Arc<dyn MessageBus<M>>, clock: Arc<dyn Clock>) -> Self {
        Self::with_retention(bus, clock, TimeDelta::hours(DEFAULT_RETIRED_RETENTION_HOURS))
    }

    /// Creates a scheduler that forgets retired tokens after `retention`.
    pub fn with_retention(
        bus: Arc<dyn MessageBus<M>>,
        clock: Arc<dyn Clock>,
        retention: TimeDelta,
    ) -> Self {
        Self {
            bus,
            clock,
            table: Arc::new(Mutex::new(TaskTable {
                tasks: HashMap::new(),
                retired: RetiredTokens::new(retention),
            })),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, TaskTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the number of armed timers.
    pub fn pending_count(&self) -> usize {
        self.table().tasks.len()
    }

    /// Returns the number of tokens remembered as fired or canceled.
    pub fn retired_count(&self) -> usize {
        self.table().retired.len()
    }
}

#[async_trait]
impl<M: Message> Scheduler<M> for TokioScheduler<M> {
    async fn schedule(
        &self,
        token: TokenId,
        deliver_at: DateTime<Utc>,
        message: M,
    ) -> Result<(), SchedulerError> {
        let delay = (deliver_at - self.clock.now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        let mut table = self.table();
        if table.retired.contains(&token) || table.tasks.contains_key(&token) {
            return Ok(());
        }

        let bus = Arc::clone(&self.bus);
        let clock = Arc::clone(&self.clock);
        let shared = Arc::clone(&self.table);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut table = shared.lock().unwrap_or_else(|e| e.into_inner());
                if table.tasks.remove(&token).is_none() {
                    return;
                }
                table.retired.retire(token, clock.now());
            }
            if let Err(e) = bus.publish(message).await {
                tracing::error!(%token, error = %e, "failed to deliver timer");
            }
        });
        // Inserted under the lock, so the task cannot observe a missing entry.
        table.tasks.insert(token, handle.abort_handle());
        Ok(())
    }

    async fn cancel(&self, token: TokenId) -> Result<(), SchedulerError> {
        let now = self.clock.now();
        let mut table = self.table();
        table.retired.retire(token, now);
        if let Some(handle) = table.tasks.remove(&token) {
            handle.abort();
        }
        Ok(())
    }
}
