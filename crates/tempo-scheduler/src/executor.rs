use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use tempo_core::clock::{Clock, SystemClock};

use crate::error::{Result, SchedulerError};
use crate::store::ScheduleStore;
use crate::types::ScheduleState;

/// The host application's message-consumption boundary.
///
/// The only external effect of a release besides the store mutation —
/// typically a message-bus dispatch. The payload is the opaque bytes the
/// schedule was inserted with; decoding belongs to the host's codec.
pub trait Deliver: Send + Sync {
    fn deliver(&self, payload: &[u8])
        -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl<D: Deliver + ?Sized> Deliver for Arc<D> {
    fn deliver(
        &self,
        payload: &[u8],
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).deliver(payload)
    }
}

/// Orchestrates one release: load, deliver, then re-arm or complete.
pub struct ScheduleExecutor<S, D> {
    store: S,
    delivery: D,
    clock: Arc<dyn Clock>,
}

impl<S: ScheduleStore, D: Deliver> ScheduleExecutor<S, D> {
    pub fn new(store: S, delivery: D) -> Self {
        Self::with_clock(store, delivery, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, delivery: D, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            delivery,
            clock,
        }
    }

    /// Release one schedule.
    ///
    /// Delivers the payload, then advances the trigger time (recurring rule
    /// with a next occurrence), or marks the entry completed (one-shot, or
    /// exhausted series). Delivery failure leaves the entry untouched so a
    /// retry re-attempts delivery and re-advances correctly.
    ///
    /// The current state is deliberately not checked before delivering:
    /// this is an at-least-once engine, and callers are expected to feed it
    /// identifiers from `find_pending`, which bounds double delivery to
    /// true concurrent races.
    pub fn execute(&self, id: &str) -> Result<()> {
        let entry = self.store.find(id)?;

        self.delivery
            .deliver(&entry.payload)
            .map_err(SchedulerError::DeliveryFailed)?;

        match &entry.rule {
            Some(rule) => match rule.next(entry.trigger_at, entry.start_at)? {
                Some(next_trigger) => {
                    self.store
                        .update(id, ScheduleState::Pending, Some(next_trigger))?;
                    info!(%id, next = %next_trigger, "schedule re-armed");
                }
                None => {
                    self.store.update(id, ScheduleState::Completed, None)?;
                    info!(%id, "recurring schedule exhausted, completed");
                }
            },
            None => {
                self.store.update(id, ScheduleState::Completed, None)?;
                info!(%id, "one-shot schedule completed");
            }
        }

        self.store.record_execution(id, self.clock.now())?;
        Ok(())
    }

    /// Release everything due strictly before `before`, claiming each entry
    /// first so concurrent release loops do not double-deliver.
    ///
    /// Entries claimed by another racer are skipped; an entry that vanishes
    /// between claim and load is a benign race and is also skipped. On
    /// delivery failure the claimed entry is put back to pending before the
    /// error propagates, so the next tick retries it. Returns the number of
    /// schedules released.
    pub fn release_due(&self, before: DateTime<Utc>, limit: usize) -> Result<usize> {
        let due = self.store.find_pending(Some(before), limit)?;
        let mut released = 0;

        for id in due {
            if !self.store.claim(&id)? {
                debug!(%id, "lost claim race, skipping");
                continue;
            }
            match self.execute(&id) {
                Ok(()) => released += 1,
                Err(SchedulerError::NotFound { .. }) => {
                    warn!(%id, "schedule vanished after claim, skipping");
                }
                Err(e) => {
                    if let Err(restore) = self.store.update(&id, ScheduleState::Pending, None) {
                        error!(%id, "failed to restore claimed schedule: {restore}");
                    }
                    return Err(e);
                }
            }
        }

        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rusqlite::Connection;

    use tempo_core::clock::FixedClock;

    use crate::rule::{Freq, RecurrenceRule};
    use crate::store::SqliteScheduleStore;

    use super::*;

    /// Records every delivered payload.
    #[derive(Default)]
    struct RecordingDeliver {
        delivered: Mutex<Vec<Vec<u8>>>,
    }

    impl Deliver for RecordingDeliver {
        fn deliver(
            &self,
            payload: &[u8],
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.delivered.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    /// Always refuses the message.
    struct FailingDeliver;

    impl Deliver for FailingDeliver {
        fn deliver(
            &self,
            _payload: &[u8],
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Err("bus unavailable".into())
        }
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn open_store(now: DateTime<Utc>) -> Arc<SqliteScheduleStore> {
        let store = SqliteScheduleStore::with_clock(
            Connection::open_in_memory().unwrap(),
            Arc::new(FixedClock(now)),
        );
        store.setup().unwrap();
        Arc::new(store)
    }

    #[test]
    fn one_shot_completes_and_leaves_pending() {
        let now = ts("2026-05-01T12:00:00Z");
        let store = open_store(now);
        store
            .insert("abc", ts("2026-05-01T11:00:00Z"), b"hello", None, None)
            .unwrap();

        let delivery = Arc::new(RecordingDeliver::default());
        let executor = ScheduleExecutor::with_clock(
            Arc::clone(&store),
            Arc::clone(&delivery),
            Arc::new(FixedClock(now)),
        );

        assert_eq!(store.find_pending(Some(now), 0).unwrap(), vec!["abc"]);
        executor.execute("abc").unwrap();

        assert_eq!(delivery.delivered.lock().unwrap().as_slice(), &[b"hello".to_vec()]);
        let entry = store.find("abc").unwrap();
        assert_eq!(entry.state, ScheduleState::Completed);
        assert!(store.find_pending(Some(now), 0).unwrap().is_empty());
        assert_eq!(store.execution_count("abc").unwrap(), 1);
    }

    #[test]
    fn recurring_entry_is_rearmed_one_day_later() {
        let t0 = ts("2026-05-01T09:00:00Z");
        let store = open_store(t0);
        let rule = RecurrenceRule::new(Freq::Daily);
        store
            .insert("abc", t0, b"ping", Some(&rule), Some(t0))
            .unwrap();

        let executor = ScheduleExecutor::with_clock(
            Arc::clone(&store),
            Arc::new(RecordingDeliver::default()),
            Arc::new(FixedClock(t0)),
        );
        executor.execute("abc").unwrap();

        let entry = store.find("abc").unwrap();
        assert_eq!(entry.state, ScheduleState::Pending);
        assert_eq!(entry.trigger_at, ts("2026-05-02T09:00:00Z"));
    }

    #[test]
    fn exhausted_series_completes() {
        let t0 = ts("2026-05-01T09:00:00Z");
        let store = open_store(t0);
        // start is occurrence 1 of 1: no further occurrence exists
        let rule = RecurrenceRule::new(Freq::Daily).count(1);
        store
            .insert("abc", t0, b"ping", Some(&rule), Some(t0))
            .unwrap();

        let executor = ScheduleExecutor::with_clock(
            Arc::clone(&store),
            Arc::new(RecordingDeliver::default()),
            Arc::new(FixedClock(t0)),
        );
        executor.execute("abc").unwrap();

        assert_eq!(store.find("abc").unwrap().state, ScheduleState::Completed);
    }

    #[test]
    fn delivery_failure_leaves_entry_untouched() {
        let now = ts("2026-05-01T12:00:00Z");
        let store = open_store(now);
        let trigger = ts("2026-05-01T11:00:00Z");
        store.insert("abc", trigger, b"hello", None, None).unwrap();

        let executor = ScheduleExecutor::with_clock(
            Arc::clone(&store),
            FailingDeliver,
            Arc::new(FixedClock(now)),
        );
        assert!(matches!(
            executor.execute("abc"),
            Err(SchedulerError::DeliveryFailed(_))
        ));

        let entry = store.find("abc").unwrap();
        assert_eq!(entry.state, ScheduleState::Pending);
        assert_eq!(entry.trigger_at, trigger);
        assert_eq!(store.execution_count("abc").unwrap(), 0);
    }

    #[test]
    fn executing_missing_schedule_is_not_found() {
        let now = ts("2026-05-01T12:00:00Z");
        let executor = ScheduleExecutor::with_clock(
            open_store(now),
            Arc::new(RecordingDeliver::default()),
            Arc::new(FixedClock(now)),
        );
        assert!(matches!(
            executor.execute("missing"),
            Err(SchedulerError::NotFound { .. })
        ));
    }

    #[test]
    fn release_due_claims_and_releases_everything_due() {
        let now = ts("2026-05-01T12:00:00Z");
        let store = open_store(now);
        store
            .insert("due-1", ts("2026-05-01T10:00:00Z"), b"a", None, None)
            .unwrap();
        store
            .insert("due-2", ts("2026-05-01T11:00:00Z"), b"b", None, None)
            .unwrap();
        store
            .insert("later", ts("2026-05-01T13:00:00Z"), b"c", None, None)
            .unwrap();

        let delivery = Arc::new(RecordingDeliver::default());
        let executor = ScheduleExecutor::with_clock(
            Arc::clone(&store),
            Arc::clone(&delivery),
            Arc::new(FixedClock(now)),
        );
        assert_eq!(executor.release_due(now, 0).unwrap(), 2);
        assert_eq!(delivery.delivered.lock().unwrap().len(), 2);
        assert_eq!(store.find("later").unwrap().state, ScheduleState::Pending);
    }

    #[test]
    fn release_due_restores_pending_on_delivery_failure() {
        let now = ts("2026-05-01T12:00:00Z");
        let store = open_store(now);
        store
            .insert("abc", ts("2026-05-01T11:00:00Z"), b"a", None, None)
            .unwrap();

        let executor = ScheduleExecutor::with_clock(
            Arc::clone(&store),
            FailingDeliver,
            Arc::new(FixedClock(now)),
        );
        assert!(executor.release_due(now, 0).is_err());

        // the claimed row went back to pending, so a retry sees it again
        assert_eq!(store.find("abc").unwrap().state, ScheduleState::Pending);
        assert_eq!(store.find_pending(Some(now), 0).unwrap(), vec!["abc"]);
    }
}
