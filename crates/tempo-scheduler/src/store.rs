use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, instrument};

use tempo_core::clock::{Clock, SystemClock};

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::rule::RecurrenceRule;
use crate::types::{ScheduleEntry, ScheduleState};

/// Durable mapping from schedule identifier to schedule entry.
///
/// The persistence seam of the engine: the executor and facade only see
/// this trait, so hosts can swap [`SqliteScheduleStore`] for another
/// backend.
pub trait ScheduleStore: Send + Sync {
    /// Persist a new entry with state `pending`. Fails with `DuplicateId`
    /// if the identifier already exists.
    fn insert(
        &self,
        id: &str,
        trigger_at: DateTime<Utc>,
        payload: &[u8],
        rule: Option<&RecurrenceRule>,
        start_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Point lookup. Fails with `NotFound` when no row matches; stored
    /// payload bytes, rule text, and timestamps round-trip exactly.
    fn find(&self, id: &str) -> Result<ScheduleEntry>;

    /// Identifiers of pending entries, ordered by trigger time.
    ///
    /// `before` filters to `trigger_at < before`; `limit == 0` means
    /// unbounded. Each call runs a fresh query, so the result is stable
    /// under repeated calls with unchanged data.
    fn find_pending(&self, before: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<String>>;

    /// Write `state`, and `trigger_at` only when given (the prior trigger
    /// is kept otherwise). Fails with `NotFound` when no row was updated.
    fn update(
        &self,
        id: &str,
        state: ScheduleState,
        trigger_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Remove the entry. Idempotent: deleting an absent id is `Ok`.
    fn delete(&self, id: &str) -> Result<()>;

    /// Atomically transition `pending` → `running`. Returns `true` iff this
    /// caller won the row; exactly one of any number of concurrent claimers
    /// succeeds.
    fn claim(&self, id: &str) -> Result<bool>;

    /// Append a row to the execution log for `id`.
    fn record_execution(&self, id: &str, executed_at: DateTime<Utc>) -> Result<()>;

    /// Number of recorded releases for `id`.
    fn execution_count(&self, id: &str) -> Result<u32>;
}

/// Delegation so a shared store can be handed to the executor, facade, and
/// engine at the same time.
impl<S: ScheduleStore + ?Sized> ScheduleStore for Arc<S> {
    fn insert(
        &self,
        id: &str,
        trigger_at: DateTime<Utc>,
        payload: &[u8],
        rule: Option<&RecurrenceRule>,
        start_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        (**self).insert(id, trigger_at, payload, rule, start_at)
    }

    fn find(&self, id: &str) -> Result<ScheduleEntry> {
        (**self).find(id)
    }

    fn find_pending(&self, before: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<String>> {
        (**self).find_pending(before, limit)
    }

    fn update(
        &self,
        id: &str,
        state: ScheduleState,
        trigger_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        (**self).update(id, state, trigger_at)
    }

    fn delete(&self, id: &str) -> Result<()> {
        (**self).delete(id)
    }

    fn claim(&self, id: &str) -> Result<bool> {
        (**self).claim(id)
    }

    fn record_execution(&self, id: &str, executed_at: DateTime<Utc>) -> Result<()> {
        (**self).record_execution(id, executed_at)
    }

    fn execution_count(&self, id: &str) -> Result<u32> {
        (**self).execution_count(id)
    }
}

/// SQLite-backed schedule store.
///
/// Wraps a single connection in a `Mutex`; every operation takes the lock
/// for the duration of one statement, so connections are never held across
/// unrelated work.
pub struct SqliteScheduleStore {
    db: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteScheduleStore {
    /// Wrap an already-open connection. Call [`setup`](Self::setup) before
    /// first use on a fresh database.
    pub fn new(conn: Connection) -> Self {
        Self::with_clock(conn, Arc::new(SystemClock))
    }

    pub fn with_clock(conn: Connection, clock: Arc<dyn Clock>) -> Self {
        Self {
            db: Mutex::new(conn),
            clock,
        }
    }

    /// Idempotently create the schema and indexes.
    pub fn setup(&self) -> Result<()> {
        let db = self.db.lock().unwrap();
        init_db(&db)
    }
}

impl ScheduleStore for SqliteScheduleStore {
    #[instrument(skip(self, payload, rule, start_at))]
    fn insert(
        &self,
        id: &str,
        trigger_at: DateTime<Utc>,
        payload: &[u8],
        rule: Option<&RecurrenceRule>,
        start_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let created_at = self.clock.now();
        let db = self.db.lock().unwrap();
        let result = db.execute(
            "INSERT INTO scheduler_messages
             (id, trigger_at, serialized, rule, start_at, state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                id,
                trigger_at.to_rfc3339(),
                payload,
                rule.map(|r| r.to_string()),
                start_at.map(|t| t.to_rfc3339()),
                ScheduleState::Pending.to_string(),
                created_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => {
                debug!(%id, "schedule inserted");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(SchedulerError::DuplicateId { id: id.to_string() })
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    fn find(&self, id: &str) -> Result<ScheduleEntry> {
        let db = self.db.lock().unwrap();
        let (mut entry, rule_text) = match db.query_row(
            "SELECT id, trigger_at, serialized, rule, start_at, state, created_at
             FROM scheduler_messages WHERE id = ?1",
            [id],
            row_to_entry,
        ) {
            Ok(found) => found,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(SchedulerError::NotFound { id: id.to_string() })
            }
            Err(e) => return Err(e.into()),
        };
        // Rule text is parsed outside the row mapper so a corrupt rule
        // surfaces as MalformedRule, not a generic database error.
        entry.rule = rule_text.as_deref().map(str::parse).transpose()?;
        Ok(entry)
    }

    fn find_pending(&self, before: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<String>> {
        // SQLite treats LIMIT -1 as unbounded.
        let limit = if limit == 0 { -1 } else { limit as i64 };
        let pending = ScheduleState::Pending.to_string();
        let db = self.db.lock().unwrap();

        let ids = match before {
            Some(before) => {
                let mut stmt = db.prepare_cached(
                    "SELECT id FROM scheduler_messages
                     WHERE state = ?1 AND trigger_at < ?2
                     ORDER BY trigger_at
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![pending, before.to_rfc3339(), limit],
                    |row| row.get::<_, String>(0),
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = db.prepare_cached(
                    "SELECT id FROM scheduler_messages
                     WHERE state = ?1
                     ORDER BY trigger_at
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(rusqlite::params![pending, limit], |row| {
                    row.get::<_, String>(0)
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(ids)
    }

    #[instrument(skip(self))]
    fn update(
        &self,
        id: &str,
        state: ScheduleState,
        trigger_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows_changed = match trigger_at {
            Some(trigger_at) => db.execute(
                "UPDATE scheduler_messages SET state = ?1, trigger_at = ?2 WHERE id = ?3",
                rusqlite::params![state.to_string(), trigger_at.to_rfc3339(), id],
            )?,
            None => db.execute(
                "UPDATE scheduler_messages SET state = ?1 WHERE id = ?2",
                rusqlite::params![state.to_string(), id],
            )?,
        };
        if rows_changed == 0 {
            return Err(SchedulerError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute("DELETE FROM scheduler_messages WHERE id = ?1", [id])?;
        debug!(%id, deleted = rows_changed > 0, "schedule delete");
        Ok(())
    }

    fn claim(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE scheduler_messages SET state = ?1 WHERE id = ?2 AND state = ?3",
            rusqlite::params![
                ScheduleState::Running.to_string(),
                id,
                ScheduleState::Pending.to_string(),
            ],
        )?;
        Ok(rows_changed == 1)
    }

    fn record_execution(&self, id: &str, executed_at: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO scheduler_executions (schedule_id, iteration, executed_at)
             VALUES (
                 ?1,
                 (SELECT COALESCE(MAX(iteration), 0) + 1
                    FROM scheduler_executions WHERE schedule_id = ?1),
                 ?2
             )",
            rusqlite::params![id, executed_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn execution_count(&self, id: &str) -> Result<u32> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM scheduler_executions WHERE schedule_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }
}

/// Map a SQLite row to a `ScheduleEntry`, returning the raw rule text
/// separately for parsing at the caller.
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ScheduleEntry, Option<String>)> {
    let trigger_str: String = row.get(1)?;
    let start_str: Option<String> = row.get(4)?;
    let state_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;

    let entry = ScheduleEntry {
        id: row.get(0)?,
        payload: row.get(2)?,
        trigger_at: parse_ts(1, &trigger_str)?,
        start_at: start_str.as_deref().map(|s| parse_ts(4, s)).transpose()?,
        rule: None,
        state: state_str
            .parse()
            .map_err(|e: String| conversion_failure(5, e.into()))?,
        created_at: parse_ts(6, &created_str)?,
    };
    Ok((entry, row.get(3)?))
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_failure(idx, Box::new(e)))
}

fn conversion_failure(
    idx: usize,
    source: Box<dyn std::error::Error + Send + Sync>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Freq;
    use tempo_core::clock::FixedClock;

    fn open_store() -> SqliteScheduleStore {
        let store = SqliteScheduleStore::new(Connection::open_in_memory().unwrap());
        store.setup().unwrap();
        store
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn insert_find_round_trip() {
        let store = open_store();
        let rule = RecurrenceRule::new(Freq::Daily).count(7);
        let start = ts("2026-04-01T08:00:00Z");
        store
            .insert("abc", start, b"{\"k\":1}", Some(&rule), Some(start))
            .unwrap();

        let entry = store.find("abc").unwrap();
        assert_eq!(entry.id, "abc");
        assert_eq!(entry.payload, b"{\"k\":1}");
        assert_eq!(entry.trigger_at, start);
        assert_eq!(entry.start_at, Some(start));
        assert_eq!(entry.rule, Some(rule));
        assert_eq!(entry.state, ScheduleState::Pending);
    }

    #[test]
    fn insert_normalizes_created_at_from_clock() {
        let now = ts("2026-04-01T00:00:00Z");
        let store = SqliteScheduleStore::with_clock(
            Connection::open_in_memory().unwrap(),
            Arc::new(FixedClock(now)),
        );
        store.setup().unwrap();
        store.insert("abc", now, b"m", None, None).unwrap();
        assert_eq!(store.find("abc").unwrap().created_at, now);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = open_store();
        let at = ts("2026-04-01T08:00:00Z");
        store.insert("abc", at, b"m", None, None).unwrap();
        assert!(matches!(
            store.insert("abc", at, b"m", None, None),
            Err(SchedulerError::DuplicateId { .. })
        ));
    }

    #[test]
    fn find_absent_is_not_found() {
        let store = open_store();
        assert!(matches!(
            store.find("missing"),
            Err(SchedulerError::NotFound { .. })
        ));
    }

    #[test]
    fn find_pending_filters_by_trigger_and_state() {
        let store = open_store();
        let now = ts("2026-04-01T12:00:00Z");
        store
            .insert("past", ts("2026-04-01T11:00:00Z"), b"m", None, None)
            .unwrap();
        store
            .insert("future", ts("2026-04-01T13:00:00Z"), b"m", None, None)
            .unwrap();
        store
            .insert("done", ts("2026-04-01T10:00:00Z"), b"m", None, None)
            .unwrap();
        store
            .update("done", ScheduleState::Completed, None)
            .unwrap();

        assert_eq!(store.find_pending(Some(now), 0).unwrap(), vec!["past"]);
        // no bound: every pending entry, ordered by trigger time
        assert_eq!(
            store.find_pending(None, 0).unwrap(),
            vec!["past", "future"]
        );
        assert_eq!(store.find_pending(None, 1).unwrap(), vec!["past"]);
    }

    #[test]
    fn update_without_trigger_keeps_prior_value() {
        let store = open_store();
        let at = ts("2026-04-01T08:00:00Z");
        store.insert("abc", at, b"m", None, None).unwrap();
        store
            .update("abc", ScheduleState::Completed, None)
            .unwrap();
        let entry = store.find("abc").unwrap();
        assert_eq!(entry.state, ScheduleState::Completed);
        assert_eq!(entry.trigger_at, at);
    }

    #[test]
    fn update_absent_is_not_found() {
        let store = open_store();
        assert!(matches!(
            store.update("missing", ScheduleState::Completed, None),
            Err(SchedulerError::NotFound { .. })
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let store = open_store();
        store
            .insert("abc", ts("2026-04-01T08:00:00Z"), b"m", None, None)
            .unwrap();
        store.delete("abc").unwrap();
        assert!(matches!(
            store.find("abc"),
            Err(SchedulerError::NotFound { .. })
        ));
        // deleting again is fine
        store.delete("abc").unwrap();
    }

    #[test]
    fn setup_twice_is_idempotent() {
        let store = open_store();
        store.setup().unwrap();
        store
            .insert("abc", ts("2026-04-01T08:00:00Z"), b"m", None, None)
            .unwrap();
        store.setup().unwrap();
        assert!(store.find("abc").is_ok());
    }

    #[test]
    fn claim_wins_exactly_once() {
        let store = open_store();
        store
            .insert("abc", ts("2026-04-01T08:00:00Z"), b"m", None, None)
            .unwrap();
        assert!(store.claim("abc").unwrap());
        assert!(!store.claim("abc").unwrap());
        // claimed entries are invisible to the pending query
        assert!(store.find_pending(None, 0).unwrap().is_empty());
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let store = Arc::new(open_store());
        store
            .insert("abc", ts("2026-04-01T08:00:00Z"), b"m", None, None)
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || store.claim("abc").unwrap()));
        }
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(
            store.find("abc").unwrap().state,
            ScheduleState::Running
        );
    }

    #[test]
    fn execution_log_counts_releases() {
        let store = open_store();
        store
            .insert("abc", ts("2026-04-01T08:00:00Z"), b"m", None, None)
            .unwrap();
        assert_eq!(store.execution_count("abc").unwrap(), 0);
        store
            .record_execution("abc", ts("2026-04-01T08:00:01Z"))
            .unwrap();
        store
            .record_execution("abc", ts("2026-04-02T08:00:01Z"))
            .unwrap();
        assert_eq!(store.execution_count("abc").unwrap(), 2);
    }

    #[test]
    fn malformed_stored_rule_surfaces_as_malformed_rule() {
        let store = open_store();
        store
            .insert("abc", ts("2026-04-01T08:00:00Z"), b"m", None, None)
            .unwrap();
        {
            let db = store.db.lock().unwrap();
            db.execute(
                "UPDATE scheduler_messages SET rule = 'FREQ=NEVERLY' WHERE id = 'abc'",
                [],
            )
            .unwrap();
        }
        assert!(matches!(
            store.find("abc"),
            Err(SchedulerError::MalformedRule(_))
        ));
    }
}
