use rusqlite::Connection;

use crate::error::Result;

/// Initialise the schedule store schema in `conn`.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout. The
/// `(trigger_at, state)` and `(state)` indexes back the due-entry query,
/// which runs on every release tick.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduler_messages (
            id          TEXT    NOT NULL PRIMARY KEY,
            trigger_at  TEXT    NOT NULL,   -- RFC 3339, always UTC
            serialized  BLOB    NOT NULL,   -- opaque message payload
            rule        TEXT,               -- recurrence rule text, NULL for one-shot
            start_at    TEXT,               -- series anchor, RFC 3339 UTC
            state       TEXT    NOT NULL DEFAULT 'pending',
            created_at  TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_trigger_state
            ON scheduler_messages (trigger_at, state);
        CREATE INDEX IF NOT EXISTS idx_messages_state
            ON scheduler_messages (state);

        -- One row per successful release of a schedule.
        CREATE TABLE IF NOT EXISTS scheduler_executions (
            schedule_id TEXT    NOT NULL,
            iteration   INTEGER NOT NULL,
            executed_at TEXT    NOT NULL,
            PRIMARY KEY (schedule_id, iteration),
            FOREIGN KEY (schedule_id) REFERENCES scheduler_messages (id)
                ON DELETE CASCADE
        );
        ",
    )?;
    Ok(())
}
