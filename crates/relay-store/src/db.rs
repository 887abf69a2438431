use rusqlite::Connection;

use relay_core::error::{RelayError, Result};

/// Open the relay database at `path`, enabling WAL mode, and initialise schema.
///
/// Safe to call on every startup — every statement uses `IF NOT EXISTS`.
pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path).map_err(|e| RelayError::Database(e.to_string()))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| RelayError::Database(e.to_string()))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| RelayError::Database(e.to_string()))?;
    init_db(&conn)?;
    Ok(conn)
}

/// Initialise all relay tables and their indexes.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS bindings (
            platform    TEXT NOT NULL,
            channel_id  TEXT NOT NULL,
            project     TEXT NOT NULL,
            bound_by    TEXT NOT NULL,
            bound_at    TEXT NOT NULL,
            PRIMARY KEY (platform, channel_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            platform         TEXT NOT NULL,
            channel_id       TEXT NOT NULL,
            conversation_id  TEXT NOT NULL,
            message_id       TEXT NOT NULL,
            user_id          TEXT NOT NULL,
            user_name        TEXT NOT NULL,
            text             TEXT NOT NULL,
            timestamp        TEXT NOT NULL,
            is_bot           INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, timestamp DESC);

        CREATE TABLE IF NOT EXISTS pending_messages (
            id               TEXT PRIMARY KEY,
            platform         TEXT NOT NULL,
            channel_id       TEXT NOT NULL,
            conversation_id  TEXT NOT NULL,
            message_id       TEXT NOT NULL,
            user_id          TEXT NOT NULL,
            received_at      TEXT NOT NULL,
            status           TEXT NOT NULL DEFAULT 'pending'
        );
        CREATE INDEX IF NOT EXISTS idx_pending_status
            ON pending_messages(status, received_at);

        CREATE TABLE IF NOT EXISTS relay_runs (
            id               TEXT PRIMARY KEY,
            platform         TEXT NOT NULL,
            channel_id       TEXT NOT NULL,
            conversation_id  TEXT NOT NULL,
            project          TEXT NOT NULL,
            user_id          TEXT NOT NULL,
            started_at       TEXT NOT NULL,
            completed_at     TEXT,
            status           TEXT NOT NULL DEFAULT 'running',
            cost_usd         REAL NOT NULL DEFAULT 0,
            input_tokens     INTEGER NOT NULL DEFAULT 0,
            output_tokens    INTEGER NOT NULL DEFAULT 0,
            duration_ms      INTEGER NOT NULL DEFAULT 0,
            model            TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_relay_runs_project
            ON relay_runs(project, started_at DESC);

        CREATE TABLE IF NOT EXISTS threads (
            conversation_id   TEXT PRIMARY KEY,
            last_activity_at  TEXT NOT NULL,
            message_count     INTEGER NOT NULL DEFAULT 0,
            summary           TEXT
        );",
    )
    .map_err(|e| RelayError::Database(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        for expected in ["bindings", "messages", "pending_messages", "relay_runs", "threads"] {
            assert!(names.iter().any(|n| n == expected), "missing table {expected}");
        }
    }

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }
}
