use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use relay_core::error::{RelayError, Result};
use relay_core::types::{
    Binding, ChatMessage, PendingMessage, PendingStatus, Platform, RelayRun, RelayRunPatch,
    RunStatus,
};

/// Aggregate spend for a project over a time window (used for daily budget checks).
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub run_count: u64,
    pub total_cost_usd: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

/// Thread-safe store for all relay-persisted state.
///
/// Wraps a single SQLite connection in a `Mutex`, following the same
/// single-writer pattern as the session and memory managers it's grounded
/// on — fine for a single-node relay, not meant to scale past it.
pub struct RelayStore {
    db: Mutex<Connection>,
}

impl RelayStore {
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- bindings ----------------------------------------------------------

    #[instrument(skip(self))]
    pub fn save_binding(&self, binding: &Binding) -> Result<()> {
        let db = self.lock();
        db.execute(
            "INSERT INTO bindings (platform, channel_id, project, bound_by, bound_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(platform, channel_id) DO UPDATE SET
               project = excluded.project,
               bound_by = excluded.bound_by,
               bound_at = excluded.bound_at",
            params![
                binding.platform.to_string(),
                binding.channel_id,
                binding.project,
                binding.bound_by,
                binding.bound_at.to_rfc3339(),
            ],
        )
        .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn lookup_binding(&self, platform: Platform, channel_id: &str) -> Result<Option<Binding>> {
        let db = self.lock();
        db.query_row(
            "SELECT platform, channel_id, project, bound_by, bound_at
             FROM bindings WHERE platform = ?1 AND channel_id = ?2",
            params![platform.to_string(), channel_id],
            row_to_binding,
        )
        .optional()
        .map_err(|e| RelayError::Database(e.to_string()))
    }

    pub fn bindings_for_project(&self, project: &str) -> Result<Vec<Binding>> {
        let db = self.lock();
        let mut stmt = db
            .prepare(
                "SELECT platform, channel_id, project, bound_by, bound_at
                 FROM bindings WHERE project = ?1",
            )
            .map_err(|e| RelayError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![project], row_to_binding)
            .map_err(|e| RelayError::Database(e.to_string()))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RelayError::Database(e.to_string()))
    }

    /// Every project with at least one channel bound to it. Used by the
    /// supervisor's hourly budget-alert sweep, which has no other way to
    /// enumerate "projects currently in use".
    pub fn distinct_projects(&self) -> Result<Vec<String>> {
        let db = self.lock();
        let mut stmt = db
            .prepare("SELECT DISTINCT project FROM bindings")
            .map_err(|e| RelayError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| RelayError::Database(e.to_string()))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RelayError::Database(e.to_string()))
    }

    /// Remove the binding for a channel. `true` when a row was deleted.
    #[instrument(skip(self))]
    pub fn delete_binding(&self, platform: Platform, channel_id: &str) -> Result<bool> {
        let db = self.lock();
        let changed = db
            .execute(
                "DELETE FROM bindings WHERE platform = ?1 AND channel_id = ?2",
                params![platform.to_string(), channel_id],
            )
            .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(changed > 0)
    }

    // -- message cache -------------------------------------------------------

    #[instrument(skip(self, msg))]
    pub fn cache_message(&self, msg: &ChatMessage) -> Result<()> {
        let db = self.lock();
        db.execute(
            "INSERT INTO messages
             (id, platform, channel_id, conversation_id, message_id, user_id, user_name, text, timestamp, is_bot)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                uuid::Uuid::now_v7().to_string(),
                msg.platform.to_string(),
                msg.channel_id,
                msg.conversation_id,
                msg.message_id,
                msg.user_id,
                msg.user_name,
                msg.text,
                msg.timestamp.to_rfc3339(),
                msg.is_bot as i64,
            ],
        )
        .map_err(|e| RelayError::Database(e.to_string()))?;

        db.execute(
            "INSERT INTO threads (conversation_id, last_activity_at, message_count)
             VALUES (?1, ?2, 1)
             ON CONFLICT(conversation_id) DO UPDATE SET
               last_activity_at = excluded.last_activity_at,
               message_count = message_count + 1",
            params![msg.conversation_id, msg.timestamp.to_rfc3339()],
        )
        .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(())
    }

    /// Most recent `limit` messages for a conversation, oldest first.
    pub fn get_cached_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let db = self.lock();
        let mut stmt = db
            .prepare(
                "SELECT platform, channel_id, conversation_id, message_id, user_id, user_name, text, timestamp, is_bot
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY timestamp DESC LIMIT ?2",
            )
            .map_err(|e| RelayError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![conversation_id, limit as i64], row_to_message)
            .map_err(|e| RelayError::Database(e.to_string()))?;
        let mut messages = rows
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RelayError::Database(e.to_string()))?;
        messages.reverse();
        Ok(messages)
    }

    /// Resolve the conversation a cached message belongs to — used to map a
    /// reaction event (which only names `channel_id` + `message_id`) back to
    /// the conversation whose abort controller it should affect.
    pub fn conversation_id_for_message(
        &self,
        platform: Platform,
        channel_id: &str,
        message_id: &str,
    ) -> Result<Option<String>> {
        let db = self.lock();
        db.query_row(
            "SELECT conversation_id FROM messages
             WHERE platform = ?1 AND channel_id = ?2 AND message_id = ?3
             ORDER BY timestamp DESC LIMIT 1",
            params![platform.to_string(), channel_id, message_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| RelayError::Database(e.to_string()))
    }

    /// `true` when the conversation has had no activity since `cutoff` — the
    /// thread is considered stale and history should be dropped (spec §5.2).
    pub fn is_thread_stale(&self, conversation_id: &str, cutoff: DateTime<Utc>) -> Result<bool> {
        let db = self.lock();
        let last: Option<String> = db
            .query_row(
                "SELECT last_activity_at FROM threads WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RelayError::Database(e.to_string()))?;
        match last {
            None => Ok(false),
            Some(ts) => {
                let last_activity = DateTime::parse_from_rfc3339(&ts)
                    .map_err(|e| RelayError::Database(e.to_string()))?
                    .with_timezone(&Utc);
                Ok(last_activity < cutoff)
            }
        }
    }

    /// Drop every cached message for a conversation — used by the admin
    /// `new` command to start a thread over with no prior history.
    #[instrument(skip(self))]
    pub fn purge_conversation(&self, conversation_id: &str) -> Result<u64> {
        let db = self.lock();
        let removed = db
            .execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
            )
            .map_err(|e| RelayError::Database(e.to_string()))? as u64;
        db.execute(
            "DELETE FROM threads WHERE conversation_id = ?1",
            params![conversation_id],
        )
        .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(removed)
    }

    // -- pending / write-ahead log -------------------------------------------

    #[instrument(skip(self))]
    pub fn write_pending_message(&self, pending: &PendingMessage) -> Result<()> {
        let db = self.lock();
        db.execute(
            "INSERT INTO pending_messages
             (id, platform, channel_id, conversation_id, message_id, user_id, received_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                pending.id,
                pending.platform.to_string(),
                pending.channel_id,
                pending.conversation_id,
                pending.message_id,
                pending.user_id,
                pending.received_at.to_rfc3339(),
                pending.status.to_string(),
            ],
        )
        .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn get_pending_messages(&self, status: PendingStatus) -> Result<Vec<PendingMessage>> {
        let db = self.lock();
        let mut stmt = db
            .prepare(
                "SELECT id, platform, channel_id, conversation_id, message_id, user_id, received_at, status
                 FROM pending_messages WHERE status = ?1 ORDER BY received_at",
            )
            .map_err(|e| RelayError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![status.to_string()], row_to_pending)
            .map_err(|e| RelayError::Database(e.to_string()))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RelayError::Database(e.to_string()))
    }

    pub fn mark_pending_status(&self, id: &str, status: PendingStatus) -> Result<()> {
        let db = self.lock();
        let changed = db
            .execute(
                "UPDATE pending_messages SET status = ?1 WHERE id = ?2",
                params![status.to_string(), id],
            )
            .map_err(|e| RelayError::Database(e.to_string()))?;
        if changed == 0 {
            return Err(RelayError::Internal(format!("pending message {id} not found")));
        }
        Ok(())
    }

    // -- relay runs ----------------------------------------------------------

    #[instrument(skip(self))]
    pub fn record_relay_run(&self, run: &RelayRun) -> Result<()> {
        let db = self.lock();
        db.execute(
            "INSERT INTO relay_runs
             (id, platform, channel_id, conversation_id, project, user_id, started_at,
              completed_at, status, cost_usd, input_tokens, output_tokens, duration_ms, model)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                run.id,
                run.platform.to_string(),
                run.channel_id,
                run.conversation_id,
                run.project,
                run.user_id,
                run.started_at.to_rfc3339(),
                run.completed_at.map(|t| t.to_rfc3339()),
                run.status.to_string(),
                run.cost_usd,
                run.input_tokens as i64,
                run.output_tokens as i64,
                run.duration_ms as i64,
                run.model,
            ],
        )
        .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(())
    }

    /// Apply a sparse patch to an existing run row. A no-op patch skips the query.
    #[instrument(skip(self, patch))]
    pub fn update_relay_run(&self, id: &str, patch: &RelayRunPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut sets = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(completed_at) = patch.completed_at {
            sets.push("completed_at = ?");
            values.push(Box::new(completed_at.to_rfc3339()));
        }
        if let Some(status) = patch.status {
            sets.push("status = ?");
            values.push(Box::new(status.to_string()));
        }
        if let Some(cost_usd) = patch.cost_usd {
            sets.push("cost_usd = ?");
            values.push(Box::new(cost_usd));
        }
        if let Some(input_tokens) = patch.input_tokens {
            sets.push("input_tokens = ?");
            values.push(Box::new(input_tokens as i64));
        }
        if let Some(output_tokens) = patch.output_tokens {
            sets.push("output_tokens = ?");
            values.push(Box::new(output_tokens as i64));
        }
        if let Some(duration_ms) = patch.duration_ms {
            sets.push("duration_ms = ?");
            values.push(Box::new(duration_ms as i64));
        }
        if let Some(model) = patch.model.clone() {
            sets.push("model = ?");
            values.push(Box::new(model));
        }

        let sql = format!("UPDATE relay_runs SET {} WHERE id = ?", sets.join(", "));
        values.push(Box::new(id.to_string()));

        let db = self.lock();
        let params_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let changed = db
            .execute(&sql, params_refs.as_slice())
            .map_err(|e| RelayError::Database(e.to_string()))?;
        if changed == 0 {
            return Err(RelayError::Internal(format!("relay run {id} not found")));
        }
        Ok(())
    }

    /// Spend for a project since `since` — the daily-budget check in `relay-pool`.
    pub fn get_run_stats(&self, project: &str, since: DateTime<Utc>) -> Result<RunStats> {
        let db = self.lock();
        db.query_row(
            "SELECT COUNT(*), COALESCE(SUM(cost_usd), 0),
                    COALESCE(SUM(input_tokens), 0), COALESCE(SUM(output_tokens), 0)
             FROM relay_runs WHERE project = ?1 AND started_at >= ?2",
            params![project, since.to_rfc3339()],
            |row| {
                Ok(RunStats {
                    run_count: row.get::<_, i64>(0)? as u64,
                    total_cost_usd: row.get(1)?,
                    total_input_tokens: row.get::<_, i64>(2)? as u64,
                    total_output_tokens: row.get::<_, i64>(3)? as u64,
                })
            },
        )
        .map_err(|e| RelayError::Database(e.to_string()))
    }

    // -- maintenance -----------------------------------------------------------

    /// Drop done/failed pending rows older than `pending_cutoff`, cached
    /// messages and idle threads older than `message_cutoff`, and run
    /// history older than `run_cutoff`. Runs on the hourly maintenance
    /// timer; three independent cutoffs because the spec's retention
    /// windows (pending-row TTL, message/thread staleness, run-history
    /// retention) are each configured separately.
    #[instrument(skip(self))]
    pub fn cleanup_stale_data(
        &self,
        pending_cutoff: DateTime<Utc>,
        message_cutoff: DateTime<Utc>,
        run_cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let db = self.lock();
        let pending_cutoff_str = pending_cutoff.to_rfc3339();
        let message_cutoff_str = message_cutoff.to_rfc3339();
        let run_cutoff_str = run_cutoff.to_rfc3339();
        let mut total = 0u64;
        total += db
            .execute("DELETE FROM messages WHERE timestamp < ?1", params![message_cutoff_str])
            .map_err(|e| RelayError::Database(e.to_string()))? as u64;
        total += db
            .execute(
                "DELETE FROM pending_messages WHERE status IN ('done', 'failed') AND received_at < ?1",
                params![pending_cutoff_str],
            )
            .map_err(|e| RelayError::Database(e.to_string()))? as u64;
        total += db
            .execute(
                "DELETE FROM threads WHERE last_activity_at < ?1",
                params![message_cutoff_str],
            )
            .map_err(|e| RelayError::Database(e.to_string()))? as u64;
        total += db
            .execute("DELETE FROM relay_runs WHERE started_at < ?1", params![run_cutoff_str])
            .map_err(|e| RelayError::Database(e.to_string()))? as u64;
        Ok(total)
    }
}

fn row_to_binding(row: &rusqlite::Row) -> rusqlite::Result<Binding> {
    let platform: String = row.get(0)?;
    let bound_at: String = row.get(4)?;
    Ok(Binding {
        platform: platform.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "platform".into(), rusqlite::types::Type::Text)
        })?,
        channel_id: row.get(1)?,
        project: row.get(2)?,
        bound_by: row.get(3)?,
        bound_at: DateTime::parse_from_rfc3339(&bound_at)
            .map_err(|_| {
                rusqlite::Error::InvalidColumnType(4, "bound_at".into(), rusqlite::types::Type::Text)
            })?
            .with_timezone(&Utc),
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<ChatMessage> {
    let platform: String = row.get(0)?;
    let timestamp: String = row.get(7)?;
    Ok(ChatMessage {
        platform: platform.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "platform".into(), rusqlite::types::Type::Text)
        })?,
        channel_id: row.get(1)?,
        conversation_id: row.get(2)?,
        message_id: row.get(3)?,
        user_id: row.get(4)?,
        user_name: row.get(5)?,
        text: row.get(6)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|_| {
                rusqlite::Error::InvalidColumnType(7, "timestamp".into(), rusqlite::types::Type::Text)
            })?
            .with_timezone(&Utc),
        is_bot: row.get::<_, i64>(8)? != 0,
    })
}

fn row_to_pending(row: &rusqlite::Row) -> rusqlite::Result<PendingMessage> {
    let platform: String = row.get(1)?;
    let received_at: String = row.get(6)?;
    let status: String = row.get(7)?;
    Ok(PendingMessage {
        id: row.get(0)?,
        platform: platform.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(1, "platform".into(), rusqlite::types::Type::Text)
        })?,
        channel_id: row.get(2)?,
        conversation_id: row.get(3)?,
        message_id: row.get(4)?,
        user_id: row.get(5)?,
        received_at: DateTime::parse_from_rfc3339(&received_at)
            .map_err(|_| {
                rusqlite::Error::InvalidColumnType(6, "received_at".into(), rusqlite::types::Type::Text)
            })?
            .with_timezone(&Utc),
        status: status.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(7, "status".into(), rusqlite::types::Type::Text)
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::Duration;

    fn test_store() -> RelayStore {
        let conn = Connection::open_in_memory().unwrap();
        db::init_db(&conn).unwrap();
        RelayStore::new(conn)
    }

    fn sample_message(conversation_id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            platform: Platform::Slack,
            channel_id: "C1".into(),
            conversation_id: conversation_id.into(),
            message_id: uuid::Uuid::now_v7().to_string(),
            user_id: "U1".into(),
            user_name: "alice".into(),
            text: text.into(),
            timestamp: Utc::now(),
            is_bot: false,
        }
    }

    #[test]
    fn binding_roundtrip_and_rebind_overwrites() {
        let store = test_store();
        let b = Binding {
            platform: Platform::Slack,
            channel_id: "C1".into(),
            project: "alpha".into(),
            bound_by: "U1".into(),
            bound_at: Utc::now(),
        };
        store.save_binding(&b).unwrap();
        let found = store.lookup_binding(Platform::Slack, "C1").unwrap().unwrap();
        assert_eq!(found.project, "alpha");

        let rebind = Binding { project: "beta".into(), ..b };
        store.save_binding(&rebind).unwrap();
        let found = store.lookup_binding(Platform::Slack, "C1").unwrap().unwrap();
        assert_eq!(found.project, "beta");
    }

    #[test]
    fn delete_binding_removes_row_and_reports_whether_one_existed() {
        let store = test_store();
        let b = Binding {
            platform: Platform::Slack,
            channel_id: "C1".into(),
            project: "alpha".into(),
            bound_by: "U1".into(),
            bound_at: Utc::now(),
        };
        store.save_binding(&b).unwrap();
        assert!(store.delete_binding(Platform::Slack, "C1").unwrap());
        assert!(store.lookup_binding(Platform::Slack, "C1").unwrap().is_none());
        assert!(!store.delete_binding(Platform::Slack, "C1").unwrap());
    }

    #[test]
    fn purge_conversation_clears_messages_and_thread() {
        let store = test_store();
        store.cache_message(&sample_message("conv1", "hi")).unwrap();
        let removed = store.purge_conversation("conv1").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_cached_messages("conv1", 10).unwrap().len(), 0);
        assert!(!store.is_thread_stale("conv1", Utc::now() + Duration::days(1)).unwrap());
    }

    #[test]
    fn distinct_projects_deduplicates_across_bindings() {
        let store = test_store();
        store
            .save_binding(&Binding {
                platform: Platform::Slack,
                channel_id: "C1".into(),
                project: "alpha".into(),
                bound_by: "U1".into(),
                bound_at: Utc::now(),
            })
            .unwrap();
        store
            .save_binding(&Binding {
                platform: Platform::Telegram,
                channel_id: "C2".into(),
                project: "alpha".into(),
                bound_by: "U1".into(),
                bound_at: Utc::now(),
            })
            .unwrap();
        store
            .save_binding(&Binding {
                platform: Platform::Slack,
                channel_id: "C3".into(),
                project: "beta".into(),
                bound_by: "U1".into(),
                bound_at: Utc::now(),
            })
            .unwrap();

        let mut projects = store.distinct_projects().unwrap();
        projects.sort();
        assert_eq!(projects, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn lookup_binding_missing_returns_none() {
        let store = test_store();
        assert!(store.lookup_binding(Platform::Telegram, "missing").unwrap().is_none());
    }

    #[test]
    fn cached_messages_return_oldest_first_and_respect_limit() {
        let store = test_store();
        for i in 0..5 {
            store.cache_message(&sample_message("conv1", &format!("msg{i}"))).unwrap();
        }
        let msgs = store.get_cached_messages("conv1", 3).unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].text, "msg2");
        assert_eq!(msgs[2].text, "msg4");
    }

    #[test]
    fn conversation_id_for_message_resolves_cached_message() {
        let store = test_store();
        let mut msg = sample_message("conv1", "hi");
        msg.message_id = "m42".into();
        store.cache_message(&msg).unwrap();
        let found = store
            .conversation_id_for_message(Platform::Slack, "C1", "m42")
            .unwrap();
        assert_eq!(found.as_deref(), Some("conv1"));
        assert!(store
            .conversation_id_for_message(Platform::Slack, "C1", "missing")
            .unwrap()
            .is_none());
    }

    #[test]
    fn thread_staleness_reflects_last_activity() {
        let store = test_store();
        store.cache_message(&sample_message("conv1", "hello")).unwrap();
        assert!(!store.is_thread_stale("conv1", Utc::now() - Duration::days(1)).unwrap());
        assert!(store.is_thread_stale("conv1", Utc::now() + Duration::days(1)).unwrap());
        assert!(!store.is_thread_stale("unknown-conv", Utc::now()).unwrap());
    }

    #[test]
    fn pending_message_lifecycle() {
        let store = test_store();
        let id = uuid::Uuid::now_v7().to_string();
        let pending = PendingMessage {
            id: id.clone(),
            platform: Platform::Telegram,
            channel_id: "chan".into(),
            conversation_id: "conv1".into(),
            message_id: "m1".into(),
            user_id: "U1".into(),
            received_at: Utc::now(),
            status: PendingStatus::Pending,
        };
        store.write_pending_message(&pending).unwrap();
        assert_eq!(store.get_pending_messages(PendingStatus::Pending).unwrap().len(), 1);

        store.mark_pending_status(&id, PendingStatus::Done).unwrap();
        assert_eq!(store.get_pending_messages(PendingStatus::Pending).unwrap().len(), 0);
        assert_eq!(store.get_pending_messages(PendingStatus::Done).unwrap().len(), 1);
    }

    #[test]
    fn mark_pending_status_missing_id_errors() {
        let store = test_store();
        assert!(store.mark_pending_status("nope", PendingStatus::Done).is_err());
    }

    #[test]
    fn relay_run_record_update_and_stats() {
        let store = test_store();
        let id = uuid::Uuid::now_v7().to_string();
        let run = RelayRun {
            id: id.clone(),
            platform: Platform::Slack,
            channel_id: "C1".into(),
            conversation_id: "conv1".into(),
            project: "alpha".into(),
            user_id: "U1".into(),
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            cost_usd: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
            model: None,
        };
        store.record_relay_run(&run).unwrap();

        let mut patch = RelayRunPatch::default();
        patch.status = Some(RunStatus::Completed);
        patch.cost_usd = Some(0.42);
        patch.input_tokens = Some(100);
        patch.output_tokens = Some(50);
        store.update_relay_run(&id, &patch).unwrap();

        let stats = store.get_run_stats("alpha", Utc::now() - Duration::hours(1)).unwrap();
        assert_eq!(stats.run_count, 1);
        assert!((stats.total_cost_usd - 0.42).abs() < 1e-9);
        assert_eq!(stats.total_input_tokens, 100);
    }

    #[test]
    fn update_relay_run_noop_patch_skips_query() {
        let store = test_store();
        store.update_relay_run("nonexistent", &RelayRunPatch::default()).unwrap();
    }

    #[test]
    fn cleanup_stale_data_removes_old_rows() {
        let store = test_store();
        store.cache_message(&sample_message("conv1", "old")).unwrap();
        let future = Utc::now() + Duration::days(1);
        let removed = store.cleanup_stale_data(future, future, future).unwrap();
        assert!(removed >= 2);
        assert_eq!(store.get_cached_messages("conv1", 10).unwrap().len(), 0);
    }

    #[test]
    fn cleanup_stale_data_respects_independent_cutoffs() {
        let store = test_store();
        store.cache_message(&sample_message("conv1", "recent")).unwrap();
        let run = RelayRun {
            id: "run-old".to_string(),
            platform: Platform::Slack,
            channel_id: "c1".to_string(),
            conversation_id: "conv1".to_string(),
            project: "alpha".to_string(),
            user_id: "u1".to_string(),
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            cost_usd: 0.1,
            input_tokens: 1,
            output_tokens: 1,
            duration_ms: 1,
            model: None,
        };
        store.record_relay_run(&run).unwrap();

        let past = Utc::now() - Duration::days(1);
        let future = Utc::now() + Duration::days(1);
        // Message/thread cutoff in the past keeps the just-cached message;
        // run cutoff in the future purges the just-recorded run.
        let removed = store.cleanup_stale_data(past, past, future).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_cached_messages("conv1", 10).unwrap().len(), 1);
    }
}
