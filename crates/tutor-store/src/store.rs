use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use tutor_core::{
    LearnerProgress, LevelCurve, ProgressStore, TutorError, TutorResult, XpAward, XpEvent,
};

use crate::schema::init_db;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(path: &Path) -> TutorResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TutorError::Database(format!("cannot create db directory: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| TutorError::Database(format!("cannot open database: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| TutorError::Database(e.to_string()))?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> TutorResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TutorError::Database(format!("cannot open in-memory db: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| TutorError::Database(e.to_string()))?;
        init_db(&conn)?;
        Ok(Self { conn })
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// SQLite integers are signed; XP is stored saturated at `i64::MAX`.
fn to_sql_xp(xp: u64) -> i64 {
    i64::try_from(xp).unwrap_or(i64::MAX)
}

fn from_sql_xp(xp: i64) -> u64 {
    u64::try_from(xp).unwrap_or(0)
}

fn row_to_learner(row: &rusqlite::Row) -> rusqlite::Result<LearnerProgress> {
    let created_at: String = row.get(2)?;
    let updated_at: String = row.get(3)?;
    Ok(LearnerProgress {
        user_id: row.get(0)?,
        total_xp: from_sql_xp(row.get(1)?),
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<XpEvent> {
    let created_at: String = row.get(4)?;
    Ok(XpEvent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: from_sql_xp(row.get(2)?),
        reason: row.get(3)?,
        created_at: parse_dt(&created_at),
    })
}

const LEARNER_COLS: &str = "user_id, total_xp, created_at, updated_at";
const EVENT_COLS: &str = "id, user_id, amount, reason, created_at";

// ---------------------------------------------------------------------------
// ProgressStore impl
// ---------------------------------------------------------------------------

impl ProgressStore for SqliteStore {
    fn learner(&self, user_id: &str) -> TutorResult<Option<LearnerProgress>> {
        self.conn
            .query_row(
                &format!("SELECT {LEARNER_COLS} FROM learners WHERE user_id = ?1"),
                params![user_id],
                row_to_learner,
            )
            .optional()
            .map_err(|e| TutorError::Database(e.to_string()))
    }

    fn list_learners(&self) -> TutorResult<Vec<LearnerProgress>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {LEARNER_COLS} FROM learners ORDER BY total_xp DESC, user_id ASC"
            ))
            .map_err(|e| TutorError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], row_to_learner)
            .map_err(|e| TutorError::Database(e.to_string()))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(|e| TutorError::Database(e.to_string()))?);
        }
        Ok(result)
    }

    fn award_xp(
        &self,
        user_id: &str,
        xp_amount: i64,
        reason: &str,
        curve: &LevelCurve,
    ) -> TutorResult<XpAward> {
        if user_id.trim().is_empty() {
            return Err(TutorError::NotFound("empty user id".into()));
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| TutorError::Database(e.to_string()))?;

        let old_total: u64 = tx
            .query_row(
                "SELECT total_xp FROM learners WHERE user_id = ?1",
                params![user_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| TutorError::Database(e.to_string()))?
            .map(from_sql_xp)
            .unwrap_or(0);

        let award = curve.apply_xp(old_total, xp_amount);
        let event = XpEvent::new(user_id, award.xp_gained, reason);
        let now = event.created_at.to_rfc3339();

        tx.execute(
            "INSERT INTO learners (user_id, total_xp, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(user_id) DO UPDATE SET total_xp = ?2, updated_at = ?3",
            params![user_id, to_sql_xp(award.new_total_xp), now],
        )
        .map_err(|e| TutorError::Database(e.to_string()))?;

        tx.execute(
            &format!("INSERT INTO xp_events ({EVENT_COLS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                event.id,
                event.user_id,
                to_sql_xp(event.amount),
                event.reason,
                now
            ],
        )
        .map_err(|e| TutorError::Database(e.to_string()))?;

        tx.commit()
            .map_err(|e| TutorError::Database(e.to_string()))?;

        debug!(
            user_id,
            gained = award.xp_gained,
            total = award.new_total_xp,
            leveled_up = award.leveled_up,
            "xp awarded"
        );
        Ok(award)
    }

    fn history(&self, user_id: &str, limit: usize) -> TutorResult<Vec<XpEvent>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {EVENT_COLS} FROM xp_events WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))
            .map_err(|e| TutorError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(
                params![user_id, i64::try_from(limit).unwrap_or(i64::MAX)],
                row_to_event,
            )
            .map_err(|e| TutorError::Database(e.to_string()))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(|e| TutorError::Database(e.to_string()))?);
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteStore {
        SqliteStore::in_memory().unwrap()
    }

    #[test]
    fn test_unknown_learner() {
        let store = test_store();
        assert!(store.learner("nobody").unwrap().is_none());
        assert_eq!(store.total_xp("nobody").unwrap(), 0);
        assert!(store.history("nobody", 10).unwrap().is_empty());
    }

    #[test]
    fn test_award_creates_learner() {
        let store = test_store();
        let award = store
            .award_xp("alice", 40, "first turn", &LevelCurve::DEFAULT)
            .unwrap();
        assert_eq!(award.old_total_xp, 0);
        assert_eq!(award.new_total_xp, 40);
        assert!(!award.leveled_up);

        let learner = store.learner("alice").unwrap().unwrap();
        assert_eq!(learner.total_xp, 40);
    }

    #[test]
    fn test_award_accumulates_and_levels_up() {
        let store = test_store();
        let curve = LevelCurve::DEFAULT;
        store.award_xp("alice", 60, "turn", &curve).unwrap();
        let award = store.award_xp("alice", 60, "turn", &curve).unwrap();
        assert_eq!(award.old_total_xp, 60);
        assert_eq!(award.new_total_xp, 120);
        assert!(award.leveled_up);
        assert_eq!(award.new_level, 2);
        assert_eq!(store.total_xp("alice").unwrap(), 120);
    }

    #[test]
    fn test_negative_award_grants_nothing() {
        let store = test_store();
        let curve = LevelCurve::DEFAULT;
        store.award_xp("bob", 30, "turn", &curve).unwrap();
        let award = store.award_xp("bob", -100, "penalty", &curve).unwrap();
        assert_eq!(award.new_total_xp, 30);
        assert_eq!(award.xp_gained, 0);
        assert_eq!(store.total_xp("bob").unwrap(), 30);
    }

    #[test]
    fn test_empty_user_rejected() {
        let store = test_store();
        let result = store.award_xp("  ", 10, "turn", &LevelCurve::DEFAULT);
        assert!(matches!(result, Err(TutorError::NotFound(_))));
    }

    #[test]
    fn test_history_newest_first_with_limit() {
        let store = test_store();
        let curve = LevelCurve::DEFAULT;
        for amount in [1, 2, 3] {
            store
                .award_xp("carol", amount, &format!("turn {amount}"), &curve)
                .unwrap();
        }
        let events = store.history("carol", 2).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].created_at >= events[1].created_at);
        let all = store.history("carol", 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.iter().map(|e| e.amount).sum::<u64>(), 6);
    }

    #[test]
    fn test_list_learners_sorted_by_xp() {
        let store = test_store();
        let curve = LevelCurve::DEFAULT;
        store.award_xp("low", 5, "turn", &curve).unwrap();
        store.award_xp("high", 500, "turn", &curve).unwrap();
        store.award_xp("mid", 50, "turn", &curve).unwrap();

        let names: Vec<String> = store
            .list_learners()
            .unwrap()
            .into_iter()
            .map(|l| l.user_id)
            .collect();
        assert_eq!(names, vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("progress.db");
        {
            let store = SqliteStore::new(&path).unwrap();
            store
                .award_xp("dave", 250, "import", &LevelCurve::DEFAULT)
                .unwrap();
        }
        let store = SqliteStore::new(&path).unwrap();
        let learner = store.learner("dave").unwrap().unwrap();
        assert_eq!(learner.level_info(&LevelCurve::DEFAULT).level, 3);
    }
}
