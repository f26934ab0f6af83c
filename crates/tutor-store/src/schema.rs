use rusqlite::Connection;

use tutor_core::TutorError;

pub fn init_db(conn: &Connection) -> Result<(), TutorError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS learners (
            user_id TEXT PRIMARY KEY,
            total_xp INTEGER NOT NULL DEFAULT 0 CHECK(total_xp >= 0),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_learners_total_xp ON learners(total_xp);

        CREATE TABLE IF NOT EXISTS xp_events (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES learners(user_id) ON DELETE CASCADE,
            amount INTEGER NOT NULL CHECK(amount >= 0),
            reason TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_xp_events_user ON xp_events(user_id, created_at);
        ",
    )
    .map_err(|e| TutorError::Database(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_db_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('learners', 'xp_events')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}
