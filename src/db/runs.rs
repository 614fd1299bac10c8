//! The append-only scoring-run log, one row per batch operation.

use rusqlite::params;

use super::{Db, DbError, DbScoringRun};

impl Db {
    /// Append a run record. `errors` is a JSON array already truncated
    /// by the batch runner.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_scoring_run(
        &self,
        run_type: &str,
        processed: i64,
        succeeded: i64,
        failed: i64,
        skipped: i64,
        duration_ms: i64,
        errors: Option<&str>,
        completed_at: &str,
    ) -> Result<i64, DbError> {
        self.conn_ref().execute(
            "INSERT INTO scoring_runs
                 (run_type, processed, succeeded, failed, skipped, duration_ms, errors, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![run_type, processed, succeeded, failed, skipped, duration_ms, errors, completed_at],
        )?;
        Ok(self.conn_ref().last_insert_rowid())
    }

    /// Newest run of a given type, if any. The scheduler uses the
    /// `daily_cron` entry to survive restarts without double-running.
    pub fn latest_scoring_run(&self, run_type: &str) -> Result<Option<DbScoringRun>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, run_type, processed, succeeded, failed, skipped, duration_ms, errors, completed_at
             FROM scoring_runs WHERE run_type = ?1
             ORDER BY completed_at DESC, id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![run_type], |row| {
            Ok(DbScoringRun {
                id: row.get(0)?,
                run_type: row.get(1)?,
                processed: row.get(2)?,
                succeeded: row.get(3)?,
                failed: row.get(4)?,
                skipped: row.get(5)?,
                duration_ms: row.get(6)?,
                errors: row.get(7)?,
                completed_at: row.get(8)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Delete all but the newest `keep` run rows. Returns rows removed.
    pub fn prune_scoring_runs(&self, keep: usize) -> Result<usize, DbError> {
        let affected = self.conn_ref().execute(
            "DELETE FROM scoring_runs WHERE id NOT IN
                 (SELECT id FROM scoring_runs ORDER BY id DESC LIMIT ?1)",
            params![keep as i64],
        )?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Db {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        Db::open_at(path).expect("open")
    }

    #[test]
    fn test_latest_run_by_type() {
        let db = test_db();
        db.insert_scoring_run("daily_cron", 10, 9, 1, 0, 1200, None, "2026-03-01T02:30:00+00:00")
            .unwrap();
        db.insert_scoring_run("event_queue", 4, 4, 0, 0, 300, None, "2026-03-01T02:31:00+00:00")
            .unwrap();
        db.insert_scoring_run("daily_cron", 12, 12, 0, 0, 1400, None, "2026-03-02T02:30:00+00:00")
            .unwrap();

        let latest = db.latest_scoring_run("daily_cron").unwrap().expect("row");
        assert_eq!(latest.processed, 12);
        assert_eq!(latest.completed_at, "2026-03-02T02:30:00+00:00");
        assert!(db.latest_scoring_run("manual").unwrap().is_none());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let db = test_db();
        for day in 1..=5 {
            db.insert_scoring_run(
                "daily_cron",
                1,
                1,
                0,
                0,
                100,
                None,
                &format!("2026-03-{:02}T02:30:00+00:00", day),
            )
            .unwrap();
        }

        let removed = db.prune_scoring_runs(2).unwrap();
        assert_eq!(removed, 3);
        let latest = db.latest_scoring_run("daily_cron").unwrap().unwrap();
        assert_eq!(latest.completed_at, "2026-03-05T02:30:00+00:00");
    }
}
