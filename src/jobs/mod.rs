// Run ledger
// Every pipeline run that gets past its guard checks is recorded here:
// running -> completed | failed, with the run's statistics as JSON.
// Refused runs leave no trace.

pub mod progress;

use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::constants::PIPELINE_VERSION;
use crate::db::schema::{self, NewRun};
use crate::error::Result;

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

/// A recorded run in progress
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub id: i64,
    pub token: String,
    pub run_type: &'static str,
    pub target_id: i64,
}

impl RunHandle {
    pub fn start(conn: &Connection, run_type: &'static str, target_id: i64, forced: bool) -> Result<Self> {
        let token = Uuid::new_v4().to_string();
        let id = schema::insert_run(conn, &NewRun {
            run_token: token.clone(),
            run_type: run_type.to_string(),
            target_id,
            forced,
            pipeline_version: PIPELINE_VERSION,
        })?;
        log::info!("Run {} started: {} #{}{}", token, run_type, target_id, if forced { " (forced)" } else { "" });
        Ok(Self { id, token, run_type, target_id })
    }

    pub fn complete<S: Serialize>(&self, conn: &Connection, stats: &S) -> Result<()> {
        let json = serde_json::to_string(stats)?;
        schema::finish_run(conn, self.id, STATUS_COMPLETED, &json, None)?;
        log::info!("Run {} completed", self.token);
        Ok(())
    }

    pub fn fail<S: Serialize>(&self, conn: &Connection, stats: &S, error: &str) -> Result<()> {
        let json = serde_json::to_string(stats)?;
        schema::finish_run(conn, self.id, STATUS_FAILED, &json, Some(error))?;
        log::error!("Run {} failed: {}", self.token, error);
        Ok(())
    }

    /// Close the run from the outcome of its body.
    /// The body's error wins over a failure to record it.
    pub fn settle<T, S: Serialize>(&self, conn: &Connection, stats: &S, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.complete(conn, stats)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(record_err) = self.fail(conn, stats, &e.to_string()) {
                    log::error!("Could not record failure of run {}: {}", self.token, record_err);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::RUN_TYPE_FRAME_INDEX;
    use crate::error::RovError;

    #[test]
    fn test_run_lifecycle() {
        let conn = crate::db::open_memory_db().unwrap();
        let run = RunHandle::start(&conn, RUN_TYPE_FRAME_INDEX, 3, false).unwrap();
        let stored = schema::get_run(&conn, run.id).unwrap().unwrap();
        assert_eq!(stored.status, STATUS_RUNNING);
        assert_eq!(stored.run_token, run.token);
        assert_eq!(stored.pipeline_version, PIPELINE_VERSION);

        let out = run.settle(&conn, &serde_json::json!({ "frames": 10 }), Ok(42)).unwrap();
        assert_eq!(out, 42);
        let stored = schema::get_run(&conn, run.id).unwrap().unwrap();
        assert_eq!(stored.status, STATUS_COMPLETED);
        assert!(stored.stats.contains("\"frames\":10"));
        assert!(stored.finished_at.is_some());
    }

    #[test]
    fn test_failed_run_keeps_error() {
        let conn = crate::db::open_memory_db().unwrap();
        let run = RunHandle::start(&conn, RUN_TYPE_FRAME_INDEX, 3, true).unwrap();
        let outcome: Result<()> = Err(RovError::LogDecode("bad header".to_string()));
        assert!(run.settle(&conn, &serde_json::json!({}), outcome).is_err());

        let stored = schema::get_run(&conn, run.id).unwrap().unwrap();
        assert_eq!(stored.status, STATUS_FAILED);
        assert!(stored.forced);
        assert!(stored.last_error.unwrap().contains("bad header"));
    }
}
