// Database module

pub mod migrations;
pub mod schema;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use anyhow::Result;

use crate::constants::{DB_FILENAME, LOGS_FOLDER, TIMESTAMP_FORMAT, WORKSPACE_FOLDER};
use crate::error::RovError;

/// Open or create a database at the given path
pub fn open_db(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;

    // Enable foreign keys (must be done per connection)
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    // Enable WAL mode so concurrent runs on different inputs don't block readers
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// Open an in-memory database with all migrations applied
pub fn open_memory_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}

/// Get the database path for a workspace root
pub fn get_db_path(workspace_root: &Path) -> PathBuf {
    workspace_root
        .join(WORKSPACE_FOLDER)
        .join(DB_FILENAME)
}

/// Initialize workspace folder structure
pub fn init_workspace_folders(workspace_root: &Path) -> Result<()> {
    std::fs::create_dir_all(workspace_root.join(WORKSPACE_FOLDER))?;
    std::fs::create_dir_all(workspace_root.join(LOGS_FOLDER))?;
    Ok(())
}

/// Format a UTC timestamp for storage.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. Accepts the storage format and RFC 3339.
pub fn parse_timestamp(text: &str) -> crate::error::Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RovError::InvalidTimestamp(text.to_string()))
}

/// Read a timestamp column, surfacing parse failures as conversion errors.
pub(crate) fn row_timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_timestamp(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn row_timestamp_opt(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    match text {
        Some(t) => parse_timestamp(&t).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_round_trip_keeps_micros() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap()
            + chrono::Duration::microseconds(250_123);
        let text = format_timestamp(&ts);
        assert_eq!(text, "2024-01-01T00:00:01.250123Z");
        assert_eq!(parse_timestamp(&text).unwrap(), ts);
    }

    #[test]
    fn test_timestamp_text_order_matches_time_order() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 9).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap();
        assert!(format_timestamp(&a) < format_timestamp(&b));
    }

    #[test]
    fn test_parse_rfc3339_input() {
        let ts = parse_timestamp("2024-01-01T00:10:00+00:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_workspace_paths() {
        let root = Path::new("/data/dive");
        assert_eq!(get_db_path(root), PathBuf::from("/data/dive/.rovmission/rovmission.db"));
    }
}
