// Batched sample writer
// Rows are buffered and written one batch per transaction. If a batch fails
// it is rolled back and retried row by row, so one bad row costs only itself.

use rusqlite::Connection;
use serde::Serialize;

use crate::db::schema::{
    self, NewCompassSample, NewFrameIndex, NewImuSample, NewNavSample, NewPressureSample,
};

/// A row the batch writer can persist. `insert` returns 0 for a duplicate.
pub trait BatchRow {
    const LABEL: &'static str;
    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize>;
}

impl BatchRow for NewImuSample {
    const LABEL: &'static str = "imu";
    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        schema::insert_imu_sample(conn, self)
    }
}

impl BatchRow for NewCompassSample {
    const LABEL: &'static str = "compass";
    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        schema::insert_compass_sample(conn, self)
    }
}

impl BatchRow for NewPressureSample {
    const LABEL: &'static str = "pressure";
    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        schema::insert_pressure_sample(conn, self)
    }
}

impl BatchRow for NewNavSample {
    const LABEL: &'static str = "nav";
    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        schema::insert_nav_sample_ignore(conn, self)
    }
}

impl BatchRow for NewFrameIndex {
    const LABEL: &'static str = "frame_index";
    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        schema::insert_frame_index(conn, self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushStats {
    pub attempted: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub batches: u64,
    /// Batches that had to be retried row by row
    pub fallbacks: u64,
}

impl FlushStats {
    fn absorb(&mut self, other: FlushStats) {
        self.attempted += other.attempted;
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.failed += other.failed;
        self.batches += other.batches;
        self.fallbacks += other.fallbacks;
    }
}

pub struct BatchWriter<T: BatchRow> {
    batch_size: usize,
    buffer: Vec<T>,
    stats: FlushStats,
}

impl<T: BatchRow> BatchWriter<T> {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            stats: FlushStats::default(),
        }
    }

    /// Buffer a row, flushing once the batch is full.
    pub fn push(&mut self, conn: &Connection, row: T) {
        self.buffer.push(row);
        if self.buffer.len() >= self.batch_size {
            self.flush(conn);
        }
    }

    pub fn flush(&mut self, conn: &Connection) {
        if self.buffer.is_empty() {
            return;
        }
        let rows = std::mem::take(&mut self.buffer);
        let result = flush_rows(conn, &rows);
        self.stats.absorb(result);
    }

    /// Flush what is left and return the totals.
    pub fn finish(mut self, conn: &Connection) -> FlushStats {
        self.flush(conn);
        self.stats
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> FlushStats {
        self.stats
    }
}

fn insert_atomic<T: BatchRow>(conn: &Connection, rows: &[T]) -> rusqlite::Result<u64> {
    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0u64;
    for row in rows {
        inserted += row.insert(&tx)? as u64;
    }
    tx.commit()?;
    Ok(inserted)
}

fn flush_rows<T: BatchRow>(conn: &Connection, rows: &[T]) -> FlushStats {
    let attempted = rows.len() as u64;
    let mut stats = FlushStats {
        attempted,
        batches: 1,
        ..Default::default()
    };

    match insert_atomic(conn, rows) {
        Ok(inserted) => {
            stats.inserted = inserted;
            stats.duplicates = attempted - inserted;
            log::debug!("Flushed {} {} rows ({} new)", attempted, T::LABEL, inserted);
        }
        Err(e) => {
            log::warn!(
                "Batch of {} {} rows failed ({}); retrying row by row",
                attempted, T::LABEL, e
            );
            stats.fallbacks = 1;
            for (i, row) in rows.iter().enumerate() {
                match row.insert(conn) {
                    Ok(0) => stats.duplicates += 1,
                    Ok(_) => stats.inserted += 1,
                    Err(e) => {
                        stats.failed += 1;
                        log::error!("Failed to insert {} row {} of batch: {}", T::LABEL, i, e);
                    }
                }
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use crate::db::schema::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn setup() -> (Connection, i64, i64) {
        let conn = crate::db::open_memory_db().unwrap();
        let mission_id = insert_mission(&conn, &NewMission {
            location: "Test".to_string(),
            start_time: t0(),
            end_time: Some(t0() + Duration::minutes(10)),
            notes: String::new(),
        }).unwrap();
        let sensor_id = insert_sensor(&conn, SensorType::Pressure, "Bar30").unwrap();
        let deployment_id = insert_deployment(&conn, &NewDeployment {
            mission_id,
            sensor_id,
            instance: 1,
            position: "hull".to_string(),
        }).unwrap();
        let log_id = insert_log_file(&conn, &NewLogFile {
            mission_id,
            bin_path: "00000001.BIN".to_string(),
            reference_time: t0(),
            notes: String::new(),
        }).unwrap();
        (conn, deployment_id, log_id)
    }

    fn sample(log_id: i64, deployment_id: i64, secs: i64) -> NewPressureSample {
        NewPressureSample {
            log_file_id: log_id,
            deployment_id,
            timestamp: t0() + Duration::seconds(secs),
            pressure_pa: 101_325.0 + secs as f64,
            temperature_c: Some(12.5),
        }
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM pressure_samples", [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn test_flushes_at_batch_size() {
        let (conn, dep, log) = setup();
        let mut writer = BatchWriter::new(2);
        writer.push(&conn, sample(log, dep, 0));
        assert_eq!(writer.pending(), 1);
        assert_eq!(count(&conn), 0);

        writer.push(&conn, sample(log, dep, 1));
        assert_eq!(writer.pending(), 0);
        assert_eq!(count(&conn), 2);

        writer.push(&conn, sample(log, dep, 2));
        let stats = writer.finish(&conn);
        assert_eq!(count(&conn), 3);
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.inserted, 3);
        assert_eq!(stats.fallbacks, 0);
    }

    #[test]
    fn test_duplicates_are_not_failures() {
        let (conn, dep, log) = setup();
        let mut writer = BatchWriter::new(10);
        writer.push(&conn, sample(log, dep, 0));
        writer.push(&conn, sample(log, dep, 0));
        writer.push(&conn, sample(log, dep, 1));
        let stats = writer.finish(&conn);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.fallbacks, 0);
    }

    #[test]
    fn test_bad_row_falls_back_to_row_by_row() {
        let (conn, dep, log) = setup();
        let mut writer = BatchWriter::new(10);
        writer.push(&conn, sample(log, dep, 0));
        // Unknown deployment violates the foreign key and poisons the batch
        writer.push(&conn, sample(log, 9_999, 1));
        writer.push(&conn, sample(log, dep, 2));
        let stats = writer.finish(&conn);

        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(count(&conn), 2);
    }
}
