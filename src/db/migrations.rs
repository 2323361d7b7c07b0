// Database migrations
// Migrations are forward-only. Never edit or delete a migration after it ships.

use rusqlite::Connection;
use anyhow::Result;

/// All migrations in order. Each migration is a SQL string.
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Missions
    CREATE TABLE missions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        location TEXT NOT NULL DEFAULT '',
        start_time TEXT NOT NULL,
        end_time TEXT,
        notes TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        CHECK (end_time IS NULL OR end_time > start_time)
    );

    -- Sensors (hardware catalogue, owned by the record-management system)
    CREATE TABLE sensors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sensor_type TEXT NOT NULL CHECK (sensor_type IN ('imu', 'compass', 'pressure', 'camera', 'sonar')),
        name TEXT NOT NULL,
        specification TEXT NOT NULL DEFAULT '{}'
    );

    -- Sensor placement for one mission
    CREATE TABLE sensor_deployments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        mission_id INTEGER NOT NULL REFERENCES missions(id) ON DELETE CASCADE,
        sensor_id INTEGER NOT NULL REFERENCES sensors(id) ON DELETE RESTRICT,
        instance INTEGER NOT NULL DEFAULT 0 CHECK (instance IN (0, 1)),
        position TEXT NOT NULL,
        UNIQUE(mission_id, sensor_id, instance)
    );

    -- Binary flight-controller logs
    CREATE TABLE log_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        mission_id INTEGER NOT NULL REFERENCES missions(id) ON DELETE CASCADE,
        bin_path TEXT NOT NULL,
        reference_time TEXT NOT NULL,
        already_parsed INTEGER NOT NULL DEFAULT 0,
        parsed_at TEXT,
        notes TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
    );

    -- Inertial samples
    CREATE TABLE imu_samples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        log_file_id INTEGER NOT NULL REFERENCES log_files(id) ON DELETE CASCADE,
        deployment_id INTEGER NOT NULL REFERENCES sensor_deployments(id) ON DELETE RESTRICT,
        timestamp TEXT NOT NULL,
        gx_rad_s REAL NOT NULL,
        gy_rad_s REAL NOT NULL,
        gz_rad_s REAL NOT NULL,
        ax_m_s2 REAL NOT NULL,
        ay_m_s2 REAL NOT NULL,
        az_m_s2 REAL NOT NULL,
        UNIQUE(deployment_id, timestamp)
    );

    -- Magnetic samples
    CREATE TABLE compass_samples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        log_file_id INTEGER NOT NULL REFERENCES log_files(id) ON DELETE CASCADE,
        deployment_id INTEGER NOT NULL REFERENCES sensor_deployments(id) ON DELETE RESTRICT,
        timestamp TEXT NOT NULL,
        mx_ut REAL NOT NULL,
        my_ut REAL NOT NULL,
        mz_ut REAL NOT NULL,
        UNIQUE(deployment_id, timestamp)
    );

    -- Pressure samples
    CREATE TABLE pressure_samples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        log_file_id INTEGER NOT NULL REFERENCES log_files(id) ON DELETE CASCADE,
        deployment_id INTEGER NOT NULL REFERENCES sensor_deployments(id) ON DELETE RESTRICT,
        timestamp TEXT NOT NULL,
        pressure_pa REAL NOT NULL,
        temperature_c REAL,
        UNIQUE(deployment_id, timestamp)
    );

    -- Mission-level navigation snapshots
    CREATE TABLE nav_samples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        mission_id INTEGER NOT NULL REFERENCES missions(id) ON DELETE CASCADE,
        log_file_id INTEGER REFERENCES log_files(id) ON DELETE SET NULL,
        source TEXT NOT NULL CHECK (source IN ('ATT', 'AHR2', 'manual')),
        timestamp TEXT NOT NULL,
        roll_deg REAL,
        pitch_deg REAL,
        yaw_deg REAL,
        depth_m REAL,
        UNIQUE(mission_id, log_file_id, source, timestamp)
    );

    -- Images and videos
    CREATE TABLE media_assets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        deployment_id INTEGER NOT NULL REFERENCES sensor_deployments(id) ON DELETE RESTRICT,
        media_type TEXT NOT NULL CHECK (media_type IN ('image', 'video')),
        file_path TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT,
        fps REAL,
        notes TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        CHECK (media_type = 'video' OR (end_time IS NULL AND fps IS NULL)),
        CHECK (fps IS NULL OR fps > 0),
        CHECK (end_time IS NULL OR end_time > start_time)
    );

    -- Derived frame -> navigation links (regenerable)
    CREATE TABLE frame_index (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        media_asset_id INTEGER NOT NULL REFERENCES media_assets(id) ON DELETE CASCADE,
        frame_number INTEGER NOT NULL CHECK (frame_number >= 0),
        timestamp TEXT NOT NULL,
        nav_sample_id INTEGER REFERENCES nav_samples(id) ON DELETE RESTRICT,
        time_diff_ms INTEGER,
        UNIQUE(media_asset_id, frame_number)
    );

    -- Run ledger
    CREATE TABLE runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_token TEXT NOT NULL UNIQUE,
        run_type TEXT NOT NULL CHECK (run_type IN ('log_ingest', 'frame_index')),
        target_id INTEGER NOT NULL,
        forced INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'running' CHECK (status IN ('running', 'completed', 'failed')),
        stats TEXT NOT NULL DEFAULT '{}',
        last_error TEXT,
        pipeline_version INTEGER NOT NULL,
        started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        finished_at TEXT
    );

    -- Indexes for common queries
    CREATE INDEX idx_deployments_mission ON sensor_deployments(mission_id);
    CREATE INDEX idx_log_files_mission ON log_files(mission_id);
    CREATE INDEX idx_imu_log_file ON imu_samples(log_file_id);
    CREATE INDEX idx_compass_log_file ON compass_samples(log_file_id);
    CREATE INDEX idx_pressure_log_file ON pressure_samples(log_file_id);
    CREATE INDEX idx_nav_mission_time ON nav_samples(mission_id, timestamp);
    CREATE INDEX idx_nav_log_file ON nav_samples(log_file_id);
    CREATE INDEX idx_media_deployment ON media_assets(deployment_id);
    CREATE INDEX idx_frame_index_nav ON frame_index(nav_sample_id);
    CREATE INDEX idx_runs_type_target ON runs(run_type, target_id);
    "#,
];

/// Get current schema version from database
fn get_schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row(
        "PRAGMA user_version",
        [],
        |row| row.get(0)
    )?;
    Ok(version)
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    let target_version = MIGRATIONS.len() as u32;

    // Refuse to open a DB created by a newer build
    if current_version > target_version {
        anyhow::bail!(
            "Database schema version {} is newer than this build supports (max {}). Please upgrade rovmission.",
            current_version,
            target_version
        );
    }

    if current_version == target_version {
        return Ok(());
    }

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let migration_version = (i + 1) as u32;
        if migration_version <= current_version {
            continue;
        }

        conn.execute_batch(migration)?;
        conn.execute_batch(&format!("PRAGMA user_version = {}", migration_version))?;

        log::info!("Applied migration {}", migration_version);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_refuses_newer_schema() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA user_version = 99").unwrap();
        assert!(run_migrations(&conn).is_err());
    }
}
