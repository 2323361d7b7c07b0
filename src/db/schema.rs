// Database schema types and query helpers

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{format_timestamp, row_timestamp, row_timestamp_opt};
use crate::constants::NAV_SOURCE_MANUAL;
use crate::error::{RovError, Result};

// ----- Enums -----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Imu,
    Compass,
    Pressure,
    Camera,
    Sonar,
}

impl SensorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Imu => "imu",
            SensorType::Compass => "compass",
            SensorType::Pressure => "pressure",
            SensorType::Camera => "camera",
            SensorType::Sonar => "sonar",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorType {
    type Err = RovError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "imu" | "inertial" => Ok(SensorType::Imu),
            "compass" | "magnetic" | "magnetometer" | "mag" => Ok(SensorType::Compass),
            "pressure" | "baro" | "barometer" => Ok(SensorType::Pressure),
            "camera" => Ok(SensorType::Camera),
            "sonar" => Ok(SensorType::Sonar),
            other => Err(RovError::Other(format!("Unknown sensor type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

impl FromStr for MediaType {
    type Err = RovError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "image" => Ok(MediaType::Image),
            "video" => Ok(MediaType::Video),
            other => Err(RovError::Other(format!("Unknown media type: {}", other))),
        }
    }
}

fn parse_column<T: FromStr<Err = RovError>>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ----- Mission -----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: i64,
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub notes: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewMission {
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub notes: String,
}

const MISSION_COLUMNS: &str = "id, location, start_time, end_time, notes, created_at";

fn map_mission(row: &rusqlite::Row<'_>) -> rusqlite::Result<Mission> {
    Ok(Mission {
        id: row.get(0)?,
        location: row.get(1)?,
        start_time: row_timestamp(row, 2)?,
        end_time: row_timestamp_opt(row, 3)?,
        notes: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn insert_mission(conn: &Connection, mission: &NewMission) -> Result<i64> {
    conn.execute(
        "INSERT INTO missions (location, start_time, end_time, notes) VALUES (?1, ?2, ?3, ?4)",
        params![
            mission.location,
            format_timestamp(&mission.start_time),
            mission.end_time.as_ref().map(format_timestamp),
            mission.notes,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_mission(conn: &Connection, id: i64) -> Result<Option<Mission>> {
    let result = conn.query_row(
        &format!("SELECT {} FROM missions WHERE id = ?1", MISSION_COLUMNS),
        params![id],
        map_mission,
    ).optional()?;
    Ok(result)
}

pub fn list_missions(conn: &Connection) -> Result<Vec<Mission>> {
    let mut stmt = conn.prepare(
        &format!("SELECT {} FROM missions ORDER BY start_time DESC", MISSION_COLUMNS)
    )?;
    let missions = stmt.query_map([], map_mission)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(missions)
}

/// Close a mission's time window. Log parsing is gated on this.
pub fn set_mission_end_time(conn: &Connection, id: i64, end_time: &DateTime<Utc>) -> Result<()> {
    let rows = conn.execute(
        "UPDATE missions SET end_time = ?1 WHERE id = ?2",
        params![format_timestamp(end_time), id],
    )?;
    if rows == 0 {
        return Err(RovError::MissionNotFound(id));
    }
    Ok(())
}

// ----- Sensor -----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensor {
    pub id: i64,
    pub sensor_type: SensorType,
    pub name: String,
    pub specification: String,
}

pub fn insert_sensor(conn: &Connection, sensor_type: SensorType, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO sensors (sensor_type, name) VALUES (?1, ?2)",
        params![sensor_type.as_str(), name],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_sensor(conn: &Connection, id: i64) -> Result<Option<Sensor>> {
    let result = conn.query_row(
        "SELECT id, sensor_type, name, specification FROM sensors WHERE id = ?1",
        params![id],
        |row| {
            Ok(Sensor {
                id: row.get(0)?,
                sensor_type: parse_column(row, 1)?,
                name: row.get(2)?,
                specification: row.get(3)?,
            })
        },
    ).optional()?;
    Ok(result)
}

// ----- Sensor Deployment -----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDeployment {
    pub id: i64,
    pub mission_id: i64,
    pub sensor_id: i64,
    pub sensor_type: SensorType,
    pub instance: u8,
    pub position: String,
}

#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub mission_id: i64,
    pub sensor_id: i64,
    pub instance: u8,
    pub position: String,
}

/// Insert a deployment. At most one per (mission, sensor, instance).
pub fn insert_deployment(conn: &Connection, deployment: &NewDeployment) -> Result<i64> {
    if get_sensor(conn, deployment.sensor_id)?.is_none() {
        return Err(RovError::SensorNotFound(deployment.sensor_id));
    }
    conn.execute(
        "INSERT INTO sensor_deployments (mission_id, sensor_id, instance, position)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            deployment.mission_id,
            deployment.sensor_id,
            deployment.instance,
            deployment.position,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// All deployments of a mission with their sensor type, oldest first.
pub fn list_deployments_for_mission(conn: &Connection, mission_id: i64) -> Result<Vec<SensorDeployment>> {
    let mut stmt = conn.prepare(
        "SELECT d.id, d.mission_id, d.sensor_id, s.sensor_type, d.instance, d.position
         FROM sensor_deployments d
         JOIN sensors s ON s.id = d.sensor_id
         WHERE d.mission_id = ?1
         ORDER BY d.id"
    )?;
    let deployments = stmt.query_map(params![mission_id], |row| {
        Ok(SensorDeployment {
            id: row.get(0)?,
            mission_id: row.get(1)?,
            sensor_id: row.get(2)?,
            sensor_type: parse_column(row, 3)?,
            instance: row.get(4)?,
            position: row.get(5)?,
        })
    })?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(deployments)
}

// ----- Log File -----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFile {
    pub id: i64,
    pub mission_id: i64,
    pub bin_path: String,
    pub reference_time: DateTime<Utc>,
    pub already_parsed: bool,
    pub parsed_at: Option<String>,
    pub notes: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewLogFile {
    pub mission_id: i64,
    pub bin_path: String,
    pub reference_time: DateTime<Utc>,
    pub notes: String,
}

const LOG_FILE_COLUMNS: &str =
    "id, mission_id, bin_path, reference_time, already_parsed, parsed_at, notes, created_at";

fn map_log_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogFile> {
    Ok(LogFile {
        id: row.get(0)?,
        mission_id: row.get(1)?,
        bin_path: row.get(2)?,
        reference_time: row_timestamp(row, 3)?,
        already_parsed: row.get(4)?,
        parsed_at: row.get(5)?,
        notes: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub fn insert_log_file(conn: &Connection, log_file: &NewLogFile) -> Result<i64> {
    conn.execute(
        "INSERT INTO log_files (mission_id, bin_path, reference_time, notes) VALUES (?1, ?2, ?3, ?4)",
        params![
            log_file.mission_id,
            log_file.bin_path,
            format_timestamp(&log_file.reference_time),
            log_file.notes,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_log_file(conn: &Connection, id: i64) -> Result<Option<LogFile>> {
    let result = conn.query_row(
        &format!("SELECT {} FROM log_files WHERE id = ?1", LOG_FILE_COLUMNS),
        params![id],
        map_log_file,
    ).optional()?;
    Ok(result)
}

pub fn list_log_files_for_mission(conn: &Connection, mission_id: i64) -> Result<Vec<LogFile>> {
    let mut stmt = conn.prepare(
        &format!("SELECT {} FROM log_files WHERE mission_id = ?1 ORDER BY id", LOG_FILE_COLUMNS)
    )?;
    let files = stmt.query_map(params![mission_id], map_log_file)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(files)
}

pub fn mark_log_file_parsed(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE log_files SET already_parsed = 1, parsed_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now') WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

// ----- Sensor Samples -----

#[derive(Debug, Clone, PartialEq)]
pub struct NewImuSample {
    pub log_file_id: i64,
    pub deployment_id: i64,
    pub timestamp: DateTime<Utc>,
    pub gx_rad_s: f64,
    pub gy_rad_s: f64,
    pub gz_rad_s: f64,
    pub ax_m_s2: f64,
    pub ay_m_s2: f64,
    pub az_m_s2: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCompassSample {
    pub log_file_id: i64,
    pub deployment_id: i64,
    pub timestamp: DateTime<Utc>,
    pub mx_ut: f64,
    pub my_ut: f64,
    pub mz_ut: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPressureSample {
    pub log_file_id: i64,
    pub deployment_id: i64,
    pub timestamp: DateTime<Utc>,
    pub pressure_pa: f64,
    pub temperature_c: Option<f64>,
}

/// Stored inertial sample (read side, used for inspection and tests)
#[derive(Debug, Clone, Serialize)]
pub struct ImuSample {
    pub id: i64,
    pub log_file_id: i64,
    pub deployment_id: i64,
    pub timestamp: DateTime<Utc>,
    pub gx_rad_s: f64,
    pub gy_rad_s: f64,
    pub gz_rad_s: f64,
    pub ax_m_s2: f64,
    pub ay_m_s2: f64,
    pub az_m_s2: f64,
}

/// Conflict-tolerant insert. Returns 0 when the row already exists.
pub fn insert_imu_sample(conn: &Connection, s: &NewImuSample) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO imu_samples
            (log_file_id, deployment_id, timestamp, gx_rad_s, gy_rad_s, gz_rad_s, ax_m_s2, ay_m_s2, az_m_s2)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            s.log_file_id,
            s.deployment_id,
            format_timestamp(&s.timestamp),
            s.gx_rad_s,
            s.gy_rad_s,
            s.gz_rad_s,
            s.ax_m_s2,
            s.ay_m_s2,
            s.az_m_s2,
        ],
    )
}

pub fn insert_compass_sample(conn: &Connection, s: &NewCompassSample) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO compass_samples (log_file_id, deployment_id, timestamp, mx_ut, my_ut, mz_ut)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            s.log_file_id,
            s.deployment_id,
            format_timestamp(&s.timestamp),
            s.mx_ut,
            s.my_ut,
            s.mz_ut,
        ],
    )
}

pub fn insert_pressure_sample(conn: &Connection, s: &NewPressureSample) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO pressure_samples (log_file_id, deployment_id, timestamp, pressure_pa, temperature_c)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            s.log_file_id,
            s.deployment_id,
            format_timestamp(&s.timestamp),
            s.pressure_pa,
            s.temperature_c,
        ],
    )
}

pub fn list_imu_samples_for_log(conn: &Connection, log_file_id: i64) -> Result<Vec<ImuSample>> {
    let mut stmt = conn.prepare(
        "SELECT id, log_file_id, deployment_id, timestamp, gx_rad_s, gy_rad_s, gz_rad_s, ax_m_s2, ay_m_s2, az_m_s2
         FROM imu_samples WHERE log_file_id = ?1 ORDER BY timestamp, id"
    )?;
    let samples = stmt.query_map(params![log_file_id], |row| {
        Ok(ImuSample {
            id: row.get(0)?,
            log_file_id: row.get(1)?,
            deployment_id: row.get(2)?,
            timestamp: row_timestamp(row, 3)?,
            gx_rad_s: row.get(4)?,
            gy_rad_s: row.get(5)?,
            gz_rad_s: row.get(6)?,
            ax_m_s2: row.get(7)?,
            ay_m_s2: row.get(8)?,
            az_m_s2: row.get(9)?,
        })
    })?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(samples)
}

/// Row counts of everything a log file produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogSampleCounts {
    pub imu: i64,
    pub compass: i64,
    pub pressure: i64,
    pub nav: i64,
}

impl LogSampleCounts {
    pub fn total(&self) -> i64 {
        self.imu + self.compass + self.pressure + self.nav
    }
}

pub fn count_samples_for_log(conn: &Connection, log_file_id: i64) -> Result<LogSampleCounts> {
    let count = |table: &str| -> Result<i64> {
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE log_file_id = ?1", table),
            params![log_file_id],
            |row| row.get(0),
        )?;
        Ok(n)
    };
    Ok(LogSampleCounts {
        imu: count("imu_samples")?,
        compass: count("compass_samples")?,
        pressure: count("pressure_samples")?,
        nav: count("nav_samples")?,
    })
}

/// Delete every sample a log file produced. Caller owns the transaction.
pub fn delete_samples_for_log(conn: &Connection, log_file_id: i64) -> Result<LogSampleCounts> {
    let delete = |table: &str| -> Result<i64> {
        let n = conn.execute(
            &format!("DELETE FROM {} WHERE log_file_id = ?1", table),
            params![log_file_id],
        )?;
        Ok(n as i64)
    };
    Ok(LogSampleCounts {
        imu: delete("imu_samples")?,
        compass: delete("compass_samples")?,
        pressure: delete("pressure_samples")?,
        nav: delete("nav_samples")?,
    })
}

// ----- Navigation Sample -----

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavSample {
    pub id: i64,
    pub mission_id: i64,
    pub log_file_id: Option<i64>,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub roll_deg: Option<f64>,
    pub pitch_deg: Option<f64>,
    pub yaw_deg: Option<f64>,
    pub depth_m: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNavSample {
    pub mission_id: i64,
    pub log_file_id: Option<i64>,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub roll_deg: Option<f64>,
    pub pitch_deg: Option<f64>,
    pub yaw_deg: Option<f64>,
    pub depth_m: Option<f64>,
}

impl NewNavSample {
    /// A hand-entered navigation sample, not tied to any log file.
    pub fn manual(mission_id: i64, timestamp: DateTime<Utc>, depth_m: Option<f64>) -> Self {
        Self {
            mission_id,
            log_file_id: None,
            source: NAV_SOURCE_MANUAL.to_string(),
            timestamp,
            roll_deg: None,
            pitch_deg: None,
            yaw_deg: None,
            depth_m,
        }
    }
}

/// Minimal projection used by the frame matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavPoint {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
}

const NAV_COLUMNS: &str =
    "id, mission_id, log_file_id, source, timestamp, roll_deg, pitch_deg, yaw_deg, depth_m";

fn map_nav_sample(row: &rusqlite::Row<'_>) -> rusqlite::Result<NavSample> {
    Ok(NavSample {
        id: row.get(0)?,
        mission_id: row.get(1)?,
        log_file_id: row.get(2)?,
        source: row.get(3)?,
        timestamp: row_timestamp(row, 4)?,
        roll_deg: row.get(5)?,
        pitch_deg: row.get(6)?,
        yaw_deg: row.get(7)?,
        depth_m: row.get(8)?,
    })
}

/// Conflict-tolerant insert. Returns 0 when the row already exists.
pub fn insert_nav_sample_ignore(conn: &Connection, s: &NewNavSample) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO nav_samples
            (mission_id, log_file_id, source, timestamp, roll_deg, pitch_deg, yaw_deg, depth_m)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            s.mission_id,
            s.log_file_id,
            s.source,
            format_timestamp(&s.timestamp),
            s.roll_deg,
            s.pitch_deg,
            s.yaw_deg,
            s.depth_m,
        ],
    )
}

/// Insert a single navigation sample and return its id
pub fn insert_nav_sample(conn: &Connection, s: &NewNavSample) -> Result<i64> {
    conn.execute(
        "INSERT INTO nav_samples
            (mission_id, log_file_id, source, timestamp, roll_deg, pitch_deg, yaw_deg, depth_m)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            s.mission_id,
            s.log_file_id,
            s.source,
            format_timestamp(&s.timestamp),
            s.roll_deg,
            s.pitch_deg,
            s.yaw_deg,
            s.depth_m,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_nav_sample(conn: &Connection, id: i64) -> Result<Option<NavSample>> {
    let result = conn.query_row(
        &format!("SELECT {} FROM nav_samples WHERE id = ?1", NAV_COLUMNS),
        params![id],
        map_nav_sample,
    ).optional()?;
    Ok(result)
}

pub fn list_nav_samples_for_log(conn: &Connection, log_file_id: i64) -> Result<Vec<NavSample>> {
    let mut stmt = conn.prepare(
        &format!("SELECT {} FROM nav_samples WHERE log_file_id = ?1 ORDER BY timestamp, id", NAV_COLUMNS)
    )?;
    let samples = stmt.query_map(params![log_file_id], map_nav_sample)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(samples)
}

/// (id, timestamp) of every navigation sample of a mission, ascending by time.
pub fn list_nav_points(conn: &Connection, mission_id: i64) -> Result<Vec<NavPoint>> {
    let mut stmt = conn.prepare(
        "SELECT id, timestamp FROM nav_samples WHERE mission_id = ?1 ORDER BY timestamp, id"
    )?;
    let points = stmt.query_map(params![mission_id], |row| {
        Ok(NavPoint {
            id: row.get(0)?,
            timestamp: row_timestamp(row, 1)?,
        })
    })?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(points)
}

/// Media assets whose frame index links to navigation samples from this log file.
pub fn find_assets_referencing_log_nav(conn: &Connection, log_file_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT f.media_asset_id
         FROM frame_index f
         JOIN nav_samples n ON n.id = f.nav_sample_id
         WHERE n.log_file_id = ?1
         ORDER BY f.media_asset_id"
    )?;
    let ids = stmt.query_map(params![log_file_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(ids)
}

/// Delete a navigation sample. Refused while any frame index row points at it.
pub fn delete_nav_sample(conn: &Connection, id: i64) -> Result<()> {
    let refs: i64 = conn.query_row(
        "SELECT COUNT(*) FROM frame_index WHERE nav_sample_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    if refs > 0 {
        return Err(RovError::DeleteProtected(format!(
            "navigation sample {} is referenced by {} frame index rows",
            id, refs
        )));
    }
    conn.execute("DELETE FROM nav_samples WHERE id = ?1", params![id])?;
    Ok(())
}

// ----- Media Asset -----

#[derive(Debug, Clone, Serialize)]
pub struct MediaAsset {
    pub id: i64,
    pub deployment_id: i64,
    pub media_type: MediaType,
    pub file_path: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub fps: Option<f64>,
    pub notes: String,
}

#[derive(Debug, Clone)]
pub struct NewMediaAsset {
    pub deployment_id: i64,
    pub media_type: MediaType,
    pub file_path: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub fps: Option<f64>,
    pub notes: String,
}

impl NewMediaAsset {
    /// Images carry no end time or frame rate; videos need both, end after start, fps > 0.
    pub fn validate(&self) -> Result<()> {
        match self.media_type {
            MediaType::Image => {
                if self.end_time.is_some() || self.fps.is_some() {
                    return Err(RovError::InvalidMediaAsset(
                        "images must not carry end_time or fps".to_string(),
                    ));
                }
            }
            MediaType::Video => {
                let end = self.end_time.ok_or_else(|| {
                    RovError::InvalidMediaAsset("videos require end_time".to_string())
                })?;
                let fps = self.fps.ok_or_else(|| {
                    RovError::InvalidMediaAsset("videos require fps".to_string())
                })?;
                if end <= self.start_time {
                    return Err(RovError::InvalidMediaAsset(
                        "end_time must be after start_time".to_string(),
                    ));
                }
                if !(fps.is_finite() && fps > 0.0) {
                    return Err(RovError::InvalidMediaAsset(format!("fps must be positive, got {}", fps)));
                }
            }
        }
        Ok(())
    }
}

const MEDIA_COLUMNS: &str = "id, deployment_id, media_type, file_path, start_time, end_time, fps, notes";

fn map_media_asset(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaAsset> {
    Ok(MediaAsset {
        id: row.get(0)?,
        deployment_id: row.get(1)?,
        media_type: parse_column(row, 2)?,
        file_path: row.get(3)?,
        start_time: row_timestamp(row, 4)?,
        end_time: row_timestamp_opt(row, 5)?,
        fps: row.get(6)?,
        notes: row.get(7)?,
    })
}

pub fn insert_media_asset(conn: &Connection, asset: &NewMediaAsset) -> Result<i64> {
    asset.validate()?;
    conn.execute(
        "INSERT INTO media_assets (deployment_id, media_type, file_path, start_time, end_time, fps, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            asset.deployment_id,
            asset.media_type.as_str(),
            asset.file_path,
            format_timestamp(&asset.start_time),
            asset.end_time.as_ref().map(format_timestamp),
            asset.fps,
            asset.notes,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_media_asset(conn: &Connection, id: i64) -> Result<Option<MediaAsset>> {
    let result = conn.query_row(
        &format!("SELECT {} FROM media_assets WHERE id = ?1", MEDIA_COLUMNS),
        params![id],
        map_media_asset,
    ).optional()?;
    Ok(result)
}

/// Media asset with its frame-index row count, for status listings
#[derive(Debug, Clone, Serialize)]
pub struct MediaAssetSummary {
    pub asset: MediaAsset,
    pub mission_id: i64,
    pub frame_count: i64,
}

pub fn list_media_assets(conn: &Connection) -> Result<Vec<MediaAssetSummary>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.deployment_id, m.media_type, m.file_path, m.start_time, m.end_time, m.fps, m.notes,
                d.mission_id,
                (SELECT COUNT(*) FROM frame_index f WHERE f.media_asset_id = m.id)
         FROM media_assets m
         JOIN sensor_deployments d ON d.id = m.deployment_id
         ORDER BY m.id"
    )?;
    let assets = stmt.query_map([], |row| {
        Ok(MediaAssetSummary {
            asset: map_media_asset(row)?,
            mission_id: row.get(8)?,
            frame_count: row.get(9)?,
        })
    })?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(assets)
}

/// Mission owning a media asset, through its deployment.
pub fn get_mission_id_for_media_asset(conn: &Connection, asset_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT d.mission_id FROM media_assets m
         JOIN sensor_deployments d ON d.id = m.deployment_id
         WHERE m.id = ?1",
        params![asset_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(RovError::MediaAssetNotFound(asset_id))
}

// ----- Frame Index -----

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameIndexRow {
    pub id: i64,
    pub media_asset_id: i64,
    pub frame_number: i64,
    pub timestamp: DateTime<Utc>,
    pub nav_sample_id: Option<i64>,
    pub time_diff_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFrameIndex {
    pub media_asset_id: i64,
    pub frame_number: i64,
    pub timestamp: DateTime<Utc>,
    pub nav_sample_id: Option<i64>,
    pub time_diff_ms: Option<i64>,
}

const FRAME_COLUMNS: &str = "id, media_asset_id, frame_number, timestamp, nav_sample_id, time_diff_ms";

fn map_frame_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FrameIndexRow> {
    Ok(FrameIndexRow {
        id: row.get(0)?,
        media_asset_id: row.get(1)?,
        frame_number: row.get(2)?,
        timestamp: row_timestamp(row, 3)?,
        nav_sample_id: row.get(4)?,
        time_diff_ms: row.get(5)?,
    })
}

/// Conflict-tolerant insert. Returns 0 when the frame already exists.
pub fn insert_frame_index(conn: &Connection, f: &NewFrameIndex) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO frame_index (media_asset_id, frame_number, timestamp, nav_sample_id, time_diff_ms)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            f.media_asset_id,
            f.frame_number,
            format_timestamp(&f.timestamp),
            f.nav_sample_id,
            f.time_diff_ms,
        ],
    )
}

pub fn count_frame_index(conn: &Connection, media_asset_id: i64) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM frame_index WHERE media_asset_id = ?1",
        params![media_asset_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn delete_frame_index_for_asset(conn: &Connection, media_asset_id: i64) -> Result<usize> {
    let rows = conn.execute(
        "DELETE FROM frame_index WHERE media_asset_id = ?1",
        params![media_asset_id],
    )?;
    Ok(rows)
}

pub fn list_frame_index(conn: &Connection, media_asset_id: i64) -> Result<Vec<FrameIndexRow>> {
    let mut stmt = conn.prepare(
        &format!("SELECT {} FROM frame_index WHERE media_asset_id = ?1 ORDER BY frame_number", FRAME_COLUMNS)
    )?;
    let rows = stmt.query_map(params![media_asset_id], map_frame_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_frame(conn: &Connection, media_asset_id: i64, frame_number: i64) -> Result<Option<FrameIndexRow>> {
    let result = conn.query_row(
        &format!("SELECT {} FROM frame_index WHERE media_asset_id = ?1 AND frame_number = ?2", FRAME_COLUMNS),
        params![media_asset_id, frame_number],
        map_frame_row,
    ).optional()?;
    Ok(result)
}

// ----- Run -----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub run_token: String,
    pub run_type: String,
    pub target_id: i64,
    pub forced: bool,
    pub status: String,
    pub stats: String,
    pub last_error: Option<String>,
    pub pipeline_version: u32,
    pub started_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub run_token: String,
    pub run_type: String,
    pub target_id: i64,
    pub forced: bool,
    pub pipeline_version: u32,
}

const RUN_COLUMNS: &str = "id, run_token, run_type, target_id, forced, status, stats, last_error,
                           pipeline_version, started_at, finished_at";

fn map_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    Ok(Run {
        id: row.get(0)?,
        run_token: row.get(1)?,
        run_type: row.get(2)?,
        target_id: row.get(3)?,
        forced: row.get(4)?,
        status: row.get(5)?,
        stats: row.get(6)?,
        last_error: row.get(7)?,
        pipeline_version: row.get(8)?,
        started_at: row.get(9)?,
        finished_at: row.get(10)?,
    })
}

pub fn insert_run(conn: &Connection, run: &NewRun) -> Result<i64> {
    conn.execute(
        "INSERT INTO runs (run_token, run_type, target_id, forced, pipeline_version) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![run.run_token, run.run_type, run.target_id, run.forced, run.pipeline_version],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_run(conn: &Connection, id: i64, status: &str, stats: &str, error: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE runs SET status = ?1, stats = ?2, last_error = ?3,
                finished_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ?4",
        params![status, stats, error, id],
    )?;
    Ok(())
}

pub fn get_run(conn: &Connection, id: i64) -> Result<Option<Run>> {
    let result = conn.query_row(
        &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
        params![id],
        map_run,
    ).optional()?;
    Ok(result)
}

pub fn list_runs(conn: &Connection, run_type: Option<&str>, limit: i64) -> Result<Vec<Run>> {
    let runs = match run_type {
        Some(rt) => {
            let mut stmt = conn.prepare(
                &format!("SELECT {} FROM runs WHERE run_type = ?1 ORDER BY id DESC LIMIT ?2", RUN_COLUMNS)
            )?;
            let rows = stmt.query_map(params![rt, limit], map_run)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(
                &format!("SELECT {} FROM runs ORDER BY id DESC LIMIT ?1", RUN_COLUMNS)
            )?;
            let rows = stmt.query_map(params![limit], map_run)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    fn setup() -> (Connection, i64, i64) {
        let conn = crate::db::open_memory_db().unwrap();
        let mission_id = insert_mission(&conn, &NewMission {
            location: "Harbour wall".to_string(),
            start_time: t(0, 0, 0),
            end_time: Some(t(0, 10, 0)),
            notes: String::new(),
        }).unwrap();
        let sensor_id = insert_sensor(&conn, SensorType::Camera, "GoPro").unwrap();
        let deployment_id = insert_deployment(&conn, &NewDeployment {
            mission_id,
            sensor_id,
            instance: 0,
            position: "bow".to_string(),
        }).unwrap();
        (conn, mission_id, deployment_id)
    }

    #[test]
    fn test_deployment_unique_per_mission_sensor_instance() {
        let (conn, mission_id, _) = setup();
        let sensor_id = insert_sensor(&conn, SensorType::Imu, "ICM-20602").unwrap();
        let dep = NewDeployment { mission_id, sensor_id, instance: 0, position: "hull".to_string() };
        insert_deployment(&conn, &dep).unwrap();
        assert!(insert_deployment(&conn, &dep).is_err());

        let second = NewDeployment { instance: 1, ..dep };
        insert_deployment(&conn, &second).unwrap();
        assert_eq!(list_deployments_for_mission(&conn, mission_id).unwrap().len(), 3);
    }

    #[test]
    fn test_media_asset_invariants() {
        let (conn, _, deployment_id) = setup();
        let image = NewMediaAsset {
            deployment_id,
            media_type: MediaType::Image,
            file_path: "img.jpg".to_string(),
            start_time: t(0, 1, 0),
            end_time: None,
            fps: None,
            notes: String::new(),
        };
        insert_media_asset(&conn, &image).unwrap();

        let bad_image = NewMediaAsset { fps: Some(30.0), ..image.clone() };
        assert!(matches!(insert_media_asset(&conn, &bad_image), Err(RovError::InvalidMediaAsset(_))));

        let video = NewMediaAsset {
            media_type: MediaType::Video,
            end_time: Some(t(0, 2, 0)),
            fps: Some(25.0),
            ..image.clone()
        };
        insert_media_asset(&conn, &video).unwrap();

        let backwards = NewMediaAsset { end_time: Some(t(0, 0, 30)), ..video.clone() };
        assert!(insert_media_asset(&conn, &backwards).is_err());

        let zero_fps = NewMediaAsset { fps: Some(0.0), ..video.clone() };
        assert!(insert_media_asset(&conn, &zero_fps).is_err());

        let no_fps = NewMediaAsset { fps: None, ..video };
        assert!(insert_media_asset(&conn, &no_fps).is_err());
    }

    #[test]
    fn test_nav_sample_delete_protected_when_referenced() {
        let (conn, mission_id, deployment_id) = setup();
        let nav_id = insert_nav_sample(&conn, &NewNavSample::manual(mission_id, t(0, 1, 0), Some(3.0))).unwrap();
        let asset_id = insert_media_asset(&conn, &NewMediaAsset {
            deployment_id,
            media_type: MediaType::Video,
            file_path: "dive.mp4".to_string(),
            start_time: t(0, 1, 0),
            end_time: Some(t(0, 1, 1)),
            fps: Some(1.0),
            notes: String::new(),
        }).unwrap();
        insert_frame_index(&conn, &NewFrameIndex {
            media_asset_id: asset_id,
            frame_number: 0,
            timestamp: t(0, 1, 0),
            nav_sample_id: Some(nav_id),
            time_diff_ms: Some(0),
        }).unwrap();

        assert!(matches!(delete_nav_sample(&conn, nav_id), Err(RovError::DeleteProtected(_))));
        // The store enforces it as well
        assert!(conn.execute("DELETE FROM nav_samples WHERE id = ?1", params![nav_id]).is_err());

        delete_frame_index_for_asset(&conn, asset_id).unwrap();
        delete_nav_sample(&conn, nav_id).unwrap();
        assert!(get_nav_sample(&conn, nav_id).unwrap().is_none());
    }

    #[test]
    fn test_nav_points_sorted_by_time() {
        let (conn, mission_id, _) = setup();
        insert_nav_sample(&conn, &NewNavSample::manual(mission_id, t(0, 5, 0), None)).unwrap();
        insert_nav_sample(&conn, &NewNavSample::manual(mission_id, t(0, 1, 0), None)).unwrap();
        insert_nav_sample(&conn, &NewNavSample::manual(mission_id, t(0, 3, 0), None)).unwrap();

        let points = list_nav_points(&conn, mission_id).unwrap();
        let times: Vec<_> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(times, vec![t(0, 1, 0), t(0, 3, 0), t(0, 5, 0)]);
    }

    #[test]
    fn test_set_mission_end_time() {
        let conn = crate::db::open_memory_db().unwrap();
        let id = insert_mission(&conn, &NewMission {
            location: String::new(),
            start_time: t(1, 0, 0),
            end_time: None,
            notes: String::new(),
        }).unwrap();
        assert!(get_mission(&conn, id).unwrap().unwrap().end_time.is_none());

        set_mission_end_time(&conn, id, &t(2, 0, 0)).unwrap();
        assert_eq!(get_mission(&conn, id).unwrap().unwrap().end_time, Some(t(2, 0, 0)));
        assert!(matches!(set_mission_end_time(&conn, 999, &t(2, 0, 0)), Err(RovError::MissionNotFound(999))));
    }

    #[test]
    fn test_sensor_type_aliases() {
        assert_eq!("magnetic".parse::<SensorType>().unwrap(), SensorType::Compass);
        assert_eq!("inertial".parse::<SensorType>().unwrap(), SensorType::Imu);
        assert!("lidar".parse::<SensorType>().is_err());
    }
}
