// ROV Missions Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RovError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mission not found: {0}")]
    MissionNotFound(i64),

    #[error("Log file not found: {0}")]
    LogFileNotFound(i64),

    #[error("Media asset not found: {0}")]
    MediaAssetNotFound(i64),

    #[error("Sensor not found: {0}")]
    SensorNotFound(i64),

    #[error("Mission {0} must have an end_time before log import")]
    MissionIncomplete(i64),

    #[error("Log file {0} has already been parsed. Use --force to re-parse.")]
    AlreadyParsed(i64),

    #[error("Media asset {asset_id} already has {count} frame index rows. Use --force to rebuild.")]
    FrameIndexExists { asset_id: i64, count: i64 },

    #[error("Invalid media asset: {0}")]
    InvalidMediaAsset(String),

    #[error("Delete protected: {0}")]
    DeleteProtected(String),

    #[error("Log decode error: {0}")]
    LogDecode(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

impl RovError {
    /// True for guard failures that refuse a run before any work is done.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RovError::MissionIncomplete(_)
                | RovError::AlreadyParsed(_)
                | RovError::FrameIndexExists { .. }
                | RovError::InvalidMediaAsset(_)
                | RovError::DeleteProtected(_)
        )
    }
}

impl From<anyhow::Error> for RovError {
    fn from(err: anyhow::Error) -> Self {
        RovError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RovError>;
