// ROV Missions Constants
// Pipeline defaults. CLI flags and the settings file override the tunable ones.

pub const PIPELINE_VERSION: u32 = 1;

// Paths
pub const WORKSPACE_FOLDER: &str = ".rovmission";
pub const DB_FILENAME: &str = "rovmission.db";
pub const SETTINGS_FILENAME: &str = "settings.json";
pub const LOGS_FOLDER: &str = "logs";

// Time
// Fixed-width so text order equals time order in SQLite.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

// Batching
pub const DEFAULT_BATCH_SIZE: usize = 1000;

// Instance filters per sensor kind
pub const DEFAULT_IMU_INSTANCES: [u8; 1] = [0];
pub const DEFAULT_MAG_INSTANCES: [u8; 2] = [0, 1];
pub const DEFAULT_BARO_INSTANCES: [u8; 1] = [1];
/// Deployments are single or dual rigs (instance 0 or 1)
pub const MAX_SENSOR_INSTANCE: u8 = 1;

// Progress
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

// Frame alignment
pub const FRAME_COUNT_EPSILON: f64 = 1e-9;

// Run ledger
pub const RUN_TYPE_LOG_INGEST: &str = "log_ingest";
pub const RUN_TYPE_FRAME_INDEX: &str = "frame_index";

// Navigation sample sources
pub const NAV_SOURCE_ATT: &str = "ATT";
pub const NAV_SOURCE_AHR2: &str = "AHR2";
pub const NAV_SOURCE_MANUAL: &str = "manual";

// ----- DataFlash framing -----

pub const DF_HEAD1: u8 = 0xA3;
pub const DF_HEAD2: u8 = 0x95;
pub const DF_HEADER_LEN: usize = 3;
pub const DF_FMT_TYPE: u8 = 128;
pub const DF_FMT_LENGTH: usize = 89;

// Message type tags consumed by the classifier
pub const MSG_IMU: &str = "IMU";
pub const MSG_MAG: &str = "MAG";
pub const MSG_BARO: &str = "BARO";
pub const MSG_ATT: &str = "ATT";
pub const MSG_AHR2: &str = "AHR2";

// Field names
pub const FIELD_TIME_US: &str = "TimeUS";
pub const FIELD_TIME_MS: &str = "TimeMS";
pub const FIELD_INSTANCE: &str = "I";
