// ROV Missions - Library Entry Point
// Loads ROV flight-controller logs into a mission store and aligns
// camera frames with navigation.

pub mod constants;
pub mod error;
pub mod config;
pub mod db;
pub mod telemetry;
pub mod ingest;
pub mod frames;
pub mod jobs;

pub use config::{PipelineSettings, SettingsOverrides};
pub use error::{RovError, Result};
pub use frames::{lookup_frame, run_frame_index, FrameIndexOptions, FrameIndexResult};
pub use ingest::{run_log_ingest, run_mission_ingest, IngestOptions, IngestResult};
