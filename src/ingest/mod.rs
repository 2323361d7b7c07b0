// Log ingestion pipeline
// Guard checks -> decode -> classify -> attribute -> batched writes -> mark parsed.

pub mod classifier;
pub mod deployments;
pub mod writer;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use rusqlite::Connection;
use serde::Serialize;

use crate::config::PipelineSettings;
use crate::constants::RUN_TYPE_LOG_INGEST;
use crate::db::schema::{
    self, LogFile, LogSampleCounts, NewCompassSample, NewImuSample, NewNavSample,
    NewPressureSample,
};
use crate::error::{RovError, Result};
use crate::jobs::progress::{emit_progress_opt, ProgressFn, RunProgress};
use crate::jobs::RunHandle;
use crate::telemetry::{DataFlashReader, DecodeStats, LogMessage};

use classifier::{classify, ClassifyContext, Outcome, Reading, SampleDraft, SkipReason, TimeWindow};
use deployments::DeploymentResolver;
use writer::{BatchWriter, FlushStats};

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub settings: PipelineSettings,
    pub force: bool,
    /// Base directory for relative log paths
    pub data_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    pub total_messages: u64,
    /// Samples built and attributed, by message type
    pub by_type: BTreeMap<String, u64>,
    pub skipped: BTreeMap<String, u64>,
    /// Malformed messages
    pub errors: u64,
    pub imu: FlushStats,
    pub compass: FlushStats,
    pub pressure: FlushStats,
    pub nav: FlushStats,
    /// Rows removed before a forced re-parse
    pub cleared: Option<LogSampleCounts>,
    pub decode: Option<DecodeStats>,
}

impl IngestStats {
    fn record_skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason.as_str().to_string()).or_insert(0) += 1;
    }

    pub fn skip_count(&self, reason: SkipReason) -> u64 {
        self.skipped.get(reason.as_str()).copied().unwrap_or(0)
    }

    /// Messages not dropped by the mission window
    pub fn in_window(&self) -> u64 {
        self.total_messages - self.skip_count(SkipReason::OutOfWindow)
    }

    pub fn samples_built(&self) -> u64 {
        self.by_type.values().sum()
    }

    fn writes(&self) -> [&FlushStats; 4] {
        [&self.imu, &self.compass, &self.pressure, &self.nav]
    }

    pub fn inserted(&self) -> u64 {
        self.writes().iter().map(|w| w.inserted).sum()
    }

    pub fn duplicates(&self) -> u64 {
        self.writes().iter().map(|w| w.duplicates).sum()
    }

    pub fn failed_rows(&self) -> u64 {
        self.writes().iter().map(|w| w.failed).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub run_id: i64,
    pub run_token: String,
    pub log_file_id: i64,
    pub mission_id: i64,
    pub stats: IngestStats,
}

/// Per-run state. Built after the guards pass, dropped when the run ends.
struct IngestContext {
    log_file: LogFile,
    mission_id: i64,
    classify: ClassifyContext,
    resolver: DeploymentResolver,
}

struct SampleWriters {
    imu: BatchWriter<NewImuSample>,
    compass: BatchWriter<NewCompassSample>,
    pressure: BatchWriter<NewPressureSample>,
    nav: BatchWriter<NewNavSample>,
}

impl SampleWriters {
    fn new(batch_size: usize) -> Self {
        Self {
            imu: BatchWriter::new(batch_size),
            compass: BatchWriter::new(batch_size),
            pressure: BatchWriter::new(batch_size),
            nav: BatchWriter::new(batch_size),
        }
    }

    fn pending(&self) -> usize {
        self.imu.pending() + self.compass.pending() + self.pressure.pending() + self.nav.pending()
    }

    /// Copy flushed totals into the stats without writing what is still buffered.
    fn record(&self, stats: &mut IngestStats) {
        stats.imu = self.imu.stats();
        stats.compass = self.compass.stats();
        stats.pressure = self.pressure.stats();
        stats.nav = self.nav.stats();
    }

    fn finish(self, conn: &Connection, stats: &mut IngestStats) {
        stats.imu = self.imu.finish(conn);
        stats.compass = self.compass.finish(conn);
        stats.pressure = self.pressure.finish(conn);
        stats.nav = self.nav.finish(conn);
    }
}

/// Where a log file lives on disk. Relative paths hang off the data root.
pub fn resolve_log_path(bin_path: &str, data_root: Option<&Path>) -> PathBuf {
    let path = Path::new(bin_path);
    match data_root {
        Some(root) if path.is_relative() => root.join(path),
        _ => path.to_path_buf(),
    }
}

/// Guard checks. Nothing is written when any of them fails.
fn prepare_ingest(conn: &Connection, log_file_id: i64, opts: &IngestOptions) -> Result<IngestContext> {
    let log_file = schema::get_log_file(conn, log_file_id)?
        .ok_or(RovError::LogFileNotFound(log_file_id))?;

    if log_file.already_parsed && !opts.force {
        return Err(RovError::AlreadyParsed(log_file_id));
    }

    let mission = schema::get_mission(conn, log_file.mission_id)?
        .ok_or(RovError::MissionNotFound(log_file.mission_id))?;
    let end = mission.end_time.ok_or(RovError::MissionIncomplete(mission.id))?;

    if opts.force {
        let assets = schema::find_assets_referencing_log_nav(conn, log_file_id)?;
        if !assets.is_empty() {
            let ids: Vec<String> = assets.iter().map(|id| id.to_string()).collect();
            return Err(RovError::DeleteProtected(format!(
                "navigation samples of log file {} are referenced by the frame index of media assets [{}]; rebuild or clear those first",
                log_file_id,
                ids.join(", ")
            )));
        }
    }

    let resolver = DeploymentResolver::load(conn, mission.id)?;
    if resolver.is_empty() {
        log::warn!("Mission {} has no sensor deployments; only navigation will be stored", mission.id);
    }

    Ok(IngestContext {
        classify: ClassifyContext {
            reference_time: log_file.reference_time,
            window: TimeWindow { start: mission.start_time, end },
            filters: opts.settings.instance_filters(),
        },
        mission_id: mission.id,
        log_file,
        resolver,
    })
}

/// Remove everything a log file produced, in one transaction.
pub fn clear_log_samples(conn: &Connection, log_file_id: i64) -> Result<LogSampleCounts> {
    let tx = conn.unchecked_transaction()?;
    let cleared = schema::delete_samples_for_log(&tx, log_file_id)?;
    tx.commit()?;
    log::info!(
        "Cleared {} samples of log file {} (imu {}, compass {}, pressure {}, nav {})",
        cleared.total(), log_file_id, cleared.imu, cleared.compass, cleared.pressure, cleared.nav
    );
    Ok(cleared)
}

/// Parse a log file from disk into the store.
pub fn run_log_ingest(
    conn: &Connection,
    log_file_id: i64,
    opts: &IngestOptions,
    progress: Option<ProgressFn<'_>>,
) -> Result<IngestResult> {
    let mut ctx = prepare_ingest(conn, log_file_id, opts)?;
    let path = resolve_log_path(&ctx.log_file.bin_path, opts.data_root.as_deref());
    let mut reader = DataFlashReader::open(&path)?;
    log::info!("Parsing {} for mission {}", path.display(), ctx.mission_id);

    let run = RunHandle::start(conn, RUN_TYPE_LOG_INGEST, log_file_id, opts.force)?;
    let mut stats = IngestStats::default();
    let outcome = execute(conn, &mut ctx, &run, opts, &mut stats, reader.by_ref(), progress);
    stats.decode = Some(reader.stats());
    run.settle(conn, &stats, outcome)?;

    Ok(IngestResult {
        run_id: run.id,
        run_token: run.token,
        log_file_id,
        mission_id: ctx.mission_id,
        stats,
    })
}

/// Same pipeline over messages that were decoded elsewhere.
pub fn run_log_ingest_messages<I>(
    conn: &Connection,
    log_file_id: i64,
    opts: &IngestOptions,
    messages: I,
    progress: Option<ProgressFn<'_>>,
) -> Result<IngestResult>
where
    I: IntoIterator<Item = Result<LogMessage>>,
{
    let mut ctx = prepare_ingest(conn, log_file_id, opts)?;
    let run = RunHandle::start(conn, RUN_TYPE_LOG_INGEST, log_file_id, opts.force)?;
    let mut stats = IngestStats::default();
    let outcome = execute(conn, &mut ctx, &run, opts, &mut stats, messages.into_iter(), progress);
    run.settle(conn, &stats, outcome)?;

    Ok(IngestResult {
        run_id: run.id,
        run_token: run.token,
        log_file_id,
        mission_id: ctx.mission_id,
        stats,
    })
}

fn execute<I>(
    conn: &Connection,
    ctx: &mut IngestContext,
    run: &RunHandle,
    opts: &IngestOptions,
    stats: &mut IngestStats,
    messages: I,
    progress: Option<ProgressFn<'_>>,
) -> Result<()>
where
    I: Iterator<Item = Result<LogMessage>>,
{
    let log_file_id = ctx.log_file.id;
    if opts.force {
        stats.cleared = Some(clear_log_samples(conn, log_file_id)?);
    }

    let interval = opts.settings.progress_interval.max(1);
    let mut writers = SampleWriters::new(opts.settings.batch_size);

    for item in messages {
        let msg = match item {
            Ok(msg) => msg,
            Err(e) => {
                writers.record(stats);
                log::error!(
                    "Decoding log file {} failed after {} messages; {} buffered samples dropped",
                    log_file_id, stats.total_messages, writers.pending()
                );
                return Err(e);
            }
        };
        stats.total_messages += 1;

        match classify(&msg, &ctx.classify) {
            Outcome::Draft(draft) => attribute(conn, ctx, &mut writers, stats, &msg.msg_type, draft),
            Outcome::Skip(reason) => stats.record_skip(reason),
            Outcome::Error(detail) => {
                stats.errors += 1;
                log::error!("Error processing {} message {}: {}", msg.msg_type, stats.total_messages, detail);
            }
        }

        if stats.total_messages % interval == 0 {
            log::info!("Processed {} messages...", stats.total_messages);
            emit_progress_opt(progress, &RunProgress::new(&run.token, "parsing", stats.total_messages, None)
                .with_message(format!("{} samples built", stats.samples_built())));
        }
    }

    emit_progress_opt(progress, &RunProgress::new(&run.token, "flushing", stats.total_messages, None)
        .with_message(format!("{} samples buffered", writers.pending())));
    writers.finish(conn, stats);

    schema::mark_log_file_parsed(conn, log_file_id)?;

    log::info!(
        "Log file {}: {} messages, {} in window, {} samples built, {} inserted, {} duplicates, {} failed",
        log_file_id,
        stats.total_messages,
        stats.in_window(),
        stats.samples_built(),
        stats.inserted(),
        stats.duplicates(),
        stats.failed_rows(),
    );
    emit_progress_opt(progress, &RunProgress::new(&run.token, "done", stats.total_messages, Some(stats.total_messages)));
    Ok(())
}

/// Attach a draft to its deployment and queue it for writing.
fn attribute(
    conn: &Connection,
    ctx: &mut IngestContext,
    writers: &mut SampleWriters,
    stats: &mut IngestStats,
    msg_type: &str,
    draft: SampleDraft,
) {
    let log_file_id = ctx.log_file.id;
    let deployment = match (draft.kind.sensor_type(), draft.instance) {
        (Some(sensor_type), Some(instance)) => ctx.resolver.resolve(sensor_type, instance),
        _ => None,
    };

    match (draft.reading, deployment) {
        (Reading::Navigation { source, roll_deg, pitch_deg, yaw_deg, depth_m }, _) => {
            writers.nav.push(conn, NewNavSample {
                mission_id: ctx.mission_id,
                log_file_id: Some(log_file_id),
                source: source.to_string(),
                timestamp: draft.timestamp,
                roll_deg,
                pitch_deg,
                yaw_deg,
                depth_m,
            });
        }
        (_, None) => {
            stats.record_skip(SkipReason::NoDeployment);
            return;
        }
        (Reading::Inertial { gyr, acc }, Some(deployment_id)) => {
            writers.imu.push(conn, NewImuSample {
                log_file_id,
                deployment_id,
                timestamp: draft.timestamp,
                gx_rad_s: gyr[0],
                gy_rad_s: gyr[1],
                gz_rad_s: gyr[2],
                ax_m_s2: acc[0],
                ay_m_s2: acc[1],
                az_m_s2: acc[2],
            });
        }
        (Reading::Magnetic { field }, Some(deployment_id)) => {
            writers.compass.push(conn, NewCompassSample {
                log_file_id,
                deployment_id,
                timestamp: draft.timestamp,
                mx_ut: field[0],
                my_ut: field[1],
                mz_ut: field[2],
            });
        }
        (Reading::Pressure { pressure_pa, temperature_c }, Some(deployment_id)) => {
            writers.pressure.push(conn, NewPressureSample {
                log_file_id,
                deployment_id,
                timestamp: draft.timestamp,
                pressure_pa,
                temperature_c,
            });
        }
    }
    *stats.by_type.entry(msg_type.to_string()).or_insert(0) += 1;
}

// ----- Mission-wide ingestion -----

#[derive(Debug, Clone, Serialize)]
pub struct FailedLog {
    pub log_file_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MissionIngestSummary {
    pub mission_id: i64,
    pub parsed: Vec<IngestResult>,
    /// Already parsed and not forced
    pub skipped: Vec<i64>,
    pub failed: Vec<FailedLog>,
}

/// Parse every log file of a mission. One file failing does not stop the rest.
pub fn run_mission_ingest(
    conn: &Connection,
    mission_id: i64,
    opts: &IngestOptions,
    progress: Option<ProgressFn<'_>>,
) -> Result<MissionIngestSummary> {
    let mission = schema::get_mission(conn, mission_id)?
        .ok_or(RovError::MissionNotFound(mission_id))?;
    if mission.end_time.is_none() {
        return Err(RovError::MissionIncomplete(mission_id));
    }

    let files = schema::list_log_files_for_mission(conn, mission_id)?;
    log::info!("Mission {}: {} log files", mission_id, files.len());

    let mut summary = MissionIngestSummary {
        mission_id,
        ..Default::default()
    };
    for file in files {
        if file.already_parsed && !opts.force {
            log::info!("Log file {} already parsed, skipping", file.id);
            summary.skipped.push(file.id);
            continue;
        }
        match run_log_ingest(conn, file.id, opts, progress) {
            Ok(result) => summary.parsed.push(result),
            Err(e) => {
                log::error!("Log file {} ({}) failed: {}", file.id, file.bin_path, e);
                summary.failed.push(FailedLog {
                    log_file_id: file.id,
                    error: e.to_string(),
                });
            }
        }
    }
    Ok(summary)
}
