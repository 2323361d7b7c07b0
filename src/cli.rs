// ROV Missions CLI binary

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use clap::{Args, Parser, Subcommand};
use anyhow::Result;

use rov_missions_lib::constants::{PIPELINE_VERSION, WORKSPACE_FOLDER};
use rov_missions_lib::db::{get_db_path, init_workspace_folders, open_db};
use rov_missions_lib::db::schema;
use rov_missions_lib::frames::{self, FrameIndexOptions};
use rov_missions_lib::ingest::{self, IngestOptions, IngestResult};
use rov_missions_lib::jobs::progress::RunProgress;
use rov_missions_lib::{PipelineSettings, RovError, SettingsOverrides};

#[derive(Parser)]
#[command(name = "rovmission")]
#[command(about = "ROV mission store - parse flight logs and index camera frames", long_about = None)]
#[command(version)]
struct Cli {
    /// Workspace root (defaults to current directory)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Settings file (defaults to <workspace>/.rovmission/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Default)]
struct IngestFlags {
    /// Re-parse even if already parsed; existing samples are replaced
    #[arg(long)]
    force: bool,
    /// Rows per write transaction
    #[arg(long)]
    batch_size: Option<usize>,
    /// IMU instances to keep, e.g. 0,1
    #[arg(long, value_delimiter = ',')]
    imu_instances: Option<Vec<u8>>,
    /// Compass instances to keep
    #[arg(long, value_delimiter = ',')]
    mag_instances: Option<Vec<u8>>,
    /// Barometer instances to keep
    #[arg(long, value_delimiter = ',')]
    baro_instances: Option<Vec<u8>>,
    /// Base directory for relative log paths (defaults to the workspace root)
    #[arg(long)]
    data_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new workspace
    Init {
        /// Workspace root path
        path: PathBuf,
    },

    /// Parse one log file into the store
    ParseLog {
        /// Log file ID
        id: i64,
        #[command(flatten)]
        flags: IngestFlags,
    },

    /// Parse every log file of a mission
    ParseMission {
        /// Mission ID
        id: i64,
        #[command(flatten)]
        flags: IngestFlags,
    },

    /// Build the frame index of a video
    IndexFrames {
        /// Media asset ID
        id: i64,
        /// Rebuild an existing index
        #[arg(long)]
        force: bool,
        /// Rows per write transaction
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Show the navigation matched to one frame
    Frame {
        /// Media asset ID
        asset: i64,
        /// Frame number (0-based)
        frame: i64,
    },

    /// Show missions, log files and media assets
    Status,

    /// List recent pipeline runs
    Runs {
        /// Filter by run type (log_ingest, frame_index)
        #[arg(long = "type")]
        run_type: Option<String>,
        /// Maximum runs to show
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .filter_module("rovmission", level)
        .filter_module("rov_missions_lib", level)
        .format_timestamp(None)
        .format_module_path(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            // Refused runs get their own exit code so scripts can tell them apart
            let refused = e.downcast_ref::<RovError>().is_some_and(|r| r.is_precondition());
            if refused { ExitCode::from(2) } else { ExitCode::FAILURE }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace;
    let config = cli.config;
    match cli.command {
        Commands::Init { path } => cmd_init(path),
        Commands::ParseLog { id, flags } => cmd_parse_log(workspace, config, id, flags),
        Commands::ParseMission { id, flags } => cmd_parse_mission(workspace, config, id, flags),
        Commands::IndexFrames { id, force, batch_size } => cmd_index_frames(workspace, config, id, force, batch_size),
        Commands::Frame { asset, frame } => cmd_frame(workspace, asset, frame),
        Commands::Status => cmd_status(workspace),
        Commands::Runs { run_type, limit } => cmd_runs(workspace, run_type, limit),
    }
}

fn cmd_init(path: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&path)?;
    let root = path.canonicalize().unwrap_or(path.clone());

    let db_path = get_db_path(&root);
    if db_path.exists() {
        anyhow::bail!("Workspace already exists at {}", root.display());
    }

    init_workspace_folders(&root)?;
    open_db(&db_path)?;

    let settings_path = PipelineSettings::default_path(&root);
    if !settings_path.exists() {
        let json = serde_json::to_string_pretty(&PipelineSettings::default())?;
        std::fs::write(&settings_path, json)?;
    }

    println!("Initialized workspace at {}", root.display());
    println!("Structure created:");
    println!("  {}/rovmission.db    - Database", WORKSPACE_FOLDER);
    println!("  {}/settings.json    - Pipeline settings", WORKSPACE_FOLDER);
    println!("  logs/                       - Flight logs");
    println!("Relative log paths resolve against the workspace root unless --data-root is given.");

    Ok(())
}

fn resolve_workspace_root(workspace: Option<PathBuf>) -> Result<PathBuf> {
    let root = match workspace {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    if !get_db_path(&root).exists() {
        anyhow::bail!(
            "No workspace found at {}. Run 'rovmission init <path>' first.",
            root.display()
        );
    }
    Ok(root)
}

fn load_settings(root: &Path, config: Option<PathBuf>, overrides: &SettingsOverrides) -> Result<PipelineSettings> {
    let settings = PipelineSettings::resolve(root, config.as_deref())?
        .with_overrides(overrides)?;
    Ok(settings)
}

fn ingest_options(root: &Path, config: Option<PathBuf>, flags: IngestFlags) -> Result<IngestOptions> {
    let overrides = SettingsOverrides {
        batch_size: flags.batch_size,
        imu_instances: flags.imu_instances,
        mag_instances: flags.mag_instances,
        baro_instances: flags.baro_instances,
    };
    Ok(IngestOptions {
        settings: load_settings(root, config, &overrides)?,
        force: flags.force,
        data_root: Some(flags.data_root.unwrap_or_else(|| root.to_path_buf())),
    })
}

fn print_progress(p: &RunProgress) {
    match p.percent {
        Some(pct) => println!("  [{}] {}/{} ({:.0}%)", p.phase, p.current, p.total.unwrap_or(0), pct),
        None => println!("  [{}] {} {}", p.phase, p.current, p.message),
    }
}

fn print_ingest_result(result: &IngestResult) {
    let s = &result.stats;
    println!("Log file {} (mission {}) - run {}", result.log_file_id, result.mission_id, result.run_token);
    if let Some(cleared) = s.cleared {
        println!("  Cleared:      {} existing samples", cleared.total());
    }
    println!("  Messages:     {}", s.total_messages);
    println!("  In window:    {}", s.in_window());
    println!("  Samples:      {}", s.samples_built());
    for (msg_type, n) in &s.by_type {
        println!("    {:<6} {}", msg_type, n);
    }
    println!("  Inserted:     {}", s.inserted());
    println!("  Duplicates:   {}", s.duplicates());
    println!("  Failed rows:  {}", s.failed_rows());
    if !s.skipped.is_empty() {
        println!("  Skipped:");
        for (reason, n) in &s.skipped {
            println!("    {:<18} {}", reason, n);
        }
    }
    if s.errors > 0 {
        println!("  Errors:       {}", s.errors);
    }
    if let Some(decode) = s.decode {
        if decode.skipped_bytes > 0 || decode.truncated {
            println!(
                "  Decoder:      {} bytes skipped{}",
                decode.skipped_bytes,
                if decode.truncated { ", truncated tail" } else { "" }
            );
        }
    }
}

fn cmd_parse_log(workspace: Option<PathBuf>, config: Option<PathBuf>, id: i64, flags: IngestFlags) -> Result<()> {
    let root = resolve_workspace_root(workspace)?;
    let conn = open_db(&get_db_path(&root))?;
    let opts = ingest_options(&root, config, flags)?;

    let result = ingest::run_log_ingest(&conn, id, &opts, Some(&print_progress))?;
    println!();
    print_ingest_result(&result);
    Ok(())
}

fn cmd_parse_mission(workspace: Option<PathBuf>, config: Option<PathBuf>, id: i64, flags: IngestFlags) -> Result<()> {
    let root = resolve_workspace_root(workspace)?;
    let conn = open_db(&get_db_path(&root))?;
    let opts = ingest_options(&root, config, flags)?;

    let summary = ingest::run_mission_ingest(&conn, id, &opts, Some(&print_progress))?;
    println!();
    for result in &summary.parsed {
        print_ingest_result(result);
        println!();
    }
    println!("Mission {}:", summary.mission_id);
    println!("  Parsed:   {}", summary.parsed.len());
    println!("  Skipped:  {} (already parsed)", summary.skipped.len());
    println!("  Failed:   {}", summary.failed.len());
    for failed in &summary.failed {
        println!("    log file {}: {}", failed.log_file_id, failed.error);
    }

    if !summary.failed.is_empty() {
        anyhow::bail!("{} of the mission's log files failed", summary.failed.len());
    }
    Ok(())
}

fn cmd_index_frames(
    workspace: Option<PathBuf>,
    config: Option<PathBuf>,
    id: i64,
    force: bool,
    batch_size: Option<usize>,
) -> Result<()> {
    let root = resolve_workspace_root(workspace)?;
    let conn = open_db(&get_db_path(&root))?;
    let settings = load_settings(&root, config, &SettingsOverrides { batch_size, ..Default::default() })?;

    let opts = FrameIndexOptions { batch_size: settings.batch_size, force };
    let result = frames::run_frame_index(&conn, id, &opts, Some(&print_progress))?;
    let s = &result.stats;

    println!();
    println!("Media asset {} (mission {}) - run {}", result.media_asset_id, result.mission_id, result.run_token);
    if s.cleared > 0 {
        println!("  Cleared:      {} existing rows", s.cleared);
    }
    println!("  Frames:       {}", s.total_frames);
    println!("  Nav samples:  {}", s.nav_samples);
    println!("  Matched:      {}", s.matched);
    println!("  Unmatched:    {}", s.unmatched);
    if let (Some(avg), Some(max)) = (s.avg_time_diff_ms, s.max_time_diff_ms) {
        println!("  Time diff:    avg {:.1} ms, max {} ms", avg, max);
    }
    println!("  Inserted:     {}", s.writes.inserted);
    if s.writes.failed > 0 {
        println!("  Failed rows:  {}", s.writes.failed);
    }
    Ok(())
}

fn cmd_frame(workspace: Option<PathBuf>, asset: i64, frame: i64) -> Result<()> {
    let root = resolve_workspace_root(workspace)?;
    let conn = open_db(&get_db_path(&root))?;

    let Some(found) = frames::lookup_frame(&conn, asset, frame)? else {
        println!("Frame {} of media asset {} is not indexed. Run 'rovmission index-frames {}'.", frame, asset, asset);
        return Ok(());
    };

    println!("Frame {} of media asset {}", found.frame.frame_number, asset);
    println!("  Timestamp:   {}", schema_ts(&found.frame.timestamp));
    match found.nav {
        Some(nav) => {
            println!("  Nav sample:  #{} ({}, {} ms away)", nav.id, nav.source, found.frame.time_diff_ms.unwrap_or(0));
            println!("  Nav time:    {}", schema_ts(&nav.timestamp));
            println!("  Depth:       {}", fmt_opt(nav.depth_m, "m"));
            println!("  Roll:        {}", fmt_opt(nav.roll_deg, "deg"));
            println!("  Pitch:       {}", fmt_opt(nav.pitch_deg, "deg"));
            println!("  Yaw:         {}", fmt_opt(nav.yaw_deg, "deg"));
        }
        None => println!("  Nav sample:  none"),
    }
    Ok(())
}

fn cmd_status(workspace: Option<PathBuf>) -> Result<()> {
    let root = resolve_workspace_root(workspace)?;
    let conn = open_db(&get_db_path(&root))?;

    println!("Workspace: {} (pipeline v{})", root.display(), PIPELINE_VERSION);
    println!();

    let missions = schema::list_missions(&conn)?;
    if missions.is_empty() {
        println!("No missions recorded.");
    }
    for mission in &missions {
        let end = mission.end_time.as_ref().map(schema_ts).unwrap_or_else(|| "open".to_string());
        println!("Mission #{}  {}  {} -> {}", mission.id, mission.location, schema_ts(&mission.start_time), end);

        for log in schema::list_log_files_for_mission(&conn, mission.id)? {
            let counts = schema::count_samples_for_log(&conn, log.id)?;
            let state = if log.already_parsed { "parsed" } else { "pending" };
            println!(
                "  log #{:<4} {:<8} imu {:>7}  compass {:>7}  pressure {:>7}  nav {:>7}  {}",
                log.id, state, counts.imu, counts.compass, counts.pressure, counts.nav, log.bin_path
            );
        }
    }

    let assets = schema::list_media_assets(&conn)?;
    if !assets.is_empty() {
        println!();
        println!("{:>5}  {:>7}  {:>6}  {:>8}  {}", "ID", "Mission", "Type", "Frames", "Path");
        println!("{}", "-".repeat(60));
        for a in assets {
            println!(
                "{:>5}  {:>7}  {:>6}  {:>8}  {}",
                a.asset.id, a.mission_id, a.asset.media_type.as_str(), a.frame_count, a.asset.file_path
            );
        }
    }
    Ok(())
}

fn cmd_runs(workspace: Option<PathBuf>, run_type: Option<String>, limit: i64) -> Result<()> {
    let root = resolve_workspace_root(workspace)?;
    let conn = open_db(&get_db_path(&root))?;

    let runs = schema::list_runs(&conn, run_type.as_deref(), limit)?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!("{:>5}  {:>12}  {:>7}  {:>10}  {:>6}  {}", "ID", "Type", "Target", "Status", "Forced", "Started");
    println!("{}", "-".repeat(70));
    for run in runs {
        println!(
            "{:>5}  {:>12}  {:>7}  {:>10}  {:>6}  {}",
            run.id,
            run.run_type,
            run.target_id,
            run.status,
            if run.forced { "yes" } else { "" },
            run.started_at
        );
        if let Some(err) = run.last_error {
            println!("       error: {}", err);
        }
    }
    Ok(())
}

fn schema_ts(ts: &chrono::DateTime<chrono::Utc>) -> String {
    rov_missions_lib::db::format_timestamp(ts)
}

fn fmt_opt(value: Option<f64>, unit: &str) -> String {
    value.map(|v| format!("{:.2} {}", v, unit)).unwrap_or_else(|| "-".to_string())
}
