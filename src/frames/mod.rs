// Frame index pipeline
// Every frame of a video gets an absolute timestamp and the nearest
// navigation sample of its mission.

pub mod matcher;
pub mod timestamps;

use rusqlite::Connection;
use serde::Serialize;

use crate::constants::RUN_TYPE_FRAME_INDEX;
use crate::db::schema::{self, FrameIndexRow, NavSample, NewFrameIndex};
use crate::error::{RovError, Result};
use crate::ingest::writer::{BatchWriter, FlushStats};
use crate::jobs::progress::{emit_progress_opt, ProgressFn, RunProgress};
use crate::jobs::RunHandle;

use matcher::NavIndex;
use timestamps::FrameClock;

#[derive(Debug, Clone)]
pub struct FrameIndexOptions {
    pub batch_size: usize,
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameIndexStats {
    pub total_frames: u64,
    pub nav_samples: u64,
    pub matched: u64,
    pub unmatched: u64,
    pub avg_time_diff_ms: Option<f64>,
    pub max_time_diff_ms: Option<i64>,
    /// Rows removed before a forced rebuild
    pub cleared: u64,
    pub writes: FlushStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameIndexResult {
    pub run_id: i64,
    pub run_token: String,
    pub media_asset_id: i64,
    pub mission_id: i64,
    pub stats: FrameIndexStats,
}

/// Build the frame index of one video.
pub fn run_frame_index(
    conn: &Connection,
    media_asset_id: i64,
    opts: &FrameIndexOptions,
    progress: Option<ProgressFn<'_>>,
) -> Result<FrameIndexResult> {
    let asset = schema::get_media_asset(conn, media_asset_id)?
        .ok_or(RovError::MediaAssetNotFound(media_asset_id))?;
    let clock = FrameClock::for_asset(&asset)?;

    let existing = schema::count_frame_index(conn, media_asset_id)?;
    if existing > 0 && !opts.force {
        return Err(RovError::FrameIndexExists { asset_id: media_asset_id, count: existing });
    }
    let mission_id = schema::get_mission_id_for_media_asset(conn, media_asset_id)?;

    let run = RunHandle::start(conn, RUN_TYPE_FRAME_INDEX, media_asset_id, opts.force)?;
    let mut stats = FrameIndexStats::default();
    let outcome = build_index(conn, media_asset_id, mission_id, &clock, opts, &run, &mut stats, progress);
    run.settle(conn, &stats, outcome)?;

    Ok(FrameIndexResult {
        run_id: run.id,
        run_token: run.token,
        media_asset_id,
        mission_id,
        stats,
    })
}

#[allow(clippy::too_many_arguments)]
fn build_index(
    conn: &Connection,
    media_asset_id: i64,
    mission_id: i64,
    clock: &FrameClock,
    opts: &FrameIndexOptions,
    run: &RunHandle,
    stats: &mut FrameIndexStats,
    progress: Option<ProgressFn<'_>>,
) -> Result<()> {
    if opts.force {
        stats.cleared = schema::delete_frame_index_for_asset(conn, media_asset_id)? as u64;
        if stats.cleared > 0 {
            log::info!("Cleared {} frame index rows of media asset {}", stats.cleared, media_asset_id);
        }
    }

    let nav = NavIndex::new(schema::list_nav_points(conn, mission_id)?);
    stats.nav_samples = nav.len() as u64;
    stats.total_frames = clock.total_frames();
    if nav.is_empty() {
        log::warn!(
            "Mission {} has no navigation samples; all {} frames of media asset {} stay unmatched",
            mission_id, stats.total_frames, media_asset_id
        );
    }
    log::info!(
        "Indexing {} frames of media asset {} at {} fps against {} navigation samples",
        stats.total_frames, media_asset_id, clock.fps(), stats.nav_samples
    );

    let report_every = opts.batch_size.max(1) as u64;
    let mut writer = BatchWriter::new(opts.batch_size);
    let mut diff_sum: u128 = 0;

    for (frame, timestamp) in clock.frames() {
        let matched = nav.nearest(timestamp);
        match matched {
            Some(m) => {
                stats.matched += 1;
                diff_sum += m.time_diff_ms as u128;
                stats.max_time_diff_ms = Some(stats.max_time_diff_ms.map_or(m.time_diff_ms, |x| x.max(m.time_diff_ms)));
            }
            None => stats.unmatched += 1,
        }
        writer.push(conn, NewFrameIndex {
            media_asset_id,
            frame_number: frame as i64,
            timestamp,
            nav_sample_id: matched.map(|m| m.nav_sample_id),
            time_diff_ms: matched.map(|m| m.time_diff_ms),
        });

        if (frame + 1) % report_every == 0 {
            emit_progress_opt(progress, &RunProgress::new(&run.token, "indexing", frame + 1, Some(stats.total_frames)));
        }
    }
    stats.writes = writer.finish(conn);

    if stats.matched > 0 {
        stats.avg_time_diff_ms = Some(diff_sum as f64 / stats.matched as f64);
    }

    log::info!(
        "Media asset {}: {} frames, {} matched, {} unmatched, avg diff {:.1} ms, max diff {} ms",
        media_asset_id,
        stats.total_frames,
        stats.matched,
        stats.unmatched,
        stats.avg_time_diff_ms.unwrap_or(0.0),
        stats.max_time_diff_ms.unwrap_or(0),
    );
    if stats.writes.failed > 0 {
        log::warn!("{} frame index rows could not be written", stats.writes.failed);
    }
    emit_progress_opt(progress, &RunProgress::new(&run.token, "done", stats.total_frames, Some(stats.total_frames)));
    Ok(())
}

/// A frame with the navigation sample it was matched to
#[derive(Debug, Clone, Serialize)]
pub struct FrameNavigation {
    pub frame: FrameIndexRow,
    pub nav: Option<NavSample>,
}

/// Navigation context for one frame, if the asset has been indexed.
pub fn lookup_frame(conn: &Connection, media_asset_id: i64, frame_number: i64) -> Result<Option<FrameNavigation>> {
    if schema::get_media_asset(conn, media_asset_id)?.is_none() {
        return Err(RovError::MediaAssetNotFound(media_asset_id));
    }
    let Some(frame) = schema::get_frame(conn, media_asset_id, frame_number)? else {
        return Ok(None);
    };
    let nav = match frame.nav_sample_id {
        Some(id) => schema::get_nav_sample(conn, id)?,
        None => None,
    };
    Ok(Some(FrameNavigation { frame, nav }))
}
