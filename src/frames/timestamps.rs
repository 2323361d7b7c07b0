// Frame timestamps for a video asset

use chrono::{DateTime, Duration, Utc};

use crate::constants::FRAME_COUNT_EPSILON;
use crate::db::schema::{MediaAsset, MediaType};
use crate::error::{RovError, Result};

/// Number of whole frames in a clip: floor(duration * fps).
/// The epsilon keeps exact products like 10.0 * 25.0 from landing on 249.999...
pub fn frame_count(duration: Duration, fps: f64) -> u64 {
    let secs = match duration.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => duration.num_milliseconds() as f64 / 1_000.0,
    };
    if secs <= 0.0 || !(fps.is_finite() && fps > 0.0) {
        return 0;
    }
    (secs * fps + FRAME_COUNT_EPSILON).floor() as u64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    start: DateTime<Utc>,
    fps: f64,
    total_frames: u64,
}

impl FrameClock {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, fps: f64) -> Result<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(RovError::InvalidMediaAsset(format!("fps must be positive, got {}", fps)));
        }
        if end <= start {
            return Err(RovError::InvalidMediaAsset("end_time must be after start_time".to_string()));
        }
        Ok(Self {
            start,
            fps,
            total_frames: frame_count(end - start, fps),
        })
    }

    /// Clock for an indexable asset: a video with end time and frame rate.
    pub fn for_asset(asset: &MediaAsset) -> Result<Self> {
        if asset.media_type != MediaType::Video {
            return Err(RovError::InvalidMediaAsset(format!(
                "media asset {} is an image; only videos have frames", asset.id
            )));
        }
        let end = asset.end_time.ok_or_else(|| {
            RovError::InvalidMediaAsset(format!("media asset {} has no end_time", asset.id))
        })?;
        let fps = asset.fps.ok_or_else(|| {
            RovError::InvalidMediaAsset(format!("media asset {} has no fps", asset.id))
        })?;
        Self::new(asset.start_time, end, fps)
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// start + frame / fps, rounded to the microsecond the store keeps
    pub fn timestamp(&self, frame: u64) -> DateTime<Utc> {
        let micros = (frame as f64 * 1e6 / self.fps).round() as i64;
        self.start + Duration::microseconds(micros)
    }

    pub fn frames(&self) -> impl Iterator<Item = (u64, DateTime<Utc>)> + '_ {
        (0..self.total_frames).map(move |i| (i, self.timestamp(i)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_ten_seconds_at_25fps() {
        let clock = FrameClock::new(t0(), t0() + Duration::seconds(10), 25.0).unwrap();
        assert_eq!(clock.total_frames(), 250);

        let frames: Vec<_> = clock.frames().collect();
        assert_eq!(frames.len(), 250);
        for (i, ts) in &frames {
            assert_eq!(*ts, t0() + Duration::milliseconds(*i as i64 * 40));
        }
        assert_eq!(frames[249].1, t0() + Duration::milliseconds(9960));
    }

    #[test]
    fn test_fractional_rates() {
        // 29.97 fps over 1 s is 29 whole frames
        assert_eq!(frame_count(Duration::seconds(1), 29.97), 29);
        // 30 fps over 0.1 s is exactly 3 frames despite float error
        assert_eq!(frame_count(Duration::milliseconds(100), 30.0), 3);
        assert_eq!(frame_count(Duration::milliseconds(500), 1.0), 0);
    }

    #[test]
    fn test_timestamps_do_not_drift() {
        let clock = FrameClock::new(t0(), t0() + Duration::hours(1), 30.0).unwrap();
        assert_eq!(clock.total_frames(), 108_000);
        assert_eq!(clock.timestamp(107_999) - t0(), Duration::microseconds(3_599_966_667));
        assert_eq!(clock.timestamp(90_000), t0() + Duration::seconds(3000));
    }

    #[test]
    fn test_timestamps_have_storage_precision() {
        let clock = FrameClock::new(t0(), t0() + Duration::seconds(1), 30.0).unwrap();
        assert_eq!(clock.timestamp(1) - t0(), Duration::microseconds(33_333));
        assert_eq!(clock.timestamp(2) - t0(), Duration::microseconds(66_667));
        assert!(clock.frames().all(|(_, ts)| ts.timestamp_subsec_nanos() % 1_000 == 0));
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(FrameClock::new(t0(), t0(), 25.0).is_err());
        assert!(FrameClock::new(t0(), t0() + Duration::seconds(1), 0.0).is_err());
        assert!(FrameClock::new(t0(), t0() + Duration::seconds(1), f64::NAN).is_err());
    }
}
