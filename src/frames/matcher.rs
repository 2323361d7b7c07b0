// Nearest navigation sample lookup

use chrono::{DateTime, Duration, Utc};

use crate::db::schema::NavPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavMatch {
    pub nav_sample_id: i64,
    /// |frame - sample| in whole milliseconds, rounded to nearest
    pub time_diff_ms: i64,
}

/// Navigation samples of one mission, ascending by time.
#[derive(Debug, Clone, Default)]
pub struct NavIndex {
    ids: Vec<i64>,
    times: Vec<DateTime<Utc>>,
}

impl NavIndex {
    pub fn new(mut points: Vec<NavPoint>) -> Self {
        let sorted = points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp);
        if !sorted {
            log::debug!("Navigation points arrived unordered; sorting {}", points.len());
            points.sort_by_key(|p| (p.timestamp, p.id));
        }
        Self {
            ids: points.iter().map(|p| p.id).collect(),
            times: points.iter().map(|p| p.timestamp).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Closest sample to `ts`. Ties go to the earlier sample.
    pub fn nearest(&self, ts: DateTime<Utc>) -> Option<NavMatch> {
        if self.is_empty() {
            return None;
        }
        let pos = self.times.partition_point(|t| *t < ts);
        let idx = if pos == 0 {
            0
        } else if pos == self.times.len() {
            pos - 1
        } else {
            let before = ts - self.times[pos - 1];
            let after = self.times[pos] - ts;
            if before <= after { pos - 1 } else { pos }
        };
        Some(NavMatch {
            nav_sample_id: self.ids[idx],
            time_diff_ms: round_ms(ts - self.times[idx]),
        })
    }
}

/// Absolute duration in milliseconds, half rounded up
pub fn round_ms(d: Duration) -> i64 {
    match d.num_nanoseconds() {
        Some(ns) => ((ns.unsigned_abs() / 1_000 + 500) / 1_000) as i64,
        None => d.num_milliseconds().abs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn index() -> NavIndex {
        NavIndex::new(vec![
            NavPoint { id: 1, timestamp: t(0) },
            NavPoint { id: 2, timestamp: t(10_000) },
        ])
    }

    #[test]
    fn test_nearest_either_side() {
        let idx = index();
        assert_eq!(idx.nearest(t(4_000)), Some(NavMatch { nav_sample_id: 1, time_diff_ms: 4_000 }));
        assert_eq!(idx.nearest(t(6_000)), Some(NavMatch { nav_sample_id: 2, time_diff_ms: 4_000 }));
    }

    #[test]
    fn test_tie_goes_to_earlier() {
        assert_eq!(index().nearest(t(5_000)).map(|m| m.nav_sample_id), Some(1));
    }

    #[test]
    fn test_outside_range_clamps_to_ends() {
        let idx = index();
        assert_eq!(idx.nearest(t(-2_000)), Some(NavMatch { nav_sample_id: 1, time_diff_ms: 2_000 }));
        assert_eq!(idx.nearest(t(12_500)), Some(NavMatch { nav_sample_id: 2, time_diff_ms: 2_500 }));
        assert_eq!(idx.nearest(t(10_000)), Some(NavMatch { nav_sample_id: 2, time_diff_ms: 0 }));
    }

    #[test]
    fn test_empty_index_matches_nothing() {
        let idx = NavIndex::new(Vec::new());
        assert!(idx.is_empty());
        assert_eq!(idx.nearest(t(0)), None);
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let idx = NavIndex::new(vec![
            NavPoint { id: 2, timestamp: t(10_000) },
            NavPoint { id: 1, timestamp: t(0) },
        ]);
        assert_eq!(idx.nearest(t(1_000)).map(|m| m.nav_sample_id), Some(1));
    }

    #[test]
    fn test_round_to_nearest_millisecond() {
        assert_eq!(round_ms(Duration::microseconds(1_499)), 1);
        assert_eq!(round_ms(Duration::microseconds(1_500)), 2);
        assert_eq!(round_ms(Duration::microseconds(-1_600)), 2);
        assert_eq!(round_ms(Duration::nanoseconds(499_999)), 0);
    }

    #[test]
    fn test_round_extreme_offsets() {
        assert_eq!(round_ms(Duration::nanoseconds(i64::MAX)), 9_223_372_036_855);
        assert_eq!(round_ms(Duration::nanoseconds(-(i64::MAX / 2))), 4_611_686_018_427);
        assert_eq!(round_ms(Duration::days(200_000)), 200_000 * 86_400_000);
    }
}
