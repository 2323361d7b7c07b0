// Run progress payload and helpers

use serde::Serialize;

/// Progress payload reported during long-running pipeline runs.
/// Both run types use this same shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgress {
    pub run_token: String,
    pub phase: String,
    pub current: u64,
    /// Unknown while streaming a log file
    pub total: Option<u64>,
    pub percent: Option<f64>,
    pub message: String,
}

impl RunProgress {
    pub fn new(run_token: impl Into<String>, phase: impl Into<String>, current: u64, total: Option<u64>) -> Self {
        let percent = total.map(|t| {
            let pct = (current as f64 / t.max(1) as f64) * 100.0;
            pct.min(100.0)
        });
        Self {
            run_token: run_token.into(),
            phase: phase.into(),
            current,
            total,
            percent,
            message: String::new(),
        }
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = msg.into();
        self
    }
}

/// Progress sink. The CLI prints; tests collect.
pub type ProgressFn<'a> = &'a dyn Fn(&RunProgress);

/// Report progress when a sink is attached. No-op otherwise.
pub fn emit_progress_opt(sink: Option<ProgressFn<'_>>, progress: &RunProgress) {
    log::debug!("[{}] {} {}", progress.phase, progress.current, progress.message);
    if let Some(sink) = sink {
        sink(progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_percent_only_with_total() {
        let p = RunProgress::new("t", "parsing", 50, None);
        assert_eq!(p.percent, None);

        let p = RunProgress::new("t", "indexing", 50, Some(200));
        assert_eq!(p.percent, Some(25.0));

        let p = RunProgress::new("t", "indexing", 10, Some(0));
        assert_eq!(p.percent, Some(100.0));
    }

    #[test]
    fn test_emit_reaches_sink() {
        let seen = RefCell::new(Vec::new());
        let sink = |p: &RunProgress| seen.borrow_mut().push(p.current);
        emit_progress_opt(Some(&sink), &RunProgress::new("t", "parsing", 7, None));
        emit_progress_opt(None, &RunProgress::new("t", "parsing", 8, None));
        assert_eq!(seen.into_inner(), vec![7]);
    }
}
