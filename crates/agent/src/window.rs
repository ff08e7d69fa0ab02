use serde::Serialize;
use std::fmt;

/// Unix timestamp in seconds.
pub type Timestamp = i64;

/// Longest span a single run will cover, in seconds. Bounds both the backlog a
/// run processes and the time it takes to catch up after an outage.
pub const MAX_SPAN_SECS: i64 = 3600;

/// Record creation times covered by one run: the half-open interval
/// `(from, to]`. A record stamped exactly `from` belongs to the run that
/// committed `from` as its watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub from: Timestamp,
    pub to: Timestamp,
}

impl Window {
    /// Derive the window for a run starting at `now`.
    ///
    /// Resumes from `last_watermark` unless that is absent or older than
    /// `now - MAX_SPAN_SECS`, in which case the window starts at that floor.
    pub fn compute(now: Timestamp, last_watermark: Option<Timestamp>) -> Self {
        let floor = now - MAX_SPAN_SECS;
        let from = match last_watermark {
            Some(watermark) if watermark > floor => watermark,
            _ => floor,
        };
        Self { from, to: now }
    }

    pub fn span_secs(&self) -> i64 {
        self.to - self.from
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.from, self.to)
    }
}

/// Size of the time bucket the submitted statistics represent.
pub fn duration_secs(window: &Window, had_watermark: bool) -> i64 {
    if had_watermark {
        window.span_secs().clamp(0, MAX_SPAN_SECS)
    } else {
        MAX_SPAN_SECS
    }
}
