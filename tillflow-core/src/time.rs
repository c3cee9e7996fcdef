//! Event-time primitives: tumbling windows and watermarks.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// A half-open event-time interval `[start, end)`.
///
/// Windows of one assigner never overlap, so a window is uniquely
/// identified by its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Window {
    /// Inclusive lower bound
    pub start: DateTime<Utc>,
    /// Exclusive upper bound
    pub end: DateTime<Utc>,
}

impl Window {
    /// True once no event with `timestamp >= watermark` can fall into this
    /// window anymore
    pub fn closed_by(&self, watermark: DateTime<Utc>) -> bool {
        self.end <= watermark
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Assigns every timestamp to exactly one fixed-width, non-overlapping
/// window.
#[derive(Debug, Clone, Copy)]
pub struct TumblingWindows {
    width_ms: i64,
}

impl TumblingWindows {
    /// Create an assigner with the given window width.
    ///
    /// Widths below one millisecond are clamped up to one.
    pub fn new(width: TimeDelta) -> Self {
        Self {
            width_ms: width.num_milliseconds().max(1),
        }
    }

    /// The window the given timestamp falls into
    pub fn assign(&self, timestamp: DateTime<Utc>) -> Window {
        let ts_ms = timestamp.timestamp_millis();
        let start_ms = ts_ms.div_euclid(self.width_ms) * self.width_ms;
        // in-range for any DateTime<Utc> rounded down to a window start
        let start = DateTime::from_timestamp_millis(start_ms).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = DateTime::from_timestamp_millis(start_ms + self.width_ms)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Window { start, end }
    }
}

/// Tracks the event-time frontier of one aggregation pipeline.
///
/// The watermark is the highest event timestamp seen so far minus the
/// allowed lateness. It never rewinds: observing an older event leaves it
/// untouched.
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    max_seen: Option<DateTime<Utc>>,
    allowed_lateness: TimeDelta,
}

impl WatermarkTracker {
    /// Create a tracker granting the given lateness. No watermark exists
    /// until the first event is observed.
    pub fn new(allowed_lateness: TimeDelta) -> Self {
        Self {
            max_seen: None,
            allowed_lateness,
        }
    }

    /// Raise the frontier if the event timestamp exceeds everything seen so
    /// far
    pub fn observe(&mut self, timestamp: DateTime<Utc>) {
        match self.max_seen {
            Some(seen) if seen >= timestamp => {}
            _ => self.max_seen = Some(timestamp),
        }
    }

    /// Current watermark, `None` before the first observed event
    pub fn current(&self) -> Option<DateTime<Utc>> {
        self.max_seen.map(|seen| seen - self.allowed_lateness)
    }

    /// Whether the given window may still receive events.
    ///
    /// A window is on time iff its end boundary has not fallen behind the
    /// watermark; `end == watermark` is still admitted.
    pub fn is_on_time(&self, window: &Window) -> bool {
        match self.current() {
            Some(watermark) => window.end >= watermark,
            None => true,
        }
    }
}
