//! Shared timeline bounds

use serde::Serialize;

use crate::time::Timestamp;

/// Span covered by the active players, recomputed on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timeline {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Timeline {
    /// Bounds over `(effective_start, effective_end)` pairs.
    ///
    /// Spans with an unknown end only contribute their start. `None` when
    /// there are no spans at all.
    pub fn from_spans<I>(spans: I) -> Option<Self>
    where
        I: IntoIterator<Item = (Timestamp, Option<Timestamp>)>,
    {
        let mut bounds: Option<Timeline> = None;
        for (start, end) in spans {
            let end = end.unwrap_or(start).max(start);
            bounds = Some(match bounds {
                None => Timeline { start, end },
                Some(b) => Timeline {
                    start: b.start.min(start),
                    end: b.end.max(end),
                },
            });
        }
        bounds
    }

    /// Whether a recording spanning `start..=end` shares any time with the timeline
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        (self.start <= start && start <= self.end) || (start <= self.start && self.start <= end)
    }

    /// Relative cursor position of `ts`, 0.0 at the start and 1.0 at the end
    pub fn fraction(&self, ts: Timestamp) -> f64 {
        let span = self.end - self.start;
        if span <= 0 {
            return 0.0;
        }
        (ts - self.start) as f64 / span as f64
    }
}
