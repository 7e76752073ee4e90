//! Extrapolated playback position for a remote widget

use std::time::Instant;

/// Tracks where a widget's playhead should be, given the last position it
/// reported and whether it is running.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    position_secs: f64,
    at: Instant,
    playing: bool,
}

impl PlaybackClock {
    pub fn new(now: Instant) -> Self {
        Self {
            position_secs: 0.0,
            at: now,
            playing: false,
        }
    }

    /// Expected offset into the recording at `now`
    pub fn offset_at(&self, now: Instant) -> f64 {
        if self.playing {
            self.position_secs + now.saturating_duration_since(self.at).as_secs_f64()
        } else {
            self.position_secs
        }
    }

    /// Re-anchor the clock on an observed position
    pub fn sync(&mut self, position_secs: f64, now: Instant) {
        self.position_secs = position_secs;
        self.at = now;
    }

    pub fn set_playing(&mut self, playing: bool, now: Instant) {
        if self.playing == playing {
            return;
        }
        self.position_secs = self.offset_at(now);
        self.at = now;
        self.playing = playing;
    }
}
