//! YouTube iframe player adapter
//!
//! The YouTube player has no seek event. The host streams periodic playhead
//! samples instead, and every tick this adapter compares the latest sample
//! with where the playhead should be. A jump larger than the detection
//! threshold becomes a synthetic `Seek`, and so does the first sample that
//! confirms a seek we commanded ourselves.

use std::time::{Duration, Instant};
use tracing::debug;

use super::{
    CommandSink, PlaybackClock, VideoWidget, WidgetAction, WidgetEvent, WidgetReport,
    WidgetSettings, WidgetSource,
};

/// Give up waiting for a commanded seek to land after this long
const PENDING_SEEK_TIMEOUT: Duration = Duration::from_secs(2);

pub struct YoutubeWidget {
    sink: CommandSink,
    settings: WidgetSettings,
    clock: PlaybackClock,
    duration: Option<f64>,
    paused: bool,
    /// Latest unprocessed playhead sample
    sample: Option<(f64, Instant)>,
    /// Seek we issued and have not seen land yet
    pending_seek: Option<(f64, Instant)>,
}

impl YoutubeWidget {
    pub(crate) fn new(sink: CommandSink, settings: WidgetSettings) -> Self {
        Self {
            sink,
            settings,
            clock: PlaybackClock::new(Instant::now()),
            duration: None,
            paused: true,
            sample: None,
            pending_seek: None,
        }
    }

    fn seek_at(&mut self, offset_secs: f64, now: Instant) {
        self.clock.sync(offset_secs, now);
        self.pending_seek = Some((offset_secs, now));
        self.sample = None;
        self.sink.send(WidgetAction::Seek {
            position: offset_secs,
        });
    }
}

impl VideoWidget for YoutubeWidget {
    fn source(&self) -> WidgetSource {
        WidgetSource::Youtube
    }

    fn play(&mut self) {
        self.paused = false;
        self.sink.send(WidgetAction::Play);
    }

    fn pause(&mut self) {
        self.paused = true;
        self.sink.send(WidgetAction::Pause);
    }

    fn seek(&mut self, offset_secs: f64) {
        self.seek_at(offset_secs, Instant::now());
    }

    fn current_offset_secs(&self) -> f64 {
        self.clock.offset_at(Instant::now())
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn ingest(&mut self, report: WidgetReport, now: Instant) -> Vec<WidgetEvent> {
        match report {
            WidgetReport::Ready { duration } => {
                self.duration = duration;
                vec![WidgetEvent::Ready {
                    duration_secs: duration,
                }]
            }
            WidgetReport::Play { position } => {
                if let Some(position) = position {
                    self.sample = Some((position, now));
                }
                self.clock.set_playing(true, now);
                self.paused = false;
                vec![WidgetEvent::Play]
            }
            WidgetReport::Pause { position } => {
                self.clock.set_playing(false, now);
                if let Some(position) = position {
                    self.sample = Some((position, now));
                }
                self.paused = true;
                vec![WidgetEvent::Pause]
            }
            WidgetReport::Ended => {
                self.clock.set_playing(false, now);
                if let Some(duration) = self.duration {
                    self.clock.sync(duration, now);
                }
                self.sample = None;
                self.paused = true;
                vec![WidgetEvent::Ended]
            }
            WidgetReport::Seek { position } => {
                debug!("YouTube host sent a native seek report, treating it as a sample");
                self.sample = Some((position, now));
                Vec::new()
            }
            WidgetReport::Time { position } => {
                self.sample = Some((position, now));
                Vec::new()
            }
        }
    }

    fn poll(&mut self, now: Instant) -> Vec<WidgetEvent> {
        let threshold = self.settings.seek_detect_threshold_secs;
        let Some((position, at)) = self.sample.take() else {
            if let Some((target, issued)) = self.pending_seek {
                if now.saturating_duration_since(issued) > PENDING_SEEK_TIMEOUT {
                    debug!("No sample confirmed seek to {:.3}s, assuming it landed", target);
                    self.pending_seek = None;
                    return vec![WidgetEvent::Seek {
                        offset_secs: target,
                    }];
                }
            }
            return Vec::new();
        };

        let mut events = Vec::new();
        if let Some((target, issued)) = self.pending_seek {
            let landed = (position - target).abs() <= threshold;
            if landed || at.saturating_duration_since(issued) > PENDING_SEEK_TIMEOUT {
                self.pending_seek = None;
                events.push(WidgetEvent::Seek {
                    offset_secs: position,
                });
            }
        } else {
            let expected = self.clock.offset_at(at);
            if (position - expected).abs() > threshold {
                debug!(
                    "Playhead jumped from {:.3}s to {:.3}s, synthesising seek",
                    expected, position
                );
                events.push(WidgetEvent::Seek {
                    offset_secs: position,
                });
            }
        }
        self.clock.sync(position, at);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::SlotId;
    use tokio::sync::mpsc;

    fn widget() -> YoutubeWidget {
        let (tx, _rx) = mpsc::unbounded_channel();
        YoutubeWidget::new(CommandSink::new(SlotId(1), tx), WidgetSettings::default())
    }

    #[test]
    fn test_steady_playback_emits_nothing() {
        let mut widget = widget();
        let t0 = Instant::now();
        widget.ingest(WidgetReport::Play { position: Some(0.0) }, t0);
        assert!(widget.poll(t0).is_empty());

        let t1 = t0 + Duration::from_millis(500);
        widget.ingest(WidgetReport::Time { position: 0.5 }, t1);
        assert!(widget.poll(t1).is_empty());
    }

    #[test]
    fn test_jump_is_synthesised_as_seek() {
        let mut widget = widget();
        let t0 = Instant::now();
        widget.ingest(WidgetReport::Play { position: Some(0.0) }, t0);
        assert!(widget.poll(t0).is_empty());

        let t1 = t0 + Duration::from_millis(500);
        widget.ingest(WidgetReport::Time { position: 95.0 }, t1);
        assert_eq!(widget.poll(t1), vec![WidgetEvent::Seek { offset_secs: 95.0 }]);
    }

    #[test]
    fn test_commanded_seek_is_echoed_once_it_lands() {
        let mut widget = widget();
        let t0 = Instant::now();
        widget.seek_at(42.0, t0);

        // A stale sample from before the seek took effect
        widget.ingest(WidgetReport::Time { position: 3.0 }, t0 + Duration::from_millis(100));
        assert!(widget.poll(t0 + Duration::from_millis(100)).is_empty());

        widget.ingest(WidgetReport::Time { position: 42.0 }, t0 + Duration::from_millis(200));
        assert_eq!(
            widget.poll(t0 + Duration::from_millis(200)),
            vec![WidgetEvent::Seek { offset_secs: 42.0 }]
        );
        assert!(widget.poll(t0 + Duration::from_millis(300)).is_empty());
    }

    #[test]
    fn test_commanded_seek_times_out() {
        let mut widget = widget();
        let t0 = Instant::now();
        widget.seek_at(7.0, t0);
        assert_eq!(
            widget.poll(t0 + Duration::from_secs(3)),
            vec![WidgetEvent::Seek { offset_secs: 7.0 }]
        );
    }
}
