//! Twitch VOD player adapter
//!
//! The Twitch embed reports seek, play, pause and ended natively, so most
//! reports map straight through. Its one quirk handled here: right after
//! loading it emits a seek to the very start that nobody asked for, often
//! after the engine has already commanded its own seek.

use std::time::Instant;
use tracing::debug;

use super::{CommandSink, PlaybackClock, VideoWidget, WidgetAction, WidgetEvent, WidgetReport, WidgetSource};

/// Spurious post-load seeks land within this distance of zero
const INITIAL_SEEK_WINDOW_SECS: f64 = 0.5;

pub struct TwitchWidget {
    sink: CommandSink,
    clock: PlaybackClock,
    duration: Option<f64>,
    paused: bool,
    /// Set on ready, cleared once the post-load seek or our first seek echo shows up
    expect_initial_seek: bool,
    /// Target of the last commanded seek that has not been echoed yet
    pending_seek: Option<f64>,
}

impl TwitchWidget {
    pub(crate) fn new(sink: CommandSink) -> Self {
        Self {
            sink,
            clock: PlaybackClock::new(Instant::now()),
            duration: None,
            paused: true,
            expect_initial_seek: false,
            pending_seek: None,
        }
    }

    /// Whether a seek report is the embed's own post-load seek rather than our echo
    fn is_spurious_seek(&self, position: f64) -> bool {
        let near_start = |secs: f64| secs.abs() < INITIAL_SEEK_WINDOW_SECS;
        self.expect_initial_seek && near_start(position) && !self.pending_seek.is_some_and(near_start)
    }
}

impl VideoWidget for TwitchWidget {
    fn source(&self) -> WidgetSource {
        WidgetSource::Twitch
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
        self.pending_seek = Some(offset_secs);
        self.clock.sync(offset_secs, Instant::now());
        self.sink.send(WidgetAction::Seek {
            position: offset_secs,
        });
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
                self.expect_initial_seek = true;
                vec![WidgetEvent::Ready {
                    duration_secs: duration,
                }]
            }
            WidgetReport::Seek { position } => {
                if self.is_spurious_seek(position) {
                    debug!("Dropping post-load seek to {:.3}s", position);
                    self.expect_initial_seek = false;
                    return Vec::new();
                }
                self.clock.sync(position, now);
                if self
                    .pending_seek
                    .is_some_and(|target| (target - position).abs() < INITIAL_SEEK_WINDOW_SECS)
                {
                    self.expect_initial_seek = false;
                }
                self.pending_seek = None;
                vec![WidgetEvent::Seek {
                    offset_secs: position,
                }]
            }
            WidgetReport::Play { position } => {
                if let Some(position) = position {
                    self.clock.sync(position, now);
                }
                self.clock.set_playing(true, now);
                self.paused = false;
                vec![WidgetEvent::Play]
            }
            WidgetReport::Pause { position } => {
                self.clock.set_playing(false, now);
                if let Some(position) = position {
                    self.clock.sync(position, now);
                }
                self.paused = true;
                vec![WidgetEvent::Pause]
            }
            WidgetReport::Ended => {
                self.clock.set_playing(false, now);
                if let Some(duration) = self.duration {
                    self.clock.sync(duration, now);
                }
                self.paused = true;
                vec![WidgetEvent::Ended]
            }
            WidgetReport::Time { position } => {
                self.clock.sync(position, now);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::SlotId;
    use crate::widget::HostCommand;
    use tokio::sync::mpsc;

    fn actions(rx: &mut mpsc::UnboundedReceiver<HostCommand>) -> Vec<WidgetAction> {
        std::iter::from_fn(|| rx.try_recv().ok()).map(|c| c.action).collect()
    }

    fn widget() -> (TwitchWidget, mpsc::UnboundedReceiver<HostCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TwitchWidget::new(CommandSink::new(SlotId(0), tx)), rx)
    }

    #[test]
    fn test_reports_map_to_events() {
        let (mut widget, _rx) = widget();
        let now = Instant::now();
        assert_eq!(
            widget.ingest(WidgetReport::Ready { duration: Some(60.0) }, now),
            vec![WidgetEvent::Ready { duration_secs: Some(60.0) }]
        );
        assert_eq!(widget.ingest(WidgetReport::Play { position: None }, now), vec![WidgetEvent::Play]);
        assert!(!widget.is_paused());
        assert_eq!(
            widget.ingest(WidgetReport::Pause { position: Some(3.0) }, now),
            vec![WidgetEvent::Pause]
        );
        assert!(widget.is_paused());
        assert_eq!(widget.ingest(WidgetReport::Ended, now), vec![WidgetEvent::Ended]);
        assert!((widget.current_offset_secs() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_spurious_initial_seek_is_dropped() {
        let (mut widget, _rx) = widget();
        let now = Instant::now();
        widget.ingest(WidgetReport::Ready { duration: None }, now);
        assert!(widget.ingest(WidgetReport::Seek { position: 0.0 }, now).is_empty());
        assert_eq!(
            widget.ingest(WidgetReport::Seek { position: 0.0 }, now),
            vec![WidgetEvent::Seek { offset_secs: 0.0 }]
        );
    }

    #[test]
    fn test_post_load_seek_dropped_after_commanded_seek() {
        let (mut widget, mut rx) = widget();
        let now = Instant::now();
        widget.ingest(WidgetReport::Ready { duration: None }, now);
        widget.pause();
        widget.seek(4.0);
        assert_eq!(
            actions(&mut rx),
            vec![WidgetAction::Pause, WidgetAction::Seek { position: 4.0 }]
        );

        assert!(widget.ingest(WidgetReport::Seek { position: 0.0 }, now).is_empty());
        assert!((widget.current_offset_secs() - 4.0).abs() < 1e-9);
        assert_eq!(
            widget.ingest(WidgetReport::Seek { position: 4.0 }, now),
            vec![WidgetEvent::Seek { offset_secs: 4.0 }]
        );
        // Guard is spent, a later seek to the start is the user's
        assert_eq!(
            widget.ingest(WidgetReport::Seek { position: 0.0 }, now),
            vec![WidgetEvent::Seek { offset_secs: 0.0 }]
        );
    }

    #[test]
    fn test_echo_first_disarms_guard() {
        let (mut widget, _rx) = widget();
        let now = Instant::now();
        widget.ingest(WidgetReport::Ready { duration: None }, now);
        widget.seek(4.0);
        assert_eq!(
            widget.ingest(WidgetReport::Seek { position: 4.0 }, now),
            vec![WidgetEvent::Seek { offset_secs: 4.0 }]
        );
        assert_eq!(
            widget.ingest(WidgetReport::Seek { position: 0.2 }, now),
            vec![WidgetEvent::Seek { offset_secs: 0.2 }]
        );
    }

    #[test]
    fn test_commanded_seek_is_reported() {
        let (mut widget, mut rx) = widget();
        let now = Instant::now();
        widget.ingest(WidgetReport::Ready { duration: None }, now);
        widget.seek(0.001);
        assert_eq!(rx.try_recv().unwrap().action, WidgetAction::Seek { position: 0.001 });
        assert_eq!(
            widget.ingest(WidgetReport::Seek { position: 0.001 }, now),
            vec![WidgetEvent::Seek { offset_secs: 0.001 }]
        );
        assert!((widget.current_offset_secs() - 0.001).abs() < 1e-9);
    }
}
