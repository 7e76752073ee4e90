//! Per-slot player state machine
//!
//! A [`Player`] owns one widget adapter and maps the widget's private clock
//! (seconds since the start of the recording) onto the shared timeline
//! (milliseconds since epoch). Commands it issues are fire-and-forget, so
//! every seek first records a `Seeking*` state; the widget's later echo is
//! then attributed to that command instead of being mistaken for the user.
//!
//! Reactions that involve other players are not performed here. They are
//! returned as a [`SyncRequest`] for the coordinator to carry out.

mod state;

pub use state::{Outcome, PlayerState};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::provider::VideoDetails;
use crate::time::{millis_to_secs, secs_to_millis, Millis, Timestamp};
use crate::widget::{VideoWidget, WidgetEvent, WidgetReport};

/// Stable identifier of an on-screen slot, rendered as `player<N>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player{}", self.0)
    }
}

impl FromStr for SlotId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("player")
            .unwrap_or(s)
            .parse()
            .map(SlotId)
            .map_err(|_| format!("invalid slot id: {:?}", s))
    }
}

impl Serialize for SlotId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Timing constants shared by every player
#[derive(Debug, Clone, Copy)]
pub struct Tuning {
    /// Widgets auto-advance when seeked this close to their end
    pub end_guard_ms: Millis,
    /// Replacement for exact-zero seeks, which some widgets mishandle
    pub seek_epsilon_ms: Millis,
    /// Reference instant every player is aligned to in async mode
    pub async_align: Timestamp,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            end_guard_ms: 5_000,
            seek_epsilon_ms: 1,
            async_align: 1_500_000_000_000,
        }
    }
}

/// Work a player hands back to the coordinator after a widget event
#[derive(Debug, Clone, PartialEq)]
pub enum SyncRequest {
    /// Widget finished loading; run ready reconciliation
    Ready,
    /// Move every player to `target`. `except` initiated it and is already there.
    SeekAll {
        target: Timestamp,
        outcome: Outcome,
        except: Option<SlotId>,
    },
    /// Play was pressed mid-seek: replay the in-flight seek as playing
    ResumeSeek { fallback: Timestamp },
    /// The user paused `origin`; pause everyone
    PauseAll { origin: SlotId },
}

pub struct Player {
    slot: SlotId,
    state: PlayerState,
    video: VideoDetails,
    logical_start: Timestamp,
    logical_end: Option<Timestamp>,
    offset: Millis,
    widget: Box<dyn VideoWidget>,
    tuning: Tuning,
}

impl Player {
    pub fn new(slot: SlotId, video: VideoDetails, widget: Box<dyn VideoWidget>, tuning: Tuning) -> Self {
        let logical_start = video.start;
        let logical_end = video.end.map(|end| end.max(logical_start));
        debug!("{}: {} widget for video {}", slot, widget.source(), video.id);
        Self {
            slot,
            state: PlayerState::Loading,
            video,
            logical_start,
            logical_end,
            offset: 0,
            widget,
            tuning,
        }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: PlayerState) {
        if self.state != state {
            debug!("{}: {} -> {}", self.slot, self.state, state);
        }
        self.state = state;
    }

    pub fn video(&self) -> &VideoDetails {
        &self.video
    }

    pub fn offset(&self) -> Millis {
        self.offset
    }

    pub(crate) fn set_offset(&mut self, offset: Millis) {
        self.offset = offset;
    }

    pub fn effective_start(&self) -> Timestamp {
        self.logical_start + self.offset
    }

    /// Unknown until either the provider or the widget reports a duration
    pub fn effective_end(&self) -> Option<Timestamp> {
        self.logical_end.map(|end| end + self.offset)
    }

    /// Position of the widget on the shared timeline. Meaningless while loading.
    pub fn current_logical_timestamp(&self) -> Timestamp {
        self.effective_start() + secs_to_millis(self.widget.current_offset_secs())
    }

    pub fn play(&mut self) {
        self.widget.play();
    }

    pub fn pause(&mut self) {
        self.widget.pause();
    }

    fn ensure_playing(&mut self) {
        if self.widget.is_paused() {
            self.widget.play();
        }
    }

    fn ensure_paused(&mut self) {
        if !self.widget.is_paused() {
            self.widget.pause();
        }
    }

    /// Last instant the widget can be parked at without triggering auto-advance
    fn end_guard_mark(&self) -> Option<Timestamp> {
        self.effective_end().map(|end| end - self.tuning.end_guard_ms)
    }

    /// Command the widget toward `target`, clamped into the recording
    pub fn seek_to(&mut self, target: Timestamp, outcome: Outcome) {
        let start = self.effective_start();
        let epsilon = self.tuning.seek_epsilon_ms;

        if target < start {
            self.set_state(PlayerState::SeekingStart);
            self.ensure_paused();
            self.widget.seek(millis_to_secs(epsilon));
            return;
        }

        if let Some(mark) = self.end_guard_mark() {
            if target >= mark {
                // Park strictly inside the guard
                let park = (mark - start - epsilon).max(epsilon);
                self.set_state(PlayerState::SeekingEnd);
                self.ensure_paused();
                self.widget.seek(millis_to_secs(park));
                return;
            }
        }

        let mut position = target - start;
        if position == 0 {
            position = epsilon;
        }
        let position = millis_to_secs(position);
        match outcome {
            Outcome::Paused => {
                self.set_state(PlayerState::SeekingPause);
                self.ensure_paused();
                self.widget.seek(position);
            }
            Outcome::Playing => {
                self.set_state(PlayerState::SeekingPlay);
                self.widget.seek(position);
                self.ensure_playing();
            }
        }
    }

    /// Park just inside the end guard, paused
    pub fn seek_to_end(&mut self) {
        match self.effective_end() {
            Some(end) => self.seek_to(end, Outcome::Paused),
            None => warn!("{}: cannot seek to end, duration unknown", self.slot),
        }
    }

    /// Shift `offset` so that `timestamp` maps onto the async reference instant
    fn align(&mut self, timestamp: Timestamp) {
        self.offset += self.tuning.async_align - timestamp;
    }

    /// Align the current widget position to the async reference instant
    pub(crate) fn align_current(&mut self) {
        let timestamp = self.current_logical_timestamp();
        self.align(timestamp);
    }

    /// Feed a raw host report through the widget adapter
    pub fn ingest(&mut self, report: WidgetReport, now: Instant) -> Vec<WidgetEvent> {
        self.widget.ingest(report, now)
    }

    pub fn poll(&mut self, now: Instant) -> Vec<WidgetEvent> {
        self.widget.poll(now)
    }

    fn unhandled(&self, event: &WidgetEvent) -> Option<SyncRequest> {
        warn!(
            "{} had an unhandled event {} while in state {}",
            self.slot,
            event.name(),
            self.state
        );
        None
    }

    /// The transition function
    pub fn on_widget_event(&mut self, event: &WidgetEvent) -> Option<SyncRequest> {
        use PlayerState::*;

        match (event, self.state) {
            (WidgetEvent::Ready { duration_secs }, Loading) => {
                if self.logical_end.is_none() {
                    if let Some(duration) = duration_secs {
                        let end = self.logical_start + secs_to_millis(*duration);
                        info!("{}: end time taken from widget duration ({:.0}s)", self.slot, duration);
                        self.logical_end = Some(end.max(self.logical_start));
                    }
                }
                self.set_state(Ready);
                Some(SyncRequest::Ready)
            }
            (WidgetEvent::Ready { .. }, _) => self.unhandled(event),

            // Expected echoes of our own seek commands
            (WidgetEvent::Seek { .. }, SeekingPlay) => {
                self.set_state(Playing);
                None
            }
            (WidgetEvent::Seek { .. }, SeekingPause) => {
                self.set_state(Paused);
                None
            }
            (WidgetEvent::Seek { .. }, SeekingStart) => {
                self.set_state(BeforeStart);
                None
            }
            (WidgetEvent::Seek { .. }, SeekingEnd) => {
                self.set_state(AfterEnd);
                None
            }
            (WidgetEvent::Seek { offset_secs }, Async) => {
                let timestamp = self.effective_start() + secs_to_millis(*offset_secs);
                self.align(timestamp);
                None
            }
            (WidgetEvent::Seek { offset_secs }, Playing | Paused | Ready | BeforeStart | AfterEnd) => {
                info!("User has manually seeked {}, seeking all other players", self.slot);
                let target = self.effective_start() + secs_to_millis(*offset_secs);
                let outcome = if self.state == Playing {
                    Outcome::Playing
                } else {
                    Outcome::Paused
                };
                Some(SyncRequest::SeekAll {
                    target,
                    outcome,
                    except: None,
                })
            }
            (WidgetEvent::Seek { .. }, Loading | Restarting) => self.unhandled(event),

            (WidgetEvent::Play, Paused | Ready | BeforeStart) => {
                info!("User has manually started {}, starting all players", self.slot);
                Some(SyncRequest::SeekAll {
                    target: self.current_logical_timestamp(),
                    outcome: Outcome::Playing,
                    except: Some(self.slot),
                })
            }
            (WidgetEvent::Play, SeekingPause) => {
                info!("User has manually started {} while it was seeking, resuming the seek as playing", self.slot);
                Some(SyncRequest::ResumeSeek {
                    fallback: self.current_logical_timestamp(),
                })
            }
            (WidgetEvent::Play, Restarting) => {
                info!("{} finished restarting after it ended, parking at a safe end point", self.slot);
                self.seek_to_end();
                None
            }
            (WidgetEvent::Play, Async | SeekingPlay | Playing) => None,
            (WidgetEvent::Play, Loading | SeekingStart | SeekingEnd | AfterEnd) => self.unhandled(event),

            (WidgetEvent::Pause, Playing | SeekingPlay) => {
                info!("User has manually paused {}, pausing all other players", self.slot);
                Some(SyncRequest::PauseAll { origin: self.slot })
            }
            (WidgetEvent::Pause, Async) => {
                self.align_current();
                None
            }
            (WidgetEvent::Pause, SeekingPause | Paused) => None,
            (
                WidgetEvent::Pause,
                Loading | Ready | SeekingStart | BeforeStart | SeekingEnd | AfterEnd | Restarting,
            ) => self.unhandled(event),

            (WidgetEvent::Ended, Playing | SeekingPlay | Paused | SeekingPause | SeekingEnd | AfterEnd) => {
                info!("{} reached its end, restarting it", self.slot);
                self.set_state(Restarting);
                // The widget seeks back to the start by itself, then reports play
                self.widget.play();
                None
            }
            (WidgetEvent::Ended, BeforeStart) => {
                let target = self
                    .effective_end()
                    .unwrap_or_else(|| self.current_logical_timestamp());
                Some(SyncRequest::SeekAll {
                    target,
                    outcome: Outcome::Paused,
                    except: None,
                })
            }
            (WidgetEvent::Ended, Async) => {
                self.widget.play();
                None
            }
            (WidgetEvent::Ended, Loading | Ready | SeekingStart | Restarting) => self.unhandled(event),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::widget::{create_widget, HostCommand, WidgetAction, WidgetSettings, WidgetSource};
    use tokio::sync::mpsc;

    pub fn video(start: Timestamp, end: Option<Timestamp>) -> VideoDetails {
        VideoDetails {
            id: format!("v{}", start),
            source: WidgetSource::Twitch,
            streamer: format!("streamer{}", start),
            title: String::new(),
            start,
            end,
        }
    }

    /// A Twitch-backed player plus the command stream its host would see
    pub fn player(
        slot: usize,
        start: Timestamp,
        end: Option<Timestamp>,
    ) -> (Player, mpsc::UnboundedReceiver<HostCommand>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let details = video(start, end);
        let widget = create_widget(details.source, SlotId(slot), &details.id, tx, WidgetSettings::default());
        assert!(matches!(rx.try_recv().unwrap().action, WidgetAction::Create { .. }));
        (Player::new(SlotId(slot), details, widget, Tuning::default()), rx)
    }

    pub fn actions(rx: &mut mpsc::UnboundedReceiver<HostCommand>) -> Vec<WidgetAction> {
        let mut actions = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            actions.push(cmd.action);
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{actions, player};
    use super::*;
    use crate::widget::WidgetAction;

    const START: Timestamp = 1_000_000;
    const END: Timestamp = 1_600_000;

    fn ready(p: &mut Player) {
        assert_eq!(p.on_widget_event(&WidgetEvent::Ready { duration_secs: None }), Some(SyncRequest::Ready));
    }

    #[test]
    fn test_slot_id_round_trips_through_text() {
        assert_eq!(SlotId(3).to_string(), "player3");
        assert_eq!("player3".parse::<SlotId>(), Ok(SlotId(3)));
        assert_eq!("4".parse::<SlotId>(), Ok(SlotId(4)));
        assert!("playerx".parse::<SlotId>().is_err());
    }

    #[test]
    fn test_seek_before_start_parks_at_epsilon() {
        let (mut p, mut rx) = player(0, START, Some(END));
        ready(&mut p);
        p.seek_to(START - 10_000, Outcome::Playing);
        assert_eq!(p.state(), PlayerState::SeekingStart);
        // Widget starts paused, so no pause command is needed
        assert_eq!(actions(&mut rx), vec![WidgetAction::Seek { position: 0.001 }]);

        p.on_widget_event(&WidgetEvent::Seek { offset_secs: 0.001 });
        assert_eq!(p.state(), PlayerState::BeforeStart);
    }

    #[test]
    fn test_seek_past_end_guard_parks_inside_it() {
        let (mut p, mut rx) = player(0, START, Some(END));
        ready(&mut p);
        let mark = END - Tuning::default().end_guard_ms;
        for target in [mark, mark + 1, END, END + 1_000_000] {
            p.seek_to(target, Outcome::Playing);
            assert_eq!(p.state(), PlayerState::SeekingEnd);
            for action in actions(&mut rx) {
                if let WidgetAction::Seek { position } = action {
                    assert!(START + secs_to_millis(position) < mark);
                }
            }
        }
        p.on_widget_event(&WidgetEvent::Seek { offset_secs: 594.999 });
        assert_eq!(p.state(), PlayerState::AfterEnd);
    }

    #[test]
    fn test_interior_seek_play_and_pause() {
        let (mut p, mut rx) = player(0, START, Some(END));
        ready(&mut p);

        p.seek_to(START + 30_000, Outcome::Playing);
        assert_eq!(p.state(), PlayerState::SeekingPlay);
        assert_eq!(
            actions(&mut rx),
            vec![WidgetAction::Seek { position: 30.0 }, WidgetAction::Play]
        );

        // Already playing: no second play command
        p.seek_to(START + 40_000, Outcome::Playing);
        assert_eq!(actions(&mut rx), vec![WidgetAction::Seek { position: 40.0 }]);

        p.seek_to(START + 50_000, Outcome::Paused);
        assert_eq!(p.state(), PlayerState::SeekingPause);
        assert_eq!(
            actions(&mut rx),
            vec![WidgetAction::Pause, WidgetAction::Seek { position: 50.0 }]
        );
    }

    #[test]
    fn test_zero_seek_is_nudged() {
        let (mut p, mut rx) = player(0, START, Some(END));
        ready(&mut p);
        p.seek_to(START, Outcome::Paused);
        assert_eq!(actions(&mut rx), vec![WidgetAction::Seek { position: 0.001 }]);
    }

    #[test]
    fn test_ready_fills_missing_end_from_duration() {
        let (mut p, _rx) = player(0, START, None);
        assert_eq!(p.effective_end(), None);
        p.on_widget_event(&WidgetEvent::Ready { duration_secs: Some(120.0) });
        assert_eq!(p.effective_end(), Some(START + 120_000));
        assert_eq!(p.state(), PlayerState::Ready);
    }

    #[test]
    fn test_user_seek_requests_seek_all() {
        let (mut p, _rx) = player(0, START, Some(END));
        ready(&mut p);
        p.set_state(PlayerState::Playing);
        assert_eq!(
            p.on_widget_event(&WidgetEvent::Seek { offset_secs: 12.0 }),
            Some(SyncRequest::SeekAll {
                target: START + 12_000,
                outcome: Outcome::Playing,
                except: None
            })
        );

        p.set_state(PlayerState::BeforeStart);
        assert_eq!(
            p.on_widget_event(&WidgetEvent::Seek { offset_secs: 12.0 }),
            Some(SyncRequest::SeekAll {
                target: START + 12_000,
                outcome: Outcome::Paused,
                except: None
            })
        );
    }

    #[test]
    fn test_user_play_excludes_self() {
        let (mut p, _rx) = player(0, START, Some(END));
        ready(&mut p);
        p.seek_to(START + 5_000, Outcome::Paused);
        p.on_widget_event(&WidgetEvent::Seek { offset_secs: 5.0 });
        assert_eq!(
            p.on_widget_event(&WidgetEvent::Play),
            Some(SyncRequest::SeekAll {
                target: START + 5_000,
                outcome: Outcome::Playing,
                except: Some(SlotId(0))
            })
        );
    }

    #[test]
    fn test_ended_restarts_then_parks_at_end() {
        let (mut p, mut rx) = player(0, START, Some(END));
        ready(&mut p);
        p.set_state(PlayerState::Playing);
        actions(&mut rx);

        assert_eq!(p.on_widget_event(&WidgetEvent::Ended), None);
        assert_eq!(p.state(), PlayerState::Restarting);
        assert_eq!(actions(&mut rx), vec![WidgetAction::Play]);

        assert_eq!(p.on_widget_event(&WidgetEvent::Play), None);
        assert_eq!(p.state(), PlayerState::SeekingEnd);
    }

    #[test]
    fn test_ended_before_start_seeks_everyone_to_end() {
        let (mut p, _rx) = player(0, START, Some(END));
        ready(&mut p);
        p.set_state(PlayerState::BeforeStart);
        assert_eq!(
            p.on_widget_event(&WidgetEvent::Ended),
            Some(SyncRequest::SeekAll {
                target: END,
                outcome: Outcome::Paused,
                except: None
            })
        );
        assert_eq!(p.state(), PlayerState::BeforeStart);
    }

    #[test]
    fn test_async_seek_adjusts_offset() {
        let (mut p, _rx) = player(0, START, Some(END));
        ready(&mut p);
        p.set_state(PlayerState::Async);
        p.on_widget_event(&WidgetEvent::Seek { offset_secs: 60.0 });
        assert_eq!(p.state(), PlayerState::Async);
        assert_eq!(p.effective_start() + 60_000, Tuning::default().async_align);
    }

    #[test]
    fn test_unexpected_events_are_ignored() {
        let (mut p, _rx) = player(0, START, Some(END));
        assert_eq!(p.on_widget_event(&WidgetEvent::Pause), None);
        assert_eq!(p.on_widget_event(&WidgetEvent::Ended), None);
        assert_eq!(p.on_widget_event(&WidgetEvent::Seek { offset_secs: 1.0 }), None);
        assert_eq!(p.state(), PlayerState::Loading);
    }
}
