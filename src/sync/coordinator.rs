//! Synchronization coordinator
//!
//! Owns every active [`Player`], the seek barrier and the async alignment
//! mode. It is the only place that commands all players at once: players
//! report what they observed, the coordinator decides what everyone does.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::player::{Outcome, Player, PlayerState, SlotId, SyncRequest};
use crate::time::{format_timestamp, Millis, Timestamp};
use crate::widget::{WidgetEvent, WidgetReport, WidgetSource};

use super::event_log::EventLog;
use super::timeline::Timeline;
use super::Intent;

/// Tracks whether a coordinated seek is still in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekBarrier {
    pending_target: Option<Timestamp>,
    pending_initiator: Option<SlotId>,
}

impl SeekBarrier {
    pub fn pending_target(&self) -> Option<Timestamp> {
        self.pending_target
    }

    pub fn pending_initiator(&self) -> Option<SlotId> {
        self.pending_initiator
    }

    fn arm(&mut self, target: Timestamp, initiator: Option<SlotId>) {
        self.pending_target = Some(target);
        self.pending_initiator = initiator;
    }

    fn clear(&mut self) {
        self.pending_target = None;
        self.pending_initiator = None;
    }
}

/// Per-player part of a [`Snapshot`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub slot: SlotId,
    pub state: PlayerState,
    pub source: WidgetSource,
    pub video: String,
    pub streamer: String,
    pub effective_start: Timestamp,
    pub effective_end: Option<Timestamp>,
    pub offset: Millis,
}

/// Everything the host needs to render the players and the timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub players: Vec<PlayerSnapshot>,
    pub timeline: Option<Timeline>,
    pub playhead: Option<Timestamp>,
    /// Playhead as a fraction of the timeline, for the cursor
    pub cursor: Option<f64>,
    pub async_mode: bool,
}

pub struct Coordinator {
    players: BTreeMap<SlotId, Player>,
    barrier: SeekBarrier,
    /// Rendezvous override when the session was loaded from a race
    race_start: Option<Timestamp>,
    nudge_ms: Millis,
    event_log: EventLog,
}

impl Coordinator {
    pub fn new(nudge_ms: Millis) -> Self {
        Self {
            players: BTreeMap::new(),
            barrier: SeekBarrier::default(),
            race_start: None,
            nudge_ms,
            event_log: EventLog::default(),
        }
    }

    /// Start tracking a player, tearing down whatever occupied its slot
    pub fn attach(&mut self, player: Player) -> Option<Player> {
        let slot = player.slot();
        info!(
            "{}: attached {} video {} ({})",
            slot,
            player.video().source,
            player.video().id,
            player.video().streamer
        );
        let previous = self.players.insert(slot, player);
        self.settle_barrier();
        previous
    }

    /// Stop tracking a player; dropping it destroys its widget
    pub fn detach(&mut self, slot: SlotId) -> Option<Player> {
        let removed = self.players.remove(&slot);
        if removed.is_some() {
            info!("{}: detached", slot);
        }
        self.settle_barrier();
        removed
    }

    pub fn player(&self, slot: SlotId) -> Option<&Player> {
        self.players.get(&slot)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn barrier(&self) -> SeekBarrier {
        self.barrier
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn set_race_start(&mut self, start: Option<Timestamp>) {
        self.race_start = start;
    }

    pub fn timeline(&self) -> Option<Timeline> {
        Timeline::from_spans(
            self.players
                .values()
                .map(|p| (p.effective_start(), p.effective_end())),
        )
    }

    /// Average position of the players that are in sync, if any
    pub fn average_timestamp(&self) -> Option<Timestamp> {
        average(
            self.players
                .values()
                .filter(|p| p.state().is_synced())
                .map(Player::current_logical_timestamp),
        )
    }

    /// Intended position of the broadcast: the in-flight seek target, else where the players are
    pub fn playhead(&self) -> Option<Timestamp> {
        self.barrier.pending_target().or_else(|| self.average_timestamp())
    }

    pub fn in_async_mode(&self) -> bool {
        self.players.values().any(|p| p.state() == PlayerState::Async)
    }

    /// Move every player except `except` toward `target`
    pub fn seek_all(&mut self, target: Timestamp, outcome: Outcome, except: Option<SlotId>) {
        info!(
            "Seeking all players to {} ({:?})",
            format_timestamp(target),
            outcome
        );
        self.barrier.arm(target, except);
        for (slot, player) in self.players.iter_mut() {
            if Some(*slot) == except {
                // It initiated the action and is already at the target
                player.set_state(outcome.settled_state());
                continue;
            }
            if player.state() == PlayerState::Loading {
                debug!("{}: still loading, it will sync once ready", slot);
                continue;
            }
            player.seek_to(target, outcome);
        }
        self.settle_barrier();
    }

    /// Release the barrier once nobody is waiting on a seek echo
    fn settle_barrier(&mut self) {
        if self.barrier.pending_target().is_none() {
            return;
        }
        if !self.players.values().any(|p| p.state().is_seeking()) {
            debug!(
                "All seeks completed, clearing barrier (initiator {:?})",
                self.barrier.pending_initiator()
            );
            self.barrier.clear();
        }
    }

    /// Route a raw host report through the slot's adapter and dispatch the result
    pub fn handle_report(&mut self, slot: SlotId, report: WidgetReport, now: Instant) {
        let events = match self.players.get_mut(&slot) {
            Some(player) => player.ingest(report, now),
            None => {
                debug!("Report for empty slot {}: {:?}", slot, report);
                return;
            }
        };
        for event in events {
            self.dispatch(slot, event);
        }
    }

    /// Deliver one widget event to its player and carry out the consequences
    pub fn dispatch(&mut self, slot: SlotId, event: WidgetEvent) {
        let Some(player) = self.players.get_mut(&slot) else {
            warn!("Event {} for unknown slot {}", event.name(), slot);
            return;
        };
        self.event_log.record(slot, &event, player.state());
        debug!("{}: {} in state {}", slot, event.name(), player.state());

        if let Some(request) = player.on_widget_event(&event) {
            self.apply(slot, request);
        }
        self.settle_barrier();
    }

    fn apply(&mut self, slot: SlotId, request: SyncRequest) {
        match request {
            SyncRequest::Ready => self.on_player_ready(slot),
            SyncRequest::SeekAll {
                target,
                outcome,
                except,
            } => self.seek_all(target, outcome, except),
            SyncRequest::ResumeSeek { fallback } => {
                let target = self.barrier.pending_target().unwrap_or(fallback);
                self.seek_all(target, Outcome::Playing, None);
            }
            SyncRequest::PauseAll { origin } => self.pause_all(origin),
        }
    }

    /// The user paused `origin`. Everyone else follows; `origin` itself is not
    /// re-paused since it may still be finishing its own seek.
    fn pause_all(&mut self, origin: SlotId) {
        for (slot, player) in self.players.iter_mut() {
            match player.state() {
                PlayerState::SeekingPlay => player.set_state(PlayerState::SeekingPause),
                PlayerState::Playing => player.set_state(PlayerState::Paused),
                _ => {}
            }
            if *slot != origin && player.state() != PlayerState::Loading {
                player.pause();
            }
        }
    }

    /// Decide where a freshly loaded player joins the session
    fn on_player_ready(&mut self, slot: SlotId) {
        let mut any_loading = false;
        let mut any_running = false;
        let mut any_halted = false;
        let mut any_async = false;
        for (other, player) in &self.players {
            if *other == slot {
                continue;
            }
            let state = player.state();
            any_loading |= state == PlayerState::Loading;
            any_running |= state.is_running();
            any_halted |= state.is_halted();
            any_async |= state == PlayerState::Async;
        }
        let playhead = self.playhead();

        let Some(player) = self.players.get_mut(&slot) else {
            return;
        };

        if any_async {
            info!("{} loaded while another video was async, putting it into async too", slot);
            player.set_state(PlayerState::Async);
            player.pause();
            player.align_current();
        } else if any_running {
            info!("{} loaded while another video was playing, syncing to others and starting", slot);
            let target = playhead.unwrap_or_else(|| player.effective_start());
            player.seek_to(target, Outcome::Playing);
        } else if any_halted {
            info!("{} loaded while all other videos were paused, resyncing playhead", slot);
            let start = player.effective_start();
            match playhead {
                Some(ts) if ts >= start => player.seek_to(ts, Outcome::Paused),
                // Nobody can meet before this recording exists, so everyone moves to its start
                _ => self.seek_all(start, Outcome::Paused, None),
            }
        } else if !any_loading {
            let rendezvous = match self.race_start {
                Some(start) => start,
                None => self
                    .players
                    .values()
                    .map(Player::effective_start)
                    .max()
                    .unwrap_or_default(),
            };
            info!(
                "{} was last to load, syncing all videos to {}",
                slot,
                format_timestamp(rendezvous)
            );
            self.seek_all(rendezvous, Outcome::Paused, None);
        } else {
            info!("{} is ready, waiting for the other videos to load", slot);
        }
    }

    /// Decouple every player from the timeline for manual alignment
    pub fn enter_async_mode(&mut self) {
        info!("Entering async mode");
        self.barrier.clear();
        for player in self.players.values_mut() {
            if player.state() == PlayerState::Loading {
                continue;
            }
            player.set_state(PlayerState::Async);
            player.pause();
            player.align_current();
        }
    }

    /// Rebase the manual offsets and resume everyone in sync
    pub fn commit_async_mode(&mut self) {
        let Some(largest) = self
            .players
            .values()
            .filter(|p| p.state() == PlayerState::Async)
            .map(Player::offset)
            .max()
        else {
            return;
        };

        for player in self.players.values_mut() {
            if player.state() == PlayerState::Async {
                let offset = player.offset() - largest;
                debug!("{}: committed offset {}ms", player.slot(), offset);
                player.set_offset(offset);
            }
        }

        let resume = average(
            self.players
                .values()
                .filter(|p| p.state() == PlayerState::Async)
                .map(Player::current_logical_timestamp),
        );
        info!("Resuming all players after async alignment");
        if let Some(target) = resume {
            self.seek_all(target, Outcome::Playing, None);
        }
    }

    /// Periodic work: adapter polling and promotion of players waiting for their start
    pub fn tick(&mut self, now: Instant) {
        let slots: Vec<SlotId> = self.players.keys().copied().collect();
        for slot in slots {
            let events = match self.players.get_mut(&slot) {
                Some(player) => player.poll(now),
                None => continue,
            };
            for event in events {
                self.dispatch(slot, event);
            }
        }
        self.promote_waiting_players();
    }

    /// No widget can tell us "your start time has arrived", so poll for it
    fn promote_waiting_players(&mut self) {
        let Some(clock) = average(
            self.players
                .values()
                .filter(|p| p.state() == PlayerState::Playing)
                .map(Player::current_logical_timestamp),
        ) else {
            return;
        };

        for player in self.players.values_mut() {
            if player.state() == PlayerState::BeforeStart && clock >= player.effective_start() {
                info!("{} reached its start time, starting it", player.slot());
                player.set_state(PlayerState::Playing);
                player.play();
            }
        }
    }

    /// First player that plays, else first that is paused
    fn primary(&self) -> Option<(SlotId, Outcome)> {
        let running = self
            .players
            .values()
            .find(|p| p.state().is_running())
            .map(|p| (p.slot(), Outcome::Playing));
        running.or_else(|| {
            self.players
                .values()
                .find(|p| p.state().is_halted())
                .map(|p| (p.slot(), Outcome::Paused))
        })
    }

    pub fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::ToggleAsync => {
                if self.in_async_mode() {
                    self.commit_async_mode();
                } else {
                    self.enter_async_mode();
                }
            }
            Intent::TogglePlay => {
                let Some((slot, outcome)) = self.primary() else {
                    debug!("Toggle play with no synced player");
                    return;
                };
                if let Some(player) = self.players.get_mut(&slot) {
                    // The widget's own play/pause event fans this out to everyone
                    match outcome {
                        Outcome::Playing => player.pause(),
                        Outcome::Paused => player.play(),
                    }
                }
            }
            Intent::NudgeBack | Intent::NudgeForward => {
                let Some((slot, outcome)) = self.primary() else {
                    return;
                };
                let base = match self.barrier.pending_target() {
                    Some(target) => target,
                    None => match self.players.get(&slot) {
                        Some(player) => player.current_logical_timestamp(),
                        None => return,
                    },
                };
                let delta = if intent == Intent::NudgeBack {
                    -self.nudge_ms
                } else {
                    self.nudge_ms
                };
                self.seek_all(base + delta, outcome, None);
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let timeline = self.timeline();
        let playhead = self.playhead();
        Snapshot {
            players: self
                .players
                .values()
                .map(|p| PlayerSnapshot {
                    slot: p.slot(),
                    state: p.state(),
                    source: p.video().source,
                    video: p.video().id.clone(),
                    streamer: p.video().streamer.clone(),
                    effective_start: p.effective_start(),
                    effective_end: p.effective_end(),
                    offset: p.offset(),
                })
                .collect(),
            timeline,
            playhead,
            cursor: timeline.zip(playhead).map(|(t, ts)| t.fraction(ts)),
            async_mode: self.in_async_mode(),
        }
    }
}

fn average<I: Iterator<Item = Timestamp>>(values: I) -> Option<Timestamp> {
    let (sum, count) = values.fold((0i128, 0i128), |(sum, count), v| (sum + v as i128, count + 1));
    (count > 0).then(|| (sum / count) as Timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::testing::{actions, player};
    use crate::player::Tuning;
    use crate::widget::{HostCommand, WidgetAction};
    use tokio::sync::mpsc::UnboundedReceiver;

    const END: Timestamp = 10_000_000;

    struct Harness {
        coordinator: Coordinator,
        hosts: BTreeMap<SlotId, UnboundedReceiver<HostCommand>>,
    }

    impl Harness {
        fn new(starts: &[Timestamp]) -> Self {
            let mut coordinator = Coordinator::new(10_000);
            let mut hosts = BTreeMap::new();
            for (i, start) in starts.iter().enumerate() {
                let (p, rx) = player(i, *start, Some(END));
                coordinator.attach(p);
                hosts.insert(SlotId(i), rx);
            }
            Self { coordinator, hosts }
        }

        fn ready(&mut self, slot: usize) {
            self.coordinator
                .dispatch(SlotId(slot), WidgetEvent::Ready { duration_secs: None });
        }

        fn echo(&mut self, slot: usize) {
            self.coordinator
                .dispatch(SlotId(slot), WidgetEvent::Seek { offset_secs: 0.0 });
        }

        fn state(&self, slot: usize) -> PlayerState {
            self.coordinator.player(SlotId(slot)).unwrap().state()
        }

        fn actions(&mut self, slot: usize) -> Vec<WidgetAction> {
            actions(self.hosts.get_mut(&SlotId(slot)).unwrap())
        }

        fn drain(&mut self) {
            for rx in self.hosts.values_mut() {
                actions(rx);
            }
        }
    }

    #[test]
    fn test_last_to_load_rendezvous_at_latest_start() {
        let mut h = Harness::new(&[1_000, 5_000]);
        h.ready(0);
        assert_eq!(h.state(0), PlayerState::Ready);
        assert_eq!(h.coordinator.barrier().pending_target(), None);

        h.ready(1);
        assert_eq!(h.state(0), PlayerState::SeekingPause);
        assert_eq!(h.state(1), PlayerState::SeekingPause);
        assert_eq!(h.coordinator.barrier().pending_target(), Some(5_000));
        assert_eq!(h.actions(0), vec![WidgetAction::Seek { position: 4.0 }]);
        assert_eq!(h.actions(1), vec![WidgetAction::Seek { position: 0.001 }]);

        h.echo(0);
        assert_eq!(h.state(0), PlayerState::Paused);
        assert_eq!(h.coordinator.barrier().pending_target(), Some(5_000));

        h.echo(1);
        assert_eq!(h.state(1), PlayerState::Paused);
        assert_eq!(h.coordinator.barrier().pending_target(), None);
    }

    #[test]
    fn test_race_start_overrides_rendezvous() {
        let mut h = Harness::new(&[1_000, 5_000]);
        h.coordinator.set_race_start(Some(7_000));
        h.ready(0);
        h.ready(1);
        assert_eq!(h.coordinator.barrier().pending_target(), Some(7_000));
    }

    #[test]
    fn test_barrier_converges_in_any_echo_order() {
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut h = Harness::new(&[1_000, 2_000, 3_000]);
            for slot in 0..3 {
                h.ready(slot);
            }
            h.coordinator.seek_all(50_000, Outcome::Playing, None);
            for (i, slot) in order.iter().enumerate() {
                assert!(h.coordinator.barrier().pending_target().is_some());
                // Unrelated chatter while seeks are in flight
                h.coordinator.dispatch(SlotId(*slot), WidgetEvent::Play);
                h.echo(*slot);
                if i < 2 {
                    assert_eq!(h.coordinator.barrier().pending_target(), Some(50_000));
                }
            }
            assert_eq!(h.coordinator.barrier().pending_target(), None);
            for slot in 0..3 {
                assert_eq!(h.state(slot), PlayerState::Playing);
            }
        }
    }

    #[test]
    fn test_ready_while_others_play_catches_up_alone() {
        let mut h = Harness::new(&[1_000, 2_000]);
        h.ready(0);
        h.coordinator.seek_all(8_000, Outcome::Playing, None);
        h.echo(0);
        assert_eq!(h.state(0), PlayerState::Playing);
        assert_eq!(h.coordinator.barrier().pending_target(), None);
        h.drain();

        h.ready(1);
        assert_eq!(h.state(0), PlayerState::Playing);
        assert_eq!(h.state(1), PlayerState::SeekingPlay);
        assert_eq!(h.coordinator.barrier().pending_target(), None);
        assert!(h.actions(0).is_empty());
        assert_eq!(
            h.actions(1),
            vec![WidgetAction::Seek { position: 6.0 }, WidgetAction::Play]
        );
    }

    #[test]
    fn test_ready_while_others_paused_resyncs_everyone() {
        let mut h = Harness::new(&[1_000, 20_000]);
        h.ready(0);
        h.coordinator.seek_all(8_000, Outcome::Paused, None);
        h.echo(0);
        assert_eq!(h.state(0), PlayerState::Paused);

        // Playhead 8s precedes the new video, so everyone moves to its start
        h.ready(1);
        assert_eq!(h.coordinator.barrier().pending_target(), Some(20_000));
        assert_eq!(h.state(0), PlayerState::SeekingPause);
        assert_eq!(h.state(1), PlayerState::SeekingPause);
    }

    #[test]
    fn test_ready_while_others_paused_joins_playhead() {
        let mut h = Harness::new(&[1_000, 2_000]);
        h.ready(0);
        h.coordinator.seek_all(8_000, Outcome::Paused, None);
        h.echo(0);
        h.drain();

        h.ready(1);
        assert_eq!(h.state(0), PlayerState::Paused);
        assert_eq!(h.state(1), PlayerState::SeekingPause);
        assert!(h.actions(0).is_empty());
        assert_eq!(h.actions(1), vec![WidgetAction::Seek { position: 6.0 }]);
    }

    #[test]
    fn test_async_round_trip_with_late_loader_keeps_starts() {
        let mut h = Harness::new(&[5_000, 5_000]);
        h.ready(0);
        h.coordinator.enter_async_mode();
        assert_eq!(h.state(1), PlayerState::Loading);

        h.ready(1);
        assert_eq!(h.state(1), PlayerState::Async);
        assert_eq!(
            h.coordinator.player(SlotId(0)).unwrap().offset(),
            h.coordinator.player(SlotId(1)).unwrap().offset()
        );
        assert_eq!(h.actions(1), vec![WidgetAction::Pause]);

        h.coordinator.commit_async_mode();
        for slot in 0..2 {
            let player = h.coordinator.player(SlotId(slot)).unwrap();
            assert_eq!(player.offset(), 0);
            assert_eq!(player.effective_start(), 5_000);
        }
        assert_eq!(h.coordinator.timeline().map(|t| t.start), Some(5_000));
    }

    #[test]
    fn test_twitch_post_load_seek_does_not_settle_rendezvous() {
        let mut h = Harness::new(&[1_000, 5_000]);
        let now = Instant::now();
        for slot in 0..2 {
            h.coordinator
                .handle_report(SlotId(slot), WidgetReport::Ready { duration: None }, now);
        }
        assert_eq!(h.coordinator.barrier().pending_target(), Some(5_000));
        h.drain();

        // The embed's own seek to zero arrives before our echo
        h.coordinator
            .handle_report(SlotId(0), WidgetReport::Seek { position: 0.0 }, now);
        assert_eq!(h.state(0), PlayerState::SeekingPause);

        h.coordinator
            .handle_report(SlotId(0), WidgetReport::Seek { position: 4.0 }, now);
        h.coordinator
            .handle_report(SlotId(1), WidgetReport::Seek { position: 0.001 }, now);
        assert_eq!(h.state(0), PlayerState::Paused);
        assert_eq!(h.state(1), PlayerState::Paused);
        assert_eq!(h.coordinator.barrier().pending_target(), None);
        assert!(h.actions(0).is_empty());
        assert!(h.actions(1).is_empty());
    }

    #[test]
    fn test_ready_during_async_joins_async() {
        let mut h = Harness::new(&[1_000, 2_000]);
        h.ready(0);
        h.coordinator.enter_async_mode();
        assert_eq!(h.state(0), PlayerState::Async);
        assert_eq!(h.state(1), PlayerState::Loading);

        h.ready(1);
        assert_eq!(h.state(1), PlayerState::Async);
    }

    #[test]
    fn test_user_pause_pauses_everyone_else() {
        let mut h = Harness::new(&[1_000, 1_000, 1_000]);
        for slot in 0..3 {
            h.ready(slot);
        }
        h.coordinator.seek_all(5_000, Outcome::Playing, None);
        h.echo(0);
        h.echo(1);
        assert_eq!(h.state(2), PlayerState::SeekingPlay);
        h.drain();

        h.coordinator.dispatch(SlotId(0), WidgetEvent::Pause);
        assert_eq!(h.state(0), PlayerState::Paused);
        assert_eq!(h.state(1), PlayerState::Paused);
        assert_eq!(h.state(2), PlayerState::SeekingPause);
        assert!(h.actions(0).is_empty());
        assert_eq!(h.actions(1), vec![WidgetAction::Pause]);
        assert_eq!(h.actions(2), vec![WidgetAction::Pause]);
    }

    #[test]
    fn test_user_play_starts_everyone_from_its_position() {
        let mut h = Harness::new(&[1_000, 2_000]);
        h.ready(0);
        h.ready(1);
        h.echo(0);
        h.echo(1);
        assert_eq!(h.state(0), PlayerState::Paused);
        h.drain();

        h.coordinator.dispatch(SlotId(0), WidgetEvent::Play);
        assert_eq!(h.state(0), PlayerState::Playing);
        assert_eq!(h.state(1), PlayerState::SeekingPlay);
        assert_eq!(h.coordinator.barrier().pending_initiator(), Some(SlotId(0)));
        assert!(h.actions(0).is_empty());
    }

    #[test]
    fn test_play_mid_seek_reuses_barrier_target() {
        let mut h = Harness::new(&[1_000, 2_000]);
        h.ready(0);
        h.ready(1);
        assert_eq!(h.state(0), PlayerState::SeekingPause);

        h.coordinator.dispatch(SlotId(0), WidgetEvent::Play);
        assert_eq!(h.coordinator.barrier().pending_target(), Some(2_000));
        assert_eq!(h.state(0), PlayerState::SeekingPlay);
        assert_eq!(h.state(1), PlayerState::SeekingPlay);
    }

    #[test]
    fn test_async_round_trip_keeps_effective_starts() {
        let mut h = Harness::new(&[1_000, 5_000]);
        h.ready(0);
        h.ready(1);
        h.coordinator.seek_all(10_000, Outcome::Paused, None);
        h.echo(0);
        h.echo(1);
        let before: Vec<_> = h.coordinator.players().map(Player::effective_start).collect();

        h.coordinator.handle_intent(Intent::ToggleAsync);
        assert!(h.coordinator.in_async_mode());
        for p in h.coordinator.players() {
            assert_eq!(p.current_logical_timestamp(), Tuning::default().async_align);
        }
        // The widgets confirm the pause we sent
        h.coordinator.dispatch(SlotId(0), WidgetEvent::Pause);
        h.coordinator.dispatch(SlotId(1), WidgetEvent::Pause);

        h.coordinator.handle_intent(Intent::ToggleAsync);
        assert!(!h.coordinator.in_async_mode());
        let after: Vec<_> = h.coordinator.players().map(Player::effective_start).collect();
        assert_eq!(before, after);
        assert_eq!(h.coordinator.barrier().pending_target(), Some(10_000));
        assert_eq!(h.state(0), PlayerState::SeekingPlay);
    }

    #[test]
    fn test_async_alignment_is_rebased_to_latest() {
        let mut h = Harness::new(&[1_000, 5_000]);
        h.ready(0);
        h.ready(1);
        h.echo(0);
        h.echo(1);
        h.coordinator.enter_async_mode();

        // User lines player1 up 3s later into its video
        h.coordinator
            .handle_report(SlotId(1), WidgetReport::Seek { position: 3.0 }, Instant::now());
        h.coordinator.commit_async_mode();

        let offsets: Vec<_> = h.coordinator.players().map(Player::offset).collect();
        assert_eq!(offsets.iter().max(), Some(&0));
        assert_eq!(offsets, vec![0, -3_000]);
    }

    #[test]
    fn test_tick_promotes_before_start_player() {
        let mut h = Harness::new(&[1_000, 5_000]);
        h.ready(0);
        h.ready(1);
        h.coordinator.seek_all(2_000, Outcome::Playing, None);
        h.echo(0);
        h.echo(1);
        assert_eq!(h.state(0), PlayerState::Playing);
        assert_eq!(h.state(1), PlayerState::BeforeStart);
        h.drain();

        h.coordinator.tick(Instant::now());
        assert_eq!(h.state(1), PlayerState::BeforeStart);

        // Twitch reports the playhead reaching 4.5s into player0
        h.coordinator
            .handle_report(SlotId(0), WidgetReport::Time { position: 4.5 }, Instant::now());
        h.coordinator.tick(Instant::now());
        assert_eq!(h.state(1), PlayerState::Playing);
        assert_eq!(h.actions(1), vec![WidgetAction::Play]);
    }

    #[test]
    fn test_nudge_uses_pending_target() {
        let mut h = Harness::new(&[1_000, 2_000]);
        h.ready(0);
        h.ready(1);
        h.coordinator.seek_all(60_000, Outcome::Paused, None);
        h.coordinator.handle_intent(Intent::NudgeForward);
        assert_eq!(h.coordinator.barrier().pending_target(), Some(70_000));
        h.coordinator.handle_intent(Intent::NudgeBack);
        h.coordinator.handle_intent(Intent::NudgeBack);
        assert_eq!(h.coordinator.barrier().pending_target(), Some(50_000));
    }

    #[test]
    fn test_toggle_play_goes_through_the_widget() {
        let mut h = Harness::new(&[1_000, 2_000]);
        h.ready(0);
        h.ready(1);
        h.echo(0);
        h.echo(1);
        h.drain();

        h.coordinator.handle_intent(Intent::TogglePlay);
        assert_eq!(h.actions(0), vec![WidgetAction::Play]);
        assert!(h.actions(1).is_empty());
        assert_eq!(h.state(0), PlayerState::Paused);
    }

    #[test]
    fn test_detach_releases_barrier() {
        let mut h = Harness::new(&[1_000, 2_000]);
        h.ready(0);
        h.ready(1);
        h.echo(0);
        assert!(h.coordinator.barrier().pending_target().is_some());

        h.coordinator.detach(SlotId(1));
        assert_eq!(h.coordinator.barrier().pending_target(), None);
        assert_eq!(h.coordinator.len(), 1);
    }

    #[test]
    fn test_snapshot_reports_bounds_and_playhead() {
        let mut h = Harness::new(&[1_000, 5_000]);
        h.ready(0);
        h.ready(1);
        let snapshot = h.coordinator.snapshot();
        assert_eq!(snapshot.players.len(), 2);
        assert_eq!(snapshot.timeline, Some(Timeline { start: 1_000, end: END }));
        assert_eq!(snapshot.playhead, Some(5_000));
        assert!(!snapshot.async_mode);

        h.echo(0);
        h.echo(1);
        assert_eq!(h.coordinator.snapshot().playhead, Some(5_000));
    }

    #[test]
    fn test_average_of_timestamps() {
        assert_eq!(average(vec![1, 2, 6].into_iter()), Some(3));
        assert_eq!(average(std::iter::empty()), None);
    }
}
