//! Synchronization engine
//!
//! Single-task event loop around the [`Coordinator`]. Commands from the host
//! bridge, metadata lookups finishing in the background and the periodic tick
//! are all handled one at a time, so coordinator state is never shared.

use anyhow::Result;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::player::{Player, SlotId};
use crate::provider::{
    parse_input, parse_race_id, pick_channel_video, ProviderError, Providers, RaceDetails, VideoDetails,
    VideoInput,
};
use crate::time::Millis;
use crate::widget::{create_widget, HostCommand, WidgetSource};

use super::{Coordinator, EngineCommand, EngineStatus, Snapshot};

/// Channel recordings offered to the user when none could be picked automatically
const MAX_VIDEO_CHOICES: usize = 9;

/// Result of a metadata lookup running off the engine task
#[derive(Debug)]
enum Lookup {
    Videos {
        slot: SlotId,
        offset_ms: Millis,
        result: Result<Vec<VideoDetails>, ProviderError>,
    },
    Channel {
        slot: SlotId,
        channel: String,
        result: Result<Vec<VideoDetails>, ProviderError>,
    },
    Race {
        slot: SlotId,
        race_id: String,
        result: Result<(RaceDetails, Vec<VideoDetails>), ProviderError>,
    },
}

/// The synchronization engine drives the coordinator from host input
pub struct SyncEngine {
    /// Configuration
    config: Config,
    /// Player set, barrier and async mode
    coordinator: Coordinator,
    /// Metadata backends
    providers: Providers,
    /// Command receiver
    cmd_rx: mpsc::Receiver<EngineCommand>,
    /// Status broadcaster
    status_tx: broadcast::Sender<EngineStatus>,
    /// Widget commands for the host
    widget_tx: mpsc::UnboundedSender<HostCommand>,
    /// Finished lookups are sent here by their tasks
    lookup_tx: mpsc::UnboundedSender<Lookup>,
    /// Lookup receiver (taken once when run() starts)
    lookup_rx: Option<mpsc::UnboundedReceiver<Lookup>>,
    /// Channel recordings waiting for the user to pick one, per slot
    pending_choices: HashMap<SlotId, Vec<VideoDetails>>,
    /// Last snapshot sent, to skip identical ones
    last_snapshot: Option<Snapshot>,
}

impl SyncEngine {
    /// Create a new sync engine
    pub fn new(
        config: Config,
        providers: Providers,
        cmd_rx: mpsc::Receiver<EngineCommand>,
        status_tx: broadcast::Sender<EngineStatus>,
        widget_tx: mpsc::UnboundedSender<HostCommand>,
    ) -> Self {
        let (lookup_tx, lookup_rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(config.engine.nudge_ms);

        Self {
            config,
            coordinator,
            providers,
            cmd_rx,
            status_tx,
            widget_tx,
            lookup_tx,
            lookup_rx: Some(lookup_rx),
            pending_choices: HashMap::new(),
            last_snapshot: None,
        }
    }

    /// Run the engine until shutdown
    pub async fn run(&mut self) -> Result<()> {
        info!("Sync engine starting ({} slots)", self.config.engine.max_players);

        let mut lookup_rx = self.lookup_rx.take();

        // Restore the configured session
        for slot in self.config.slots.clone() {
            self.load(SlotId(slot.slot), &slot.video, Some(slot.source), slot.offset_ms);
        }

        let mut tick_timer = tokio::time::interval(Duration::from_millis(self.config.engine.tick_interval_ms));
        tick_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // Handle commands
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(EngineCommand::Shutdown) => {
                            info!("Shutdown command received");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            info!("Command channel closed");
                            break;
                        }
                    }
                }

                // Handle finished metadata lookups
                Some(lookup) = async {
                    match lookup_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.handle_lookup(lookup);
                }

                // Adapter polling and waiting-player promotion
                _ = tick_timer.tick() => {
                    self.coordinator.tick(Instant::now());
                }
            }

            self.publish_snapshot();
        }

        // Dropping the players destroys their widgets
        let slots: Vec<SlotId> = self.coordinator.players().map(Player::slot).collect();
        for slot in slots {
            self.coordinator.detach(slot);
        }

        info!("Sync engine stopped");
        Ok(())
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Load {
                slot,
                input,
                source,
                offset_ms,
            } => self.load(slot, &input, source, offset_ms),
            EngineCommand::LoadChannel { slot, channel } => {
                if self.check_slot(slot) {
                    self.spawn_channel_lookup(slot, channel);
                }
            }
            EngineCommand::LoadRace { race } => match self.first_free_slot() {
                Some(slot) => {
                    let race_id = parse_race_id(&race).unwrap_or(race);
                    self.spawn_race_lookup(slot, race_id);
                }
                None => warn!("Ignoring race {}: no free slot", race),
            },
            EngineCommand::PickVideo { slot, index } => self.pick_video(slot, index),
            EngineCommand::RemoveSlot(slot) => {
                self.pending_choices.remove(&slot);
                self.coordinator.detach(slot);
            }
            EngineCommand::Widget { slot, report } => {
                self.coordinator.handle_report(slot, report, Instant::now());
            }
            EngineCommand::Intent(intent) => {
                debug!("Intent {:?}", intent);
                self.coordinator.handle_intent(intent);
            }
            EngineCommand::DumpLog => {
                let barrier = self.coordinator.barrier();
                info!(
                    "Seek barrier: target {:?}, initiator {:?}",
                    barrier.pending_target(),
                    barrier.pending_initiator()
                );
                self.coordinator.event_log().dump();
            }
            EngineCommand::Shutdown => {}
        }
    }

    /// Reject slots the host cannot display
    fn check_slot(&self, slot: SlotId) -> bool {
        if slot.0 < self.config.engine.max_players {
            return true;
        }
        self.send_status(EngineStatus::SlotError {
            slot,
            message: format!(
                "Slot {} is out of range, at most {} players are supported",
                slot, self.config.engine.max_players
            ),
        });
        false
    }

    fn first_free_slot(&self) -> Option<SlotId> {
        (0..self.config.engine.max_players)
            .map(SlotId)
            .find(|slot| self.coordinator.player(*slot).is_none())
    }

    fn load(&mut self, slot: SlotId, input: &str, source: Option<WidgetSource>, offset_ms: Millis) {
        if !self.check_slot(slot) {
            return;
        }
        let parsed = parse_input(input).filter(|parsed| match (source, parsed) {
            (None, _) => true,
            (Some(wanted), VideoInput::Video { source, .. }) => wanted == *source,
            (Some(_), _) => false,
        });

        match parsed {
            Some(VideoInput::Race(race_id)) => self.spawn_race_lookup(slot, race_id),
            Some(VideoInput::Video { source, id }) => self.spawn_video_lookup(slot, source, id, offset_ms),
            Some(VideoInput::TwitchChannel(channel)) => self.spawn_channel_lookup(slot, channel),
            None => self.send_status(EngineStatus::SlotError {
                slot,
                message: format!("Could not parse input \"{}\"", input),
            }),
        }
    }

    fn spawn_video_lookup(&self, slot: SlotId, source: WidgetSource, id: String, offset_ms: Millis) {
        self.send_message(slot, "Loading video...");
        let providers = self.providers.clone();
        let tx = self.lookup_tx.clone();
        tokio::spawn(async move {
            let result = providers.videos(source, &[id]).await;
            if let Err(e) = tx.send(Lookup::Videos {
                slot,
                offset_ms,
                result,
            }) {
                debug!("Engine gone before video lookup finished: {}", e);
            }
        });
    }

    fn spawn_channel_lookup(&self, slot: SlotId, channel: String) {
        self.send_message(slot, "Loading channel videos...");
        let providers = self.providers.clone();
        let tx = self.lookup_tx.clone();
        tokio::spawn(async move {
            let result = providers.channel_videos(&channel).await;
            if let Err(e) = tx.send(Lookup::Channel { slot, channel, result }) {
                debug!("Engine gone before channel lookup finished: {}", e);
            }
        });
    }

    fn spawn_race_lookup(&self, slot: SlotId, race_id: String) {
        self.send_message(slot, "Loading race...");
        let providers = self.providers.clone();
        let tx = self.lookup_tx.clone();
        // Keep whatever is already loaded
        let count = self
            .config
            .engine
            .max_players
            .saturating_sub(self.coordinator.len());
        tokio::spawn(async move {
            let result = match providers.race(&race_id).await {
                Ok(race) => {
                    let videos = providers.race_videos(&race, count).await;
                    Ok((race, videos))
                }
                Err(e) => Err(e),
            };
            if let Err(e) = tx.send(Lookup::Race { slot, race_id, result }) {
                debug!("Engine gone before race lookup finished: {}", e);
            }
        });
    }

    fn handle_lookup(&mut self, lookup: Lookup) {
        match lookup {
            Lookup::Videos {
                slot,
                offset_ms,
                result,
            } => match result {
                Ok(videos) => match videos.into_iter().next() {
                    Some(video) => self.attach(slot, video, offset_ms),
                    None => self.send_status(EngineStatus::SlotError {
                        slot,
                        message: "Could not load video".to_string(),
                    }),
                },
                Err(e) => self.send_status(EngineStatus::SlotError {
                    slot,
                    message: format!("Could not process video:\n{}", e),
                }),
            },
            Lookup::Channel {
                slot,
                channel,
                result,
            } => match result {
                Ok(videos) => self.offer_channel_videos(slot, videos),
                Err(e) => self.send_status(EngineStatus::SlotError {
                    slot,
                    message: format!("Could not process channel \"{}\":\n{}", channel, e),
                }),
            },
            Lookup::Race {
                slot,
                race_id,
                result,
            } => match result {
                Ok((race, videos)) => self.load_race(race, videos),
                Err(e) => self.send_status(EngineStatus::SlotError {
                    slot,
                    message: format!("Could not load racetime.gg race \"{}\":\n{}", race_id, e),
                }),
            },
        }
    }

    /// Load the channel recording matching the session, or let the user choose
    fn offer_channel_videos(&mut self, slot: SlotId, videos: Vec<VideoDetails>) {
        let timeline = self.coordinator.timeline();
        let playhead = self.coordinator.average_timestamp();
        if let Some(video) = pick_channel_video(&videos, timeline, playhead) {
            let video = video.clone();
            self.attach(slot, video, 0);
            return;
        }

        info!("{}: no recording overlaps the session, offering {} choices", slot, videos.len());
        let choices: Vec<VideoDetails> = videos.into_iter().take(MAX_VIDEO_CHOICES).collect();
        self.pending_choices.insert(slot, choices.clone());
        self.send_status(EngineStatus::VideoChoices { slot, videos: choices });
    }

    fn pick_video(&mut self, slot: SlotId, index: usize) {
        let picked = self
            .pending_choices
            .remove(&slot)
            .and_then(|choices| choices.into_iter().nth(index));
        match picked {
            Some(video) => self.attach(slot, video, 0),
            None => self.send_status(EngineStatus::SlotError {
                slot,
                message: format!("No video choice {} for {}", index, slot),
            }),
        }
    }

    fn load_race(&mut self, race: RaceDetails, videos: Vec<VideoDetails>) {
        info!("Loaded {} videos for race {}", videos.len(), race.url);
        self.coordinator.set_race_start(Some(race.start));
        let mut videos = videos.into_iter();
        for slot in (0..self.config.engine.max_players).map(SlotId) {
            if self.coordinator.player(slot).is_some() {
                continue;
            }
            let Some(video) = videos.next() else {
                break;
            };
            self.attach(slot, video, 0);
        }
    }

    /// Replace whatever occupies `slot` with a player for `video`
    fn attach(&mut self, slot: SlotId, video: VideoDetails, offset_ms: Millis) {
        // The old widget must be destroyed before the host creates the new one
        self.coordinator.detach(slot);
        self.pending_choices.remove(&slot);

        let widget = create_widget(
            video.source,
            slot,
            &video.id,
            self.widget_tx.clone(),
            self.config.widget_settings(),
        );
        let mut player = Player::new(slot, video, widget, self.config.tuning());
        player.set_offset(offset_ms);
        self.coordinator.attach(player);
    }

    fn send_message(&self, slot: SlotId, message: &str) {
        self.send_status(EngineStatus::SlotMessage {
            slot,
            message: message.to_string(),
        });
    }

    fn send_status(&self, status: EngineStatus) {
        if let EngineStatus::SlotError { slot, message } = &status {
            warn!("{}: {}", slot, message);
        }
        if let Err(e) = self.status_tx.send(status) {
            debug!("No status subscribers: {}", e);
        }
    }

    fn publish_snapshot(&mut self) {
        let snapshot = self.coordinator.snapshot();
        if self.last_snapshot.as_ref() == Some(&snapshot) {
            return;
        }
        self.last_snapshot = Some(snapshot.clone());
        self.send_status(EngineStatus::Snapshot(snapshot));
    }
}

/// Create channels for engine communication
pub fn create_engine_channels() -> (
    mpsc::Sender<EngineCommand>,
    mpsc::Receiver<EngineCommand>,
    broadcast::Sender<EngineStatus>,
    broadcast::Receiver<EngineStatus>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (status_tx, status_rx) = broadcast::channel(256);
    (cmd_tx, cmd_rx, status_tx, status_rx)
}
