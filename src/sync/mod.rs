//! Synchronization engine - keeps every player on one shared timeline

mod coordinator;
mod engine;
mod event_log;
mod intent;
mod timeline;

pub use coordinator::{Coordinator, PlayerSnapshot, SeekBarrier, Snapshot};
pub use engine::{create_engine_channels, SyncEngine};
pub use event_log::{EventLog, EventRecord};
pub use intent::Intent;
pub use timeline::Timeline;

use crate::player::SlotId;
use crate::provider::VideoDetails;
use crate::time::Millis;
use crate::widget::{WidgetReport, WidgetSource};

/// Commands that can be sent to the sync engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Load whatever `input` refers to into `slot`
    Load {
        slot: SlotId,
        input: String,
        /// Restrict the input to one source
        source: Option<WidgetSource>,
        offset_ms: Millis,
    },
    /// Load the best recording of a Twitch channel into `slot`
    LoadChannel { slot: SlotId, channel: String },
    /// Load the entrants of a race into the free slots
    LoadRace { race: String },
    /// The user picked one of the offered channel recordings
    PickVideo { slot: SlotId, index: usize },
    /// Tear down a slot
    RemoveSlot(SlotId),
    /// Raw widget report from the host
    Widget { slot: SlotId, report: WidgetReport },
    /// Keyboard intent
    Intent(Intent),
    /// Write the event log to the log file
    DumpLog,
    /// Shutdown the engine
    Shutdown,
}

/// Status updates from the sync engine
#[derive(Debug, Clone)]
pub enum EngineStatus {
    /// Current state of all players and the timeline
    Snapshot(Snapshot),
    /// Loading into a slot failed
    SlotError { slot: SlotId, message: String },
    /// Progress text for a slot
    SlotMessage { slot: SlotId, message: String },
    /// A channel had no obvious recording; the user has to pick one
    VideoChoices { slot: SlotId, videos: Vec<VideoDetails> },
}
