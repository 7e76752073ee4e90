//! Player lifecycle states

use serde::Serialize;
use std::fmt;

/// Lifecycle state of one player slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerState {
    /// Widget constructed but not ready yet
    Loading,
    /// Loaded, waiting for the others to finish loading
    Ready,
    SeekingPlay,
    Playing,
    SeekingPause,
    Paused,
    /// Parking at the first frame because the target precedes the recording
    SeekingStart,
    /// Conceptually before the recording; promoted once the shared clock catches up
    BeforeStart,
    /// Parking near the end because the target is past the end guard
    SeekingEnd,
    AfterEnd,
    /// Widget ended and was told to play again so it stays responsive
    Restarting,
    /// Decoupled from the timeline for manual alignment
    Async,
}

impl PlayerState {
    /// States that wait for a seek echo from the widget
    pub fn is_seeking(self) -> bool {
        matches!(
            self,
            PlayerState::SeekingPlay
                | PlayerState::SeekingPause
                | PlayerState::SeekingStart
                | PlayerState::SeekingEnd
        )
    }

    /// Playing, or about to be
    pub fn is_running(self) -> bool {
        matches!(self, PlayerState::Playing | PlayerState::SeekingPlay)
    }

    /// Paused, or about to be
    pub fn is_halted(self) -> bool {
        matches!(self, PlayerState::Paused | PlayerState::SeekingPause)
    }

    /// Whether the player's position is part of the shared playhead
    pub fn is_synced(self) -> bool {
        matches!(self, PlayerState::Playing | PlayerState::Paused)
    }

    pub fn name(self) -> &'static str {
        match self {
            PlayerState::Loading => "LOADING",
            PlayerState::Ready => "READY",
            PlayerState::SeekingPlay => "SEEKING_PLAY",
            PlayerState::Playing => "PLAYING",
            PlayerState::SeekingPause => "SEEKING_PAUSE",
            PlayerState::Paused => "PAUSED",
            PlayerState::SeekingStart => "SEEKING_START",
            PlayerState::BeforeStart => "BEFORE_START",
            PlayerState::SeekingEnd => "SEEKING_END",
            PlayerState::AfterEnd => "AFTER_END",
            PlayerState::Restarting => "RESTARTING",
            PlayerState::Async => "ASYNC",
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a coordinated seek should leave the players
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Playing,
    Paused,
}

impl Outcome {
    /// The settled state a player lands in once it reached the target
    pub fn settled_state(self) -> PlayerState {
        match self {
            Outcome::Playing => PlayerState::Playing,
            Outcome::Paused => PlayerState::Paused,
        }
    }
}
