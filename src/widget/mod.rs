//! Video widget adapters
//!
//! A widget is the third-party playback component the host renders for one
//! slot. The engine never talks to it directly: commands go out as
//! [`HostCommand`]s and raw [`WidgetReport`]s come back, which each adapter
//! normalises into the uniform [`WidgetEvent`] set the player state machine
//! understands.

mod clock;
mod twitch;
mod youtube;

pub use clock::PlaybackClock;
pub use twitch::TwitchWidget;
pub use youtube::YoutubeWidget;

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

use crate::player::SlotId;

/// Which backend hosts a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetSource {
    Twitch,
    Youtube,
}

impl std::fmt::Display for WidgetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WidgetSource::Twitch => write!(f, "twitch"),
            WidgetSource::Youtube => write!(f, "youtube"),
        }
    }
}

/// Uniform playback notification delivered to a player
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetEvent {
    /// Initial load finished
    Ready { duration_secs: Option<f64> },
    /// The playhead jumped to `offset_secs`
    Seek { offset_secs: f64 },
    Play,
    Pause,
    Ended,
}

impl WidgetEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WidgetEvent::Ready { .. } => "ready",
            WidgetEvent::Seek { .. } => "seek",
            WidgetEvent::Play => "play",
            WidgetEvent::Pause => "pause",
            WidgetEvent::Ended => "ended",
        }
    }
}

/// Raw report from the host about one widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum WidgetReport {
    Ready {
        #[serde(default)]
        duration: Option<f64>,
    },
    /// Native seek notification (Twitch only)
    Seek { position: f64 },
    Play {
        #[serde(default)]
        position: Option<f64>,
    },
    Pause {
        #[serde(default)]
        position: Option<f64>,
    },
    Ended,
    /// Periodic playhead sample
    Time { position: f64 },
}

/// Command for the host to apply to a widget
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum WidgetAction {
    Create { source: WidgetSource, video: String },
    Play,
    Pause,
    Seek { position: f64 },
    Destroy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostCommand {
    pub slot: SlotId,
    #[serde(flatten)]
    pub action: WidgetAction,
}

/// Tunables shared by all adapters
#[derive(Debug, Clone, Copy)]
pub struct WidgetSettings {
    /// Divergence between expected and sampled position treated as a seek
    pub seek_detect_threshold_secs: f64,
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            seek_detect_threshold_secs: 1.0,
        }
    }
}

/// Capability set every backend adapter provides
pub trait VideoWidget: Send {
    fn source(&self) -> WidgetSource;

    fn play(&mut self);

    fn pause(&mut self);

    /// Move the playhead to `offset_secs` from the start of the recording
    fn seek(&mut self, offset_secs: f64);

    /// Best estimate of the playhead, in seconds from the start of the recording
    fn current_offset_secs(&self) -> f64;

    /// Whether the widget is (or has been told to be) paused
    fn is_paused(&self) -> bool;

    /// Translate a host report into uniform events
    fn ingest(&mut self, report: WidgetReport, now: Instant) -> Vec<WidgetEvent>;

    /// Periodic hook for adapters that have to synthesise events
    fn poll(&mut self, _now: Instant) -> Vec<WidgetEvent> {
        Vec::new()
    }
}

/// Outbound half shared by the adapters
#[derive(Debug)]
pub(crate) struct CommandSink {
    slot: SlotId,
    tx: mpsc::UnboundedSender<HostCommand>,
}

impl CommandSink {
    pub(crate) fn new(slot: SlotId, tx: mpsc::UnboundedSender<HostCommand>) -> Self {
        Self { slot, tx }
    }

    pub(crate) fn send(&self, action: WidgetAction) {
        if let Err(e) = self.tx.send(HostCommand {
            slot: self.slot,
            action,
        }) {
            debug!("Failed to send widget command for {}: {}", self.slot, e);
        }
    }
}

impl Drop for CommandSink {
    fn drop(&mut self) {
        self.send(WidgetAction::Destroy);
    }
}

/// Create the adapter for a recording and ask the host to build its widget
pub fn create_widget(
    source: WidgetSource,
    slot: SlotId,
    video: &str,
    tx: mpsc::UnboundedSender<HostCommand>,
    settings: WidgetSettings,
) -> Box<dyn VideoWidget> {
    let sink = CommandSink::new(slot, tx);
    sink.send(WidgetAction::Create {
        source,
        video: video.to_string(),
    });
    match source {
        WidgetSource::Twitch => Box::new(TwitchWidget::new(sink)),
        WidgetSource::Youtube => Box::new(YoutubeWidget::new(sink, settings)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_command_serialization() {
        let cmd = HostCommand {
            slot: SlotId(2),
            action: WidgetAction::Seek { position: 1.5 },
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["slot"], "player2");
        assert_eq!(json["action"], "seek");
        assert_eq!(json["position"], 1.5);
    }

    #[test]
    fn test_report_deserialization() {
        let report: WidgetReport =
            serde_json::from_str(r#"{"kind":"ready","duration":3600.0}"#).unwrap();
        assert_eq!(report, WidgetReport::Ready { duration: Some(3600.0) });

        let report: WidgetReport = serde_json::from_str(r#"{"kind":"play"}"#).unwrap();
        assert_eq!(report, WidgetReport::Play { position: None });
    }

    #[test]
    fn test_factory_creates_and_destroys() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let widget = create_widget(
            WidgetSource::Youtube,
            SlotId(0),
            "dQw4w9WgXcQ",
            tx,
            WidgetSettings::default(),
        );
        assert_eq!(widget.source(), WidgetSource::Youtube);
        assert_eq!(
            rx.try_recv().unwrap().action,
            WidgetAction::Create {
                source: WidgetSource::Youtube,
                video: "dQw4w9WgXcQ".to_string()
            }
        );

        drop(widget);
        assert_eq!(rx.try_recv().unwrap().action, WidgetAction::Destroy);
    }
}
