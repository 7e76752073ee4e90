//! Host bridge
//!
//! The host renders the actual video widgets and exchanges JSON lines with
//! the engine: host messages arrive on stdin, widget commands and engine
//! status go out on stdout.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::player::SlotId;
use crate::provider::VideoDetails;
use crate::sync::{EngineCommand, EngineStatus, Intent, Snapshot};
use crate::time::Millis;
use crate::widget::{HostCommand, WidgetReport, WidgetSource};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("malformed host message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown key {0:?}")]
    UnknownKey(String),
}

/// Key presses arrive either as an intent name or as a DOM key name
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum KeyInput {
    Intent(Intent),
    Key(String),
}

/// Message from the host
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
    Load {
        slot: SlotId,
        input: String,
        #[serde(default)]
        source: Option<WidgetSource>,
        #[serde(default)]
        offset_ms: Millis,
    },
    LoadChannel {
        slot: SlotId,
        channel: String,
    },
    LoadRace {
        race: String,
    },
    PickVideo {
        slot: SlotId,
        index: usize,
    },
    Remove {
        slot: SlotId,
    },
    Widget {
        slot: SlotId,
        report: WidgetReport,
    },
    Key {
        key: KeyInput,
    },
    DumpLog,
    Shutdown,
}

/// Parse one inbound line into an engine command
pub fn parse_line(line: &str) -> Result<EngineCommand, BridgeError> {
    let message: HostMessage = serde_json::from_str(line)?;
    Ok(match message {
        HostMessage::Load {
            slot,
            input,
            source,
            offset_ms,
        } => EngineCommand::Load {
            slot,
            input,
            source,
            offset_ms,
        },
        HostMessage::LoadChannel { slot, channel } => EngineCommand::LoadChannel { slot, channel },
        HostMessage::LoadRace { race } => EngineCommand::LoadRace { race },
        HostMessage::PickVideo { slot, index } => EngineCommand::PickVideo { slot, index },
        HostMessage::Remove { slot } => EngineCommand::RemoveSlot(slot),
        HostMessage::Widget { slot, report } => EngineCommand::Widget { slot, report },
        HostMessage::Key { key } => {
            let intent = match key {
                KeyInput::Intent(intent) => intent,
                KeyInput::Key(key) => Intent::from_key(&key).ok_or(BridgeError::UnknownKey(key))?,
            };
            EngineCommand::Intent(intent)
        }
        HostMessage::DumpLog => EngineCommand::DumpLog,
        HostMessage::Shutdown => EngineCommand::Shutdown,
    })
}

/// Message to the host
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum OutboundMessage<'a> {
    Command(&'a HostCommand),
    Snapshot(&'a Snapshot),
    SlotError { slot: SlotId, message: &'a str },
    SlotMessage { slot: SlotId, message: &'a str },
    VideoChoices { slot: SlotId, videos: &'a [VideoDetails] },
}

impl<'a> From<&'a EngineStatus> for OutboundMessage<'a> {
    fn from(status: &'a EngineStatus) -> Self {
        match status {
            EngineStatus::Snapshot(snapshot) => OutboundMessage::Snapshot(snapshot),
            EngineStatus::SlotError { slot, message } => OutboundMessage::SlotError { slot: *slot, message },
            EngineStatus::SlotMessage { slot, message } => OutboundMessage::SlotMessage { slot: *slot, message },
            EngineStatus::VideoChoices { slot, videos } => OutboundMessage::VideoChoices { slot: *slot, videos },
        }
    }
}

pub fn encode_command(command: &HostCommand) -> serde_json::Result<String> {
    serde_json::to_string(&OutboundMessage::Command(command))
}

pub fn encode_status(status: &EngineStatus) -> serde_json::Result<String> {
    serde_json::to_string(&OutboundMessage::from(status))
}

/// Read host messages from stdin until EOF, which shuts the engine down
pub fn spawn_stdin_reader(cmd_tx: mpsc::Sender<EngineCommand>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_line(&line) {
                        Ok(cmd) => {
                            if cmd_tx.send(cmd).await.is_err() {
                                debug!("Engine stopped, no longer reading host messages");
                                return;
                            }
                        }
                        Err(e) => warn!("Skipping host line: {} ({})", e, line),
                    }
                }
                Ok(None) => {
                    info!("Host closed stdin");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read from host: {}", e);
                    break;
                }
            }
        }
        let _ = cmd_tx.send(EngineCommand::Shutdown).await;
    })
}

/// Forward widget commands and engine status to stdout
pub fn spawn_stdout_writer(
    widget_rx: mpsc::UnboundedReceiver<HostCommand>,
    status_rx: broadcast::Receiver<EngineStatus>,
) -> JoinHandle<()> {
    tokio::spawn(write_outbound(tokio::io::stdout(), widget_rx, status_rx))
}

async fn write_outbound<W: AsyncWrite + Unpin>(
    mut out: W,
    mut widget_rx: mpsc::UnboundedReceiver<HostCommand>,
    mut status_rx: broadcast::Receiver<EngineStatus>,
) {
    loop {
        let line = tokio::select! {
            // Widget commands first, so a destroy is never overtaken by later status
            biased;

            command = widget_rx.recv() => match command {
                Some(command) => encode_command(&command),
                None => break,
            },
            status = status_rx.recv() => match status {
                Ok(status) => encode_status(&status),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Host writer lagged, {} status updates dropped", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode host message: {}", e);
                continue;
            }
        };
        if let Err(e) = write_line(&mut out, &line).await {
            warn!("Failed to write to host: {}", e);
            break;
        }
    }

    // Flush any remaining widget commands, e.g. destroys sent during shutdown
    while let Ok(command) = widget_rx.try_recv() {
        if let Ok(line) = encode_command(&command) {
            if write_line(&mut out, &line).await.is_err() {
                break;
            }
        }
    }
    debug!("Host writer stopped");
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, line: &str) -> std::io::Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}
