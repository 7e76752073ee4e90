//! Video metadata providers
//!
//! Resolves user input (URLs, ids, channel names, races) into
//! [`VideoDetails`] with absolute start and end times, which is all the
//! synchronization engine needs to place a recording on the shared timeline.

mod input;
mod racetime;
mod twitch;
mod youtube;

pub use input::{parse_input, parse_race_id, VideoInput};
pub use twitch::parse_twitch_duration;
pub use youtube::parse_youtube_duration;

use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ProviderConfig;
use crate::sync::Timeline;
use crate::time::Timestamp;
use crate::widget::WidgetSource;

use racetime::RacetimeClient;
use twitch::TwitchClient;
use youtube::YoutubeClient;

/// A recording resolved by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDetails {
    pub id: String,
    pub source: WidgetSource,
    pub streamer: String,
    pub title: String,
    /// Wall-clock instant the recording begins at
    pub start: Timestamp,
    /// Unknown for live or unprocessed recordings
    pub end: Option<Timestamp>,
}

impl VideoDetails {
    /// Whether the recording covers `ts`. An unknown end covers everything after the start.
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && self.end.map_or(true, |end| ts <= end)
    }
}

/// A race whose entrants' recordings should be loaded together
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaceDetails {
    pub start: Timestamp,
    /// Twitch channels of the entrants, in entrant order
    pub channels: Vec<String>,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP request failed: {0}")]
    Status(u16),
    #[error("not authorized, check the provider token")]
    Unauthorized,
    #[error("could not load {0}")]
    NotFound(String),
    #[error("unparseable duration: {0}")]
    BadDuration(String),
    #[error("unparseable timestamp: {0}")]
    BadTimestamp(String),
    #[error("missing credentials: set providers.{0} in the config")]
    MissingCredentials(&'static str),
}

/// Map a response status onto the provider error set
pub(crate) fn check_status(response: Response) -> Result<Response, ProviderError> {
    match response.status() {
        StatusCode::OK => Ok(response),
        StatusCode::UNAUTHORIZED => Err(ProviderError::Unauthorized),
        status => Err(ProviderError::Status(status.as_u16())),
    }
}

/// Facade over every metadata backend
#[derive(Clone)]
pub struct Providers {
    twitch: TwitchClient,
    youtube: YoutubeClient,
    racetime: RacetimeClient,
}

impl Providers {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("vod-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            twitch: TwitchClient::new(
                client.clone(),
                config.twitch_client_id.clone(),
                config.twitch_token.clone(),
            ),
            youtube: YoutubeClient::new(
                client.clone(),
                config.youtube_api_key.clone(),
                config.youtube_token.clone(),
            ),
            racetime: RacetimeClient::new(client),
        })
    }

    /// Details of specific recordings, all from the same source
    pub async fn videos(&self, source: WidgetSource, ids: &[String]) -> Result<Vec<VideoDetails>, ProviderError> {
        match source {
            WidgetSource::Twitch => self.twitch.videos(ids).await,
            WidgetSource::Youtube => self.youtube.videos(ids).await,
        }
    }

    /// Archived broadcasts of a Twitch channel, newest first
    pub async fn channel_videos(&self, channel: &str) -> Result<Vec<VideoDetails>, ProviderError> {
        self.twitch.channel_videos(channel).await
    }

    pub async fn race(&self, race_id: &str) -> Result<RaceDetails, ProviderError> {
        self.racetime.race(race_id).await
    }

    /// Up to `count` recordings of the race, one per entrant that has one covering the start
    pub async fn race_videos(&self, race: &RaceDetails, count: usize) -> Vec<VideoDetails> {
        let mut videos = Vec::new();
        for channel in &race.channels {
            if videos.len() >= count {
                break;
            }
            let channel_videos = match self.channel_videos(channel).await {
                Ok(v) => v,
                Err(e) => {
                    // Entrants without saved broadcasts are common
                    warn!("Skipping race entrant {}: {}", channel, e);
                    continue;
                }
            };
            info!("Loaded {} race videos for channel {}", channel_videos.len(), channel);
            if let Some(video) = pick_race_video(&channel_videos, race.start) {
                videos.push(video.clone());
            }
        }
        videos
    }
}

/// First recording that was live when the race started
pub fn pick_race_video(videos: &[VideoDetails], race_start: Timestamp) -> Option<&VideoDetails> {
    videos.iter().find(|v| v.contains(race_start))
}

/// Best recording of a channel for the current session.
///
/// A recording covering the playhead wins. Otherwise the earliest one that
/// overlaps the timeline. `None` when nothing overlaps, in which case the
/// user has to pick.
pub fn pick_channel_video<'a>(
    videos: &'a [VideoDetails],
    timeline: Option<Timeline>,
    playhead: Option<Timestamp>,
) -> Option<&'a VideoDetails> {
    let timeline = timeline?;
    let mut best: Option<&VideoDetails> = None;
    for video in videos {
        let end = video.end.unwrap_or(video.start);
        if !timeline.overlaps(video.start, end) {
            continue;
        }
        if playhead.is_some_and(|ts| video.start <= ts && ts <= end) {
            return Some(video);
        }
        if best.map_or(true, |b| video.start < b.start) {
            best = Some(video);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str, start: Timestamp, end: Timestamp) -> VideoDetails {
        VideoDetails {
            id: id.to_string(),
            source: WidgetSource::Twitch,
            streamer: "streamer".to_string(),
            title: String::new(),
            start,
            end: Some(end),
        }
    }

    #[test]
    fn test_channel_pick_prefers_playhead() {
        let videos = vec![video("early", 1_000, 3_000), video("now", 2_500, 9_000)];
        let timeline = Some(Timeline { start: 2_000, end: 8_000 });
        let pick = pick_channel_video(&videos, timeline, Some(5_000)).unwrap();
        assert_eq!(pick.id, "now");
    }

    #[test]
    fn test_channel_pick_falls_back_to_earliest_overlap() {
        let videos = vec![
            video("later", 6_000, 7_000),
            video("earlier", 1_000, 2_500),
            video("outside", 9_000, 9_500),
        ];
        let timeline = Some(Timeline { start: 2_000, end: 8_000 });
        let pick = pick_channel_video(&videos, timeline, Some(4_000)).unwrap();
        assert_eq!(pick.id, "earlier");
    }

    #[test]
    fn test_channel_pick_without_timeline_or_overlap() {
        let videos = vec![video("a", 1_000, 2_000)];
        assert!(pick_channel_video(&videos, None, None).is_none());
        let timeline = Some(Timeline { start: 5_000, end: 8_000 });
        assert!(pick_channel_video(&videos, timeline, None).is_none());
    }

    #[test]
    fn test_race_pick_covers_start() {
        let videos = vec![video("before", 0, 900), video("during", 950, 5_000)];
        assert_eq!(pick_race_video(&videos, 1_000).map(|v| v.id.as_str()), Some("during"));
        assert!(pick_race_video(&videos, 6_000).is_none());
    }

    #[test]
    fn test_open_ended_video_contains_later_instants() {
        let mut v = video("live", 1_000, 0);
        v.end = None;
        assert!(v.contains(1_000_000));
        assert!(!v.contains(999));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(ProviderError::Status(503).to_string(), "HTTP request failed: 503");
        assert_eq!(
            ProviderError::MissingCredentials("twitch_client_id").to_string(),
            "missing credentials: set providers.twitch_client_id in the config"
        );
    }
}
