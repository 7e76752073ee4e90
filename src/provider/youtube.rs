//! YouTube Data API client

use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::debug;

use super::{check_status, ProviderError, VideoDetails};
use crate::time::{parse_rfc3339, Millis, MILLIS_PER_SECOND};
use crate::widget::WidgetSource;

const VIDEOS_URL: &str = "https://youtube.googleapis.com/youtube/v3/videos";

// ISO 8601 durations, up to days
static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:([0-9]+)D)?(?:T(?:([0-9]+)H)?(?:([0-9]+)M)?(?:([0-9]+)S)?)?$")
        .expect("youtube duration pattern is valid")
});

/// Parse a `contentDetails.duration` value into milliseconds
pub fn parse_youtube_duration(text: &str) -> Option<Millis> {
    let m = DURATION.captures(text)?;
    let part = |i: usize| -> Option<Millis> {
        match m.get(i) {
            Some(g) => g.as_str().parse().ok(),
            None => Some(0),
        }
    };
    let seconds = part(1)? * 86_400 + part(2)? * 3_600 + part(3)? * 60 + part(4)?;
    Some(seconds * MILLIS_PER_SECOND)
}

#[derive(Debug, Deserialize)]
struct VideoList {
    #[serde(default)]
    items: Vec<Video>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Video {
    id: String,
    snippet: Snippet,
    content_details: ContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    channel_title: String,
    #[serde(default)]
    title: String,
    published_at: String,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: String,
}

impl TryFrom<Video> for VideoDetails {
    type Error = ProviderError;

    fn try_from(video: Video) -> Result<Self, Self::Error> {
        let duration = parse_youtube_duration(&video.content_details.duration)
            .ok_or_else(|| ProviderError::BadDuration(video.content_details.duration.clone()))?;
        let start = parse_rfc3339(&video.snippet.published_at)
            .ok_or_else(|| ProviderError::BadTimestamp(video.snippet.published_at.clone()))?;
        Ok(VideoDetails {
            id: video.id,
            source: WidgetSource::Youtube,
            streamer: video.snippet.channel_title,
            title: video.snippet.title,
            start,
            // Live streams report P0D until processed; the widget supplies the length later
            end: (duration > 0).then_some(start + duration),
        })
    }
}

fn parse_videos(list: VideoList) -> Result<Vec<VideoDetails>, ProviderError> {
    list.items.into_iter().map(VideoDetails::try_from).collect()
}

#[derive(Clone)]
pub(super) struct YoutubeClient {
    client: Client,
    api_key: Option<String>,
    token: Option<String>,
}

impl YoutubeClient {
    pub(super) fn new(client: Client, api_key: Option<String>, token: Option<String>) -> Self {
        Self {
            client,
            api_key,
            token,
        }
    }

    pub(super) async fn videos(&self, ids: &[String]) -> Result<Vec<VideoDetails>, ProviderError> {
        if self.api_key.is_none() && self.token.is_none() {
            return Err(ProviderError::MissingCredentials("youtube_api_key"));
        }

        let joined = ids.join(",");
        let mut request = self
            .client
            .get(VIDEOS_URL)
            .query(&[("part", "contentDetails,snippet"), ("id", joined.as_str())])
            .header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        debug!("GET {} id={}", VIDEOS_URL, joined);
        let list: VideoList = check_status(request.send().await?)?.json().await?;
        if list.items.is_empty() {
            return Err(ProviderError::NotFound(format!("youtube videos {}", ids.join(", "))));
        }
        parse_videos(list)
    }
}
