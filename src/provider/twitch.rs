//! Twitch Helix client

use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::debug;

use super::{check_status, ProviderError, VideoDetails};
use crate::time::{parse_rfc3339, Millis, MILLIS_PER_SECOND};
use crate::widget::WidgetSource;

const HELIX_URL: &str = "https://api.twitch.tv/helix";

// 1h2m3s, 4m5s or 6s
static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([0-9]+)h)?(?:([0-9]+)m)?([0-9]+)s$").expect("twitch duration pattern is valid")
});

/// Parse a Helix duration into milliseconds
pub fn parse_twitch_duration(text: &str) -> Option<Millis> {
    let m = DURATION.captures(text)?;
    let part = |i: usize| -> Option<Millis> {
        match m.get(i) {
            Some(g) => g.as_str().parse().ok(),
            None => Some(0),
        }
    };
    let seconds = part(1)? * 3600 + part(2)? * 60 + part(3)?;
    Some(seconds * MILLIS_PER_SECOND)
}

#[derive(Debug, Deserialize)]
struct HelixPage<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct HelixVideo {
    id: String,
    user_name: String,
    #[serde(default)]
    title: String,
    created_at: String,
    duration: String,
}

impl TryFrom<HelixVideo> for VideoDetails {
    type Error = ProviderError;

    fn try_from(video: HelixVideo) -> Result<Self, Self::Error> {
        let duration =
            parse_twitch_duration(&video.duration).ok_or_else(|| ProviderError::BadDuration(video.duration.clone()))?;
        let start =
            parse_rfc3339(&video.created_at).ok_or_else(|| ProviderError::BadTimestamp(video.created_at.clone()))?;
        Ok(VideoDetails {
            id: video.id,
            source: WidgetSource::Twitch,
            streamer: video.user_name,
            title: video.title,
            start,
            end: Some(start + duration),
        })
    }
}

fn parse_videos(page: HelixPage<HelixVideo>) -> Result<Vec<VideoDetails>, ProviderError> {
    page.data.into_iter().map(VideoDetails::try_from).collect()
}

#[derive(Clone)]
pub(super) struct TwitchClient {
    client: Client,
    client_id: Option<String>,
    token: Option<String>,
}

impl TwitchClient {
    pub(super) fn new(client: Client, client_id: Option<String>, token: Option<String>) -> Self {
        Self {
            client,
            client_id,
            token,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, ProviderError> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or(ProviderError::MissingCredentials("twitch_client_id"))?;
        let token = self
            .token
            .as_deref()
            .ok_or(ProviderError::MissingCredentials("twitch_token"))?;

        debug!("GET {}{} {:?}", HELIX_URL, path, query);
        let response = self
            .client
            .get(format!("{}{}", HELIX_URL, path))
            .query(query)
            .header("Client-ID", client_id)
            .bearer_auth(token)
            .send()
            .await?;
        Ok(check_status(response)?.json().await?)
    }

    pub(super) async fn videos(&self, ids: &[String]) -> Result<Vec<VideoDetails>, ProviderError> {
        let query: Vec<(&str, &str)> = ids.iter().map(|id| ("id", id.as_str())).collect();
        let page: HelixPage<HelixVideo> = self.get("/videos", &query).await?;
        if page.data.is_empty() {
            return Err(ProviderError::NotFound(format!("twitch videos {}", ids.join(", "))));
        }
        parse_videos(page)
    }

    pub(super) async fn channel_videos(&self, channel: &str) -> Result<Vec<VideoDetails>, ProviderError> {
        let users: HelixPage<HelixUser> = self.get("/users", &[("login", channel)]).await?;
        let user = users
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(format!("twitch channel {}", channel)))?;

        let page: HelixPage<HelixVideo> = self
            .get(
                "/videos",
                &[("type", "archive"), ("sort", "time"), ("user_id", user.id.as_str())],
            )
            .await?;
        if page.data.is_empty() {
            return Err(ProviderError::NotFound(format!("videos for twitch channel {}", channel)));
        }
        parse_videos(page)
    }
}
