//! Free-text video input recognition

use regex::Regex;
use std::sync::LazyLock;

use crate::widget::WidgetSource;

static RACETIME_RACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)(?:www\.)?racetime\.gg/([a-z0-9-]+/[a-z0-9-]+)(?:/[^?]*)?(?:\?.*)?$")
        .expect("racetime pattern is valid")
});

static TWITCH_VIDEO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://(?:www\.)?(?:m\.)?twitch\.tv/videos/)?([0-9]+)(?:\?.*)?$")
        .expect("twitch video pattern is valid")
});

static YOUTUBE_VIDEO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https://(?:www\.)?(?:m\.)?(?:youtube\.com/watch\?v=|youtu\.be/))?([0-9A-Za-z_-]{10}[048AEIMQUYcgkosw])(?:[?&].*)?$",
    )
    .expect("youtube video pattern is valid")
});

static TWITCH_CHANNEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://(?:www\.)?(?:m\.)?twitch\.tv/)?([a-zA-Z0-9]\w+)/?(?:\?.*)?$")
        .expect("twitch channel pattern is valid")
});

/// What a line of user input refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoInput {
    /// racetime.gg race, as `category/slug`
    Race(String),
    Video { source: WidgetSource, id: String },
    TwitchChannel(String),
}

/// Recognise a race URL, a video URL or id, or a channel.
///
/// Races take precedence, then all-digit Twitch video ids, then YouTube ids,
/// and anything else that looks like a login is a Twitch channel.
pub fn parse_input(text: &str) -> Option<VideoInput> {
    let text = text.trim();
    if let Some(race) = parse_race_id(text) {
        return Some(VideoInput::Race(race));
    }
    if let Some(m) = TWITCH_VIDEO.captures(text) {
        return Some(VideoInput::Video {
            source: WidgetSource::Twitch,
            id: m[1].to_string(),
        });
    }
    if let Some(m) = YOUTUBE_VIDEO.captures(text) {
        return Some(VideoInput::Video {
            source: WidgetSource::Youtube,
            id: m[1].to_string(),
        });
    }
    TWITCH_CHANNEL
        .captures(text)
        .map(|m| VideoInput::TwitchChannel(m[1].to_string()))
}

/// Race id from a racetime.gg URL
pub fn parse_race_id(text: &str) -> Option<String> {
    RACETIME_RACE
        .captures(text.trim())
        .map(|m| m[1].to_string())
}
