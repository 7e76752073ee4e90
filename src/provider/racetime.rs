//! racetime.gg race lookup

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{check_status, ProviderError, RaceDetails};
use crate::time::parse_rfc3339;

const RACETIME_URL: &str = "https://racetime.gg";

#[derive(Debug, Deserialize)]
struct RaceData {
    started_at: Option<String>,
    #[serde(default)]
    entrants: Vec<Entrant>,
}

#[derive(Debug, Deserialize)]
struct Entrant {
    user: User,
}

#[derive(Debug, Deserialize)]
struct User {
    twitch_name: Option<String>,
}

fn parse_race(race_id: &str, data: RaceData) -> Result<RaceDetails, ProviderError> {
    let started_at = data
        .started_at
        .ok_or_else(|| ProviderError::NotFound(format!("start time of race {}", race_id)))?;
    let start = parse_rfc3339(&started_at).ok_or(ProviderError::BadTimestamp(started_at))?;
    Ok(RaceDetails {
        start,
        // Entrants without a linked Twitch account cannot contribute a recording
        channels: data
            .entrants
            .into_iter()
            .filter_map(|e| e.user.twitch_name)
            .collect(),
        url: format!("{}/{}", RACETIME_URL, race_id),
    })
}

#[derive(Clone)]
pub(super) struct RacetimeClient {
    client: Client,
}

impl RacetimeClient {
    pub(super) fn new(client: Client) -> Self {
        Self { client }
    }

    pub(super) async fn race(&self, race_id: &str) -> Result<RaceDetails, ProviderError> {
        let url = format!("{}/{}/data", RACETIME_URL, race_id);
        debug!("GET {}", url);
        let data: RaceData = check_status(self.client.get(&url).send().await?)?.json().await?;
        parse_race(race_id, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_race() {
        let data: RaceData = serde_json::from_value(json!({
            "name": "dk64r/wonderful-krossbones-7951",
            "started_at": "2024-03-01T18:00:00.000Z",
            "entrants": [
                {"user": {"name": "a", "twitch_name": "runner_a"}},
                {"user": {"name": "b", "twitch_name": null}},
                {"user": {"name": "c", "twitch_name": "runner_c"}}
            ]
        }))
        .unwrap();
        let race = parse_race("dk64r/wonderful-krossbones-7951", data).unwrap();
        assert_eq!(race.start, 1_709_316_000_000);
        assert_eq!(race.channels, vec!["runner_a", "runner_c"]);
        assert_eq!(race.url, "https://racetime.gg/dk64r/wonderful-krossbones-7951");
    }

    #[test]
    fn test_unstarted_race() {
        let data: RaceData = serde_json::from_value(json!({"started_at": null, "entrants": []})).unwrap();
        assert!(matches!(parse_race("x/y", data), Err(ProviderError::NotFound(_))));
    }
}
