use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::version;
use crate::config::ReleaseConfig;
use crate::error::UpdateError;

const USER_AGENT: &str = concat!("bundle-updater/", env!("CARGO_PKG_VERSION"));
const TIMEOUT: Duration = Duration::from_secs(30);

const LATEST_RELEASE_QUERY: &str = r#"
query ($channels: [String!]!) {
  dolphinVersions(order_by: {releasedAt: desc}, limit: 5, where: {type: {_in: $channels}}) {
    url
    version
    releasedAt
    type
  }
}
"#;

/// One published build of the application bundle
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseDescriptor {
    #[serde(rename = "url")]
    pub download_url: String,
    pub version: String,
    #[serde(rename = "releasedAt")]
    pub released_at: String,
    #[serde(rename = "type")]
    pub channel: String,
}

impl ReleaseDescriptor {
    fn released_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.released_at).ok()
    }
}

#[derive(Debug, Deserialize)]
struct GqlEnvelope {
    data: Option<GqlData>,
    #[serde(default)]
    errors: Vec<GqlError>,
}

#[derive(Debug, Deserialize)]
struct GqlData {
    #[serde(rename = "dolphinVersions")]
    releases: Vec<ReleaseDescriptor>,
}

#[derive(Debug, Deserialize)]
struct GqlError {
    message: String,
}

/// Channels a run may pick from: stable always, beta too when upgrading a beta install
pub fn candidate_channels(previous_version: &str, config: &ReleaseConfig) -> Vec<String> {
    let mut channels = vec![config.stable_channel.clone()];
    if version::is_beta(previous_version, &config.beta_marker) {
        channels.push(config.beta_channel.clone());
    }
    channels
}

/// Most recently released candidate.
///
/// Rows with an unreadable timestamp lose to any dated row; among equals the
/// earliest row wins, so the service's own ordering breaks ties.
pub fn select_latest(releases: Vec<ReleaseDescriptor>) -> Option<ReleaseDescriptor> {
    let mut best: Option<(Option<DateTime<FixedOffset>>, ReleaseDescriptor)> = None;
    for release in releases {
        let at = release.released_at();
        let replace = match &best {
            None => true,
            Some((best_at, _)) => at > *best_at,
        };
        if replace {
            best = Some((at, release));
        }
    }
    best.map(|(_, release)| release)
}

/// Query the metadata service for the latest release among `channels`
pub fn fetch_latest_release(endpoint: &str, channels: &[String]) -> Result<ReleaseDescriptor> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(TIMEOUT)
        .build()?;

    let body = json!({
        "query": LATEST_RELEASE_QUERY,
        "variables": { "channels": channels },
    });

    let response = client
        .post(endpoint)
        .json(&body)
        .send()
        .context("Failed to fetch release info from metadata service")?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Metadata service error: {} {}",
            response.status(),
            response.text().unwrap_or_default()
        ));
    }

    let envelope = response
        .json::<GqlEnvelope>()
        .context("Failed to parse release response")?;
    parse_envelope(envelope, channels)
}

fn parse_envelope(envelope: GqlEnvelope, channels: &[String]) -> Result<ReleaseDescriptor> {
    if !envelope.errors.is_empty() {
        let messages: Vec<_> = envelope.errors.into_iter().map(|e| e.message).collect();
        return Err(anyhow!("Metadata service returned errors: {}", messages.join("; ")));
    }

    let releases = envelope.data.map(|d| d.releases).unwrap_or_default();
    log::debug!("metadata service returned {} candidate(s)", releases.len());

    select_latest(releases).ok_or_else(|| {
        UpdateError::NoRelease {
            channels: channels.join(", "),
        }
        .into()
    })
}
