//! Positions feed - pushes dwell sessions to the facility API
//!
//! `PUT {base_url}{path}` with a bearer token and body
//! `{"positions": [{from, to, time_spent, beacon, area, x, y}]}`.

use crate::domain::types::{AreaId, BeaconId, DwellSession};
use crate::infra::config::Config;
use crate::io::store::SessionSink;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Timestamp layout of `from` / `to` on the wire
const FEED_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One session as the positions API expects it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRecord {
    pub from: String,
    pub to: String,
    pub time_spent: f64,
    pub beacon: BeaconId,
    pub area: AreaId,
    pub x: f64,
    pub y: f64,
}

impl From<&DwellSession> for FeedRecord {
    fn from(session: &DwellSession) -> Self {
        Self {
            from: session.start_time.format(FEED_TIME_FORMAT).to_string(),
            to: session.end_time.format(FEED_TIME_FORMAT).to_string(),
            time_spent: session.duration_seconds,
            beacon: session.beacon_id.clone(),
            area: session.area_id.clone(),
            x: session.last_x,
            y: session.last_y,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedBody {
    pub positions: Vec<FeedRecord>,
}

impl FeedBody {
    pub fn from_sessions(sessions: &[DwellSession]) -> Self {
        Self { positions: sessions.iter().map(FeedRecord::from).collect() }
    }
}

/// HTTP client for the positions feed
pub struct PositionsFeed {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl PositionsFeed {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.directory_timeout_ms()))
            .build()
            .context("Failed to build positions feed HTTP client")?;

        let url = format!(
            "{}{}",
            config.directory_base_url().trim_end_matches('/'),
            config.feed_path()
        );
        info!(url = %url, "positions_feed_initialized");

        Ok(Self { client, url, token: config.directory_token().map(str::to_string) })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SessionSink for PositionsFeed {
    fn name(&self) -> &'static str {
        "positions_feed"
    }

    async fn write_sessions(&self, sessions: &[DwellSession]) -> anyhow::Result<usize> {
        if sessions.is_empty() {
            return Ok(0);
        }

        let body = FeedBody::from_sessions(sessions);
        let mut request = self.client.put(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("PUT {} failed", self.url))?
            .error_for_status()
            .with_context(|| format!("PUT {} returned an error status", self.url))?;

        info!(
            url = %self.url,
            status = %response.status().as_u16(),
            positions = %body.positions.len(),
            "positions_feed_published"
        );
        Ok(body.positions.len())
    }
}
