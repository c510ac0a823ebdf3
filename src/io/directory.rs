//! Gateway and area directory lookups over HTTP
//!
//! Both endpoints take a beacon id and answer with the whole facility the
//! beacon belongs to: every gateway (or area) plus every beacon sharing them.
//!
//! Wire format (wrapped in `{"data": ...}`):
//! - `GET /api/gateways`      -> `{beacons: [{macAddress}], gateways: [{macAddress, x, y}]}`
//! - `GET /api/areas/beacon`  -> `{beacons: [{macAddress}], areaVertices: [{idArea, vertices}]}`

use crate::domain::types::{Area, BeaconId, DirectoryBatch, Gateway, GatewayId, GatewayMap, Point};
use crate::infra::config::Config;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Source of gateway coordinates for a beacon's facility
#[async_trait]
pub trait GatewayDirectory: Send + Sync {
    async fn fetch_gateways(&self, beacon: &BeaconId) -> anyhow::Result<DirectoryBatch<GatewayMap>>;
}

/// Source of area polygons for a beacon's facility
#[async_trait]
pub trait AreaDirectory: Send + Sync {
    async fn fetch_areas(&self, beacon: &BeaconId) -> anyhow::Result<DirectoryBatch<Vec<Area>>>;
}

#[derive(Debug, Serialize)]
pub struct DirectoryRequest<'a> {
    #[serde(rename = "macAddress")]
    pub mac_address: &'a str,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BeaconRef {
    #[serde(rename = "macAddress")]
    pub mac_address: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayEntry {
    #[serde(rename = "macAddress")]
    pub mac_address: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewaysData {
    #[serde(default)]
    pub beacons: Vec<BeaconRef>,
    #[serde(default)]
    pub gateways: Vec<GatewayEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AreasData {
    #[serde(default)]
    pub beacons: Vec<BeaconRef>,
    #[serde(rename = "areaVertices", default)]
    pub areas: Vec<Area>,
}

fn beacon_ids(refs: Vec<BeaconRef>) -> Vec<BeaconId> {
    refs.into_iter().map(|b| BeaconId(b.mac_address)).collect()
}

impl From<GatewaysData> for DirectoryBatch<GatewayMap> {
    fn from(data: GatewaysData) -> Self {
        let payload = data
            .gateways
            .into_iter()
            .map(|g| {
                let gateway_id = GatewayId(g.mac_address);
                (gateway_id.clone(), Gateway { gateway_id, position: Point::new(g.x, g.y) })
            })
            .collect();
        DirectoryBatch { beacons: beacon_ids(data.beacons), payload }
    }
}

impl From<AreasData> for DirectoryBatch<Vec<Area>> {
    fn from(data: AreasData) -> Self {
        DirectoryBatch { beacons: beacon_ids(data.beacons), payload: data.areas }
    }
}

/// HTTP client for the facility directory API
pub struct HttpDirectory {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpDirectory {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.directory_timeout_ms()))
            .build()
            .context("Failed to build directory HTTP client")?;

        Ok(Self {
            client,
            base_url: config.directory_base_url().trim_end_matches('/').to_string(),
            token: config.directory_token().map(str::to_string),
        })
    }

    async fn lookup<T>(&self, path: &str, beacon: &BeaconId) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .get(&url)
            .json(&DirectoryRequest { mac_address: beacon.as_str() });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} returned an error status", url))?;

        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("GET {} returned an unexpected body", url))?;

        debug!(url = %url, beacon = %beacon, "directory_lookup_ok");
        Ok(envelope.data)
    }
}

#[async_trait]
impl GatewayDirectory for HttpDirectory {
    async fn fetch_gateways(&self, beacon: &BeaconId) -> anyhow::Result<DirectoryBatch<GatewayMap>> {
        let data: GatewaysData = self.lookup("/api/gateways", beacon).await?;
        Ok(data.into())
    }
}

#[async_trait]
impl AreaDirectory for HttpDirectory {
    async fn fetch_areas(&self, beacon: &BeaconId) -> anyhow::Result<DirectoryBatch<Vec<Area>>> {
        let data: AreasData = self.lookup("/api/areas/beacon", beacon).await?;
        Ok(data.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::AreaId;

    #[test]
    fn test_gateways_response_into_batch() {
        let body = r#"{"data": {
            "beacons": [{"macAddress": "b1"}, {"macAddress": "b2"}],
            "gateways": [
                {"macAddress": "g1", "x": 0, "y": 0},
                {"macAddress": "g2", "x": 10.5, "y": 0}
            ]
        }}"#;

        let envelope: Envelope<GatewaysData> = serde_json::from_str(body).unwrap();
        let batch: DirectoryBatch<GatewayMap> = envelope.data.into();

        assert_eq!(batch.beacons, vec![BeaconId::new("b1"), BeaconId::new("b2")]);
        assert_eq!(batch.payload.len(), 2);
        assert_eq!(batch.payload[&GatewayId::new("g2")].position, Point::new(10.5, 0.0));
    }

    #[test]
    fn test_areas_response_into_batch() {
        let body = r#"{"data": {
            "beacons": [{"macAddress": "b1"}],
            "areaVertices": [
                {"idArea": 7, "vertices": [[0, 0], [10, 0], [10, 10], [0, 10]]},
                {"idArea": "dock", "vertices": [[20, 0], [30, 0], [30, 10]]}
            ]
        }}"#;

        let envelope: Envelope<AreasData> = serde_json::from_str(body).unwrap();
        let batch: DirectoryBatch<Vec<Area>> = envelope.data.into();

        assert_eq!(batch.beacons, vec![BeaconId::new("b1")]);
        let ids: Vec<&AreaId> = batch.payload.iter().map(|a| &a.area_id).collect();
        assert_eq!(ids, vec![&AreaId::from(7), &AreaId::new("dock")]);
        assert_eq!(batch.payload[1].vertices.len(), 3);
    }

    #[test]
    fn test_missing_lists_default_to_empty() {
        let envelope: Envelope<AreasData> = serde_json::from_str(r#"{"data": {}}"#).unwrap();
        let batch: DirectoryBatch<Vec<Area>> = envelope.data.into();
        assert!(batch.beacons.is_empty());
        assert!(batch.payload.is_empty());
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_string(&DirectoryRequest { mac_address: "aa:bb" }).unwrap();
        assert_eq!(body, r#"{"macAddress":"aa:bb"}"#);
    }

    #[tokio::test]
    async fn test_unreachable_directory_is_an_error() {
        let config = Config::default().with_directory_base_url("http://127.0.0.1:9");
        let directory = HttpDirectory::new(&config).unwrap();

        let result = directory.fetch_gateways(&BeaconId::new("b1")).await;
        assert!(result.is_err());
    }
}
