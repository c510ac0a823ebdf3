//! Reading, position and session stores
//!
//! The pipeline talks to storage through three traits. The bundled
//! implementations keep everything in JSONL files (one JSON object per line),
//! the same format used for session egress.

use crate::domain::types::{BeaconId, DwellSession, GatewayId, GatewayReading, Position};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Read-only source of raw distance readings
#[async_trait]
pub trait ReadingSource: Send + Sync {
    /// Readings with `timestamp >= since` and a usable distance,
    /// ordered by beacon then timestamp
    async fn readings_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<GatewayReading>>;
}

/// Persistent store of solved positions
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn insert_positions(&self, positions: &[Position]) -> anyhow::Result<usize>;

    async fn positions_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<Position>>;
}

/// Destination for dwell sessions
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    async fn write_sessions(&self, sessions: &[DwellSession]) -> anyhow::Result<usize>;
}

/// Raw reading as stored; distance may be missing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReading {
    pub beacon_id: BeaconId,
    pub gateway_id: GatewayId,
    #[serde(default)]
    pub distance_meters: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl RawReading {
    /// Convert to a reading if the distance is present, finite and non-negative
    pub fn into_reading(self) -> Option<GatewayReading> {
        let distance = self.distance_meters.filter(|d| d.is_finite() && *d >= 0.0)?;
        Some(GatewayReading {
            beacon_id: self.beacon_id,
            gateway_id: self.gateway_id,
            distance_meters: distance,
            timestamp: self.timestamp,
        })
    }
}

/// Parse every line of a JSONL file, skipping blank and malformed lines
fn read_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(file = %path.display(), line = %(line_no + 1), error = %e, "jsonl_line_skipped");
            }
        }
    }
    Ok(records)
}

/// Append records to a JSONL file, creating parent directories as needed
fn append_jsonl<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let mut buf = String::new();
    for record in records {
        buf.push_str(&serde_json::to_string(record)?);
        buf.push('\n');
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(buf.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    debug!(file = %path.display(), records = %records.len(), bytes = %buf.len(), "jsonl_appended");
    Ok(records.len())
}

/// Reading source backed by a JSONL file of [`RawReading`]s
pub struct JsonlReadingSource {
    path: PathBuf,
}

impl JsonlReadingSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReadingSource for JsonlReadingSource {
    async fn readings_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<GatewayReading>> {
        let raw: Vec<RawReading> = read_jsonl(&self.path)?;
        let total = raw.len();

        let mut readings: Vec<GatewayReading> = raw
            .into_iter()
            .filter(|r| r.timestamp >= since)
            .filter_map(RawReading::into_reading)
            .collect();
        readings.sort_by(|a, b| {
            a.beacon_id.cmp(&b.beacon_id).then_with(|| a.timestamp.cmp(&b.timestamp))
        });

        info!(
            file = %self.path.display(),
            since = %since,
            total = %total,
            usable = %readings.len(),
            "readings_loaded"
        );
        Ok(readings)
    }
}

/// Position store backed by a JSONL file
pub struct JsonlPositionStore {
    path: PathBuf,
}

impl JsonlPositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PositionStore for JsonlPositionStore {
    async fn insert_positions(&self, positions: &[Position]) -> anyhow::Result<usize> {
        if positions.is_empty() {
            return Ok(0);
        }
        append_jsonl(&self.path, positions)
    }

    async fn positions_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<Position>> {
        // Nothing stored yet is an empty result, not an outage
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut positions: Vec<Position> = read_jsonl(&self.path)?;
        positions.retain(|p| p.timestamp >= since);
        Ok(positions)
    }
}

/// Session store (JSONL) - durable record of every emitted dwell session
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!(file = %path.display(), "session_store_initialized");
        Self { path }
    }

    /// Read back every stored session
    pub fn load_all(&self) -> anyhow::Result<Vec<DwellSession>> {
        read_jsonl(&self.path)
    }
}

#[async_trait]
impl SessionSink for SessionStore {
    fn name(&self) -> &'static str {
        "session_store"
    }

    async fn write_sessions(&self, sessions: &[DwellSession]) -> anyhow::Result<usize> {
        let written = append_jsonl(&self.path, sessions)?;
        info!(file = %self.path.display(), sessions = %written, "sessions_stored");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::AreaId;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn raw_line(beacon: &str, gateway: &str, distance: &str, at: i64) -> String {
        format!(
            r#"{{"beacon_id":"{}","gateway_id":"{}","distance_meters":{},"timestamp":"{}"}}"#,
            beacon,
            gateway,
            distance,
            ts(at).to_rfc3339()
        )
    }

    #[test]
    fn test_raw_reading_filters_unusable_distance() {
        let base = RawReading {
            beacon_id: BeaconId::new("b"),
            gateway_id: GatewayId::new("g"),
            distance_meters: Some(2.5),
            timestamp: ts(0),
        };
        assert!(base.clone().into_reading().is_some());
        assert!(RawReading { distance_meters: None, ..base.clone() }.into_reading().is_none());
        assert!(RawReading { distance_meters: Some(-1.0), ..base.clone() }.into_reading().is_none());
        assert!(RawReading { distance_meters: Some(f64::NAN), ..base }.into_reading().is_none());
    }

    #[tokio::test]
    async fn test_reading_source_filters_and_orders() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let lines = [
            raw_line("b2", "g1", "1.5", 20),
            raw_line("b1", "g1", "2.0", 30),
            raw_line("b1", "g2", "null", 30),
            raw_line("b1", "g3", "4.0", 10),
            raw_line("b1", "g1", "1.0", 0),
            "not json".to_string(),
            String::new(),
        ];
        fs::write(&path, lines.join("\n")).unwrap();

        let source = JsonlReadingSource::new(&path);
        let readings = source.readings_since(ts(5)).await.unwrap();

        let keys: Vec<(&str, DateTime<Utc>)> =
            readings.iter().map(|r| (r.beacon_id.as_str(), r.timestamp)).collect();
        assert_eq!(keys, vec![("b1", ts(10)), ("b1", ts(30)), ("b2", ts(20))]);
    }

    #[tokio::test]
    async fn test_missing_reading_file_is_an_error() {
        let dir = tempdir().unwrap();
        let source = JsonlReadingSource::new(dir.path().join("absent.jsonl"));
        assert!(source.readings_since(ts(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_position_store_round_trip_with_cursor() {
        let dir = tempdir().unwrap();
        let store = JsonlPositionStore::new(dir.path().join("nested").join("positions.jsonl"));

        assert!(store.positions_since(ts(0)).await.unwrap().is_empty());

        let positions: Vec<Position> = (0..3)
            .map(|i| Position {
                beacon_id: BeaconId::new("b1"),
                x: i as f64,
                y: 1.0,
                timestamp: ts(i * 10),
            })
            .collect();
        assert_eq!(store.insert_positions(&positions).await.unwrap(), 3);
        assert_eq!(store.insert_positions(&[]).await.unwrap(), 0);

        let loaded = store.positions_since(ts(10)).await.unwrap();
        assert_eq!(loaded, positions[1..].to_vec());
    }

    #[tokio::test]
    async fn test_session_store_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.jsonl");
        fs::write(&path, "").unwrap();
        let store = SessionStore::new(&path);

        let session = DwellSession {
            beacon_id: BeaconId::new("b1"),
            area_id: AreaId::new("A"),
            start_time: ts(0),
            end_time: ts(12),
            duration_seconds: 12.0,
            last_x: 3.0,
            last_y: 4.0,
        };
        store.write_sessions(&[session.clone()]).await.unwrap();
        store.write_sessions(&[session.clone()]).await.unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert_eq!(store.load_all().unwrap(), vec![session.clone(), session]);
    }
}
