//! Shared types for beacon positioning

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize};

/// Newtype wrapper for beacon identifiers (MAC addresses in practice)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BeaconId(pub String);

impl BeaconId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BeaconId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Newtype wrapper for gateway identifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayId(pub String);

impl GatewayId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for GatewayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Area identifier as the directory sends it
///
/// Ids arrive as integers or strings and are written back out in the same JSON
/// kind, so the positions feed echoes `7` for `7` and `"dock"` for `"dock"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AreaId {
    Number(i64),
    Text(String),
}

impl AreaId {
    pub fn new(id: impl Into<String>) -> Self {
        AreaId::Text(id.into())
    }
}

impl From<i64> for AreaId {
    fn from(id: i64) -> Self {
        AreaId::Number(id)
    }
}

impl std::fmt::Display for AreaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AreaId::Number(id) => write!(f, "{}", id),
            AreaId::Text(id) => f.write_str(id),
        }
    }
}

/// A point in the facility plane (meters)
///
/// Serialized as a `[x, y]` pair, which is how the area directory ships vertices.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn sub(self, other: Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    #[inline]
    pub fn add(self, other: Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }

    #[inline]
    pub fn scale(self, k: f64) -> Point {
        Point::new(self.x * k, self.y * k)
    }

    #[inline]
    pub fn dot(self, other: Point) -> f64 {
        self.x * other.x + self.y * other.y
    }

    #[inline]
    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn distance_to(self, other: Point) -> f64 {
        self.sub(other).norm()
    }
}

impl From<[f64; 2]> for Point {
    fn from(pair: [f64; 2]) -> Self {
        Point::new(pair[0], pair[1])
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// One raw distance sample between a beacon and a gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayReading {
    pub beacon_id: BeaconId,
    pub gateway_id: GatewayId,
    pub distance_meters: f64,
    pub timestamp: DateTime<Utc>,
}

/// A fixed receiver with known coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Gateway {
    pub gateway_id: GatewayId,
    pub position: Point,
}

/// Gateways visible to a beacon, keyed by gateway id
pub type GatewayMap = FxHashMap<GatewayId, Gateway>;

/// A named zone, treated as a simple polygon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    #[serde(rename = "idArea")]
    pub area_id: AreaId,
    pub vertices: Vec<Point>,
}

/// Solved beacon position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub beacon_id: BeaconId,
    pub x: f64,
    pub y: f64,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    #[inline]
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A position classified into an area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaAssignment {
    pub beacon_id: BeaconId,
    pub area_id: AreaId,
    pub x: f64,
    pub y: f64,
    pub timestamp: DateTime<Utc>,
}

/// Time spent by one beacon in one area before a qualifying move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DwellSession {
    pub beacon_id: BeaconId,
    pub area_id: AreaId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub last_x: f64,
    pub last_y: f64,
}

/// Batch response from a directory lookup
///
/// A single request by beacon id returns the payload for the whole facility
/// along with every beacon that payload covers.
#[derive(Debug, Clone)]
pub struct DirectoryBatch<T> {
    pub beacons: Vec<BeaconId>,
    pub payload: T,
}

/// Which stages a batch run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Readings -> positions -> areas -> sessions
    Full,
    /// Stored positions -> areas -> sessions
    AreasOnly,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Full => "full",
            RunMode::AreasOnly => "areas_only",
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(RunMode::Full),
            "areas" | "areas_only" => Ok(RunMode::AreasOnly),
            other => Err(format!("unknown run mode '{}'", other)),
        }
    }
}

/// Round to a fixed number of decimal places
#[inline]
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_id_keeps_json_kind() {
        let numeric: AreaId = serde_json::from_str("17").unwrap();
        let text: AreaId = serde_json::from_str("\"lobby\"").unwrap();
        assert_eq!(numeric, AreaId::from(17));
        assert_eq!(text, AreaId::new("lobby"));
        assert_eq!(serde_json::to_string(&numeric).unwrap(), "17");
        assert_eq!(serde_json::to_string(&text).unwrap(), "\"lobby\"");
        assert_eq!(numeric.to_string(), "17");
        assert_ne!(numeric, AreaId::new("17"));
    }

    #[test]
    fn test_area_vertices_from_pairs() {
        let area: Area =
            serde_json::from_str(r#"{"idArea": 3, "vertices": [[0, 0], [10, 0], [10, 10]]}"#)
                .unwrap();
        assert_eq!(area.area_id, AreaId::from(3));
        assert_eq!(area.vertices[1], Point::new(10.0, 0.0));
    }

    #[test]
    fn test_run_mode_from_str() {
        assert_eq!("full".parse::<RunMode>().unwrap(), RunMode::Full);
        assert_eq!("areas".parse::<RunMode>().unwrap(), RunMode::AreasOnly);
        assert!("bogus".parse::<RunMode>().is_err());
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(3.14159, 2), 3.14);
        assert_eq!(round_to(-2.005_1, 2), -2.01);
        assert_eq!(round_to(1.234_567_89, 6), 1.234_568);
    }
}
