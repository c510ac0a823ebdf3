//! Error taxonomy
//!
//! `PositioningError` covers anything that drops a single record or beacon;
//! the pipeline turns those into diagnostics and keeps going.
//! `PipelineError` is reserved for resource failures that end a run.

use crate::domain::types::{BeaconId, GatewayId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Per-record / per-beacon failure. Never aborts a run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositioningError {
    /// Solver preconditions violated (coincident or collinear anchors,
    /// distances inconsistent with the anchor layout)
    #[error("degenerate anchor geometry: {0}")]
    DegenerateGeometry(String),

    /// Fewer than three readings share a sampling instant
    #[error("insufficient anchors: need 3, have {have}")]
    InsufficientAnchors { have: usize },

    /// Reading references a gateway the directory did not return
    #[error("gateway {0} not known to the directory")]
    UnknownGateway(GatewayId),

    /// No area polygon contains the position
    #[error("position is outside every known area")]
    NoMatchingArea,

    /// Directory lookup failed
    #[error("directory unavailable: {0}")]
    DirectoryUnavailable(String),
}

impl PositioningError {
    /// Stable label used for diagnostics counts and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PositioningError::DegenerateGeometry(_) => "degenerate_geometry",
            PositioningError::InsufficientAnchors { .. } => "insufficient_anchors",
            PositioningError::UnknownGateway(_) => "unknown_gateway",
            PositioningError::NoMatchingArea => "no_matching_area",
            PositioningError::DirectoryUnavailable(_) => "directory_unavailable",
        }
    }
}

/// Fatal run failure
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("reading source unavailable: {0:#}")]
    ReadingSource(anyhow::Error),

    #[error("position store failed: {0:#}")]
    PositionStore(anyhow::Error),

    #[error("output sink '{sink}' failed: {error:#}")]
    Sink { sink: &'static str, error: anyhow::Error },
}

/// A record or beacon that was skipped, and why
#[derive(Debug, Clone)]
pub struct Skip {
    pub beacon_id: BeaconId,
    pub timestamp: Option<DateTime<Utc>>,
    pub reason: PositioningError,
}

/// Per-run collection of skipped records
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    skips: Vec<Skip>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        beacon_id: &BeaconId,
        timestamp: Option<DateTime<Utc>>,
        reason: PositioningError,
    ) {
        self.skips.push(Skip { beacon_id: beacon_id.clone(), timestamp, reason });
    }

    pub fn len(&self) -> usize {
        self.skips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skips.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Skip> {
        self.skips.iter()
    }

    /// Number of skips with the given kind label
    pub fn count(&self, kind: &str) -> usize {
        self.skips.iter().filter(|s| s.reason.kind() == kind).count()
    }

    pub fn summary(&self) -> DiagnosticsSummary {
        let mut by_kind = BTreeMap::new();
        for skip in &self.skips {
            *by_kind.entry(skip.reason.kind().to_string()).or_insert(0) += 1;
        }
        DiagnosticsSummary { total: self.skips.len(), by_kind }
    }
}

/// Serializable skip counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagnosticsSummary {
    pub total: usize,
    pub by_kind: BTreeMap<String, usize>,
}
