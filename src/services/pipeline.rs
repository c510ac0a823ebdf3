//! Pipeline orchestrator - one batch run from readings to dwell sessions
//!
//! A `Full` run reads raw readings since the cursor, solves positions beacon by
//! beacon, persists them, classifies them into areas, segments the assignments
//! into dwell sessions and hands the sessions to every sink. An `AreasOnly` run
//! starts from positions already in the store.
//!
//! Per-record and per-beacon problems become entries in the run's
//! [`Diagnostics`]; only resource failures (reading source, position store,
//! sinks) end the run with a [`PipelineError`].
//!
//! Directory caches live for exactly one run.

use crate::domain::error::{Diagnostics, DiagnosticsSummary, PipelineError};
use crate::domain::types::{
    Area, AreaAssignment, BeaconId, DwellSession, GatewayReading, Position, RunMode,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::directory::{AreaDirectory, GatewayDirectory};
use crate::io::store::{PositionStore, ReadingSource, SessionSink};
use crate::services::aggregator::ReadingAggregator;
use crate::services::classifier::AreaClassifier;
use crate::services::directory_cache::DirectoryCache;
use crate::services::segmenter::Segmenter;
use crate::services::trilateration::Trilaterator;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of one successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub since: DateTime<Utc>,
    /// Usable readings loaded (zero for areas-only runs)
    pub readings: usize,
    /// Positions solved in this run, or loaded from the store
    pub positions: usize,
    pub assignments: usize,
    pub sessions: usize,
    pub directory_fetches: usize,
    pub diagnostics: DiagnosticsSummary,
    pub duration_ms: u64,
}

impl RunReport {
    fn new(run_id: Uuid, mode: RunMode, since: DateTime<Utc>) -> Self {
        Self {
            run_id,
            mode,
            since,
            readings: 0,
            positions: 0,
            assignments: 0,
            sessions: 0,
            directory_fetches: 0,
            diagnostics: DiagnosticsSummary::default(),
            duration_ms: 0,
        }
    }

    pub fn log(&self) {
        info!(
            run_id = %self.run_id,
            mode = %self.mode.as_str(),
            since = %self.since,
            readings = %self.readings,
            positions = %self.positions,
            assignments = %self.assignments,
            sessions = %self.sessions,
            skipped = %self.diagnostics.total,
            duration_ms = %self.duration_ms,
            "run_completed"
        );
    }
}

/// Batch pipeline wired to its stores, directories and sinks
pub struct Pipeline {
    readings: Arc<dyn ReadingSource>,
    positions: Arc<dyn PositionStore>,
    gateways: Arc<dyn GatewayDirectory>,
    areas: Arc<dyn AreaDirectory>,
    sinks: Vec<Arc<dyn SessionSink>>,
    metrics: Arc<Metrics>,
    aggregator: ReadingAggregator,
    classifier: AreaClassifier,
    segmenter: Segmenter,
}

impl Pipeline {
    pub fn new(
        readings: Arc<dyn ReadingSource>,
        positions: Arc<dyn PositionStore>,
        gateways: Arc<dyn GatewayDirectory>,
        areas: Arc<dyn AreaDirectory>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            readings,
            positions,
            gateways,
            areas,
            sinks: Vec::new(),
            metrics,
            aggregator: ReadingAggregator::default(),
            classifier: AreaClassifier::default(),
            segmenter: Segmenter::default(),
        }
    }

    /// Add a session sink; sinks are written in the order they were added
    pub fn with_sink(mut self, sink: Arc<dyn SessionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Apply the numeric settings from config to every stage
    pub fn with_config(mut self, config: &Config) -> Self {
        self.aggregator = ReadingAggregator::new(
            Trilaterator::new(config.decimals()),
            config.distance_decimals(),
        );
        self.classifier = AreaClassifier::new(config.ray_far_x());
        self.segmenter = Segmenter::new(chrono::Duration::seconds(config.split_gap_secs() as i64));
        self
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Run once with a fresh run id
    pub async fn run(&self, mode: RunMode, since: DateTime<Utc>) -> Result<RunReport, PipelineError> {
        self.run_with_id(Uuid::now_v7(), mode, since).await
    }

    /// Run once under a caller-chosen id (the job id when dispatched)
    pub async fn run_with_id(
        &self,
        run_id: Uuid,
        mode: RunMode,
        since: DateTime<Utc>,
    ) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        self.metrics.record_run_started();
        info!(run_id = %run_id, mode = %mode.as_str(), since = %since, "run_started");

        let result = self.execute(RunReport::new(run_id, mode, since)).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_run_finished(result.is_ok(), duration_ms);

        match result {
            Ok(mut report) => {
                report.duration_ms = duration_ms;
                report.log();
                Ok(report)
            }
            Err(e) => {
                error!(run_id = %run_id, mode = %mode.as_str(), error = %e, "run_failed");
                Err(e)
            }
        }
    }

    async fn execute(&self, mut report: RunReport) -> Result<RunReport, PipelineError> {
        let mut diagnostics = Diagnostics::new();
        let mut area_cache: DirectoryCache<Vec<Area>> = DirectoryCache::new("areas");

        let positions = match report.mode {
            RunMode::Full => self.solve_positions(&mut report, &mut diagnostics).await?,
            RunMode::AreasOnly => {
                let stored = self
                    .positions
                    .positions_since(report.since)
                    .await
                    .map_err(PipelineError::PositionStore)?;
                info!(run_id = %report.run_id, positions = %stored.len(), "stored_positions_loaded");
                stored
            }
        };
        report.positions = positions.len();

        let assignments = self.classify(positions, &mut area_cache, &mut diagnostics).await;
        report.assignments = assignments.len();
        report.directory_fetches += area_cache.fetches();

        let sessions = self.segmenter.segment(&assignments);
        report.sessions = sessions.len();
        self.metrics.record_sessions(sessions.len() as u64);

        self.metrics.record_directory_fetches(
            report.directory_fetches as u64,
            diagnostics.count("directory_unavailable") as u64,
        );
        report.diagnostics = diagnostics.summary();

        self.write_sessions(&sessions).await?;
        Ok(report)
    }

    /// Readings -> positions, persisted per beacon
    async fn solve_positions(
        &self,
        report: &mut RunReport,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<Position>, PipelineError> {
        let readings = self
            .readings
            .readings_since(report.since)
            .await
            .map_err(PipelineError::ReadingSource)?;
        report.readings = readings.len();
        self.metrics.record_readings(readings.len() as u64);

        let directory = self.gateways.as_ref();
        let mut gateway_cache = DirectoryCache::new("gateways");
        let mut solved = Vec::new();

        for (beacon, beacon_readings) in partition_by_beacon(readings, |r: &GatewayReading| &r.beacon_id) {
            let gateways = match gateway_cache
                .get_or_fetch(&beacon, |b| async move { directory.fetch_gateways(&b).await })
                .await
            {
                Ok(gateways) => gateways,
                Err(e) => {
                    warn!(beacon = %beacon, readings = %beacon_readings.len(), error = %e, "beacon_skipped");
                    diagnostics.record(&beacon, None, e);
                    continue;
                }
            };

            let (positions, stats) =
                self.aggregator.solve_beacon(&beacon, &beacon_readings, &gateways, diagnostics);
            self.metrics.record_solve(stats.solved as u64, stats.skipped as u64, stats.trimmed as u64);

            self.positions
                .insert_positions(&positions)
                .await
                .map_err(PipelineError::PositionStore)?;

            debug!(
                beacon = %beacon,
                groups = %stats.groups,
                solved = %stats.solved,
                skipped = %stats.skipped,
                trimmed = %stats.trimmed,
                "beacon_positions_solved"
            );
            solved.extend(positions);
        }

        report.directory_fetches += gateway_cache.fetches();
        Ok(solved)
    }

    /// Positions -> area assignments; unmatched positions are dropped
    async fn classify(
        &self,
        positions: Vec<Position>,
        cache: &mut DirectoryCache<Vec<Area>>,
        diagnostics: &mut Diagnostics,
    ) -> Vec<AreaAssignment> {
        let directory = self.areas.as_ref();
        let mut assignments = Vec::with_capacity(positions.len());
        let mut unassigned = 0usize;

        for (beacon, beacon_positions) in partition_by_beacon(positions, |p: &Position| &p.beacon_id) {
            let areas = match cache
                .get_or_fetch(&beacon, |b| async move { directory.fetch_areas(&b).await })
                .await
            {
                Ok(areas) => areas,
                Err(e) => {
                    // No areas for this beacon: every position drops
                    warn!(beacon = %beacon, positions = %beacon_positions.len(), error = %e, "beacon_unclassified");
                    unassigned += beacon_positions.len();
                    diagnostics.record(&beacon, None, e);
                    continue;
                }
            };

            for position in &beacon_positions {
                match self.classifier.classify(position, &areas) {
                    Ok(assignment) => assignments.push(assignment),
                    Err(e) => {
                        unassigned += 1;
                        debug!(beacon = %beacon, timestamp = %position.timestamp, x = %position.x, y = %position.y, "position_unassigned");
                        diagnostics.record(&beacon, Some(position.timestamp), e);
                    }
                }
            }
        }

        self.metrics.record_classification(assignments.len() as u64, unassigned as u64);
        assignments
    }

    /// Hand sessions to every sink; all sinks are attempted, the first failure is returned
    async fn write_sessions(&self, sessions: &[DwellSession]) -> Result<(), PipelineError> {
        let mut first_error = None;

        for sink in &self.sinks {
            match sink.write_sessions(sessions).await {
                Ok(written) => {
                    debug!(sink = %sink.name(), sessions = %written, "sink_written");
                }
                Err(e) => {
                    self.metrics.record_sink_error();
                    warn!(sink = %sink.name(), error = %format!("{:#}", e), "sink_write_failed");
                    if first_error.is_none() {
                        first_error = Some(PipelineError::Sink { sink: sink.name(), error: e });
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Split items per beacon, keeping first-appearance order of beacons and item order
fn partition_by_beacon<T>(
    items: Vec<T>,
    beacon_of: impl Fn(&T) -> &BeaconId,
) -> Vec<(BeaconId, Vec<T>)> {
    let mut index: FxHashMap<BeaconId, usize> = FxHashMap::default();
    let mut groups: Vec<(BeaconId, Vec<T>)> = Vec::new();

    for item in items {
        let beacon = beacon_of(&item);
        let slot = match index.get(beacon) {
            Some(&slot) => slot,
            None => {
                let slot = groups.len();
                index.insert(beacon.clone(), slot);
                groups.push((beacon.clone(), Vec::new()));
                slot
            }
        };
        groups[slot].1.push(item);
    }
    groups
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory doubles for the pipeline's IO traits

    use super::*;
    use crate::domain::types::{AreaId, DirectoryBatch, Gateway, GatewayId, GatewayMap, Point};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct MemoryReadings(pub Vec<GatewayReading>);

    #[async_trait]
    impl ReadingSource for MemoryReadings {
        async fn readings_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<GatewayReading>> {
            Ok(self.0.iter().filter(|r| r.timestamp >= since).cloned().collect())
        }
    }

    pub struct BrokenReadings;

    #[async_trait]
    impl ReadingSource for BrokenReadings {
        async fn readings_since(&self, _since: DateTime<Utc>) -> anyhow::Result<Vec<GatewayReading>> {
            Err(anyhow::anyhow!("reading store offline"))
        }
    }

    #[derive(Default)]
    pub struct MemoryPositions(pub Mutex<Vec<Position>>);

    #[async_trait]
    impl PositionStore for MemoryPositions {
        async fn insert_positions(&self, positions: &[Position]) -> anyhow::Result<usize> {
            self.0.lock().extend_from_slice(positions);
            Ok(positions.len())
        }

        async fn positions_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<Position>> {
            Ok(self.0.lock().iter().filter(|p| p.timestamp >= since).cloned().collect())
        }
    }

    /// Directory serving one facility; `None` payloads fail every lookup
    pub struct FakeDirectory {
        pub beacons: Vec<BeaconId>,
        pub gateways: Option<Vec<(&'static str, f64, f64)>>,
        pub areas: Option<Vec<Area>>,
        pub gateway_calls: AtomicUsize,
        pub area_calls: AtomicUsize,
    }

    impl FakeDirectory {
        pub fn new(beacons: &[&str]) -> Self {
            Self {
                beacons: beacons.iter().map(|b| BeaconId::new(*b)).collect(),
                gateways: None,
                areas: None,
                gateway_calls: AtomicUsize::new(0),
                area_calls: AtomicUsize::new(0),
            }
        }

        pub fn with_gateways(mut self, gateways: Vec<(&'static str, f64, f64)>) -> Self {
            self.gateways = Some(gateways);
            self
        }

        pub fn with_areas(mut self, areas: Vec<Area>) -> Self {
            self.areas = Some(areas);
            self
        }
    }

    #[async_trait]
    impl GatewayDirectory for FakeDirectory {
        async fn fetch_gateways(&self, _beacon: &BeaconId) -> anyhow::Result<DirectoryBatch<GatewayMap>> {
            self.gateway_calls.fetch_add(1, Ordering::Relaxed);
            let gateways = self.gateways.as_ref().ok_or_else(|| anyhow::anyhow!("gateway directory down"))?;
            let payload = gateways
                .iter()
                .map(|(id, x, y)| {
                    let gateway_id = GatewayId::new(*id);
                    (gateway_id.clone(), Gateway { gateway_id, position: Point::new(*x, *y) })
                })
                .collect();
            Ok(DirectoryBatch { beacons: self.beacons.clone(), payload })
        }
    }

    #[async_trait]
    impl AreaDirectory for FakeDirectory {
        async fn fetch_areas(&self, _beacon: &BeaconId) -> anyhow::Result<DirectoryBatch<Vec<Area>>> {
            self.area_calls.fetch_add(1, Ordering::Relaxed);
            let areas = self.areas.clone().ok_or_else(|| anyhow::anyhow!("area directory down"))?;
            Ok(DirectoryBatch { beacons: self.beacons.clone(), payload: areas })
        }
    }

    #[derive(Default)]
    pub struct MemorySink(pub Mutex<Vec<DwellSession>>);

    #[async_trait]
    impl SessionSink for MemorySink {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn write_sessions(&self, sessions: &[DwellSession]) -> anyhow::Result<usize> {
            self.0.lock().extend_from_slice(sessions);
            Ok(sessions.len())
        }
    }

    pub struct FailingSink;

    #[async_trait]
    impl SessionSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn write_sessions(&self, _sessions: &[DwellSession]) -> anyhow::Result<usize> {
            Err(anyhow::anyhow!("503 Service Unavailable"))
        }
    }

    pub fn square(id: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Area {
        Area {
            area_id: AreaId::new(id),
            vertices: vec![
                Point::new(x0, y0),
                Point::new(x1, y0),
                Point::new(x1, y1),
                Point::new(x0, y1),
            ],
        }
    }

    /// Three gateways around the origin of a 10x10 room
    pub fn room_gateways() -> Vec<(&'static str, f64, f64)> {
        vec![("g1", 0.0, 0.0), ("g2", 10.0, 0.0), ("g3", 0.0, 10.0)]
    }

    /// Exact distances from each room gateway to `(x, y)`
    pub fn readings_at(beacon: &str, x: f64, y: f64, at: DateTime<Utc>) -> Vec<GatewayReading> {
        room_gateways()
            .into_iter()
            .map(|(id, gx, gy)| GatewayReading {
                beacon_id: BeaconId::new(beacon),
                gateway_id: GatewayId::new(id),
                distance_meters: Point::new(x, y).distance_to(Point::new(gx, gy)),
                timestamp: at,
            })
            .collect()
    }
}
