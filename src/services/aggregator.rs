//! Reading aggregation - turns raw distance samples into solved positions
//!
//! Readings of one beacon are grouped by identical sampling instant. Each
//! group contributes its three nearest gateways to the trilateration solver;
//! groups with fewer than three readings are skipped.

use crate::domain::error::{Diagnostics, PositioningError};
use crate::domain::types::{round_to, BeaconId, GatewayMap, GatewayReading, Point, Position};
use crate::services::trilateration::{Anchor, Trilaterator};
use chrono::{DateTime, Utc};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Readings sharing one sampling instant
pub type ReadingGroup<'a> = SmallVec<[&'a GatewayReading; 4]>;

/// Outcome counters for one beacon
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStats {
    pub groups: usize,
    pub solved: usize,
    pub skipped: usize,
    /// Groups that had more than three readings and were cut down to the nearest three
    pub trimmed: usize,
}

/// Groups readings per instant and solves each group
#[derive(Debug, Clone, Copy)]
pub struct ReadingAggregator {
    solver: Trilaterator,
    distance_decimals: u32,
}

impl Default for ReadingAggregator {
    fn default() -> Self {
        Self { solver: Trilaterator::default(), distance_decimals: 6 }
    }
}

impl ReadingAggregator {
    pub fn new(solver: Trilaterator, distance_decimals: u32) -> Self {
        Self { solver, distance_decimals }
    }

    /// Solve every sampling instant of one beacon
    ///
    /// Groups that cannot be solved are recorded in `diagnostics` and left out.
    pub fn solve_beacon(
        &self,
        beacon: &BeaconId,
        readings: &[GatewayReading],
        gateways: &GatewayMap,
        diagnostics: &mut Diagnostics,
    ) -> (Vec<Position>, AggregateStats) {
        let groups = group_by_timestamp(readings);
        let mut stats = AggregateStats { groups: groups.len(), ..Default::default() };
        let mut positions = Vec::with_capacity(groups.len());

        for (timestamp, group) in groups {
            if group.len() > 3 {
                stats.trimmed += 1;
            }

            match self.solve_group(group, gateways) {
                Ok(point) => {
                    stats.solved += 1;
                    positions.push(Position {
                        beacon_id: beacon.clone(),
                        x: point.x,
                        y: point.y,
                        timestamp,
                    });
                }
                Err(e) => {
                    stats.skipped += 1;
                    match e {
                        PositioningError::InsufficientAnchors { .. } => {
                            debug!(beacon = %beacon, timestamp = %timestamp, error = %e, "reading_group_skipped");
                        }
                        _ => {
                            warn!(beacon = %beacon, timestamp = %timestamp, error = %e, "reading_group_skipped");
                        }
                    }
                    diagnostics.record(beacon, Some(timestamp), e);
                }
            }
        }

        (positions, stats)
    }

    /// Pick the anchors of one group and solve it
    pub fn solve_group(
        &self,
        group: ReadingGroup<'_>,
        gateways: &GatewayMap,
    ) -> Result<Point, PositioningError> {
        let nearest = select_anchors(group)?;

        let mut anchors = [Anchor::new(Point::default(), 0.0); 3];
        for (slot, reading) in anchors.iter_mut().zip(nearest) {
            let gateway = gateways
                .get(&reading.gateway_id)
                .ok_or_else(|| PositioningError::UnknownGateway(reading.gateway_id.clone()))?;
            let distance = round_to(reading.distance_meters, self.distance_decimals);
            *slot = Anchor::new(gateway.position, distance);
        }

        self.solver.solve(anchors)
    }
}

/// Group readings by identical timestamp, in ascending time order
pub fn group_by_timestamp(readings: &[GatewayReading]) -> BTreeMap<DateTime<Utc>, ReadingGroup<'_>> {
    let mut groups: BTreeMap<DateTime<Utc>, ReadingGroup<'_>> = BTreeMap::new();
    for reading in readings {
        groups.entry(reading.timestamp).or_default().push(reading);
    }
    groups
}

/// The three nearest readings of a group
///
/// Fewer than three is an error; anything beyond the nearest three is dropped.
pub fn select_anchors(
    mut group: ReadingGroup<'_>,
) -> Result<[&GatewayReading; 3], PositioningError> {
    if group.len() < 3 {
        return Err(PositioningError::InsufficientAnchors { have: group.len() });
    }

    group.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
    Ok([group[0], group[1], group[2]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Gateway, GatewayId};
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn reading(gateway: &str, distance: f64, at: i64) -> GatewayReading {
        GatewayReading {
            beacon_id: BeaconId::new("beacon-1"),
            gateway_id: GatewayId::new(gateway),
            distance_meters: distance,
            timestamp: ts(at),
        }
    }

    fn gateways() -> GatewayMap {
        [("g1", 0.0, 0.0), ("g2", 10.0, 0.0), ("g3", 0.0, 10.0), ("g4", 50.0, 50.0)]
            .into_iter()
            .map(|(id, x, y)| {
                let gateway_id = GatewayId::new(id);
                (gateway_id.clone(), Gateway { gateway_id, position: Point::new(x, y) })
            })
            .collect()
    }

    /// Exact distances from (3, 4)
    fn exact_readings(at: i64) -> Vec<GatewayReading> {
        vec![
            reading("g1", 5.0, at),
            reading("g2", 65f64.sqrt(), at),
            reading("g3", 45f64.sqrt(), at),
        ]
    }

    #[test]
    fn test_groups_by_identical_timestamp() {
        let mut readings = exact_readings(10);
        readings.extend(exact_readings(0));
        readings.push(reading("g1", 1.0, 20));

        let groups = group_by_timestamp(&readings);
        let sizes: Vec<(DateTime<Utc>, usize)> = groups.iter().map(|(t, g)| (*t, g.len())).collect();
        assert_eq!(sizes, vec![(ts(0), 3), (ts(10), 3), (ts(20), 1)]);
    }

    #[test]
    fn test_select_anchors_requires_three() {
        let readings = vec![reading("g1", 1.0, 0), reading("g2", 2.0, 0)];
        let group: ReadingGroup<'_> = readings.iter().collect();

        let result = select_anchors(group);
        assert_eq!(result.unwrap_err(), PositioningError::InsufficientAnchors { have: 2 });
    }

    #[test]
    fn test_select_anchors_keeps_nearest_three() {
        let readings = vec![
            reading("g4", 9.0, 0),
            reading("g2", 3.0, 0),
            reading("g1", 1.0, 0),
            reading("g3", 2.0, 0),
        ];
        let group: ReadingGroup<'_> = readings.iter().collect();

        let selected = select_anchors(group).unwrap();
        let ids: Vec<&str> = selected.iter().map(|r| r.gateway_id.0.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g3", "g2"]);
    }

    #[test]
    fn test_solve_beacon_recovers_position() {
        let aggregator = ReadingAggregator::default();
        let beacon = BeaconId::new("beacon-1");
        let mut diagnostics = Diagnostics::new();

        let (positions, stats) =
            aggregator.solve_beacon(&beacon, &exact_readings(0), &gateways(), &mut diagnostics);

        assert_eq!(stats, AggregateStats { groups: 1, solved: 1, skipped: 0, trimmed: 0 });
        assert_eq!(positions.len(), 1);
        assert_eq!((positions[0].x, positions[0].y), (3.0, 4.0));
        assert_eq!(positions[0].timestamp, ts(0));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_extra_far_reading_is_discarded() {
        let aggregator = ReadingAggregator::default();
        let beacon = BeaconId::new("beacon-1");
        let mut diagnostics = Diagnostics::new();
        let mut readings = exact_readings(0);
        // g4 is the farthest and inconsistent; it must not influence the result
        readings.push(reading("g4", 70.0, 0));

        let (positions, stats) =
            aggregator.solve_beacon(&beacon, &readings, &gateways(), &mut diagnostics);

        assert_eq!(stats.trimmed, 1);
        assert_eq!((positions[0].x, positions[0].y), (3.0, 4.0));
    }

    #[test]
    fn test_skips_are_recorded_and_run_continues() {
        let aggregator = ReadingAggregator::default();
        let beacon = BeaconId::new("beacon-1");
        let mut diagnostics = Diagnostics::new();

        let mut readings = vec![reading("g1", 1.0, 0), reading("g2", 1.0, 0)];
        readings.extend(exact_readings(5));
        readings.extend(vec![
            reading("g1", 1.0, 9),
            reading("g2", 1.0, 9),
            reading("missing", 1.0, 9),
        ]);

        let (positions, stats) =
            aggregator.solve_beacon(&beacon, &readings, &gateways(), &mut diagnostics);

        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].timestamp, ts(5));
        assert_eq!(stats.skipped, 2);
        assert_eq!(diagnostics.count("insufficient_anchors"), 1);
        assert_eq!(diagnostics.count("unknown_gateway"), 1);
    }
}
