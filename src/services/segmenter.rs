//! Dwell session segmentation
//!
//! Assignments are grouped by beacon, then by area, and each group is walked in
//! time order. A new session starts only when the gap since the previous record
//! exceeds the split threshold AND both coordinates, rounded half to even, differ from the
//! session's anchor coordinates. Absorbed records extend the session's end but
//! never move its start or coordinates.
//!
//! Grouping by area before clustering means a beacon that leaves an area and
//! comes back can have its two visits merged into one session if the return
//! lands on the same rounded coordinates, and sessions of different areas may
//! overlap in time.

use crate::domain::types::{AreaAssignment, AreaId, BeaconId, DwellSession, Point};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Default gap above which a coordinate change starts a new session
pub const DEFAULT_SPLIT_GAP_SECS: i64 = 5;

/// In-flight session for one (beacon, area) group
#[derive(Debug, Clone, Copy)]
struct OpenSession {
    start: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    anchor: Point,
}

impl OpenSession {
    fn open(record: &AreaAssignment) -> Self {
        Self {
            start: record.timestamp,
            last_seen: record.timestamp,
            anchor: Point::new(record.x, record.y),
        }
    }

    fn close(self, beacon_id: &BeaconId, area_id: &AreaId) -> DwellSession {
        let duration = self.last_seen - self.start;
        DwellSession {
            beacon_id: beacon_id.clone(),
            area_id: area_id.clone(),
            start_time: self.start,
            end_time: self.last_seen,
            duration_seconds: duration.num_milliseconds() as f64 / 1000.0,
            last_x: self.anchor.x,
            last_y: self.anchor.y,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    split_gap: Duration,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self { split_gap: Duration::seconds(DEFAULT_SPLIT_GAP_SECS) }
    }
}

impl Segmenter {
    pub fn new(split_gap: Duration) -> Self {
        Self { split_gap }
    }

    /// Segment a batch of assignments into dwell sessions
    ///
    /// Input is sorted by timestamp here (stable, so equal timestamps keep their
    /// order). Beacons and areas are emitted in order of first appearance.
    pub fn segment(&self, assignments: &[AreaAssignment]) -> Vec<DwellSession> {
        let mut ordered: Vec<&AreaAssignment> = assignments.iter().collect();
        ordered.sort_by_key(|a| a.timestamp);

        let mut sessions = Vec::new();
        for (beacon, records) in group_in_order(&ordered, |a| &a.beacon_id) {
            for (area, area_records) in group_in_order(&records, |a| &a.area_id) {
                let produced = self.segment_group(beacon, area, &area_records);
                debug!(
                    beacon = %beacon,
                    area = %area,
                    records = %area_records.len(),
                    sessions = %produced.len(),
                    "area_group_segmented"
                );
                sessions.extend(produced);
            }
        }
        sessions
    }

    /// Run the session state machine over one time-ordered (beacon, area) group
    pub fn segment_group(
        &self,
        beacon: &BeaconId,
        area: &AreaId,
        records: &[&AreaAssignment],
    ) -> Vec<DwellSession> {
        let mut sessions = Vec::new();
        let mut current: Option<OpenSession> = None;

        for record in records {
            match current.as_mut() {
                None => current = Some(OpenSession::open(record)),
                Some(session) => {
                    if self.should_split(session, record) {
                        sessions.push(session.close(beacon, area));
                        *session = OpenSession::open(record);
                    } else {
                        session.last_seen = record.timestamp;
                    }
                }
            }
        }

        if let Some(session) = current {
            sessions.push(session.close(beacon, area));
        }
        sessions
    }

    fn should_split(&self, session: &OpenSession, record: &AreaAssignment) -> bool {
        let gap = record.timestamp - session.last_seen;
        gap > self.split_gap
            && record.x.round_ties_even() != session.anchor.x.round_ties_even()
            && record.y.round_ties_even() != session.anchor.y.round_ties_even()
    }
}

/// Group items by key, keeping first-appearance order of keys and item order within groups
fn group_in_order<'a, K, F>(
    items: &[&'a AreaAssignment],
    key: F,
) -> Vec<(&'a K, Vec<&'a AreaAssignment>)>
where
    K: PartialEq + ?Sized,
    F: Fn(&'a AreaAssignment) -> &'a K,
{
    let mut groups: Vec<(&'a K, Vec<&'a AreaAssignment>)> = Vec::new();
    for &item in items {
        let k = key(item);
        match groups.iter().position(|(existing, _)| *existing == k) {
            Some(i) => groups[i].1.push(item),
            None => groups.push((k, vec![item])),
        }
    }
    groups
}
