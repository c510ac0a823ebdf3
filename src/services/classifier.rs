//! Area classification - first containing polygon wins

use crate::domain::error::PositioningError;
use crate::domain::geometry::{point_in_polygon, DEFAULT_RAY_FAR_X};
use crate::domain::types::{Area, AreaAssignment, AreaId, Position};

#[derive(Debug, Clone, Copy)]
pub struct AreaClassifier {
    ray_far_x: f64,
}

impl Default for AreaClassifier {
    fn default() -> Self {
        Self { ray_far_x: DEFAULT_RAY_FAR_X }
    }
}

impl AreaClassifier {
    pub fn new(ray_far_x: f64) -> Self {
        Self { ray_far_x }
    }

    /// Id of the first area, in provider order, whose polygon contains the position
    pub fn locate<'a>(&self, position: &Position, areas: &'a [Area]) -> Option<&'a AreaId> {
        let point = position.point();
        areas
            .iter()
            .find(|area| point_in_polygon(&area.vertices, point, self.ray_far_x))
            .map(|area| &area.area_id)
    }

    /// Assign a position to an area
    ///
    /// `NoMatchingArea` means the record should be dropped, not that anything failed.
    pub fn classify(
        &self,
        position: &Position,
        areas: &[Area],
    ) -> Result<AreaAssignment, PositioningError> {
        let area_id = self.locate(position, areas).ok_or(PositioningError::NoMatchingArea)?;

        Ok(AreaAssignment {
            beacon_id: position.beacon_id.clone(),
            area_id: area_id.clone(),
            x: position.x,
            y: position.y,
            timestamp: position.timestamp,
        })
    }
}
