//! 5-point face landmarks: eyes, nose tip, mouth corners.
//!
//! Points with x <= 0 are invisible (the detector zeroes low-confidence
//! keypoints), and stay invisible through scaling.

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaceLandmarks {
    points: [(f64, f64); 5],
}

impl FaceLandmarks {
    pub fn new(points: [(f64, f64); 5]) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[(f64, f64); 5] {
        &self.points
    }

    pub fn has_visible(&self) -> bool {
        self.points.iter().any(|(x, _)| *x > 0.0)
    }

    pub fn visible_points(&self) -> Vec<(f64, f64)> {
        self.points.iter().copied().filter(|(x, _)| *x > 0.0).collect()
    }

    /// Maps visible points onto a surface scaled by `(sx, sy)`.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        let mut points = self.points;
        for p in points.iter_mut() {
            if p.0 > 0.0 {
                *p = (p.0 * sx, p.1 * sy);
            }
        }
        Self { points }
    }
}
