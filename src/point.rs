//! Keypoint coordinate types for annotation instances.

use serde::{Deserialize, Serialize};

/// A single labeled keypoint.
///
/// Coordinates are in image pixels. A point with `NaN` coordinates is
/// "unset": the node exists on the schema but has not been placed yet.
/// Visibility is independent of placement — a point may carry coordinates
/// while being flagged invisible in the frame.
///
/// # Example
///
/// ```
/// use pose_labels::Point;
///
/// let head = Point::new(12.0, 34.5);
/// assert!(head.is_set());
/// assert!(head.visible);
///
/// let unplaced = Point::unset();
/// assert!(!unplaced.is_set());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate in pixels.
    pub x: f64,
    /// Y coordinate in pixels.
    pub y: f64,
    /// Whether the point is visible in the frame.
    pub visible: bool,
    /// Whether the point has been fully placed by an annotator.
    pub complete: bool,
}

impl Point {
    /// Creates a visible point at the given coordinates.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            visible: true,
            complete: false,
        }
    }

    /// Creates a point with coordinates but flagged invisible.
    #[must_use]
    pub const fn invisible(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            visible: false,
            complete: false,
        }
    }

    /// Creates an unset point (`NaN` coordinates, invisible).
    #[must_use]
    pub const fn unset() -> Self {
        Self {
            x: f64::NAN,
            y: f64::NAN,
            visible: false,
            complete: false,
        }
    }

    /// Returns `true` if both coordinates are placed (non-`NaN`).
    #[must_use]
    pub fn is_set(&self) -> bool {
        !(self.x.is_nan() || self.y.is_nan())
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::unset()
    }
}

/// A keypoint produced by an automated process, carrying a confidence score.
///
/// # Example
///
/// ```
/// use pose_labels::PredictedPoint;
///
/// let p = PredictedPoint::new(12.0, 34.5, 0.87);
/// assert!(p.is_set());
/// assert!((p.score - 0.87).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictedPoint {
    /// X coordinate in pixels.
    pub x: f64,
    /// Y coordinate in pixels.
    pub y: f64,
    /// Whether the point is visible in the frame.
    pub visible: bool,
    /// Whether the point has been fully placed.
    pub complete: bool,
    /// Detection confidence for this point.
    pub score: f64,
}

impl PredictedPoint {
    /// Creates a visible predicted point.
    #[must_use]
    pub const fn new(x: f64, y: f64, score: f64) -> Self {
        Self {
            x,
            y,
            visible: true,
            complete: false,
            score,
        }
    }

    /// Creates a predicted point with coordinates but flagged invisible.
    #[must_use]
    pub const fn invisible(x: f64, y: f64, score: f64) -> Self {
        Self {
            x,
            y,
            visible: false,
            complete: false,
            score,
        }
    }

    /// Creates an unset predicted point.
    #[must_use]
    pub const fn unset() -> Self {
        Self {
            x: f64::NAN,
            y: f64::NAN,
            visible: false,
            complete: false,
            score: 0.0,
        }
    }

    /// Creates a predicted point from a plain point and a score.
    #[must_use]
    pub const fn from_point(point: Point, score: f64) -> Self {
        Self {
            x: point.x,
            y: point.y,
            visible: point.visible,
            complete: point.complete,
            score,
        }
    }

    /// Returns the coordinate/flag part of this point, dropping the score.
    #[must_use]
    pub const fn point(&self) -> Point {
        Point {
            x: self.x,
            y: self.y,
            visible: self.visible,
            complete: self.complete,
        }
    }

    /// Returns `true` if both coordinates are placed (non-`NaN`).
    #[must_use]
    pub fn is_set(&self) -> bool {
        !(self.x.is_nan() || self.y.is_nan())
    }
}

impl Default for PredictedPoint {
    fn default() -> Self {
        Self::unset()
    }
}

/// Shared coordinate access for the two point kinds, used by the generic
/// instance storage.
pub(crate) trait PointData: Copy + PartialEq + std::fmt::Debug {
    /// An unset value for a newly added schema node.
    fn unset() -> Self;

    /// A freshly placed visible value, as created by coordinate-only setters.
    fn placed(x: f64, y: f64) -> Self;

    /// Current coordinates.
    fn xy(&self) -> (f64, f64);

    /// Overwrites the coordinates, preserving flags.
    fn set_xy(&mut self, x: f64, y: f64);

    /// Visibility flag.
    fn visible(&self) -> bool;

    /// Completeness flag.
    fn complete(&self) -> bool;

    /// Whether both coordinates are placed.
    fn is_set(&self) -> bool {
        let (x, y) = self.xy();
        !(x.is_nan() || y.is_nan())
    }
}

impl PointData for Point {
    fn unset() -> Self {
        Self::unset()
    }

    fn placed(x: f64, y: f64) -> Self {
        Self::new(x, y)
    }

    fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    fn set_xy(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    fn visible(&self) -> bool {
        self.visible
    }

    fn complete(&self) -> bool {
        self.complete
    }
}

impl PointData for PredictedPoint {
    fn unset() -> Self {
        Self::unset()
    }

    fn placed(x: f64, y: f64) -> Self {
        Self::new(x, y, 0.0)
    }

    fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    fn set_xy(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    fn visible(&self) -> bool {
        self.visible
    }

    fn complete(&self) -> bool {
        self.complete
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn point_new() {
        let p = Point::new(1.0, 2.0);
        assert_eq!(p.x, 1.0);
        assert_eq!(p.y, 2.0);
        assert!(p.visible);
        assert!(!p.complete);
    }

    #[test]
    fn point_unset() {
        let p = Point::unset();
        assert!(!p.is_set());
        assert!(!p.visible);
        assert!(p.x.is_nan() && p.y.is_nan());
    }

    #[test]
    fn point_invisible_is_still_set() {
        let p = Point::invisible(3.0, 4.0);
        assert!(p.is_set());
        assert!(!p.visible);
    }

    #[test]
    fn point_default_is_unset() {
        assert!(!Point::default().is_set());
    }

    #[test]
    fn predicted_point_new() {
        let p = PredictedPoint::new(1.0, 2.0, 0.9);
        assert!(p.is_set());
        assert!(p.visible);
        assert_eq!(p.score, 0.9);
    }

    #[test]
    fn predicted_point_from_point_round_trip() {
        let p = Point::invisible(5.0, 6.0);
        let pp = PredictedPoint::from_point(p, 0.5);
        assert_eq!(pp.point(), p);
        assert_eq!(pp.score, 0.5);
    }

    #[test]
    fn point_serialization() {
        let p = Point::new(1.5, 2.5);
        let json = serde_json::to_string(&p);
        assert!(json.is_ok());

        let parsed: Result<Point, _> = serde_json::from_str(&json.unwrap_or_default());
        assert!(parsed.is_ok());
        assert_eq!(parsed.unwrap_or_default(), p);
    }

    #[test]
    fn predicted_point_serialization() {
        let p = PredictedPoint::new(1.5, 2.5, 0.75);
        let json = serde_json::to_string(&p);
        assert!(json.is_ok());

        let parsed: Result<PredictedPoint, _> = serde_json::from_str(&json.unwrap_or_default());
        assert!(parsed.is_ok());
        assert_eq!(parsed.unwrap_or_default(), p);
    }
}
