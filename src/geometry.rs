//! Room geometry: points in centimetres and the room they are clamped to.

use crate::config::RoomConfig;
use serde::{Deserialize, Serialize};

/// A position on the room floor, in centimetres.
///
/// The origin is the corner between the left and front walls; x grows
/// towards the right wall, y towards the back wall.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Arithmetic mean of a set of points, `None` when empty.
    pub fn centroid(points: &[Point]) -> Option<Point> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let (sx, sy) = points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point::new(sx / n, sy / n))
    }
}

/// The rectangular room all positions live in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Room {
    pub width: f64,
    pub height: f64,
    pub max_distance: f64,
}

impl Room {
    pub fn new(width: f64, height: f64, max_distance: f64) -> Self {
        Self {
            width,
            height,
            max_distance,
        }
    }

    pub fn from_config(config: &RoomConfig) -> Self {
        Self::new(config.width, config.height, config.max_distance)
    }

    /// Room centre, used as the reference position before any reading.
    pub fn center(&self) -> Point {
        Point::new(self.width / 2.0, self.height / 2.0)
    }

    pub fn clamp_x(&self, x: f64) -> f64 {
        x.clamp(0.0, self.width)
    }

    pub fn clamp_y(&self, y: f64) -> f64 {
        y.clamp(0.0, self.height)
    }

    /// Clamp a point into `[0, width] × [0, height]`.
    pub fn clamp(&self, point: Point) -> Point {
        Point::new(self.clamp_x(point.x), self.clamp_y(point.y))
    }

    pub fn contains(&self, point: Point) -> bool {
        (0.0..=self.width).contains(&point.x) && (0.0..=self.height).contains(&point.y)
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::from_config(&RoomConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_distance_to() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(300.0, 400.0);
        assert_relative_eq!(a.distance_to(b), 500.0);
        assert_relative_eq!(b.distance_to(a), 500.0);
    }

    #[test]
    fn test_centroid() {
        assert_eq!(Point::centroid(&[]), None);

        let c = Point::centroid(&[Point::new(350.0, 200.0), Point::new(200.0, 100.0)]).unwrap();
        assert_relative_eq!(c.x, 275.0);
        assert_relative_eq!(c.y, 150.0);
    }

    #[test]
    fn test_clamp_keeps_points_inside_room() {
        let room = Room::new(400.0, 300.0, 400.0);

        assert_eq!(room.clamp(Point::new(-5.0, 320.0)), Point::new(0.0, 300.0));
        assert_eq!(room.clamp(Point::new(410.0, -1.0)), Point::new(400.0, 0.0));
        assert_eq!(room.clamp(Point::new(12.5, 40.0)), Point::new(12.5, 40.0));
        assert!(room.contains(room.clamp(Point::new(1e9, -1e9))));
    }

    #[test]
    fn test_center() {
        let room = Room::default();
        assert_eq!(room.center(), Point::new(200.0, 200.0));
    }
}
