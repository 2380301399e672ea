use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Half the side length of a square at `scale`.
///
/// A square at `scale` spans `2^scale` world units, so it reaches
/// `2^(scale-1)` from its center on every side.
pub fn square_half(scale: f64) -> f64 {
    scale.exp2() / 2.0
}

/// Immutable planar coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Whether this point lies in the square of side `2^scale` centered at `(cx, cy)`.
    ///
    /// Each axis is half-open (`[c - h, c + h)`) so sibling squares never
    /// both claim a point on their shared edge.
    pub fn is_in(&self, cx: f64, cy: f64, scale: f64) -> bool {
        let h = square_half(scale);
        self.x >= cx - h && self.x < cx + h && self.y >= cy - h && self.y < cy + h
    }

    /// Returns the point moved by `len` along each axis in the given directions.
    pub fn offset(&self, dx: i32, dy: i32, len: f64) -> Point {
        Point::from(self.as_dvec2() + DVec2::new(dx as f64, dy as f64) * len)
    }

    pub fn dist(&self, other: &Point) -> f64 {
        self.as_dvec2().distance(other.as_dvec2())
    }

    pub fn as_dvec2(&self) -> DVec2 {
        DVec2::new(self.x, self.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<DVec2> for Point {
    fn from(v: DVec2) -> Self {
        Self { x: v.x, y: v.y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1},{:.1})", self.x, self.y)
    }
}
