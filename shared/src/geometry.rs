//! Plane geometry shared by the server simulation and the wire protocol.

use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

/// A point on the continuous world plane.
///
/// Screen convention: x grows to the right, y grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_squared_to(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Straight-line distance.
    pub fn distance_to(&self, other: &Position) -> f32 {
        self.distance_squared_to(other).sqrt()
    }

    pub fn manhattan_distance_to(&self, other: &Position) -> f32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// Returns the position reached by applying `action` from here.
    pub fn apply(&self, action: Action) -> Position {
        Position {
            x: self.x + action.dx,
            y: self.y + action.dy,
        }
    }

    /// Returns the displacement that carries `self` onto `other`.
    pub fn displacement_to(&self, other: &Position) -> Action {
        Action {
            dx: other.x - self.x,
            dy: other.y - self.y,
        }
    }
}

/// A displacement on the plane.
///
/// The planner emits these as movement quanta: the movement tick applies
/// exactly one per guard per tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Action {
    pub dx: f32,
    pub dy: f32,
}

impl Action {
    pub fn new(dx: f32, dy: f32) -> Self {
        Self { dx, dy }
    }

    pub fn scale(&self, factor: f32) -> Action {
        Action {
            dx: self.dx * factor,
            dy: self.dy * factor,
        }
    }

    pub fn length(&self) -> f32 {
        (self.dx * self.dx + self.dy * self.dy).sqrt()
    }

    /// Facing angle of a sprite travelling along this action.
    ///
    /// Zero points "up" the screen, matching the client renderer.
    pub fn heading(&self) -> f32 {
        self.dy.atan2(self.dx) + FRAC_PI_2
    }
}

/// Axis-aligned rectangle anchored at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Strict containment: points on the border are outside.
    pub fn contains(&self, point: &Position) -> bool {
        self.x < point.x
            && self.x + self.width > point.x
            && self.y < point.y
            && self.y + self.height > point.y
    }

    /// Closest point of the rectangle (border included) to `point`.
    pub fn closest_point(&self, point: &Position) -> Position {
        Position {
            x: self.x.max(point.x.min(self.x + self.width)),
            y: self.y.max(point.y.min(self.y + self.height)),
        }
    }

    /// True when a circle of `radius` around `center` overlaps the rectangle.
    pub fn overlaps_circle(&self, center: &Position, radius: f32) -> bool {
        center.distance_squared_to(&self.closest_point(center)) < radius * radius
    }
}
