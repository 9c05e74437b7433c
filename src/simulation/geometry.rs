//! Node positions and distances.

use serde::Deserialize;

/// Position in meters.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Squared Euclidean distance (avoids a sqrt when only comparing distances).
pub fn distance2(a: &Position, b: &Position) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    dx * dx + dy * dy + dz * dz
}

/// Euclidean distance in meters.
pub fn distance(a: &Position, b: &Position) -> f64 {
    distance2(a, b).sqrt()
}
