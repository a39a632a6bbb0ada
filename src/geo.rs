//! Grid geometry shared by the scheduler's estimates and the unit twins.
//!
//! Distances are Manhattan distances on an integer grid. Travel times are
//! expressed in whole simulation time units.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn manhattan_distance(&self, other: Position) -> u64 {
        u64::from(self.x.abs_diff(other.x)) + u64::from(self.y.abs_diff(other.y))
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Time units needed to cover the distance between `from` and `to`.
///
/// Coincident positions arrive immediately (0). Any other distance takes at
/// least one time unit even when the speed would round it down to zero.
/// `speed` must be positive; the catalog loader rejects anything else.
pub fn travel_time(from: Position, to: Position, speed: u32) -> u64 {
    let distance = from.manhattan_distance(to);
    if distance == 0 {
        return 0;
    }
    (distance / u64::from(speed.max(1))).max(1)
}
