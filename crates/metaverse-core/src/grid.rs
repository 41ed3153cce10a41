use serde::{Deserialize, Serialize};

/// Integer cell coordinates on a space's grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

impl Position {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// True when `target` is exactly one orthogonal cell away.
    ///
    /// Zero movement, diagonals and multi-cell jumps all return false. Bounds
    /// are not consulted: a far out-of-range target fails on its delta alone.
    pub fn is_unit_step_to(&self, target: Position) -> bool {
        let dx = self.x.abs_diff(target.x);
        let dy = self.y.abs_diff(target.y);
        matches!((dx, dy), (1, 0) | (0, 1))
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Declared size of a space, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceDimensions {
    pub width: u32,
    pub height: u32,
}

impl SpaceDimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether `pos` lies inside `[0, width) x [0, height)`.
    pub fn contains(&self, pos: Position) -> bool {
        (0..i64::from(self.width)).contains(&pos.x) && (0..i64::from(self.height)).contains(&pos.y)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}
