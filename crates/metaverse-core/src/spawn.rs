use rand::Rng;

use crate::grid::{Position, SpaceDimensions};

/// Chooses where a session appears when it joins a space.
pub trait SpawnPolicy: Send + Sync {
    fn spawn(&self, dims: SpaceDimensions) -> Position;
}

/// Uniform pick over every cell of the space.
///
/// A zero-sized axis has no cells; that coordinate is pinned to 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformSpawn;

impl SpawnPolicy for UniformSpawn {
    fn spawn(&self, dims: SpaceDimensions) -> Position {
        let mut rng = rand::rng();
        let x = if dims.width == 0 {
            0
        } else {
            rng.random_range(0..dims.width)
        };
        let y = if dims.height == 0 {
            0
        } else {
            rng.random_range(0..dims.height)
        };
        Position::new(i64::from(x), i64::from(y))
    }
}

/// Always spawns at the same cell. Used by tests and scripted demos.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpawn(pub Position);

impl SpawnPolicy for FixedSpawn {
    fn spawn(&self, _dims: SpaceDimensions) -> Position {
        self.0
    }
}
