use std::collections::HashMap;

use metaverse_core::grid::SpaceDimensions;
use metaverse_core::{SpaceId, UserId};

use crate::auth::IdentityError;
use crate::config::SpaceEntry;

/// Resolves an opaque credential token to a stable user id.
pub trait IdentityOracle: Send + Sync {
    fn resolve_identity(&self, token: &str) -> Result<UserId, IdentityError>;
}

/// Looks up a space's declared dimensions. `None` means the space does not exist.
pub trait SpaceOracle: Send + Sync {
    fn lookup_space(&self, space_id: &str) -> Option<SpaceDimensions>;
}

/// In-memory mirror of the space store, keyed by space id.
#[derive(Debug, Clone, Default)]
pub struct SpaceCatalog {
    spaces: HashMap<SpaceId, SpaceDimensions>,
}

impl SpaceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[SpaceEntry]) -> Self {
        let mut catalog = Self::new();
        for entry in entries {
            catalog.insert(
                entry.id.clone(),
                SpaceDimensions::new(entry.width, entry.height),
            );
        }
        catalog
    }

    /// Add or replace a space.
    pub fn insert(&mut self, space_id: impl Into<SpaceId>, dims: SpaceDimensions) {
        self.spaces.insert(space_id.into(), dims);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_space(mut self, space_id: impl Into<SpaceId>, dims: SpaceDimensions) -> Self {
        self.insert(space_id, dims);
        self
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}

impl SpaceOracle for SpaceCatalog {
    fn lookup_space(&self, space_id: &str) -> Option<SpaceDimensions> {
        self.spaces.get(space_id).copied()
    }
}
