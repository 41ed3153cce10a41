use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use metaverse_core::spawn::{SpawnPolicy, UniformSpawn};

use crate::auth::JwtIdentity;
use crate::config::{ConfigError, ServerConfig};
use crate::oracle::{IdentityOracle, SpaceCatalog, SpaceOracle};
use crate::registry::RoomRegistry;

pub type SharedRoomRegistry = Arc<RoomRegistry>;

#[derive(Clone)]
pub struct AppState {
    pub rooms: SharedRoomRegistry,
    pub identity: Arc<dyn IdentityOracle>,
    pub spaces: Arc<dyn SpaceOracle>,
    pub spawn: Arc<dyn SpawnPolicy>,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
    pub ws_per_ip: Arc<Mutex<HashMap<IpAddr, usize>>>,
}

impl AppState {
    /// Validate `config` and wire the default collaborators: JWT identity,
    /// the configured space catalog, and uniform spawn placement.
    pub fn new(config: ServerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let secret = config
            .auth
            .jwt_secret
            .clone()
            .ok_or(ConfigError::MissingJwtSecret)?;
        let catalog = SpaceCatalog::from_entries(&config.spaces);
        Ok(Self::with_collaborators(
            config,
            Arc::new(JwtIdentity::new(secret)),
            Arc::new(catalog),
            Arc::new(UniformSpawn),
        ))
    }

    /// Build state around explicit collaborators, skipping validation.
    pub fn with_collaborators(
        config: ServerConfig,
        identity: Arc<dyn IdentityOracle>,
        spaces: Arc<dyn SpaceOracle>,
        spawn: Arc<dyn SpawnPolicy>,
    ) -> Self {
        Self {
            rooms: Arc::new(RoomRegistry::new()),
            identity,
            spaces,
            spawn,
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            ws_per_ip: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Holds one of the server-wide WebSocket slots for as long as it lives.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    /// Reserve a slot, or `None` if `max` connections are already open or
    /// upgrading. Check and increment are one atomic step.
    pub fn try_acquire(count: Arc<AtomicUsize>, max: usize) -> Option<Self> {
        count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(Self { count })
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Holds one of an IP address's connection slots.
pub struct IpConnectionGuard {
    ip: IpAddr,
    slots: Arc<Mutex<HashMap<IpAddr, usize>>>,
}

impl IpConnectionGuard {
    /// Claim a slot for `ip`, or `None` if it already holds `max` connections.
    pub fn try_acquire(
        ip: IpAddr,
        slots: Arc<Mutex<HashMap<IpAddr, usize>>>,
        max: usize,
    ) -> Option<Self> {
        {
            let mut map = slots.lock().ok()?;
            let count = map.entry(ip).or_insert(0);
            if *count >= max {
                return None;
            }
            *count += 1;
        }
        Some(Self { ip, slots })
    }
}

impl Drop for IpConnectionGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = self.slots.lock()
            && let Some(count) = map.get_mut(&self.ip)
        {
            *count = count.saturating_sub(1);
            if *count == 0 {
                map.remove(&self.ip);
            }
        }
    }
}
