use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use metaverse_core::grid::SpaceDimensions;

/// Default config file, read from the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "metaverse.toml";

/// Top-level server configuration, loaded from `metaverse.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub auth: AuthFileConfig,
    pub limits: LimitsConfig,
    pub log: LogConfig,
    pub spaces: Vec<SpaceEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3001".to_string(),
            auth: AuthFileConfig::default(),
            limits: LimitsConfig::default(),
            log: LogConfig::default(),
            spaces: Vec::new(),
        }
    }
}

/// Auth section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    /// Shared HS256 secret used by the user service to sign credential tokens.
    pub jwt_secret: Option<String>,
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Maximum concurrent WebSocket connections per IP address.
    pub max_ws_per_ip: usize,
    /// Outbound events buffered per connection before deliveries are dropped.
    pub member_message_buffer: usize,
    pub ws_rate_limit_per_sec: f64,
    /// Seconds a connection may stay unjoined. 0 disables the timeout.
    pub join_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 200,
            max_ws_per_ip: 10,
            member_message_buffer: 256,
            ws_rate_limit_per_sec: 50.0,
            join_timeout_secs: 30,
        }
    }
}

impl LimitsConfig {
    pub fn join_timeout(&self) -> Option<Duration> {
        (self.join_timeout_secs > 0).then(|| Duration::from_secs(self.join_timeout_secs))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Emit newline-delimited JSON instead of human-readable lines.
    pub json: bool,
}

/// A space mirrored from the external space store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpaceEntry {
    pub id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("listen_addr {0:?} is not a valid socket address")]
    InvalidListenAddr(String),
    #[error("auth.jwt_secret must be set (or METAVERSE_JWT_SECRET)")]
    MissingJwtSecret,
    #[error("limits.{0} must be > 0")]
    ZeroLimit(&'static str),
    #[error("limits.ws_rate_limit_per_sec must be a finite number >= 1, got {0}")]
    RateBelowOne(f64),
    #[error("space {0:?} is listed more than once")]
    DuplicateSpace(String),
    #[error("space {id:?} has zero-sized dimensions {width}x{height}")]
    EmptySpace { id: String, width: u32, height: u32 },
}

impl ServerConfig {
    /// Check the loaded configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddr(self.listen_addr.clone()));
        }

        match self.auth.jwt_secret.as_deref() {
            Some(secret) if !secret.is_empty() => {},
            _ => return Err(ConfigError::MissingJwtSecret),
        }

        if self.limits.max_ws_connections == 0 {
            return Err(ConfigError::ZeroLimit("max_ws_connections"));
        }
        if self.limits.max_ws_per_ip == 0 {
            return Err(ConfigError::ZeroLimit("max_ws_per_ip"));
        }
        if self.limits.member_message_buffer == 0 {
            return Err(ConfigError::ZeroLimit("member_message_buffer"));
        }
        // The bucket holds `rate` tokens; below one token no frame is ever admitted.
        let rate = self.limits.ws_rate_limit_per_sec;
        if !rate.is_finite() || rate < 1.0 {
            return Err(ConfigError::RateBelowOne(rate));
        }

        let mut seen = HashSet::new();
        for space in &self.spaces {
            if !seen.insert(space.id.as_str()) {
                return Err(ConfigError::DuplicateSpace(space.id.clone()));
            }
            if SpaceDimensions::new(space.width, space.height).is_empty() {
                return Err(ConfigError::EmptySpace {
                    id: space.id.clone(),
                    width: space.width,
                    height: space.height,
                });
            }
        }

        if self.spaces.is_empty() {
            tracing::warn!("No spaces configured; every join will be refused");
        }
        if self.auth.jwt_secret.is_some() && std::env::var("METAVERSE_JWT_SECRET").is_err() {
            tracing::warn!(
                "jwt_secret is set in config file; use METAVERSE_JWT_SECRET env var in production"
            );
        }

        Ok(())
    }

    /// Load config from `METAVERSE_CONFIG` (or `metaverse.toml`) if it exists,
    /// then apply env var overrides. A missing file means defaults.
    ///
    /// Runs before the tracing subscriber is installed, so it does not log.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("METAVERSE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content)
                .map_err(|source| ConfigError::Parse { path, source })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ServerConfig::default(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("METAVERSE_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Ok(secret) = std::env::var("METAVERSE_JWT_SECRET")
            && !secret.is_empty()
        {
            self.auth.jwt_secret = Some(secret);
        }
        if let Ok(val) = std::env::var("METAVERSE_LOG_JSON") {
            self.log.json = matches!(val.as_str(), "1" | "true" | "yes");
        }

        if let Ok(val) = std::env::var("METAVERSE_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Ok(val) = std::env::var("METAVERSE_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.ws_rate_limit_per_sec = n;
        }
        if let Ok(val) = std::env::var("METAVERSE_JOIN_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.limits.join_timeout_secs = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_secret() -> ServerConfig {
        ServerConfig {
            auth: AuthFileConfig {
                jwt_secret: Some("secret".to_string()),
            },
            ..ServerConfig::default()
        }
    }

    #[test]
    fn default_config_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr, "0.0.0.0:3001");
        assert!(cfg.auth.jwt_secret.is_none());
        assert!(cfg.spaces.is_empty());
        assert!(!cfg.log.json);
    }

    #[test]
    fn default_limits_config() {
        let cfg = LimitsConfig::default();
        assert_eq!(cfg.max_ws_connections, 200);
        assert_eq!(cfg.max_ws_per_ip, 10);
        assert_eq!(cfg.member_message_buffer, 256);
        assert!((cfg.ws_rate_limit_per_sec - 50.0).abs() < f64::EPSILON);
        assert_eq!(cfg.join_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_join_timeout_disables_it() {
        let cfg = LimitsConfig {
            join_timeout_secs: 0,
            ..LimitsConfig::default()
        };
        assert_eq!(cfg.join_timeout(), None);
    }

    #[test]
    fn parse_full_toml() {
        let toml_str = r#"
listen_addr = "127.0.0.1:9090"

[auth]
jwt_secret = "s3cret"

[limits]
max_ws_connections = 500
member_message_buffer = 64
join_timeout_secs = 5

[log]
json = true

[[spaces]]
id = "lobby"
width = 100
height = 200

[[spaces]]
id = "garden"
width = 10
height = 10
"#;
        let cfg = ServerConfig::from_toml(toml_str).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9090");
        assert_eq!(cfg.auth.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(cfg.limits.max_ws_connections, 500);
        assert_eq!(cfg.limits.member_message_buffer, 64);
        assert_eq!(cfg.limits.max_ws_per_ip, 10);
        assert!(cfg.log.json);
        assert_eq!(cfg.spaces.len(), 2);
        assert_eq!(
            cfg.spaces[0],
            SpaceEntry {
                id: "lobby".to_string(),
                width: 100,
                height: 200,
            }
        );
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_sections_use_defaults() {
        let cfg = ServerConfig::from_toml(r#"listen_addr = "0.0.0.0:8080""#).unwrap();
        assert_eq!(cfg.limits.max_ws_connections, 200);
        assert!(cfg.spaces.is_empty());
    }

    #[test]
    fn validate_rejects_invalid_addr() {
        let cfg = ServerConfig {
            listen_addr: "not-an-address".to_string(),
            ..with_secret()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidListenAddr(_))
        ));
    }

    #[test]
    fn validate_requires_secret() {
        assert!(matches!(
            ServerConfig::default().validate(),
            Err(ConfigError::MissingJwtSecret)
        ));
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut cfg = with_secret();
        cfg.limits.member_message_buffer = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ZeroLimit("member_message_buffer"))
        ));
    }

    #[test]
    fn validate_rejects_rates_that_admit_nothing() {
        for rate in [0.0, 0.5, -3.0, f64::NAN, f64::INFINITY] {
            let mut cfg = with_secret();
            cfg.limits.ws_rate_limit_per_sec = rate;
            assert!(
                matches!(cfg.validate(), Err(ConfigError::RateBelowOne(_))),
                "rate {rate} should be rejected"
            );
        }

        let mut cfg = with_secret();
        cfg.limits.ws_rate_limit_per_sec = 1.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_and_empty_spaces() {
        let mut cfg = with_secret();
        cfg.spaces = vec![
            SpaceEntry {
                id: "a".to_string(),
                width: 5,
                height: 5,
            },
            SpaceEntry {
                id: "a".to_string(),
                width: 6,
                height: 6,
            },
        ];
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicateSpace(_))));

        cfg.spaces = vec![SpaceEntry {
            id: "flat".to_string(),
            width: 10,
            height: 0,
        }];
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptySpace { .. })));
    }
}
