//! Configuration management for treezam.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "treezam";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "treezam.db";

/// Default upload directory name inside the data directory.
const UPLOAD_DIR_NAME: &str = "uploads";

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "TREEZAM_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `TREEZAM_`, sections split by `__`)
/// 2. TOML config file at `~/.config/treezam/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Authentication configuration.
    pub auth: AuthConfig,
    /// Gamification rules.
    pub game: GameConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// How long browsers may cache CORS preflight responses.
    pub cors_max_age_secs: u64,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/treezam/treezam.db`
    pub database_path: Option<PathBuf>,
    /// Directory holding uploaded images.
    /// Defaults to `~/.local/share/treezam/uploads`
    pub upload_dir: Option<PathBuf>,
    /// Largest accepted image upload in bytes.
    pub max_upload_bytes: usize,
    /// How often expired sessions are removed, in minutes.
    pub session_prune_interval_minutes: u32,
}

/// Authentication configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Lifetime of a login session in hours.
    pub session_ttl_hours: u32,
    /// Minimum accepted password length.
    pub min_password_len: usize,
}

/// Gamification rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Experience granted for every identification.
    pub identification_experience: i64,
    /// Experience needed per level.
    pub experience_per_level: i64,
    /// Radius used by location challenges that don't specify one.
    pub default_challenge_radius_m: f64,
    /// Reward experience for challenges created without a reward.
    pub default_challenge_experience: i64,
    /// Longest streak that is counted.
    pub streak_max_days: u32,
    /// Number of entries on the global leaderboard.
    pub global_leaderboard_limit: usize,
    /// Number of entries on a location leaderboard.
    pub location_leaderboard_limit: usize,
    /// Number of identifications returned by `my-trees`.
    pub my_trees_limit: usize,
    /// Number of entries in the stats `recentActivity` list.
    pub recent_activity_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_max_age_secs: 60 * 60,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Resolved to default at runtime
            upload_dir: None,
            max_upload_bytes: 10 * 1024 * 1024,
            session_prune_interval_minutes: 60,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: 7 * 24,
            min_password_len: 6,
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            identification_experience: 10,
            experience_per_level: 100,
            default_challenge_radius_m: 5000.0,
            default_challenge_experience: 100,
            streak_max_days: 365,
            global_leaderboard_limit: 100,
            location_leaderboard_limit: 50,
            my_trees_limit: 100,
            recent_activity_limit: 10,
        }
    }
}

impl Config {
    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(validation("server.port must be greater than 0"));
        }

        if self.server.host.parse::<std::net::IpAddr>().is_err() {
            return Err(validation(format!(
                "server.host is not an IP address: {}",
                self.server.host
            )));
        }

        if self.storage.max_upload_bytes == 0 {
            return Err(validation("storage.max_upload_bytes must be greater than 0"));
        }

        if self.storage.session_prune_interval_minutes == 0 {
            return Err(validation(
                "storage.session_prune_interval_minutes must be greater than 0",
            ));
        }

        if self.auth.session_ttl_hours == 0 {
            return Err(validation("auth.session_ttl_hours must be greater than 0"));
        }

        if self.game.experience_per_level <= 0 {
            return Err(validation("game.experience_per_level must be greater than 0"));
        }

        if self.game.identification_experience < 0 || self.game.default_challenge_experience < 0 {
            return Err(validation("game experience rewards cannot be negative"));
        }

        if !(self.game.default_challenge_radius_m.is_finite()
            && self.game.default_challenge_radius_m > 0.0)
        {
            return Err(validation(
                "game.default_challenge_radius_m must be a positive number",
            ));
        }

        if self.game.streak_max_days == 0 {
            return Err(validation("game.streak_max_days must be greater than 0"));
        }

        Ok(())
    }

    /// Get the socket address the server binds to.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not a valid IP address.
    pub fn bind_address(&self) -> Result<SocketAddr> {
        let ip = self
            .server
            .host
            .parse()
            .map_err(|_| validation(format!("invalid host: {}", self.server.host)))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the upload directory, resolving defaults if not set.
    #[must_use]
    pub fn upload_dir(&self) -> PathBuf {
        self.storage
            .upload_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(UPLOAD_DIR_NAME))
    }

    /// Get the session lifetime.
    #[must_use]
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.auth.session_ttl_hours))
    }

    /// Get the session prune interval as a Duration.
    #[must_use]
    pub fn session_prune_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.storage.session_prune_interval_minutes) * 60)
    }

    /// Get the CORS preflight cache duration.
    #[must_use]
    pub fn cors_max_age(&self) -> Duration {
        Duration::from_secs(self.server.cors_max_age_secs)
    }
}

fn validation(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}
