/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Configuration loaded from XDG-compliant locations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConfigError, TransportError};
use crate::transport::Endpoint;

/// Environment variable that overrides the default cache port.
pub const CACHE_PORT_ENV: &str = "CACHE_PORT";

/// Configuration for a courier process.
///
/// All values have defaults, so an empty file (or no file) is valid.
///
/// # Example Configuration File
///
/// ```toml
/// [dispatch]
/// saturation = "queue"   # queue | block | drop
///
/// [transport]
/// pull_address = "tcp://0.0.0.0:5555"
/// max_frame_size = 1048576
/// queue_capacity = 1024
///
/// [database]
/// host = "db.internal"
/// user = "worker"
/// database = "app"
/// password = "secret"
/// port = 5432
/// min_connections = 1
/// max_connections = 2
/// idle_timeout_ms = 30000
///
/// [cache]
/// host = "cache.internal"
/// # port = 6379   # falls back to $CACHE_PORT, then 6379
///
/// [logging]
/// level = "info"
/// # directory = "/var/log/courier"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Dispatcher behaviour.
    pub dispatch: DispatchConfig,
    /// Socket settings.
    pub transport: TransportConfig,
    /// Database pool settings.
    pub database: DatabaseConfig,
    /// Cache client settings.
    pub cache: CacheConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// What the dispatcher does with a message that arrives while every pool
/// slot is leased.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaturationPolicy {
    /// Spawn the dispatch anyway; it waits for a slot while the receive loop
    /// keeps reading. Waiting dispatches are not bounded, so a producer that
    /// outpaces the handlers grows memory without limit.
    #[default]
    Queue,
    /// Stop reading until a slot frees, pushing back on producers through
    /// the transport.
    Block,
    /// Log and drop the message.
    Drop,
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Behaviour when the pool is saturated. The default, `queue`, holds an
    /// unbounded number of waiting dispatches in memory.
    pub saturation: SaturationPolicy,
}

/// Socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Address the dispatcher's pull endpoint binds to.
    pub pull_address: String,
    /// Maximum accepted frame payload in bytes.
    pub max_frame_size: usize,
    /// Frames read ahead of the dispatcher.
    pub queue_capacity: usize,
}

/// Database pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Database name.
    pub database: String,
    /// Connections kept open while idle.
    pub min_connections: u32,
    /// Pool ceiling; also the dispatcher's concurrency limit.
    pub max_connections: u32,
    /// How long an idle connection may stay open, in milliseconds.
    #[serde(rename = "idle_timeout_ms")]
    pub idle_timeout: u64,
}

/// Cache client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache host.
    pub host: String,
    /// Cache port. `None` defers to `$CACHE_PORT`, then 6379.
    pub port: Option<u16>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Directory for daily-rolling log files. Logs go to stdout only when unset.
    pub directory: Option<PathBuf>,
    /// File name prefix for rolling log files.
    pub file_prefix: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pull_address: "tcp://127.0.0.1:5555".to_string(),
            max_frame_size: 1_048_576, // 1 MiB
            queue_capacity: 1024,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            min_connections: 1,
            max_connections: 2,
            idle_timeout: 30_000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "courier.log".to_string(),
        }
    }
}

impl TransportConfig {
    /// Parse [`pull_address`](Self::pull_address).
    pub fn pull_endpoint(&self) -> Result<Endpoint, TransportError> {
        self.pull_address.parse()
    }
}

impl DatabaseConfig {
    /// Get the idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout)
    }

    /// Pool ceiling as a permit count (at least one).
    #[must_use]
    pub fn concurrency(&self) -> usize {
        usize::try_from(self.max_connections.max(1)).unwrap_or(usize::MAX)
    }
}

impl CacheConfig {
    /// Resolved cache port: configured value, else `$CACHE_PORT`, else 6379.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
            .or_else(|| {
                std::env::var(CACHE_PORT_ENV)
                    .ok()
                    .and_then(|raw| raw.trim().parse().ok())
            })
            .unwrap_or(6379)
    }
}

impl CourierConfig {
    /// Load configuration from XDG-compliant locations.
    ///
    /// Reads `$XDG_CONFIG_HOME/courier/config.toml` (falling back to
    /// `~/.config/courier/config.toml`). A missing, unreadable or malformed
    /// file is logged and the defaults are used.
    #[must_use]
    pub fn load() -> Self {
        let xdg_dirs = match xdg::BaseDirectories::with_prefix("courier") {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        xdg_dirs.find_config_file("config.toml").map_or_else(
            || {
                info!("No configuration file found, using defaults");
                Self::default()
            },
            |path| match Self::load_from(&path) {
                Ok(config) => {
                    info!("Loaded configuration from: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("{} ({}), using defaults", e, path.display());
                    Self::default()
                }
            },
        )
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }
}
