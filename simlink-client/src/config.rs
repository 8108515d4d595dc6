//! Session configuration.
//!
//! Timing constants (pump interval, watchdog, staleness, rate limiting)
//! were tuned against a live simulation; they only affect responsiveness,
//! never correctness, so all of them are exposed here.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Top-level configuration for a client session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Where the simulation listens.
    pub network: NetworkConfig,
    /// Pump and watchdog timing.
    pub transport: TransportConfig,
    /// Entity directory settings.
    pub directory: DirectoryConfig,
    /// Busy-poll protection.
    pub rate_limit: RateLimitConfig,
    /// Tick synchronisation.
    pub sync: SyncConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Socket send/receive buffer size in bytes.
    pub socket_buffer_size: u32,
}

/// Pump and watchdog timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Sleep between send pump iterations, in milliseconds.
    pub pump_interval_ms: u64,
    /// Silence after which the peer is presumed dead, in milliseconds.
    pub watchdog_timeout_ms: u64,
    /// How often the watchdog checks, in milliseconds.
    pub watchdog_period_ms: u64,
    /// Report the program's memory use to the simulation.
    pub memory_telemetry: bool,
    /// Attach a memory report to every n-th outbound batch.
    pub memory_telemetry_every: u32,
}

/// Entity directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Time without inbound data after which an entity is gone, in milliseconds.
    pub staleness_ms: u64,
}

/// Busy-poll protection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Two accesses closer than this count as a burst, in microseconds.
    pub window_us: u64,
    /// Burst length that forces a round trip.
    pub threshold: u32,
}

/// Tick synchronisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound for one `run_main` wait, in milliseconds.
    pub tick_timeout_ms: u64,
    /// Default timeout for forced round trips, in milliseconds.
    pub await_timeout_ms: u64,
    /// Property carrying the simulation clock handed to event listeners.
    pub clock_property: String,
    /// Cap on queued remote log lines before a forced flush.
    pub log_append_cap: usize,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 18189,
            connect_timeout_ms: 5000,
            socket_buffer_size: 64 * 1024,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pump_interval_ms: 5,
            watchdog_timeout_ms: 5000,
            watchdog_period_ms: 100,
            memory_telemetry: true,
            memory_telemetry_every: 10,
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self { staleness_ms: 3000 }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_us: 3000,
            threshold: 20,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_timeout_ms: 3000,
            await_timeout_ms: 6000,
            clock_property: "SimEnvManager.Current.SimTime".into(),
            log_append_cap: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Durations ────────────────────────────────────────────────────

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl TransportConfig {
    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms.max(1))
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn watchdog_period(&self) -> Duration {
        Duration::from_millis(self.watchdog_period_ms.max(1))
    }
}

impl DirectoryConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_millis(self.staleness_ms)
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_micros(self.window_us)
    }
}

impl SyncConfig {
    pub fn tick_timeout(&self) -> Duration {
        Duration::from_millis(self.tick_timeout_ms)
    }

    pub fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl SessionConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Parse from a TOML string.
    pub fn from_toml(text: &str) -> Result<Self, SessionError> {
        Ok(toml::from_str(text)?)
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let cfg = Self::default();
        let text = toml::to_string_pretty(&cfg).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────
