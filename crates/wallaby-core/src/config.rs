//! Configuration system for Wallaby.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $WALLABY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/wallaby/config.toml
//!   3. ~/.config/wallaby/config.toml
//!
//! Everything here is immutable for the lifetime of a search. The structs
//! are plain values handed to constructors, so several independent
//! searches can coexist in one process (the tests do exactly that).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::group::{PointBytes, ScalarBytes};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WallabyConfig {
    pub search: SearchConfig,
    pub buffer: BufferConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
}

/// Parameters of the search itself. Shared verbatim by server and
/// workers — the handshake digest is computed over these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Target point, hex-encoded canonical encoding. Required for a run.
    pub target: String,
    /// Start of the search interval, hex-encoded scalar. Empty = zero.
    pub range_start: String,
    /// Width of the search interval: [start, start + 2^range_bits).
    pub range_bits: u8,
    /// Distinguished-point mask width. Higher = rarer DPs, less merge
    /// traffic, longer time to detect a collision that already happened.
    pub dp_bits: u8,
    /// Jump-table seed. 0 = pick one at startup (worker-local choice;
    /// jump tables need not agree across workers).
    pub jump_seed: u64,
    pub tame_herds: u16,
    pub wild_herds: u16,
}

/// Per-lane DP buffer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Records held per lane before overflow kicks in.
    pub capacity: usize,
    /// Unconditional drain-and-send period in milliseconds — bounds how
    /// stale a buffered DP can get even on a quiet lane.
    pub flush_period_ms: u64,
}

/// Merge-server tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Collision-table shard count.
    pub shard_count: usize,
    /// Seconds of silence before a client session is reaped.
    pub client_timeout_secs: u64,
    /// How often the reaper sweeps the session table.
    pub reap_interval_secs: u64,
    /// Period of the searching-status heartbeat broadcast.
    pub heartbeat_secs: u64,
    /// Hard cap on records per batch frame, regardless of what a client
    /// proposes.
    pub max_batch: u32,
    /// Grace period between broadcasting a solution and closing up.
    pub drain_grace_secs: u64,
}

/// Worker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: String,
    /// Independent producing units, each with its own buffer and walker.
    pub lanes: usize,
    /// Kangaroos advanced per lane per dispatch.
    pub lane_width: usize,
    /// Records per batch frame this worker proposes at handshake.
    pub max_batch: u32,
    pub reconnect_backoff_ms: u64,
    pub reconnect_backoff_max_ms: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            range_start: String::new(),
            range_bits: 64,
            dp_bits: 12,
            jump_seed: 0,
            tame_herds: 1,
            wild_herds: 1,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 262_144,
            flush_period_ms: 2_000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:17403".to_string(),
            shard_count: 256,
            client_timeout_secs: 3_600,
            reap_interval_secs: 10,
            heartbeat_secs: 30,
            max_batch: 65_536,
            drain_grace_secs: 5,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:17403".to_string(),
            lanes: 1,
            lane_width: 128,
            max_batch: 65_536,
            reconnect_backoff_ms: 500,
            reconnect_backoff_max_ms: 30_000,
        }
    }
}

// ── Hex field decoding ───────────────────────────────────────────────────────

impl SearchConfig {
    /// Decoded target encoding; `None` when unset.
    pub fn target_bytes(&self) -> Result<Option<PointBytes>, ConfigError> {
        if self.target.is_empty() {
            return Ok(None);
        }
        decode_hex32("search.target", &self.target).map(Some)
    }

    /// Decoded range start; all-zero when unset.
    pub fn range_start_bytes(&self) -> Result<ScalarBytes, ConfigError> {
        if self.range_start.is_empty() {
            return Ok([0u8; 32]);
        }
        decode_hex32("search.range_start", &self.range_start)
    }
}

fn decode_hex32(field: &'static str, value: &str) -> Result<[u8; 32], ConfigError> {
    let raw = hex::decode(value).map_err(|_| ConfigError::BadHex(field))?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| ConfigError::BadHex(field))?;
    Ok(bytes)
}

// ── Path helpers ─────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("wallaby")
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("{0} is not 32 bytes of hex")]
    BadHex(&'static str),
    #[error("search.target is required")]
    MissingTarget,
}

// ── Loading ──────────────────────────────────────────────────────────────────

impl WallabyConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            WallabyConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("WALLABY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply WALLABY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WALLABY_SEARCH__TARGET") {
            self.search.target = v;
        }
        if let Ok(v) = std::env::var("WALLABY_SEARCH__DP_BITS") {
            if let Ok(bits) = v.parse() {
                self.search.dp_bits = bits;
            }
        }
        if let Ok(v) = std::env::var("WALLABY_SEARCH__JUMP_SEED") {
            if let Ok(seed) = v.parse() {
                self.search.jump_seed = seed;
            }
        }
        if let Ok(v) = std::env::var("WALLABY_SERVER__LISTEN") {
            self.server.listen = v;
        }
        if let Ok(v) = std::env::var("WALLABY_CLIENT__SERVER") {
            self.client.server = v;
        }
        if let Ok(v) = std::env::var("WALLABY_CLIENT__LANES") {
            if let Ok(lanes) = v.parse() {
                self.client.lanes = lanes;
            }
        }
    }
}
