use crate::codec::{SignatureCheck, LATEST_PROTOCOL_VERSION, LEGACY_PROTOCOL_VERSION};
use crate::error::ConfigError;
use crate::pool::DEFAULT_POOL_CAPACITY;
use crate::verify::DEFAULT_VERIFY_CHUNK;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use std::{fs, path::Path};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub sync: TxSync,
    #[serde(default)]
    pub router: Router,
    #[serde(default)]
    pub pool: Pool,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub log: Log,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TxSync {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
    #[serde(default)]
    pub signature_check: SignatureCheck,
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    #[serde(default = "default_verify_chunk")]
    pub verify_chunk: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Router {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_branching")]
    pub branching: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Pool {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metrics {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    /// Default `tracing` filter directive; `RUST_LOG` wins when set.
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_protocol_version() -> u32 { LATEST_PROTOCOL_VERSION }
fn default_drain_interval_ms() -> u64 { 50 }
fn default_verify_chunk() -> usize { DEFAULT_VERIFY_CHUNK }
fn default_true() -> bool { true }
fn default_branching() -> usize { 3 }
fn default_capacity() -> usize { DEFAULT_POOL_CAPACITY }
fn default_bind() -> String { "127.0.0.1:9100".into() }
fn default_level() -> String { "info".into() }

impl Default for TxSync {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            signature_check: SignatureCheck::default(),
            drain_interval_ms: default_drain_interval_ms(),
            verify_chunk: default_verify_chunk(),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self { enabled: default_true(), branching: default_branching() }
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self { capacity: default_capacity() }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self { enabled: false, bind: default_bind() }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self { level: default_level() }
    }
}

impl TxSync {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(LEGACY_PROTOCOL_VERSION..=LATEST_PROTOCOL_VERSION).contains(&self.sync.protocol_version) {
            return Err(ConfigError::ProtocolVersion(self.sync.protocol_version));
        }
        if self.sync.drain_interval_ms == 0 {
            return Err(ConfigError::ZeroDrainInterval);
        }
        if self.sync.verify_chunk == 0 {
            return Err(ConfigError::ZeroVerifyChunk);
        }
        if self.router.branching == 0 {
            return Err(ConfigError::ZeroBranching);
        }
        if self.pool.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

/// Read the TOML file at `p`, deserialize into `Config` and validate it.
///
/// # Errors
/// * Returns an anyhow::Error if the file cannot be read, parsed or fails validation.
pub fn load<P: AsRef<Path>>(p: P) -> Result<Config> {
    let text = fs::read_to_string(&p)
        .with_context(|| format!("couldn't read config file {}", p.as_ref().display()))?;
    load_from_str(&text)
        .with_context(|| format!("invalid config file {}", p.as_ref().display()))
}

pub fn load_from_str(text: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(text).context("invalid TOML in config")?;
    cfg.validate()?;
    Ok(cfg)
}
