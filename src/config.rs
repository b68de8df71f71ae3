use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DbConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub source: SourceConfig,
    /// When set, decoded readings are pushed to a remote server instead of stored locally.
    #[serde(default)]
    pub forward: Option<ForwardConfig>,
    #[serde(default)]
    pub levels: LevelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// sqlx SQLite URL, e.g. "sqlite://power.db" or "sqlite::memory:"
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

fn default_api_host() -> String {
    "0.0.0.0".into()
}

fn default_api_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Serial,
    Simulated,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,
    /// Pause after every decoded frame before reading on
    #[serde(default)]
    pub read_delay_ms: u64,
    /// Upper bound on a partially received frame
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default)]
    pub serial: Option<SerialConfig>,
    #[serde(default)]
    pub simulated: SimulatedConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            read_delay_ms: 0,
            max_frame_bytes: default_max_frame_bytes(),
            serial: None,
            simulated: SimulatedConfig::default(),
        }
    }
}

fn default_source_kind() -> SourceKind {
    SourceKind::None
}

fn default_max_frame_bytes() -> usize {
    8192
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    9600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    #[serde(default = "default_sim_interval_ms")]
    pub interval_ms: u64,
    /// Mean power drawn by the synthetic meter
    #[serde(default = "default_sim_power_w")]
    pub power_w: f64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sim_interval_ms(),
            power_w: default_sim_power_w(),
        }
    }
}

fn default_sim_interval_ms() -> u64 {
    1000
}

fn default_sim_power_w() -> f64 {
    450.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Base URL of the serving process, e.g. "http://power-server:8080"
    pub url: String,
    #[serde(default = "default_forward_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_forward_timeout_ms() -> u64 {
    5000
}

/// Power thresholds (W) for the low/middle/high consumption level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelConfig {
    #[serde(default = "default_low_max_w")]
    pub low_max_w: f64,
    #[serde(default = "default_middle_max_w")]
    pub middle_max_w: f64,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            low_max_w: default_low_max_w(),
            middle_max_w: default_middle_max_w(),
        }
    }
}

fn default_low_max_w() -> f64 {
    500.0
}

fn default_middle_max_w() -> f64 {
    2000.0
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// Afterwards, if DATABASE_URL env is set, override `database.url`.
    /// If SERIAL_PORT env is set, override `source.serial.path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, anyhow::Error> {
        let expanded = expand_env_placeholders(raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            cfg.database.url = url;
        }

        if let Ok(port) = std::env::var("SERIAL_PORT") {
            match cfg.source.serial.as_mut() {
                Some(serial) => serial.path = port,
                None => {
                    cfg.source.serial = Some(SerialConfig {
                        path: port,
                        baud_rate: default_baud_rate(),
                    })
                }
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(self.api.port != 0, "api.port cannot be 0");
        anyhow::ensure!(
            self.source.kind != SourceKind::Serial || self.source.serial.is_some(),
            "source.kind 'serial' requires a source.serial section"
        );
        anyhow::ensure!(
            self.source.max_frame_bytes >= 64,
            "source.max_frame_bytes must be at least 64"
        );
        anyhow::ensure!(
            self.levels.low_max_w < self.levels.middle_max_w,
            "levels.low_max_w must be below levels.middle_max_w"
        );
        if let Some(fwd) = &self.forward {
            anyhow::ensure!(!fwd.url.is_empty(), "forward.url cannot be empty");
            anyhow::ensure!(
                self.source.kind != SourceKind::None,
                "forward mode needs a local source (serial or simulated)"
            );
        }
        Ok(())
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$".
fn expand_env_placeholders(input: &str) -> Result<String, anyhow::Error> {
    use anyhow::Context;

    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, close)
            .with_context(|| format!("unterminated env placeholder: missing '{}'", close))?;
        let val = std::env::var(&var)
            .with_context(|| format!("missing environment variable: {}", var))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Read characters until we hit `end`, consuming the delimiter.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}
