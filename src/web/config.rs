use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use strum_macros::Display;
use thiserror::Error;

use crate::poller::{PollSettings, RetentionPolicy};
use crate::source::{DEFAULT_FETCH_TIMEOUT, DEFAULT_SOURCE_URL};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub seed: SeedConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    pub url: String,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollConfig {
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub interval: Duration,
    /// Stop collecting for the rest of the day once this many samples exist.
    pub day_quota: Option<usize>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            // About 1000 samples per day.
            interval: Duration::from_secs(86),
            day_quota: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub days: u32,
    /// Run the eviction sweep every this many poll ticks.
    pub sweep_every: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            days: 7,
            sweep_every: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Jsonl,
    Sqlite,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "jsonl" | "json" => Ok(StorageBackend::Jsonl),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
    /// Ring size for the memory backend.
    pub memory_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: PathBuf::from("iss_data.db"),
            memory_capacity: 100_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SeedConfig {
    pub enabled: bool,
    pub days: u32,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            days: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_dir: default_static_dir(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load the optional file, apply process environment overrides, validate.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            let port: u16 = parse_env("PORT", &port)?;
            self.web.bind = format!("0.0.0.0:{port}");
        }
        if let Some(bind) = lookup("ISS_BIND") {
            self.web.bind = bind;
        }
        if let Some(url) = lookup("ISS_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(timeout) = lookup("ISS_FETCH_TIMEOUT") {
            self.source.timeout = parse_duration(&timeout)
                .map_err(|e| ConfigError::invalid("ISS_FETCH_TIMEOUT", e))?;
        }
        if let Some(interval) = lookup("ISS_POLL_INTERVAL") {
            self.poll.interval = parse_duration(&interval)
                .map_err(|e| ConfigError::invalid("ISS_POLL_INTERVAL", e))?;
        }
        if let Some(quota) = lookup("ISS_DAY_QUOTA") {
            let quota: usize = parse_env("ISS_DAY_QUOTA", &quota)?;
            self.poll.day_quota = (quota > 0).then_some(quota);
        }
        if let Some(days) = lookup("ISS_RETENTION_DAYS") {
            let days: u32 = parse_env("ISS_RETENTION_DAYS", &days)?;
            self.retention.enabled = days > 0;
            if days > 0 {
                self.retention.days = days;
            }
        }
        if let Some(backend) = lookup("ISS_STORAGE_BACKEND") {
            self.storage.backend = backend
                .parse()
                .map_err(|e: String| ConfigError::invalid("ISS_STORAGE_BACKEND", e))?;
        }
        if let Some(path) = lookup("ISS_STORAGE_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(seed) = lookup("ISS_SEED") {
            self.seed.enabled = parse_flag(&seed)
                .ok_or_else(|| ConfigError::invalid("ISS_SEED", format!("'{seed}' is not a flag")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.interval.is_zero() {
            return Err(ConfigError::invalid("poll.interval", "must be non-zero"));
        }
        if self.source.timeout.is_zero() {
            return Err(ConfigError::invalid("source.timeout", "must be non-zero"));
        }
        if self.retention.enabled && self.retention.days == 0 {
            return Err(ConfigError::invalid("retention.days", "must be at least 1"));
        }
        if self.retention.enabled && self.retention.sweep_every == 0 {
            return Err(ConfigError::invalid(
                "retention.sweep_every",
                "must be at least 1",
            ));
        }
        if self.poll.day_quota == Some(0) {
            return Err(ConfigError::invalid("poll.day_quota", "must be at least 1"));
        }
        Ok(())
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.poll.interval,
            day_quota: self.poll.day_quota,
            retention: self.retention.enabled.then_some(RetentionPolicy {
                days: self.retention.days,
                sweep_every: self.retention.sweep_every,
            }),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, e.to_string()))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Bare integers are seconds; anything else goes through humantime (`90s`, `2m`).
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(value).map_err(|e| e.to_string())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
        Raw::Text(text) => parse_duration(&text).map_err(de::Error::custom),
    }
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_poll_every_86_seconds() {
        let config = Config::default();
        assert_eq!(config.source.url, DEFAULT_SOURCE_URL);
        assert_eq!(config.poll.interval, Duration::from_secs(86));
        assert_eq!(config.source.timeout, Duration::from_secs(10));
        assert!(!config.retention.enabled);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.web.bind, "0.0.0.0:5000");
        assert!(config.validate().is_ok());
        assert!(config.poll_settings().retention.is_none());
    }

    #[test]
    fn parses_partial_yaml_with_humantime() {
        let yaml = r#"
poll:
  interval: 30s
  day_quota: 1000
retention:
  enabled: true
  days: 2
storage:
  backend: jsonl
  path: data/iss.jsonl
source:
  timeout: 8
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.poll.interval, Duration::from_secs(30));
        assert_eq!(config.poll.day_quota, Some(1000));
        assert_eq!(config.source.timeout, Duration::from_secs(8));
        assert_eq!(config.source.url, DEFAULT_SOURCE_URL);
        assert_eq!(config.storage.backend, StorageBackend::Jsonl);
        assert_eq!(config.retention.sweep_every, 10);

        let settings = config.poll_settings();
        assert_eq!(settings.retention.unwrap().days, 2);
        assert_eq!(config.web.bind, "0.0.0.0:5000");
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("PORT", "8080"),
                ("ISS_SOURCE_URL", "http://localhost:9999/iss-now.json"),
                ("ISS_POLL_INTERVAL", "1"),
                ("ISS_FETCH_TIMEOUT", "500ms"),
                ("ISS_RETENTION_DAYS", "3"),
                ("ISS_DAY_QUOTA", "0"),
                ("ISS_STORAGE_BACKEND", "memory"),
                ("ISS_SEED", "yes"),
            ]))
            .unwrap();

        assert_eq!(config.web.bind, "0.0.0.0:8080");
        assert_eq!(config.source.url, "http://localhost:9999/iss-now.json");
        assert_eq!(config.poll.interval, Duration::from_secs(1));
        assert_eq!(config.source.timeout, Duration::from_millis(500));
        assert!(config.retention.enabled);
        assert_eq!(config.retention.days, 3);
        assert_eq!(config.poll.day_quota, None);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(config.seed.enabled);
    }

    #[test]
    fn explicit_bind_wins_over_port() {
        let mut config = Config::default();
        config
            .apply_env(env(&[("PORT", "8080"), ("ISS_BIND", "127.0.0.1:7000")]))
            .unwrap();
        assert_eq!(config.web.bind, "127.0.0.1:7000");
    }

    #[test]
    fn rejects_bad_overrides() {
        let mut config = Config::default();
        assert!(config.apply_env(env(&[("PORT", "eighty")])).is_err());
        assert!(config
            .apply_env(env(&[("ISS_STORAGE_BACKEND", "postgres")]))
            .is_err());
        assert!(config.apply_env(env(&[("ISS_SEED", "maybe")])).is_err());
        assert!(config
            .apply_env(env(&[("ISS_POLL_INTERVAL", "soon")]))
            .is_err());
    }

    #[test]
    fn zero_interval_is_invalid() {
        let mut config = Config::default();
        config.poll.interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn round_trips_through_yaml() {
        let config = Config::default();
        let text = serde_yaml::to_string(&config).unwrap();
        assert!(text.contains("1m 26s"));
        let back: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.poll.interval, config.poll.interval);
    }
}
