use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_DEBOUNCE_MS: u64 = 400;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub autosave: AutosaveConfig,
    pub logging: LoggingConfig,
}

/// What happens to an edit that was queued behind a save which then came
/// back as a version conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConflictPolicy {
    /// Drop the queued edit and adopt the reloaded document.
    #[default]
    DiscardQueued,
    /// Keep the local tree and resubmit it against the reloaded version.
    ResubmitQueued,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveConfig {
    pub debounce_ms: u64,
    pub conflict_policy: ConflictPolicy,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl AutosaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

impl NumberOrString {
    fn as_millis(&self) -> Option<u64> {
        let value = match self {
            NumberOrString::Number(val) => *val,
            NumberOrString::String(val) => val.trim().trim_end_matches("ms").trim().parse::<f64>().ok()?,
        };
        (value.is_finite() && value >= 0.0).then(|| value.round() as u64)
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AutosaveConfigFile {
    debounce_ms: Option<NumberOrString>,
    conflict_policy: Option<ConflictPolicy>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LoggingConfigFile {
    filter: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    autosave: Option<AutosaveConfigFile>,
    logging: Option<LoggingConfigFile>,
}

pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&contents)
}

/// Parses a camelCase config document (strict JSON, then JSON5) and merges
/// it over the defaults.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let parsed: ConfigFile = match serde_json::from_str(contents) {
        Ok(parsed) => parsed,
        Err(json_err) => json5::from_str(contents)
            .map_err(|json5_err| ConfigError::Parse(format!("{json_err}; as JSON5: {json5_err}")))?,
    };

    let mut config = Config::default();
    if let Some(autosave) = parsed.autosave {
        if let Some(raw) = autosave.debounce_ms {
            config.autosave.debounce_ms = raw
                .as_millis()
                .ok_or_else(|| ConfigError::Parse("autosave.debounceMs must be a non-negative number".into()))?;
        }
        if let Some(policy) = autosave.conflict_policy {
            config.autosave.conflict_policy = policy;
        }
    }
    if let Some(filter) = parsed.logging.and_then(|logging| logging.filter) {
        let filter = filter.trim();
        if !filter.is_empty() {
            config.logging.filter = filter.to_string();
        }
    }
    Ok(config)
}
