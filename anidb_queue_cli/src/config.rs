use crate::paths;
use anidb_queue_core::config::MAX_TIMING_SECS;
use anidb_queue_core::{AniDbConfig, QueueConfig, QueueName, SessionConfig};
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Prefix of configuration environment variables; `__` separates sections
pub const ENV_PREFIX: &str = "ANIDB_QUEUE_";

/// Shown instead of secret values
const MASK: &str = "********";

const SECRET_KEYS: &[&str] = &["anidb.password"];

#[derive(Deserialize, Serialize, Debug, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub anidb: AniDbConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub queues: QueueConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Where persistent state lives; unset paths resolve to the data directory
#[derive(Deserialize, Serialize, Debug, Default, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: Option<PathBuf>,
    pub images_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(paths::get_database_path)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.images_dir.clone().unwrap_or_else(paths::get_images_dir)
    }
}

impl AppConfig {
    /// Reject combinations the service cannot run with
    pub fn validate(&self) -> Result<()> {
        self.queues.validate()?;
        self.session.validate()?;
        Ok(())
    }
}

/// Configuration manager that handles XDG-compliant paths and layered configuration
pub struct ConfigManager {
    config_path: PathBuf,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    /// Create a new ConfigManager with the default XDG-compliant path
    pub fn new() -> Self {
        Self {
            config_path: paths::get_config_path(),
        }
    }

    /// Create a ConfigManager reading a specific file
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// `--config` wins over the default location
    pub fn from_override(path: Option<PathBuf>) -> Self {
        path.map(Self::with_path).unwrap_or_default()
    }

    pub fn get_config_path(&self) -> PathBuf {
        self.config_path.clone()
    }

    /// Load configuration with layered priority: ENV > File > Defaults
    pub fn load(&self) -> Result<AppConfig> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));

        if self.config_path.exists() {
            figment = figment.merge(Toml::file(&self.config_path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment.extract().context("Failed to load configuration")
    }

    /// Get a configuration value by key (dot notation); secrets are masked
    pub fn get(&self, key: &str) -> Result<String> {
        let value = Self::as_toml(&self.load()?)?;

        let mut current = &value;
        for part in key.split('.') {
            match current {
                toml::Value::Table(table) => {
                    current = table
                        .get(part)
                        .ok_or_else(|| anyhow::anyhow!("Key '{}' not found", key))?;
                }
                _ => anyhow::bail!("Invalid key path: {}", key),
            }
        }

        if SECRET_KEYS.contains(&key) {
            return Ok(MASK.to_string());
        }

        match current {
            toml::Value::String(s) => Ok(s.clone()),
            toml::Value::Integer(i) => Ok(i.to_string()),
            toml::Value::Float(f) => Ok(f.to_string()),
            toml::Value::Boolean(b) => Ok(b.to_string()),
            _ => anyhow::bail!("Value at '{}' is not a simple type", key),
        }
    }

    /// Set a configuration value by key (dot notation)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.validate_config_value(key, value)?;

        let mut config = if self.config_path.exists() {
            let content = fs::read_to_string(&self.config_path)?;
            toml::from_str(&content)?
        } else {
            toml::Value::Table(toml::map::Map::new())
        };

        let parts: Vec<&str> = key.split('.').collect();
        let (last, sections) = parts
            .split_last()
            .ok_or_else(|| anyhow::anyhow!("Empty key"))?;

        let mut current = &mut config;
        for part in sections {
            let toml::Value::Table(table) = current else {
                anyhow::bail!("Invalid key path: expected table at '{}'", part);
            };
            current = table
                .entry(part.to_string())
                .or_insert(toml::Value::Table(toml::map::Map::new()));
        }
        let toml::Value::Table(table) = current else {
            anyhow::bail!("Cannot set value on non-table");
        };
        table.insert(last.to_string(), Self::parse_config_value(key, value)?);

        // The edited file must still describe a loadable configuration
        let toml_string = toml::to_string_pretty(&config)?;
        Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string(&toml_string))
            .extract::<AppConfig>()
            .with_context(|| format!("Invalid value for {key}: {value}"))?;

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.config_path, toml_string)?;

        Ok(())
    }

    /// List all configuration values; secrets are masked
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let value = Self::as_toml(&self.load()?)?;

        let mut items = Vec::new();
        Self::collect_values(&value, String::new(), &mut items);
        for (key, value) in &mut items {
            if SECRET_KEYS.contains(&key.as_str()) {
                *value = MASK.to_string();
            }
        }
        items.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(items)
    }

    fn as_toml(config: &AppConfig) -> Result<toml::Value> {
        let toml_string = toml::to_string(config)?;
        Ok(toml::from_str(&toml_string)?)
    }

    /// Recursively collect all key-value pairs from TOML
    fn collect_values(value: &toml::Value, prefix: String, items: &mut Vec<(String, String)>) {
        match value {
            toml::Value::Table(table) => {
                for (key, val) in table {
                    let new_prefix = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    Self::collect_values(val, new_prefix, items);
                }
            }
            toml::Value::String(s) => items.push((prefix, s.clone())),
            toml::Value::Integer(i) => items.push((prefix, i.to_string())),
            toml::Value::Float(f) => items.push((prefix, f.to_string())),
            toml::Value::Boolean(b) => items.push((prefix, b.to_string())),
            _ => {}
        }
    }

    fn validate_config_value(&self, key: &str, value: &str) -> Result<()> {
        match key {
            "anidb.server" => {
                let (host, port) = value
                    .rsplit_once(':')
                    .context("server must be host:port")?;
                if host.is_empty() {
                    anyhow::bail!("server host must not be empty");
                }
                let _: u16 = port.parse().context("server port must be 0-65535")?;
            }
            "anidb.local_port" => {
                let _: u16 = value.parse().context("local_port must be 0-65535")?;
            }
            "anidb.client_name" => {
                if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric()) {
                    anyhow::bail!("client_name must be non-empty and alphanumeric");
                }
            }
            "anidb.client_version" => {
                let version: u32 = value
                    .parse()
                    .context("client_version must be a positive integer")?;
                if version == 0 {
                    anyhow::bail!("client_version must be greater than 0");
                }
            }
            "anidb.request_timeout_secs" | "session.tick_interval_secs" => {
                let secs: u64 = value.parse().context("Expected a positive integer")?;
                if secs == 0 {
                    anyhow::bail!("{key} must be greater than 0");
                }
                if secs > MAX_TIMING_SECS {
                    anyhow::bail!("{key} must be at most {MAX_TIMING_SECS} seconds");
                }
            }
            "queues.max_attempts" => {
                let attempts: u32 = value
                    .parse()
                    .context("max_attempts must be a positive integer")?;
                if attempts == 0 {
                    anyhow::bail!("max_attempts must be at least 1");
                }
            }
            "queues.panic_policy" => {
                if !matches!(value, "retry" | "fail") {
                    anyhow::bail!("panic_policy must be 'retry' or 'fail'");
                }
            }
            k if k.ends_with("_ms") => {
                let _: u64 = value.parse().context("Expected a non-negative integer")?;
            }
            k if k.ends_with("_secs") => {
                let secs: u64 = value.parse().context("Expected a non-negative integer")?;
                if secs > MAX_TIMING_SECS {
                    anyhow::bail!("{key} must be at most {MAX_TIMING_SECS} seconds");
                }
            }
            k if k.starts_with("queues.")
                && (k.ends_with(".pauses_on_ban") || k.ends_with(".start_paused")) =>
            {
                let queue = k.split('.').nth(1).unwrap_or_default();
                queue
                    .parse::<QueueName>()
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
                let _: bool = value.parse().context("Value must be 'true' or 'false'")?;
            }
            "anidb.nat" => {
                let _: bool = value.parse().context("Value must be 'true' or 'false'")?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Parse a value to the TOML type the key expects
    fn parse_config_value(key: &str, value: &str) -> Result<toml::Value> {
        match key {
            k if k.ends_with("_secs")
                || k.ends_with("_ms")
                || k.ends_with("_port")
                || k.ends_with("_version")
                || k.ends_with("max_attempts") =>
            {
                let num: i64 = value.parse().context("Expected integer value")?;
                Ok(toml::Value::Integer(num))
            }
            k if k.ends_with(".nat")
                || k.ends_with(".pauses_on_ban")
                || k.ends_with(".start_paused") =>
            {
                let bool_val: bool = value
                    .parse()
                    .context("Expected boolean value (true/false)")?;
                Ok(toml::Value::Boolean(bool_val))
            }
            k if k.starts_with("storage.") || k.starts_with("anidb.") => {
                Ok(toml::Value::String(value.to_string()))
            }
            _ => {
                if let Ok(b) = value.parse::<bool>() {
                    Ok(toml::Value::Boolean(b))
                } else if let Ok(i) = value.parse::<i64>() {
                    Ok(toml::Value::Integer(i))
                } else {
                    Ok(toml::Value::String(value.to_string()))
                }
            }
        }
    }
}
