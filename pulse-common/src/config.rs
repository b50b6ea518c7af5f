//! Configuration loading and data folder resolution

use crate::risk::RiskThresholds;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// TOML configuration file contents
///
/// Every field is optional; [`ServiceSettings`] applies defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Data folder override (datasets, SQLite database)
    pub data_folder: Option<String>,
    /// HTTP bind address, e.g. "127.0.0.1:5740"
    pub bind: Option<String>,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RiskConfig {
    pub medium: Option<f64>,
    pub high: Option<f64>,
    pub critical: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Generated-content cache TTL in days
    pub ttl_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrainingConfig {
    /// Held-out test fraction for evaluation
    pub test_fraction: Option<f64>,
    /// Seed for the reproducible train/test shuffle
    pub seed: Option<u64>,
    /// Lookback window (days) for frequency/monetary features
    pub lookback_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneratorConfig {
    /// Chat-completions endpoint for the content generator
    pub api_url: Option<String>,
    /// API key; generation is disabled when absent
    pub api_key: Option<String>,
    /// Model name passed to the generation API
    pub model: Option<String>,
}

/// Resolved service settings with defaults applied
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub data_folder: PathBuf,
    pub bind: String,
    pub risk_thresholds: RiskThresholds,
    pub cache_ttl_days: i64,
    pub test_fraction: f64,
    pub training_seed: u64,
    pub lookback_days: i64,
    pub generator_api_url: String,
    pub generator_api_key: Option<String>,
    pub generator_model: String,
}

impl ServiceSettings {
    /// Merge TOML configuration over compiled defaults
    pub fn from_toml(config: &TomlConfig, data_folder: PathBuf) -> Result<Self> {
        let defaults = RiskThresholds::default();
        let risk_thresholds = RiskThresholds {
            medium: config.risk.medium.unwrap_or(defaults.medium),
            high: config.risk.high.unwrap_or(defaults.high),
            critical: config.risk.critical.unwrap_or(defaults.critical),
        };
        risk_thresholds.validate()?;

        Ok(Self {
            data_folder,
            bind: config
                .bind
                .clone()
                .unwrap_or_else(|| "127.0.0.1:5740".to_string()),
            risk_thresholds,
            cache_ttl_days: config.cache.ttl_days.unwrap_or(7),
            test_fraction: config.training.test_fraction.unwrap_or(0.2),
            training_seed: config.training.seed.unwrap_or(42),
            lookback_days: config.training.lookback_days.unwrap_or(90),
            generator_api_url: config
                .generator
                .api_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            generator_api_key: config.generator.api_key.clone(),
            generator_model: config
                .generator
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
        })
    }
}

/// Data folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable PULSE_DATA
/// 3. TOML config file `data_folder` key
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_folder(cli_arg: Option<&str>, config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("PULSE_DATA") {
        return PathBuf::from(path);
    }

    // Priority 3: TOML config file
    if let Some(path) = &config.data_folder {
        return PathBuf::from(path);
    }

    // Priority 4: OS-dependent compiled default
    default_data_folder()
}

/// Load the TOML config file if one exists, otherwise return defaults
pub fn load_toml_config(explicit_path: Option<&str>) -> Result<TomlConfig> {
    let path = match explicit_path {
        Some(p) => PathBuf::from(p),
        None => match find_config_file() {
            Some(p) => p,
            None => return Ok(TomlConfig::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Locate the per-user or system config file for the platform
fn find_config_file() -> Option<PathBuf> {
    if let Some(path) = dirs::config_dir().map(|d| d.join("pulse").join("config.toml")) {
        if path.exists() {
            return Some(path);
        }
    }
    if cfg!(target_os = "linux") {
        let system = PathBuf::from("/etc/pulse/config.toml");
        if system.exists() {
            return Some(system);
        }
    }
    None
}

/// Get OS-dependent default data folder path
fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("pulse"))
        .unwrap_or_else(|| PathBuf::from("./pulse_data"))
}

/// Ensure the data folder and its subdirectories exist
pub fn ensure_data_folder(root: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(root.join("objects"))?;
    Ok(())
}

/// Path to the service database inside the data folder
pub fn database_path(root: &std::path::Path) -> PathBuf {
    root.join("pulse.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings =
            ServiceSettings::from_toml(&TomlConfig::default(), PathBuf::from("/tmp/pulse"))
                .unwrap();
        assert_eq!(settings.bind, "127.0.0.1:5740");
        assert_eq!(settings.cache_ttl_days, 7);
        assert_eq!(settings.training_seed, 42);
        assert!((settings.test_fraction - 0.2).abs() < f64::EPSILON);
        assert_eq!(settings.risk_thresholds, RiskThresholds::default());
    }

    #[test]
    fn test_settings_reject_bad_thresholds() {
        let mut config = TomlConfig::default();
        config.risk.medium = Some(0.9);
        assert!(ServiceSettings::from_toml(&config, PathBuf::from("/tmp")).is_err());
    }

    #[test]
    fn test_toml_parse_partial() {
        let config: TomlConfig = toml::from_str(
            r#"
            bind = "0.0.0.0:8080"

            [risk]
            critical = 0.8

            [cache]
            ttl_days = 3
            "#,
        )
        .unwrap();
        let settings = ServiceSettings::from_toml(&config, PathBuf::from("/tmp")).unwrap();
        assert_eq!(settings.bind, "0.0.0.0:8080");
        assert_eq!(settings.cache_ttl_days, 3);
        assert!((settings.risk_thresholds.critical - 0.8).abs() < f64::EPSILON);
        assert!((settings.risk_thresholds.medium - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_resolve_data_folder_cli_wins() {
        let mut config = TomlConfig::default();
        config.data_folder = Some("/from/toml".to_string());
        assert_eq!(
            resolve_data_folder(Some("/from/cli"), &config),
            PathBuf::from("/from/cli")
        );
    }
}
