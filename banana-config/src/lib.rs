use std::{
    fs,
    path::{Path, PathBuf},
};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_GEMINI_API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-3-pro-image-preview";

const GEMINI_API_KEYS: [&str; 3] = ["api_key_env_var", "base_url", "default_model"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine configuration directory")]
    ConfigDirUnavailable,
    #[error("failed to read or write configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to deserialize configuration: {0}")]
    Deserialize(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gemini_api: GeminiApiConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiApiConfig {
    /// Environment variable consulted when `--api-key` is not given.
    pub api_key_env_var: String,
    pub base_url: String,
    /// Model used when `--model` is not given.
    pub default_model: String,
}

impl Default for GeminiApiConfig {
    fn default() -> Self {
        Self {
            api_key_env_var: DEFAULT_GEMINI_API_KEY_ENV_VAR.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl GeminiApiConfig {
    /// Blank values in a hand-edited file fall back to the built-in defaults.
    fn backfill(&mut self) -> bool {
        let defaults = Self::default();
        let mut changed = false;

        for (field, default) in [
            (&mut self.api_key_env_var, defaults.api_key_env_var),
            (&mut self.base_url, defaults.base_url),
            (&mut self.default_model, defaults.default_model),
        ] {
            if field.trim().is_empty() {
                *field = default;
                changed = true;
            }
        }

        changed
    }
}

/// Loads the banana configuration from disk, creating a default file if absent.
///
/// Missing or blank fields are filled with defaults and written back. A
/// complete file is left untouched.
pub fn load_or_init() -> Result<LoadOutcome, ConfigError> {
    let path = config_file_path()?;
    load_or_init_at(&path)
}

/// Same as [`load_or_init`] but against an explicit file path.
pub fn load_or_init_at(path: &Path) -> Result<LoadOutcome, ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        let complete = has_all_fields(&toml::from_str(&contents)?);
        let backfilled = config.gemini_api.backfill();
        if backfilled || !complete {
            save(&config, path)?;
        }
        Ok(LoadOutcome {
            config,
            path: path.to_path_buf(),
            created: false,
        })
    } else {
        let config = Config::default();
        save(&config, path)?;
        Ok(LoadOutcome {
            config,
            path: path.to_path_buf(),
            created: true,
        })
    }
}

/// Whether every `[gemini_api]` key is spelled out in the file.
fn has_all_fields(table: &toml::Table) -> bool {
    table
        .get("gemini_api")
        .and_then(toml::Value::as_table)
        .is_some_and(|gemini| {
            GEMINI_API_KEYS
                .iter()
                .all(|key| gemini.contains_key(*key))
        })
}

/// Persist the given configuration to disk at the provided path.
pub fn save(config: &Config, path: &Path) -> Result<(), ConfigError> {
    ensure_parent_exists(path)?;
    let serialized = toml::to_string_pretty(config)?;
    fs::write(path, serialized)?;
    Ok(())
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub config: Config,
    pub path: PathBuf,
    pub created: bool,
}

/// Picks the API key from the command-line flag, then from the configured
/// environment variable. Blank values are treated as absent.
pub fn resolve_api_key<F>(flag: Option<&str>, env_var: &str, lookup: F) -> Option<String>
where
    F: FnOnce(&str) -> Option<String>,
{
    if let Some(key) = non_blank(flag) {
        return Some(key.to_string());
    }

    lookup(env_var).and_then(|value| non_blank(Some(&value)).map(str::to_string))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn ensure_parent_exists(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    let base_dirs = BaseDirs::new().ok_or(ConfigError::ConfigDirUnavailable)?;
    Ok(base_dirs.home_dir().join(".banana").join("config.toml"))
}
