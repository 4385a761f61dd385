//! Store configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (`keel.toml`, or the path in `KEEL_CONFIG`)
//! 3. Environment variables (`KEEL_*` prefix)
//!
//! Environment variables take precedence over config file values.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use keel_dispose::FieldRule;
use keel_txn::BodyErrorPolicy;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{StoreError, StoreResult};

/// Environment variable prefix
const ENV_PREFIX: &str = "KEEL";

/// Config file looked up in the working directory when `KEEL_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "keel.toml";

/// Primary-key field of a raw record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeConfig {
    pub name: String,
    #[serde(default = "default_key_field")]
    pub key_field: String,
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Run the disposal sweep before every outermost commit
    #[serde(default = "default_auto_clean_up")]
    pub auto_clean_up: bool,

    /// What happens to a transaction whose write body fails
    #[serde(default)]
    pub on_body_error: BodyErrorPolicy,

    /// Key fields for types imported without an entity definition
    #[serde(default)]
    pub types: Vec<TypeConfig>,

    /// Disposal rules, registered in file order
    #[serde(default)]
    pub disposal: Vec<FieldRule>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            auto_clean_up: default_auto_clean_up(),
            on_body_error: BodyErrorPolicy::default(),
            types: Vec::new(),
            disposal: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from the default location and environment
    pub fn load() -> StoreResult<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> StoreResult<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                StoreError::Config(format!("failed to read config file {}: {e}", path.display()))
            })?;
            toml::from_str(&content).map_err(|e| {
                StoreError::Config(format!("failed to parse config file {}: {e}", path.display()))
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn load_from_str(toml_content: &str) -> StoreResult<Self> {
        let mut config: StoreConfig = toml::from_str(toml_content)
            .map_err(|e| StoreError::Config(format!("failed to parse config TOML: {e}")))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Get the config file path
    ///
    /// Can be overridden with the `KEEL_CONFIG` environment variable
    pub fn config_file_path() -> PathBuf {
        match std::env::var(format!("{ENV_PREFIX}_CONFIG")) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }

    /// Check type and rule declarations.
    pub fn validate(&self) -> StoreResult<()> {
        let mut names = HashSet::new();
        for ty in &self.types {
            if ty.name.trim().is_empty() {
                return Err(StoreError::Config("type entry with an empty name".into()));
            }
            if ty.key_field.trim().is_empty() {
                return Err(StoreError::Config(format!(
                    "type '{}' has an empty key_field",
                    ty.name
                )));
            }
            if !names.insert(ty.name.as_str()) {
                return Err(StoreError::Config(format!("type '{}' declared twice", ty.name)));
            }
        }

        let mut ruled = HashSet::new();
        for rule in &self.disposal {
            let type_tag = rule.validate().map_err(|e| StoreError::Config(e.to_string()))?;
            if !ruled.insert(type_tag) {
                return Err(StoreError::Config(format!(
                    "more than one disposal rule for type '{}'",
                    rule.type_name
                )));
            }
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        // KEEL_AUTO_CLEAN_UP
        if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_AUTO_CLEAN_UP")) {
            match parse_flag(&val) {
                Some(flag) => self.auto_clean_up = flag,
                None => warn!(value = %val, "ignoring unrecognized KEEL_AUTO_CLEAN_UP"),
            }
        }
    }
}

fn parse_flag(val: &str) -> Option<bool> {
    if val.eq_ignore_ascii_case("true") || val == "1" {
        Some(true)
    } else if val.eq_ignore_ascii_case("false") || val == "0" {
        Some(false)
    } else {
        None
    }
}

fn default_auto_clean_up() -> bool {
    true
}

fn default_key_field() -> String {
    "id".to_string()
}
