//! TOML configuration.
//!
//! - `default_config()` - the defaults embedded in the binary
//! - `Config::load(path)` - a user file merged over those defaults
//!
//! Merging is key by key on tables; arrays (`masking.rules`, `projects`)
//! replace the default array wholesale.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use toml::{Table, Value};

use crate::export::{ExportSettings, ProjectSpec};
use crate::imaging::{DiffSettings, Fuzz, MaskingError, MaskingRule, MaskingRules, Thresholds};
use crate::locator::CiSettings;

/// Defaults embedded at compile time from `config/default.toml`.
const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Masking(#[from] MaskingError),

    #[error("Invalid [diff] settings: {0}")]
    Diff(String),

    #[error("Invalid [decision] settings: {0}")]
    Decision(String),

    #[error("Duplicate project name '{0}'")]
    DuplicateProject(String),
}

fn default_trim_fuzz() -> Fuzz {
    Fuzz::constant(1.0)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MaskingSettings {
    #[serde(default)]
    pub rules: Vec<MaskingRule>,
    #[serde(default)]
    pub trim: bool,
    #[serde(default = "default_trim_fuzz")]
    pub trim_fuzz: Fuzz,
}

impl MaskingSettings {
    pub fn to_rules(&self) -> Result<MaskingRules, MaskingError> {
        let rules = MaskingRules::new(self.rules.clone())?;
        Ok(if self.trim {
            rules.with_trim(self.trim_fuzz)
        } else {
            rules
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub ci: CiSettings,
    #[serde(default)]
    pub export: ExportSettings,
    pub masking: MaskingSettings,
    #[serde(default)]
    pub diff: DiffSettings,
    #[serde(default)]
    pub decision: Thresholds,
    #[serde(default)]
    pub projects: Vec<ProjectSpec>,
}

impl Config {
    /// Load `path` merged over the embedded defaults and validate the result.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a user config document merged over the embedded defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut merged: Table = toml::from_str(DEFAULT_CONFIG)?;
        let user: Table = toml::from_str(content)?;
        merge_tables(&mut merged, user);

        let config: Config = Value::Table(merged).try_into()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.masking.to_rules()?;
        self.diff.validate().map_err(ConfigError::Diff)?;

        for (name, value) in [
            ("added_threshold", self.decision.added),
            ("removed_threshold", self.decision.removed),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Decision(format!(
                    "{} must be a fraction between 0 and 1, got {}",
                    name, value
                )));
            }
        }

        for (i, project) in self.projects.iter().enumerate() {
            if self.projects[..i].iter().any(|p| p.name == project.name) {
                return Err(ConfigError::DuplicateProject(project.name.clone()));
            }
        }
        Ok(())
    }

    /// Projects to process; `only` restricts to the named subset, in config order.
    pub fn selected_projects(&self, only: &[String]) -> Vec<ProjectSpec> {
        self.projects
            .iter()
            .filter(|p| only.is_empty() || only.contains(&p.name))
            .cloned()
            .collect()
    }
}

/// The embedded defaults on their own.
pub fn default_config() -> Result<Config, ConfigError> {
    Config::from_toml_str("")
}

fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                merge_tables(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
