//! Configuration types for the shield layer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::controller::{DEFAULT_EVENT_CAPACITY, DEFAULT_THRESHOLD};
use crate::error::{Result, ShieldError};
use crate::probe::{CompatibilityRule, default_rules};

/// Top-level shield configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// Failure window and protective-mode threshold.
    pub failures: FailureConfig,
    /// Known-good version range per shim id.
    ///
    /// Entries read from a file are layered over the built-in rules: a
    /// `[compatibility.maps]` table replaces the maps rule and leaves the
    /// others in place.
    #[serde(deserialize_with = "rules_over_defaults")]
    pub compatibility: BTreeMap<String, CompatibilityRule>,
}

fn rules_over_defaults<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, CompatibilityRule>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::<String, CompatibilityRule>::deserialize(deserializer)?;
    let mut rules = default_rules();
    rules.extend(overrides);
    Ok(rules)
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            failures: FailureConfig::default(),
            compatibility: default_rules(),
        }
    }
}

/// Failure tracking settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureConfig {
    /// Sliding window length in seconds.
    pub window_secs: u64,
    /// Global recent-failure count that trips protective mode.
    pub threshold: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            threshold: DEFAULT_THRESHOLD,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ShieldConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ShieldError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ShieldError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/navshield/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| std::env::temp_dir().join("navshield-config"))
            .join("navshield")
            .join("config.toml")
    }

    /// Check every setting.
    ///
    /// # Errors
    ///
    /// Returns [`ShieldError::Config`] for an out-of-range setting and
    /// [`ShieldError::Version`] for an unparseable version bound.
    pub fn validate(&self) -> Result<()> {
        if self.failures.threshold == 0 {
            return Err(ShieldError::Config(
                "failures.threshold must be at least 1".into(),
            ));
        }
        if self.failures.window_secs == 0 {
            return Err(ShieldError::Config(
                "failures.window_secs must be at least 1".into(),
            ));
        }
        if self.failures.event_capacity == 0 {
            return Err(ShieldError::Config(
                "failures.event_capacity must be at least 1".into(),
            ));
        }
        for (component, rule) in &self.compatibility {
            rule.validate().map_err(|e| match e {
                ShieldError::Version(msg) => {
                    ShieldError::Version(format!("compatibility.{component}: {msg}"))
                }
                ShieldError::Config(msg) => {
                    ShieldError::Config(format!("compatibility.{component}: {msg}"))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    /// Failure window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.failures.window_secs)
    }
}
