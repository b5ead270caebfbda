//! Engine configuration.
//!
//! Loads settings from a TOML file or falls back to defaults. Every
//! numeric threshold in the engine is an operator-tunable field here.

use anyhow::{Context, Result};
use medic_common::StatsTuning;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Orchestrator behavior and safety gates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    /// Master switch; a disabled engine refuses every plan
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Synthesize successes instead of dispatching to executors
    #[serde(default)]
    pub dry_run: bool,
    /// Plans allowed to execute concurrently
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Minimum minutes between successful actions on the same target
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
    /// Namespaces (exact) and target substrings that must never be acted on
    #[serde(default)]
    pub blacklist: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    5
}

fn default_cooldown_minutes() -> i64 {
    15
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            dry_run: false,
            max_concurrent: default_max_concurrent(),
            cooldown_minutes: default_cooldown_minutes(),
            blacklist: Vec::new(),
        }
    }
}

/// Learning-engine thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// When false, stats are still recorded but adjustments stay inert
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Executions required before adjustments and auto-approval activate
    #[serde(default = "default_min_executions")]
    pub min_executions_for_learning: u64,
    /// Success rate required for auto-approval
    #[serde(default = "default_success_rate_threshold")]
    pub success_rate_threshold: f64,
    /// Adjusted risk score must fall below this for auto-approval
    #[serde(default = "default_auto_approve_risk")]
    pub auto_approve_risk_threshold: f64,
    /// Confidence required for auto-approval
    #[serde(default = "default_auto_approve_confidence")]
    pub auto_approve_min_confidence: f64,
}

fn default_min_executions() -> u64 {
    3
}

fn default_success_rate_threshold() -> f64 {
    0.9
}

fn default_auto_approve_risk() -> f64 {
    0.3
}

fn default_auto_approve_confidence() -> f64 {
    0.7
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            min_executions_for_learning: default_min_executions(),
            success_rate_threshold: default_success_rate_threshold(),
            auto_approve_risk_threshold: default_auto_approve_risk(),
            auto_approve_min_confidence: default_auto_approve_confidence(),
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub remediation: RemediationConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub stats: StatsTuning,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields defaults; a malformed file is reported and
    /// also yields defaults so a bad edit cannot take the engine down.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config file at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded engine config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config {:?}: {}; using defaults", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read config {:?}: {}; using defaults", path, e);
                Self::default()
            }
        }
    }

    /// Write the configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }
}
