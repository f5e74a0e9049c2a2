//! Boot configuration for the Lazarus agent

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{RiskThresholds, RiskWeights};

/// Operating mode of the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Decide and record, never execute
    Observer,
    /// Decide, record and execute approved resurrections
    Live,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Observer
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub risk: RiskConfig,
    pub decision: DecisionConfig,
    pub learning: LearningConfig,
    pub storage: StorageConfig,
    pub enricher: EnricherConfig,
    pub executor: ExecutorConfig,
    pub dispatcher: DispatcherConfig,
}

/// Risk engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub weights: RiskWeights,
    pub thresholds: RiskThresholds,
    pub critical_modules: Vec<String>,
}

/// Decision engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub auto_approve_enabled: bool,
    pub always_deny_modules: Vec<String>,
    pub always_require_approval: Vec<String>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        DecisionConfig {
            auto_approve_enabled: false,
            always_deny_modules: Vec::new(),
            always_require_approval: Vec::new(),
        }
    }
}

/// Adaptive learning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub enabled: bool,
    pub min_samples_required: usize,
    pub analysis_window_days: i64,
    pub max_adjustment_percent: f64,
    pub adjustment_cooldown_hours: i64,
    pub target_auto_approve_accuracy: f64,
    pub require_approval: bool,
    pub interval_seconds: u64,
    pub analysis: AnalysisConfig,
}

impl Default for LearningConfig {
    fn default() -> Self {
        LearningConfig {
            enabled: false,
            min_samples_required: 50,
            analysis_window_days: 30,
            max_adjustment_percent: 10.0,
            adjustment_cooldown_hours: 24,
            target_auto_approve_accuracy: 0.95,
            require_approval: true,
            interval_seconds: 3600,
            analysis: AnalysisConfig::default(),
        }
    }
}

/// Pattern analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub min_samples_for_analysis: usize,
    pub false_positive_threshold: f64,
    pub success_rate_threshold: f64,
    pub auto_approve_accuracy_threshold: f64,
    pub time_window_days: i64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            min_samples_for_analysis: 10,
            false_positive_threshold: 0.30,
            success_rate_threshold: 0.70,
            auto_approve_accuracy_threshold: 0.90,
            time_window_days: 30,
        }
    }
}

/// Outcome store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend selector: "sled" (persistent) or "memory"
    pub backend: String,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: "sled".to_string(),
            path: PathBuf::from("data/outcomes.db"),
        }
    }
}

/// Enricher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnricherConfig {
    /// Backend selector: "noop" or "http"
    pub backend: String,
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub tenant_id: String,
    pub timeout_seconds: u64,
    pub lookback_hours: u64,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        EnricherConfig {
            backend: "noop".to_string(),
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            tenant_id: "default".to_string(),
            timeout_seconds: 10,
            lookback_hours: 24,
        }
    }
}

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Backend selector: "dry-run" or "docker"
    pub backend: String,
    /// Docker Engine API endpoint
    pub docker_host: String,
    pub label_prefix: String,
    pub restart_timeout_seconds: u64,
    pub health_check_timeout_seconds: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            backend: "dry-run".to_string(),
            docker_host: "http://127.0.0.1:2375".to_string(),
            label_prefix: "lazarus.module".to_string(),
            restart_timeout_seconds: 30,
            health_check_timeout_seconds: 30,
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum kill events processed concurrently
    pub max_in_flight: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig { max_in_flight: 16 }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&raw).map_err(|e| {
            Error::Configuration(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity checks beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.storage.backend.as_str(), "sled" | "memory") {
            return Err(Error::Configuration(format!(
                "unknown storage backend: {}",
                self.storage.backend
            )));
        }
        if !matches!(self.enricher.backend.as_str(), "noop" | "http") {
            return Err(Error::Configuration(format!(
                "unknown enricher backend: {}",
                self.enricher.backend
            )));
        }
        if self.enricher.backend == "http" && self.enricher.base_url.is_empty() {
            return Err(Error::Configuration(
                "http enricher requires base_url".into(),
            ));
        }
        if !matches!(self.executor.backend.as_str(), "dry-run" | "docker") {
            return Err(Error::Configuration(format!(
                "unknown executor backend: {}",
                self.executor.backend
            )));
        }
        if self.dispatcher.max_in_flight == 0 {
            return Err(Error::Configuration(
                "dispatcher.max_in_flight must be at least 1".into(),
            ));
        }
        for (name, value) in [
            (
                "auto_approve_max_score",
                self.risk.thresholds.auto_approve_max_score,
            ),
            (
                "auto_approve_min_confidence",
                self.risk.thresholds.auto_approve_min_confidence,
            ),
            (
                "escalation_min_score",
                self.risk.thresholds.escalation_min_score,
            ),
            ("deny_min_score", self.risk.thresholds.deny_min_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Configuration(format!(
                    "risk threshold {} out of range: {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}
