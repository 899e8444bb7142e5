//! Daemon configuration and scoring policy.
//!
//! Every scoring constant the pipeline uses (dimension weights, penalties,
//! cooldowns, concurrency limits) lives here rather than as literals in the
//! scoring code, so operators can tune policy without a rebuild.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("dimension weights must sum to 100, got {0}")]
    BadWeights(u32),
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
}

/// Weights (in percent) for the four organization-level risk dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionWeights {
    pub oauth_risk: u32,
    pub data_exposure: u32,
    pub compliance: u32,
    pub access_control: u32,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            oauth_risk: 40,
            data_exposure: 25,
            compliance: 20,
            access_control: 15,
        }
    }
}

impl DimensionWeights {
    pub fn sum(&self) -> u32 {
        self.oauth_risk + self.data_exposure + self.compliance + self.access_control
    }
}

/// Scoring and orchestration policy. Defaults match the documented scoring
/// model; all values are overridable from the `[policy]` section of the
/// config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPolicy {
    pub weights: DimensionWeights,

    /// Base risk points per classification tier.
    pub base_points_low: f64,
    pub base_points_medium: f64,
    pub base_points_high: f64,
    pub base_points_critical: f64,

    /// Per-application score penalties.
    pub breach_penalty: f64,
    pub sharing_penalty: f64,
    pub weak_password_penalty: f64,
    pub medium_password_penalty: f64,

    /// Weight multiplier for apps touching sensitive data categories when
    /// averaging the OAuth risk dimension.
    pub sensitive_weight: f64,

    /// Grants not observed for this many days count as inactive.
    pub inactive_after_days: i64,

    /// Maximum scans running at once across all subjects. Requests beyond
    /// the limit are rejected immediately, never queued.
    pub max_concurrent_scans: usize,

    /// Per-connector call timeout.
    pub connector_timeout_secs: u64,

    /// Minimum interval between scans of the same subject.
    pub cooldown_secs: i64,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            weights: DimensionWeights::default(),
            base_points_low: 10.0,
            base_points_medium: 25.0,
            base_points_high: 50.0,
            base_points_critical: 75.0,
            breach_penalty: 20.0,
            sharing_penalty: 15.0,
            weak_password_penalty: 15.0,
            medium_password_penalty: 5.0,
            sensitive_weight: 1.5,
            inactive_after_days: 90,
            max_concurrent_scans: 4,
            connector_timeout_secs: 30,
            cooldown_secs: 60,
        }
    }
}

impl ScanPolicy {
    /// Reject configurations the scoring pipeline cannot run with. Called
    /// once at startup, before any connector is invoked.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum = self.weights.sum();
        if sum != 100 {
            return Err(ConfigError::BadWeights(sum));
        }
        if self.max_concurrent_scans == 0 {
            return Err(ConfigError::ZeroLimit("max_concurrent_scans"));
        }
        if self.connector_timeout_secs == 0 {
            return Err(ConfigError::ZeroLimit("connector_timeout_secs"));
        }
        Ok(())
    }
}

/// Settings for the workspace-suite connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub base_url: String,
    pub enabled: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://workspace.example.com".to_string(),
            enabled: true,
        }
    }
}

/// Settings for the browser-telemetry connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Directory holding one `<subject>.json` telemetry bundle per subject.
    pub telemetry_dir: String,
    pub enabled: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            telemetry_dir: "data/telemetry".to_string(),
            enabled: true,
        }
    }
}

/// A scannable subject (user or organization) and its per-source
/// credentials. Tokens are opaque to the core; acquiring them is out of
/// scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectConfig {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// source id -> credential (e.g. a bearer token for the workspace API).
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind: String,
    pub db_path: String,
    /// Optional path to a classification table overriding the embedded one.
    pub classification_table: Option<String>,
    pub policy: ScanPolicy,
    pub workspace: WorkspaceConfig,
    pub browser: BrowserConfig,
    #[serde(default)]
    pub subjects: Vec<SubjectConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            db_path: "data/saasguard.db".to_string(),
            classification_table: None,
            policy: ScanPolicy::default(),
            workspace: WorkspaceConfig::default(),
            browser: BrowserConfig::default(),
            subjects: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        if !Path::new(path).exists() {
            tracing::info!(%path, "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        Ok(config)
    }

    pub fn subject(&self, id: &str) -> Option<&SubjectConfig> {
        self.subjects.iter().find(|s| s.id == id)
    }
}
