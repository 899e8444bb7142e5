//! Scan pipeline types: request/result shapes, staged progress, and the
//! error taxonomy surfaced to callers.

pub mod orchestrator;

pub use orchestrator::Orchestrator;

use crate::inventory::{Inventory, MergeError};
use crate::score::{DimensionScores, Grade};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// Requested scan depth. Quick limits collection to the workspace source;
/// Custom runs an explicit list of sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Quick,
    Comprehensive,
    Compliance,
    Custom,
}

impl std::fmt::Display for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanType::Quick => "quick",
            ScanType::Comprehensive => "comprehensive",
            ScanType::Compliance => "compliance",
            ScanType::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ScanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quick" => Ok(ScanType::Quick),
            "comprehensive" => Ok(ScanType::Comprehensive),
            "compliance" => Ok(ScanType::Compliance),
            "custom" => Ok(ScanType::Custom),
            other => Err(format!(
                "unknown scan type '{}' (expected quick, comprehensive, compliance or custom)",
                other
            )),
        }
    }
}

/// Named pipeline stages, in execution order. Progress percentages are
/// fixed per stage so reported progress only ever increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Collect,
    Classify,
    Merge,
    Score,
    Recommend,
}

impl Stage {
    pub fn percent(&self) -> u8 {
        match self {
            Stage::Collect => 10,
            Stage::Classify => 40,
            Stage::Merge => 60,
            Stage::Score => 75,
            Stage::Recommend => 90,
        }
    }
}

/// Progress snapshot for a running scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub stage: Stage,
    pub percent: u8,
}

/// A scan request for one subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub subject_id: String,
    pub scan_type: ScanType,
    /// Source ids to run for Custom scans; ignored otherwise.
    #[serde(default)]
    pub sources: Vec<String>,
}

impl ScanRequest {
    pub fn new(subject_id: impl Into<String>, scan_type: ScanType) -> Self {
        Self {
            subject_id: subject_id.into(),
            scan_type,
            sources: Vec::new(),
        }
    }
}

/// The sole externally consumed output of a scan. Built once, immutable;
/// a new scan produces a new result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: Uuid,
    pub subject_id: String,
    pub scan_type: ScanType,
    pub inventory: Inventory,
    pub dimensions: DimensionScores,
    pub composite_score: f64,
    pub grade: Grade,
    pub recommendations: Vec<String>,
    pub critical_findings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Source ids that failed or timed out; the scan completed without
    /// their observations.
    pub partial_failures: BTreeSet<String>,
}

/// Scan-level errors surfaced to the caller. Connector failures are not
/// here: they are recovered locally into `partial_failures`.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan already in progress for subject {0}")]
    InProgress(String),

    #[error("scan for subject {subject_id} rejected: cooldown active for {retry_after_secs}s")]
    Cooldown {
        subject_id: String,
        retry_after_secs: i64,
    },

    #[error("system busy: maximum concurrent scans reached")]
    Busy,

    #[error("unknown subject {0}")]
    SubjectNotFound(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Invariant(#[from] MergeError),
}

impl ScanError {
    /// Stable error code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            ScanError::InProgress(_) => "IN_PROGRESS",
            ScanError::Cooldown { .. } => "COOLDOWN",
            ScanError::Busy => "BUSY",
            ScanError::SubjectNotFound(_) => "SUBJECT_NOT_FOUND",
            ScanError::Configuration(_) => "CONFIGURATION",
            ScanError::Invariant(_) => "INTERNAL",
        }
    }
}
