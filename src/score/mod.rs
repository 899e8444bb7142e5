//! Risk aggregation: per-application scores, the four organization-level
//! dimension scores, the weighted composite, and the letter grade.

pub mod recommend;

use crate::classify::PasswordStrength;
use crate::config::{DimensionWeights, ScanPolicy};
use crate::inventory::{Application, Inventory};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// Dimension curve anchors. The headline policy knobs (penalties, weights,
// tier points) live in ScanPolicy; these shape the individual curves.
const OAUTH_RISK_EMPTY: f64 = 95.0;
const DATA_EXPOSURE_EMPTY: f64 = 92.0;
const COMPLIANCE_EMPTY: f64 = 90.0;
const ACCESS_CONTROL_EMPTY: f64 = 88.0;

const DATA_EXPOSURE_START: f64 = 90.0;
const DATA_EXPOSURE_BREACH_STEP: f64 = 15.0;
const DATA_EXPOSURE_SHARING_STEP: f64 = 8.0;
const DATA_EXPOSURE_CLEAN_BONUS: f64 = 2.0;
const DATA_EXPOSURE_CLEAN_CAP: f64 = 20.0;

const COMPLIANCE_START: f64 = 70.0;
const COMPLIANCE_LOW_SHIFT: f64 = 25.0;
const COMPLIANCE_RISKY_SHIFT: f64 = 30.0;
const COMPLIANCE_RATIO_BONUS: f64 = 5.0;
const COMPLIANCE_FLOOR: f64 = 30.0;

const ACCESS_START: f64 = 80.0;
const ACCESS_STRONG_SHIFT: f64 = 10.0;
const ACCESS_WEAK_SHIFT: f64 = 25.0;
const ACCESS_INACTIVE_STEP: f64 = 4.0;
const ACCESS_FLOOR: f64 = 40.0;

/// The four organization-level dimension scores, each in [0,100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub oauth_risk: f64,
    pub data_exposure: f64,
    pub compliance: f64,
    pub access_control: f64,
}

impl DimensionScores {
    /// Weighted composite in [0,100]. Weights are percentages validated to
    /// sum to 100 at startup.
    pub fn composite(&self, weights: &DimensionWeights) -> f64 {
        let total = self.oauth_risk * weights.oauth_risk as f64
            + self.data_exposure * weights.data_exposure as f64
            + self.compliance * weights.compliance as f64
            + self.access_control * weights.access_control as f64;
        (total / 100.0).clamp(0.0, 100.0)
    }
}

/// Letter grade derived from the composite score. Declared worst-to-best so
/// the derived ordering matches "better grade".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "F")]
    F,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "C-")]
    CMinus,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A+")]
    APlus,
}

impl Grade {
    /// Total 11-bucket lookup: every score in [0,100] maps to exactly one
    /// grade.
    pub fn from_score(score: f64) -> Self {
        let s = score.clamp(0.0, 100.0);
        if s >= 90.0 {
            Grade::APlus
        } else if s >= 85.0 {
            Grade::A
        } else if s >= 80.0 {
            Grade::AMinus
        } else if s >= 75.0 {
            Grade::BPlus
        } else if s >= 70.0 {
            Grade::B
        } else if s >= 65.0 {
            Grade::BMinus
        } else if s >= 60.0 {
            Grade::CPlus
        } else if s >= 55.0 {
            Grade::C
        } else if s >= 50.0 {
            Grade::CMinus
        } else if s >= 40.0 {
            Grade::D
        } else {
            Grade::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::AMinus => "A-",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::BMinus => "B-",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::CMinus => "C-",
            Grade::D => "D",
            Grade::F => "F",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-application risk score: tier base points plus breach, sharing and
/// password penalties, clamped to [0,100].
pub fn app_risk_score(app: &Application, policy: &ScanPolicy) -> f64 {
    let mut score = app.risk_level.base_points(policy);
    if app.has_known_breach {
        score += policy.breach_penalty;
    }
    if app.shares_data_with_third_parties {
        score += policy.sharing_penalty;
    }
    score += match app.password_strength {
        PasswordStrength::Weak => policy.weak_password_penalty,
        PasswordStrength::Medium => policy.medium_password_penalty,
        PasswordStrength::Strong | PasswordStrength::Unknown => 0.0,
    };
    score.clamp(0.0, 100.0)
}

fn is_inactive(app: &Application, policy: &ScanPolicy, now: DateTime<Utc>) -> bool {
    now - app.last_observed_at > Duration::days(policy.inactive_after_days)
}

/// Inverse-weighted mean of per-app risk: higher app risk pushes the
/// dimension down. Apps touching sensitive data categories weigh 1.5x.
fn oauth_risk(inventory: &Inventory, policy: &ScanPolicy) -> f64 {
    if inventory.is_empty() {
        return OAUTH_RISK_EMPTY;
    }
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for app in inventory.applications() {
        let weight = if app.sensitivity_tags.is_empty() {
            1.0
        } else {
            policy.sensitive_weight
        };
        weighted_sum += app_risk_score(app, policy) * weight;
        weight_total += weight;
    }
    (100.0 - weighted_sum / weight_total).clamp(0.0, 100.0)
}

fn data_exposure(inventory: &Inventory) -> f64 {
    if inventory.is_empty() {
        return DATA_EXPOSURE_EMPTY;
    }
    let mut score = DATA_EXPOSURE_START;
    let mut clean_bonus = 0.0;
    for app in inventory.applications() {
        if app.has_known_breach {
            score -= DATA_EXPOSURE_BREACH_STEP;
        }
        if app.shares_data_with_third_parties {
            score -= DATA_EXPOSURE_SHARING_STEP;
        }
        if !app.has_known_breach && !app.shares_data_with_third_parties {
            clean_bonus += DATA_EXPOSURE_CLEAN_BONUS;
        }
    }
    (score + clean_bonus.min(DATA_EXPOSURE_CLEAN_CAP)).clamp(0.0, 100.0)
}

fn compliance(inventory: &Inventory) -> f64 {
    if inventory.is_empty() {
        return COMPLIANCE_EMPTY;
    }
    let total = inventory.len() as f64;
    let apps = inventory.applications();

    let low = apps
        .iter()
        .filter(|a| a.risk_level == crate::classify::RiskLevel::Low)
        .count() as f64;
    let risky = apps
        .iter()
        .filter(|a| {
            matches!(
                a.risk_level,
                crate::classify::RiskLevel::High | crate::classify::RiskLevel::Critical
            )
        })
        .count() as f64;
    let breached = apps.iter().filter(|a| a.has_known_breach).count() as f64;
    let sharing = apps
        .iter()
        .filter(|a| a.shares_data_with_third_parties)
        .count() as f64;

    let score = COMPLIANCE_START + COMPLIANCE_LOW_SHIFT * (low / total)
        - COMPLIANCE_RISKY_SHIFT * (risky / total)
        + COMPLIANCE_RATIO_BONUS * (1.0 - breached / total)
        + COMPLIANCE_RATIO_BONUS * (1.0 - sharing / total);
    score.clamp(COMPLIANCE_FLOOR, 100.0)
}

fn access_control(inventory: &Inventory, policy: &ScanPolicy, now: DateTime<Utc>) -> f64 {
    if inventory.is_empty() {
        return ACCESS_CONTROL_EMPTY;
    }
    let total = inventory.len() as f64;
    let apps = inventory.applications();

    let strong = apps
        .iter()
        .filter(|a| a.password_strength == PasswordStrength::Strong)
        .count() as f64;
    let weak = apps
        .iter()
        .filter(|a| a.password_strength == PasswordStrength::Weak)
        .count() as f64;
    let inactive = apps.iter().filter(|a| is_inactive(a, policy, now)).count() as f64;

    let score = ACCESS_START + ACCESS_STRONG_SHIFT * (strong / total)
        - ACCESS_WEAK_SHIFT * (weak / total)
        - ACCESS_INACTIVE_STEP * inactive;
    score.clamp(ACCESS_FLOOR, 100.0)
}

/// Compute all four dimension scores for an inventory. An empty inventory
/// scores a clean slate (every dimension >= 85): absence of data is not
/// evidence of risk.
pub fn score_inventory(
    inventory: &Inventory,
    policy: &ScanPolicy,
    now: DateTime<Utc>,
) -> DimensionScores {
    DimensionScores {
        oauth_risk: oauth_risk(inventory, policy),
        data_exposure: data_exposure(inventory),
        compliance: compliance(inventory),
        access_control: access_control(inventory, policy, now),
    }
}
