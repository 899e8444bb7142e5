//! Table-driven application classification.
//!
//! Classification is a pure lookup over an injectable table: operators can
//! ship an updated tier/category/profile table without a rebuild. The table
//! is TOML; an embedded default is compiled in as a fallback.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Default classification table, compiled in.
const DEFAULT_TABLE_TOML: &str = include_str!("default_table.toml");

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("failed to read classification table {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse classification table: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("classification table has no tier entries")]
    EmptyTable,
}

/// Functional category of a third-party application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Productivity,
    Communication,
    Development,
    Marketing,
    Finance,
    Hr,
    Security,
    Other,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Productivity => "productivity",
            Category::Communication => "communication",
            Category::Development => "development",
            Category::Marketing => "marketing",
            Category::Finance => "finance",
            Category::Hr => "hr",
            Category::Security => "security",
            Category::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Risk tier assigned by classification. Ordering matters: a higher tier
/// always wins regardless of permission count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Base points fed into the per-application risk score.
    pub fn base_points(&self, policy: &crate::config::ScanPolicy) -> f64 {
        match self {
            RiskLevel::Low => policy.base_points_low,
            RiskLevel::Medium => policy.base_points_medium,
            RiskLevel::High => policy.base_points_high,
            RiskLevel::Critical => policy.base_points_critical,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Estimated strength of the credential protecting an application account.
/// Unknown carries no penalty: absence of data is not evidence of risk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordStrength {
    Weak,
    Medium,
    Strong,
    #[default]
    Unknown,
}

/// Data sensitivity categories that raise an application's weight in the
/// OAuth risk dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityTag {
    Financial,
    Personal,
    Medical,
    Legal,
}

/// Result of classifying one merged domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub risk_level: RiskLevel,
    pub sensitivity_tags: BTreeSet<SensitivityTag>,
}

/// Static intelligence about a known domain: display name, breach history,
/// sharing posture, credential strength estimate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainProfile {
    pub display_name: Option<String>,
    pub known_breach: bool,
    pub shares_data_with_third_parties: bool,
    pub password_strength: PasswordStrength,
}

/// One escalation tier: membership by domain or by observed permission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tier {
    pub domains: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
}

impl Tier {
    fn matches(&self, domain: &str, permissions: &BTreeSet<String>) -> bool {
        self.domains.contains(domain) || permissions.iter().any(|p| self.permissions.contains(p))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tiers {
    pub critical: Tier,
    pub high: Tier,
    /// Medium tier: known collaboration/productivity domains, or more than
    /// `permission_threshold` distinct permissions.
    pub medium: Tier,
    pub permission_threshold: Option<usize>,
}

/// The injectable classification table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationTable {
    pub tiers: Tiers,
    /// domain (or parent-domain) -> category.
    pub categories: BTreeMap<String, Category>,
    /// sensitivity tag -> data-type keywords.
    pub sensitivity: BTreeMap<SensitivityTag, BTreeSet<String>>,
    /// Per-domain static intelligence.
    pub profiles: BTreeMap<String, DomainProfile>,
}

const DEFAULT_PERMISSION_THRESHOLD: usize = 3;

impl ClassificationTable {
    /// The compiled-in default table.
    pub fn builtin() -> Self {
        toml::from_str(DEFAULT_TABLE_TOML).expect("embedded classification table is invalid TOML")
    }

    /// Load a table from a TOML file.
    pub fn from_path(path: &str) -> Result<Self, ClassifyError> {
        let content = std::fs::read_to_string(path).map_err(|source| ClassifyError::Io {
            path: path.to_string(),
            source,
        })?;
        let table: Self = toml::from_str(&content)?;
        table.validate()?;
        Ok(table)
    }

    /// A table with no tier data would classify everything Low; treat that
    /// as a configuration error rather than scanning with it.
    pub fn validate(&self) -> Result<(), ClassifyError> {
        let t = &self.tiers;
        let empty = t.critical.domains.is_empty()
            && t.critical.permissions.is_empty()
            && t.high.domains.is_empty()
            && t.high.permissions.is_empty()
            && t.medium.domains.is_empty();
        if empty {
            return Err(ClassifyError::EmptyTable);
        }
        Ok(())
    }

    /// Classify one domain from its merged permission and data-type sets.
    ///
    /// Pure: the same inputs always yield the same classification. Tiers
    /// escalate Critical > High > Medium > Low and a higher tier wins even
    /// when a lower tier also matches.
    pub fn classify(
        &self,
        domain: &str,
        permissions: &BTreeSet<String>,
        data_types: &BTreeSet<String>,
    ) -> Classification {
        let threshold = self
            .tiers
            .permission_threshold
            .unwrap_or(DEFAULT_PERMISSION_THRESHOLD);

        let risk_level = if self.tiers.critical.matches(domain, permissions) {
            RiskLevel::Critical
        } else if self.tiers.high.matches(domain, permissions) {
            RiskLevel::High
        } else if self.tiers.medium.matches(domain, permissions) || permissions.len() > threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        Classification {
            category: self.category_for(domain),
            risk_level,
            sensitivity_tags: self.sensitivity_tags_for(data_types),
        }
    }

    /// Category lookup: exact domain match, then parent-domain match.
    fn category_for(&self, domain: &str) -> Category {
        if let Some(cat) = self.categories.get(domain) {
            return *cat;
        }
        for (key, cat) in &self.categories {
            if domain.ends_with(&format!(".{}", key)) {
                return *cat;
            }
        }
        Category::Other
    }

    fn sensitivity_tags_for(&self, data_types: &BTreeSet<String>) -> BTreeSet<SensitivityTag> {
        let mut tags = BTreeSet::new();
        for (tag, keywords) in &self.sensitivity {
            let hit = data_types.iter().any(|dt| {
                let dt = dt.to_ascii_lowercase();
                keywords.iter().any(|kw| dt.contains(kw.as_str()))
            });
            if hit {
                tags.insert(*tag);
            }
        }
        tags
    }

    /// Static intelligence for a domain, if the table knows it.
    pub fn profile(&self, domain: &str) -> Option<&DomainProfile> {
        self.profiles.get(domain)
    }

    /// Human-readable name for a domain: the profile's display name when
    /// known, otherwise the capitalized registrable label.
    pub fn display_name(&self, domain: &str) -> String {
        if let Some(name) = self.profile(domain).and_then(|p| p.display_name.clone()) {
            return name;
        }
        derive_display_name(domain)
    }
}

/// "app.notion.so" -> "Notion", "slack.com" -> "Slack".
fn derive_display_name(domain: &str) -> String {
    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    let label = match labels.len() {
        0 => domain,
        1 => labels[0],
        n => labels[n - 2],
    };
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => domain.to_string(),
    }
}
