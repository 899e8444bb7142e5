//! Cross-source deduplication and inventory assembly.
//!
//! Observations are keyed by normalized domain and merged commutatively:
//! permission/data-type sets union, timestamps take the max, source ids
//! union. Classification runs once per merged domain, never per
//! observation: a domain seen via two low-signal sources can cross a risk
//! tier only when the signals are combined.

use crate::classify::{
    Category, Classification, ClassificationTable, PasswordStrength, RiskLevel, SensitivityTag,
};
use crate::connectors::RawObservation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    /// Two applications for one domain after merging. This is a bug in the
    /// merge path, never a data problem; it must surface, not be swallowed.
    #[error("internal invariant violated: duplicate application for domain {0}")]
    DuplicateDomain(String),
}

/// Canonical domain key: lowercase, scheme/port/path stripped, leading dots
/// and `www.` removed. Cookie domains surface as `.example.com` and API
/// clients as `https://example.com/`; both must collapse to `example.com`.
pub fn normalize_domain(raw: &str) -> String {
    let mut s = raw.trim().to_ascii_lowercase();
    if let Some(idx) = s.find("://") {
        s = s.split_off(idx + 3);
    }
    if let Some(idx) = s.find('/') {
        s.truncate(idx);
    }
    if let Some(idx) = s.find(':') {
        s.truncate(idx);
    }
    let s = s.trim_matches('.');
    let s = s.strip_prefix("www.").unwrap_or(s);
    s.to_string()
}

/// Union of all signals observed for one domain across sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSignals {
    pub permissions: BTreeSet<String>,
    pub data_types: BTreeSet<String>,
    pub last_observed_at: DateTime<Utc>,
    pub source_ids: BTreeSet<String>,
}

impl MergedSignals {
    fn absorb(&mut self, obs: RawObservation) {
        self.permissions.extend(obs.raw_permissions);
        self.data_types.extend(obs.raw_data_types);
        if obs.observed_at > self.last_observed_at {
            self.last_observed_at = obs.observed_at;
        }
        self.source_ids.insert(obs.source_id);
    }

    fn from_observation(obs: RawObservation) -> Self {
        Self {
            permissions: obs.raw_permissions,
            data_types: obs.raw_data_types,
            last_observed_at: obs.observed_at,
            source_ids: [obs.source_id].into_iter().collect(),
        }
    }
}

/// Group observations by normalized domain. Union/max only, so the result
/// is independent of observation order.
pub fn group_observations(
    observations: Vec<RawObservation>,
) -> BTreeMap<String, MergedSignals> {
    let mut groups: BTreeMap<String, MergedSignals> = BTreeMap::new();
    for obs in observations {
        let domain = normalize_domain(&obs.domain);
        if domain.is_empty() {
            tracing::warn!(source = %obs.source_id, raw = %obs.domain, "Dropping observation with empty domain");
            continue;
        }
        match groups.entry(domain) {
            std::collections::btree_map::Entry::Occupied(mut e) => e.get_mut().absorb(obs),
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(MergedSignals::from_observation(obs));
            }
        }
    }
    groups
}

/// A merged domain with its classification, ready for assembly.
#[derive(Debug, Clone)]
pub struct ClassifiedDomain {
    pub domain: String,
    pub signals: MergedSignals,
    pub classification: Classification,
}

/// Classify every merged domain from its combined signal sets.
pub fn classify_groups(
    table: &ClassificationTable,
    groups: BTreeMap<String, MergedSignals>,
) -> Vec<ClassifiedDomain> {
    groups
        .into_iter()
        .map(|(domain, signals)| {
            let classification =
                table.classify(&domain, &signals.permissions, &signals.data_types);
            ClassifiedDomain {
                domain,
                signals,
                classification,
            }
        })
        .collect()
}

/// The canonical, deduplicated unit of the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub domain: String,
    pub display_name: String,
    pub category: Category,
    pub risk_level: RiskLevel,
    pub data_types: BTreeSet<String>,
    pub sensitivity_tags: BTreeSet<SensitivityTag>,
    pub has_known_breach: bool,
    pub shares_data_with_third_parties: bool,
    pub last_observed_at: DateTime<Utc>,
    pub source_ids: BTreeSet<String>,
    pub password_strength: PasswordStrength,
}

/// Domain-ordered, deduplicated set of applications for one scan.
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    applications: Vec<Application>,
}

impl Inventory {
    pub fn empty() -> Self {
        Self {
            applications: Vec::new(),
        }
    }

    /// Build from an application list, enforcing the one-app-per-domain and
    /// domain-ordering invariants.
    pub fn from_applications(applications: Vec<Application>) -> Result<Self, MergeError> {
        for pair in applications.windows(2) {
            if pair[0].domain >= pair[1].domain {
                return Err(MergeError::DuplicateDomain(pair[1].domain.clone()));
            }
        }
        Ok(Self { applications })
    }

    pub fn applications(&self) -> &[Application] {
        &self.applications
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }

    pub fn get(&self, domain: &str) -> Option<&Application> {
        self.applications
            .binary_search_by(|a| a.domain.as_str().cmp(domain))
            .ok()
            .map(|idx| &self.applications[idx])
    }
}

/// Assemble applications from classified domains, folding in per-domain
/// profile intelligence from the table.
pub fn build_inventory(
    table: &ClassificationTable,
    classified: Vec<ClassifiedDomain>,
) -> Result<Inventory, MergeError> {
    let applications = classified
        .into_iter()
        .map(|cd| {
            let profile = table.profile(&cd.domain).cloned().unwrap_or_default();
            Application {
                display_name: table.display_name(&cd.domain),
                category: cd.classification.category,
                risk_level: cd.classification.risk_level,
                sensitivity_tags: cd.classification.sensitivity_tags,
                data_types: cd.signals.data_types,
                has_known_breach: profile.known_breach,
                shares_data_with_third_parties: profile.shares_data_with_third_parties,
                password_strength: profile.password_strength,
                last_observed_at: cd.signals.last_observed_at,
                source_ids: cd.signals.source_ids,
                domain: cd.domain,
            }
        })
        .collect();
    Inventory::from_applications(applications)
}

/// Full merge: group, classify once per merged domain, assemble.
pub fn merge(
    table: &ClassificationTable,
    observations: Vec<RawObservation>,
) -> Result<Inventory, MergeError> {
    let groups = group_observations(observations);
    let classified = classify_groups(table, groups);
    build_inventory(table, classified)
}
