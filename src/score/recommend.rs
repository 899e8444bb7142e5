//! Deterministic recommendation rules over the scored inventory.
//!
//! Rules run in a fixed priority order and each contributes at most one
//! line, so output ordering is stable across runs with the same input. A
//! fixed tail of baseline hygiene items is always appended.

use super::DimensionScores;
use crate::classify::{PasswordStrength, RiskLevel};
use crate::config::ScanPolicy;
use crate::inventory::{Application, Inventory};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

const ACCESS_CONTROL_ATTENTION: f64 = 60.0;
const COMPLIANCE_ATTENTION: f64 = 50.0;

const GENERAL_RECOMMENDATIONS: &[&str] = &[
    "Enable multi-factor authentication for all administrative accounts",
    "Review third-party OAuth grants quarterly and revoke unused access",
    "Maintain an allowlist of approved applications and onboard new tools through it",
];

/// Prioritized, deduplicated action items plus the critical findings list.
pub fn generate(
    inventory: &Inventory,
    dimensions: &DimensionScores,
    partial_failures: &BTreeSet<String>,
    policy: &ScanPolicy,
    now: DateTime<Utc>,
) -> (Vec<String>, Vec<String>) {
    let apps = inventory.applications();
    let mut recommendations = Vec::new();

    let breached: Vec<&Application> = apps.iter().filter(|a| a.has_known_breach).collect();
    if !breached.is_empty() {
        recommendations.push(format!(
            "Rotate credentials for {} application(s) with known data breaches: {}",
            breached.len(),
            domain_list(&breached)
        ));
    }

    let critical: Vec<&Application> = apps
        .iter()
        .filter(|a| a.risk_level == RiskLevel::Critical)
        .collect();
    if !critical.is_empty() {
        recommendations.push(format!(
            "Review and restrict access for {} critical-risk application(s): {}",
            critical.len(),
            domain_list(&critical)
        ));
    }

    let weak = apps
        .iter()
        .filter(|a| a.password_strength == PasswordStrength::Weak)
        .count();
    if weak > 0 {
        recommendations.push(format!(
            "Require stronger credentials for {} application(s) protected by weak passwords",
            weak
        ));
    }

    let sharing = apps
        .iter()
        .filter(|a| a.shares_data_with_third_parties)
        .count();
    if sharing > 0 {
        recommendations.push(format!(
            "{} application(s) share data with third parties; confirm data processing agreements are in place",
            sharing
        ));
    }

    let inactive = apps
        .iter()
        .filter(|a| now - a.last_observed_at > Duration::days(policy.inactive_after_days))
        .count();
    if inactive > 0 {
        recommendations.push(format!(
            "Revoke {} grant(s) not used in the last {} days",
            inactive, policy.inactive_after_days
        ));
    }

    if dimensions.access_control < ACCESS_CONTROL_ATTENTION {
        recommendations.push(
            "Tighten access controls: rotate shared accounts and enforce SSO where available"
                .to_string(),
        );
    }

    if dimensions.compliance < COMPLIANCE_ATTENTION {
        recommendations.push(
            "Establish a vendor security review before adopting new applications".to_string(),
        );
    }

    if !partial_failures.is_empty() {
        let failed: Vec<&str> = partial_failures.iter().map(String::as_str).collect();
        recommendations.push(format!(
            "Some sources could not be scanned ({}); re-run the scan for a complete picture",
            failed.join(", ")
        ));
    }

    for general in GENERAL_RECOMMENDATIONS {
        recommendations.push((*general).to_string());
    }

    (recommendations, critical_findings(apps))
}

/// One line per breached or critical-risk application, in domain order.
fn critical_findings(apps: &[Application]) -> Vec<String> {
    let mut findings = Vec::new();
    for app in apps {
        match (
            app.risk_level == RiskLevel::Critical,
            app.has_known_breach,
        ) {
            (true, true) => findings.push(format!(
                "{} ({}) holds critical-risk access and appears in a known data breach",
                app.display_name, app.domain
            )),
            (true, false) => findings.push(format!(
                "{} ({}) holds critical-risk access",
                app.display_name, app.domain
            )),
            (false, true) => findings.push(format!(
                "{} ({}) appears in a known data breach",
                app.display_name, app.domain
            )),
            (false, false) => {}
        }
    }
    findings
}

fn domain_list(apps: &[&Application]) -> String {
    apps.iter()
        .map(|a| a.domain.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Category;
    use crate::inventory::Inventory;

    fn app(domain: &str, risk: RiskLevel) -> Application {
        Application {
            domain: domain.to_string(),
            display_name: domain.to_string(),
            category: Category::Other,
            risk_level: risk,
            data_types: BTreeSet::new(),
            sensitivity_tags: BTreeSet::new(),
            has_known_breach: false,
            shares_data_with_third_parties: false,
            last_observed_at: Utc::now(),
            source_ids: BTreeSet::new(),
            password_strength: PasswordStrength::Unknown,
        }
    }

    fn clean_dims() -> DimensionScores {
        DimensionScores {
            oauth_risk: 90.0,
            data_exposure: 90.0,
            compliance: 90.0,
            access_control: 90.0,
        }
    }

    #[test]
    fn empty_inventory_yields_only_general_tail() {
        let (recs, findings) = generate(
            &Inventory::empty(),
            &clean_dims(),
            &BTreeSet::new(),
            &ScanPolicy::default(),
            Utc::now(),
        );
        assert_eq!(recs.len(), GENERAL_RECOMMENDATIONS.len());
        assert_eq!(recs[0], GENERAL_RECOMMENDATIONS[0]);
        assert!(findings.is_empty());
    }

    #[test]
    fn rules_fire_in_priority_order() {
        let mut breached = app("breached.example", RiskLevel::Medium);
        breached.has_known_breach = true;
        let critical = app("critical.example", RiskLevel::Critical);
        let mut weak = app("weak.example", RiskLevel::Low);
        weak.password_strength = PasswordStrength::Weak;

        let inv = Inventory::from_applications(vec![breached, critical, weak]).unwrap();
        let (recs, findings) = generate(
            &inv,
            &clean_dims(),
            &BTreeSet::new(),
            &ScanPolicy::default(),
            Utc::now(),
        );

        assert!(recs[0].contains("known data breaches"));
        assert!(recs[0].contains("breached.example"));
        assert!(recs[1].contains("critical-risk"));
        assert!(recs[2].contains("weak passwords"));
        // Tail is still appended after the triggered rules.
        assert!(recs.ends_with(
            &GENERAL_RECOMMENDATIONS
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        ));

        assert_eq!(findings.len(), 2);
        assert!(findings[0].contains("breached.example"));
        assert!(findings[1].contains("critical.example"));
    }

    #[test]
    fn partial_failures_recommend_rescan() {
        let failures: BTreeSet<String> = ["browser-telemetry".to_string()].into_iter().collect();
        let (recs, _) = generate(
            &Inventory::empty(),
            &clean_dims(),
            &failures,
            &ScanPolicy::default(),
            Utc::now(),
        );
        assert!(recs
            .iter()
            .any(|r| r.contains("re-run the scan") && r.contains("browser-telemetry")));
    }

    #[test]
    fn low_dimensions_trigger_attention_rules() {
        let dims = DimensionScores {
            oauth_risk: 90.0,
            data_exposure: 90.0,
            compliance: 40.0,
            access_control: 50.0,
        };
        let (recs, _) = generate(
            &Inventory::empty(),
            &dims,
            &BTreeSet::new(),
            &ScanPolicy::default(),
            Utc::now(),
        );
        assert!(recs.iter().any(|r| r.contains("Tighten access controls")));
        assert!(recs.iter().any(|r| r.contains("vendor security review")));
    }

    #[test]
    fn output_is_stable_across_runs() {
        let mut a = app("a.example", RiskLevel::Critical);
        a.has_known_breach = true;
        let inv = Inventory::from_applications(vec![a]).unwrap();
        let now = Utc::now();

        let first = generate(
            &inv,
            &clean_dims(),
            &BTreeSet::new(),
            &ScanPolicy::default(),
            now,
        );
        let second = generate(
            &inv,
            &clean_dims(),
            &BTreeSet::new(),
            &ScanPolicy::default(),
            now,
        );
        assert_eq!(first, second);
    }
}
