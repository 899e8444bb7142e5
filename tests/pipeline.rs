//! End-to-end pipeline tests: stub sources through the orchestrator to a
//! scored, persisted result.

use anyhow::Result;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use saasguard::classify::{ClassificationTable, RiskLevel};
use saasguard::config::{BrowserConfig, ScanPolicy, SubjectConfig};
use saasguard::connectors::browser::BrowserTelemetryConnector;
use saasguard::connectors::{Connector, RawObservation, ScanContext};
use saasguard::scan::{Orchestrator, ScanRequest, ScanType};
use saasguard::score::Grade;
use saasguard::storage;

struct StubWorkspace {
    observations: Vec<RawObservation>,
}

#[async_trait::async_trait]
impl Connector for StubWorkspace {
    fn source_id(&self) -> &str {
        "workspace-suite"
    }

    async fn scan(&self, _ctx: &ScanContext) -> Result<Vec<RawObservation>> {
        Ok(self.observations.clone())
    }
}

fn observation(domain: &str, perms: &[&str], data_types: &[&str]) -> RawObservation {
    RawObservation {
        source_id: "workspace-suite".to_string(),
        domain: domain.to_string(),
        observed_at: Utc::now(),
        raw_permissions: perms.iter().map(|s| s.to_string()).collect(),
        raw_data_types: data_types.iter().map(|s| s.to_string()).collect(),
    }
}

fn subject(id: &str) -> SubjectConfig {
    SubjectConfig {
        id: id.to_string(),
        display_name: None,
        credentials: BTreeMap::new(),
    }
}

fn policy() -> ScanPolicy {
    ScanPolicy {
        cooldown_secs: 0,
        ..ScanPolicy::default()
    }
}

#[tokio::test]
async fn full_pipeline_with_mixed_sources() {
    // Browser telemetry on disk, observing slack.com and a tracker-heavy
    // unknown site.
    let dir = tempfile::tempdir().unwrap();
    let bundle = serde_json::json!({
        "entries": [
            {
                "domain": "Slack.com",
                "cookies": ["d_session"],
                "sso_providers": ["google"],
                "visited_at": "2026-07-20T10:00:00Z"
            },
            {
                "domain": "www.tracker-site.example",
                "tracking_scripts": ["cdn.ads-metrics.net/t.js"],
                "visited_at": "2026-07-21T09:00:00Z"
            }
        ]
    });
    std::fs::write(
        dir.path().join("acme.json"),
        serde_json::to_vec(&bundle).unwrap(),
    )
    .unwrap();

    let browser = BrowserTelemetryConnector::new(&BrowserConfig {
        telemetry_dir: dir.path().to_string_lossy().to_string(),
        enabled: true,
    });

    // Workspace grants for the same subject: slack again (different signal
    // set) plus a critical payment platform.
    let workspace = StubWorkspace {
        observations: vec![
            observation("slack.com", &["files_write"], &["files"]),
            observation("stripe.com", &["payment_write"], &["payment_history"]),
        ],
    };

    let orchestrator = Orchestrator::new(
        policy(),
        ClassificationTable::builtin(),
        vec![Arc::new(workspace), Arc::new(browser)],
        vec![subject("acme")],
    )
    .unwrap();

    let result = orchestrator
        .request_scan(ScanRequest::new("acme", ScanType::Comprehensive))
        .await
        .unwrap();

    // slack.com deduplicated across both sources.
    assert_eq!(result.inventory.len(), 3);
    let slack = result.inventory.get("slack.com").unwrap();
    assert_eq!(slack.source_ids.len(), 2);
    assert!(slack.data_types.contains("browsing_history"));
    assert!(slack.data_types.contains("files"));

    // The tracker site normalized from www.-prefixed form.
    assert!(result.inventory.get("tracker-site.example").is_some());

    // Stripe classified critical from the table, surfaced as a finding.
    let stripe = result.inventory.get("stripe.com").unwrap();
    assert_eq!(stripe.risk_level, RiskLevel::Critical);
    assert!(result
        .critical_findings
        .iter()
        .any(|f| f.contains("stripe.com")));

    assert!(result.partial_failures.is_empty());
    assert!((0.0..=100.0).contains(&result.composite_score));
    assert_eq!(result.grade, Grade::from_score(result.composite_score));

    // Inventory is domain-ordered.
    let domains: Vec<&str> = result
        .inventory
        .applications()
        .iter()
        .map(|a| a.domain.as_str())
        .collect();
    let mut sorted = domains.clone();
    sorted.sort();
    assert_eq!(domains, sorted);
}

#[tokio::test]
async fn missing_telemetry_is_partial_failure_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let browser = BrowserTelemetryConnector::new(&BrowserConfig {
        telemetry_dir: dir.path().to_string_lossy().to_string(),
        enabled: true,
    });
    let workspace = StubWorkspace {
        observations: vec![observation("notion.so", &["profile"], &[])],
    };

    let orchestrator = Orchestrator::new(
        policy(),
        ClassificationTable::builtin(),
        vec![Arc::new(workspace), Arc::new(browser)],
        vec![subject("acme")],
    )
    .unwrap();

    let result = orchestrator
        .request_scan(ScanRequest::new("acme", ScanType::Comprehensive))
        .await
        .unwrap();

    assert_eq!(result.inventory.len(), 1);
    let failures: BTreeSet<&str> = result.partial_failures.iter().map(String::as_str).collect();
    assert!(failures.contains("browser-telemetry"));
    assert!(result
        .recommendations
        .iter()
        .any(|r| r.contains("re-run the scan")));
}

#[tokio::test]
async fn scan_result_round_trips_through_storage() {
    let dir = tempfile::tempdir().unwrap();
    let pool = storage::open_pool(dir.path().join("pipeline.db").to_str().unwrap()).unwrap();

    let workspace = StubWorkspace {
        observations: vec![observation("slack.com", &["profile"], &[])],
    };
    let orchestrator = Orchestrator::new(
        policy(),
        ClassificationTable::builtin(),
        vec![Arc::new(workspace)],
        vec![subject("acme")],
    )
    .unwrap();

    let result = orchestrator
        .request_scan(ScanRequest::new("acme", ScanType::Quick))
        .await
        .unwrap();
    storage::save_scan_result(&pool, &result).unwrap();

    let loaded = storage::latest_scan(&pool, "acme").unwrap().unwrap();
    assert_eq!(loaded.scan_id, result.scan_id);
    assert_eq!(loaded.inventory, result.inventory);
    assert_eq!(loaded.grade, result.grade);
    assert_eq!(loaded.recommendations, result.recommendations);
}

#[tokio::test]
async fn empty_sources_score_a_clean_slate() {
    let orchestrator = Orchestrator::new(
        policy(),
        ClassificationTable::builtin(),
        Vec::new(),
        vec![subject("acme")],
    )
    .unwrap();

    let result = orchestrator
        .request_scan(ScanRequest::new("acme", ScanType::Comprehensive))
        .await
        .unwrap();

    assert!(result.inventory.is_empty());
    assert!(result.composite_score >= 85.0);
    assert!(result.grade >= Grade::AMinus);
}
