//! Browser-telemetry connector: translates uploaded browser signals (cookie
//! domains, tracking scripts, SSO buttons) into raw observations.
//!
//! The browser extension uploads one JSON bundle per subject; this connector
//! only reads and translates it. Collection inside the browser is out of
//! scope here.

use super::{Connector, RawObservation, ScanContext, BROWSER_SOURCE};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Connector for uploaded browser telemetry bundles.
pub struct BrowserTelemetryConnector {
    telemetry_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct TelemetryBundle {
    #[serde(default)]
    entries: Vec<TelemetryEntry>,
}

/// One observed site visit with detected third-party signals.
#[derive(Debug, Deserialize)]
struct TelemetryEntry {
    domain: String,
    #[serde(default)]
    cookies: Vec<String>,
    #[serde(default)]
    tracking_scripts: Vec<String>,
    #[serde(default)]
    sso_providers: Vec<String>,
    visited_at: DateTime<Utc>,
}

impl BrowserTelemetryConnector {
    pub fn new(config: &crate::config::BrowserConfig) -> Self {
        Self {
            telemetry_dir: PathBuf::from(&config.telemetry_dir),
        }
    }

    fn bundle_path(&self, subject_id: &str) -> PathBuf {
        self.telemetry_dir.join(format!("{}.json", subject_id))
    }
}

#[async_trait::async_trait]
impl Connector for BrowserTelemetryConnector {
    fn source_id(&self) -> &str {
        BROWSER_SOURCE
    }

    async fn scan(&self, ctx: &ScanContext) -> Result<Vec<RawObservation>> {
        let path = self.bundle_path(&ctx.subject_id);
        let raw = tokio::fs::read(&path)
            .await
            .with_context(|| format!("no telemetry bundle at {}", path.display()))?;
        let bundle: TelemetryBundle =
            serde_json::from_slice(&raw).context("failed to decode telemetry bundle")?;

        tracing::debug!(
            subject = %ctx.subject_id,
            entries = bundle.entries.len(),
            "Browser telemetry loaded"
        );

        Ok(bundle.entries.into_iter().map(entry_to_observation).collect())
    }
}

fn entry_to_observation(entry: TelemetryEntry) -> RawObservation {
    let mut permissions = BTreeSet::new();
    let mut data_types = BTreeSet::new();

    data_types.insert("browsing_history".to_string());

    for provider in &entry.sso_providers {
        let provider = provider.trim().to_ascii_lowercase();
        if !provider.is_empty() {
            permissions.insert(format!("sso:{}", provider));
        }
    }

    if !entry.cookies.is_empty() {
        permissions.insert("cookies".to_string());
    }
    for cookie in &entry.cookies {
        let cookie = cookie.to_ascii_lowercase();
        if cookie.contains("session") || cookie.contains("auth") || cookie.contains("token") {
            data_types.insert("session".to_string());
        }
    }

    if !entry.tracking_scripts.is_empty() {
        permissions.insert("tracking".to_string());
        data_types.insert("behavioral_analytics".to_string());
    }
    for script in &entry.tracking_scripts {
        let script = script.to_ascii_lowercase();
        if script.contains("ads") || script.contains("doubleclick") {
            data_types.insert("advertising".to_string());
        }
    }

    RawObservation {
        source_id: BROWSER_SOURCE.to_string(),
        domain: entry.domain,
        observed_at: entry.visited_at,
        raw_permissions: permissions,
        raw_data_types: data_types,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrowserConfig;

    #[test]
    fn entry_translation_derives_signals() {
        let entry = TelemetryEntry {
            domain: "app.example.com".to_string(),
            cookies: vec!["_session_id".to_string(), "prefs".to_string()],
            tracking_scripts: vec!["cdn.ads-metrics.net/t.js".to_string()],
            sso_providers: vec!["Google".to_string()],
            visited_at: Utc::now(),
        };

        let obs = entry_to_observation(entry);
        assert_eq!(obs.source_id, BROWSER_SOURCE);
        assert!(obs.raw_permissions.contains("sso:google"));
        assert!(obs.raw_permissions.contains("cookies"));
        assert!(obs.raw_permissions.contains("tracking"));
        assert!(obs.raw_data_types.contains("browsing_history"));
        assert!(obs.raw_data_types.contains("session"));
        assert!(obs.raw_data_types.contains("behavioral_analytics"));
        assert!(obs.raw_data_types.contains("advertising"));
    }

    #[tokio::test]
    async fn scan_reads_bundle_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = serde_json::json!({
            "entries": [{
                "domain": "notion.so",
                "cookies": ["auth_token"],
                "visited_at": "2026-07-01T12:00:00Z"
            }]
        });
        std::fs::write(
            dir.path().join("alice.json"),
            serde_json::to_vec(&bundle).unwrap(),
        )
        .unwrap();

        let connector = BrowserTelemetryConnector::new(&BrowserConfig {
            telemetry_dir: dir.path().to_string_lossy().to_string(),
            enabled: true,
        });

        let obs = connector.scan(&ScanContext::new("alice")).await.unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].domain, "notion.so");
        assert!(obs[0].raw_data_types.contains("session"));
    }

    #[tokio::test]
    async fn missing_bundle_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let connector = BrowserTelemetryConnector::new(&BrowserConfig {
            telemetry_dir: dir.path().to_string_lossy().to_string(),
            enabled: true,
        });
        assert!(connector.scan(&ScanContext::new("nobody")).await.is_err());
    }
}
