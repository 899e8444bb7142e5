//! Source connectors -- pluggable adapters producing raw application-usage
//! signals from one external source each.
//!
//! Connectors run concurrently under the orchestrator, each bounded by a
//! per-call timeout. A connector that errors or times out becomes a partial
//! failure; its observations are simply absent from the scan.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

pub mod browser;
pub mod workspace;

/// Source id of the workspace-suite connector.
pub const WORKSPACE_SOURCE: &str = "workspace-suite";
/// Source id of the browser-telemetry connector.
pub const BROWSER_SOURCE: &str = "browser-telemetry";

/// One connector's report about one domain at one point in time.
/// Immutable once emitted; the merger consumes these and does not retain
/// them past inventory assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObservation {
    pub source_id: String,
    pub domain: String,
    pub observed_at: DateTime<Utc>,
    pub raw_permissions: BTreeSet<String>,
    pub raw_data_types: BTreeSet<String>,
}

/// Subject identity and per-source credentials handed to each connector.
/// Credentials are opaque to the core; token acquisition is out of scope.
#[derive(Debug, Clone, Default)]
pub struct ScanContext {
    pub subject_id: String,
    /// source id -> credential.
    pub credentials: BTreeMap<String, String>,
}

impl ScanContext {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            credentials: BTreeMap::new(),
        }
    }

    pub fn credential(&self, source_id: &str) -> Option<&str> {
        self.credentials.get(source_id).map(String::as_str)
    }
}

/// Trait all source integrations implement to plug into the scan pipeline.
///
/// Contract: a finite batch of observations, independent failure (an error
/// here never aborts the overall scan), no shared mutable state.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Stable identifier recorded in `source_ids` and `partial_failures`.
    fn source_id(&self) -> &str;

    /// Collect raw observations for the subject in `ctx`.
    async fn scan(&self, ctx: &ScanContext) -> Result<Vec<RawObservation>>;
}
