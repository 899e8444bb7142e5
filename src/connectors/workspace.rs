//! Workspace-suite connector: reads third-party OAuth token grants from the
//! suite's admin directory API.

use super::{Connector, RawObservation, ScanContext, WORKSPACE_SOURCE};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;

/// Connector for workspace-suite OAuth grants.
pub struct WorkspaceSuiteConnector {
    base_url: String,
    client: Client,
}

/// One OAuth grant as reported by the admin API.
#[derive(Debug, Deserialize)]
struct TokenGrant {
    client_domain: String,
    #[serde(default)]
    scopes: Vec<String>,
    last_authorized_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenGrantPage {
    #[serde(default)]
    grants: Vec<TokenGrant>,
}

impl WorkspaceSuiteConnector {
    pub fn new(config: &crate::config::WorkspaceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build HTTP client for workspace connector")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl Connector for WorkspaceSuiteConnector {
    fn source_id(&self) -> &str {
        WORKSPACE_SOURCE
    }

    async fn scan(&self, ctx: &ScanContext) -> Result<Vec<RawObservation>> {
        let token = ctx
            .credential(WORKSPACE_SOURCE)
            .context("no workspace-suite credential for subject")?;

        let url = format!(
            "{}/admin/directory/v1/tokens?user={}",
            self.base_url, ctx.subject_id
        );

        let page: TokenGrantPage = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .context("workspace-suite token listing request failed")?
            .error_for_status()
            .context("workspace-suite token listing returned an error status")?
            .json()
            .await
            .context("failed to decode workspace-suite token listing")?;

        tracing::debug!(
            subject = %ctx.subject_id,
            grants = page.grants.len(),
            "Workspace token grants fetched"
        );

        Ok(page
            .grants
            .into_iter()
            .map(|grant| grant_to_observation(grant))
            .collect())
    }
}

fn grant_to_observation(grant: TokenGrant) -> RawObservation {
    let mut permissions = BTreeSet::new();
    let mut data_types = BTreeSet::new();

    for scope in &grant.scopes {
        let scope = scope.trim().to_ascii_lowercase();
        if scope.is_empty() {
            continue;
        }
        for dt in scope_data_types(&scope) {
            data_types.insert(dt.to_string());
        }
        permissions.insert(scope);
    }

    RawObservation {
        source_id: WORKSPACE_SOURCE.to_string(),
        domain: grant.client_domain,
        observed_at: grant.last_authorized_at,
        raw_permissions: permissions,
        raw_data_types: data_types,
    }
}

/// Coarse data-type signals implied by an OAuth scope name.
fn scope_data_types(scope: &str) -> Vec<&'static str> {
    let mut types = Vec::new();
    if scope.contains("mail") {
        types.push("email");
    }
    if scope.contains("drive") || scope.contains("file") {
        types.push("files");
    }
    if scope.contains("calendar") {
        types.push("calendar");
    }
    if scope.contains("contact") || scope.contains("directory") {
        types.push("contact_list");
    }
    if scope.contains("payment") || scope.contains("billing") {
        types.push("payment_history");
    }
    if scope.contains("admin") {
        types.push("account_admin");
    }
    types
}
