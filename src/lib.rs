//! SaaSGuard -- self-hosted SaaS application discovery and risk scoring.
//!
//! This crate provides the core library for cross-source application
//! discovery, deduplication, risk scoring, recommendations, and scan
//! orchestration.

pub mod api;
pub mod classify;
pub mod config;
pub mod connectors;
pub mod inventory;
pub mod scan;
pub mod scheduler;
pub mod score;
pub mod storage;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::classify::ClassificationTable;
use crate::config::AppConfig;
use crate::connectors::browser::BrowserTelemetryConnector;
use crate::connectors::workspace::WorkspaceSuiteConnector;
use crate::connectors::Connector;
use crate::scan::Orchestrator;

/// Load the classification table named in the config, or the embedded
/// default.
pub fn load_table(config: &AppConfig) -> Result<ClassificationTable> {
    match &config.classification_table {
        Some(path) => {
            tracing::info!(%path, "Loading classification table");
            ClassificationTable::from_path(path)
                .with_context(|| format!("failed to load classification table {}", path))
        }
        None => Ok(ClassificationTable::builtin()),
    }
}

/// Build the orchestrator with every enabled connector.
pub fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator> {
    let table = load_table(config)?;

    let mut connectors: Vec<Arc<dyn Connector>> = Vec::new();
    if config.workspace.enabled {
        connectors.push(Arc::new(WorkspaceSuiteConnector::new(&config.workspace)?));
    }
    if config.browser.enabled {
        connectors.push(Arc::new(BrowserTelemetryConnector::new(&config.browser)));
    }

    let orchestrator = Orchestrator::new(
        config.policy.clone(),
        table,
        connectors,
        config.subjects.clone(),
    )?;
    Ok(orchestrator)
}

/// Start the SaaSGuard daemon: API server and recurring-scan scheduler.
pub async fn serve(config: AppConfig) -> Result<()> {
    // 1. Initialize Storage
    tracing::info!(db_path = %config.db_path, "Initializing database");
    let pool = storage::open_pool(&config.db_path)?;

    // 2. Build Orchestrator (validates policy and table up front)
    let orchestrator = build_orchestrator(&config)?;

    // 3. Start Scheduler Engine (background task)
    let scheduler = scheduler::Scheduler::new(pool.clone());
    {
        let scheduler = scheduler.clone();
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            scheduler::run_scheduler_loop(scheduler, orchestrator).await;
        });
    }

    // 4. Start API Server
    let state = api::AppState {
        pool,
        orchestrator,
        scheduler,
    };
    let app = api::router(state);

    let addr: std::net::SocketAddr = config.bind.parse()?;
    tracing::info!(%addr, "SaaSGuard listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
