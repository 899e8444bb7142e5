//! Scan orchestration: per-subject state machine, bounded concurrent
//! collection, and the staged pipeline producing one immutable ScanResult.

use super::{ScanError, ScanProgress, ScanRequest, ScanResult, ScanType, Stage};
use crate::classify::ClassificationTable;
use crate::config::{ScanPolicy, SubjectConfig};
use crate::connectors::{Connector, ScanContext, WORKSPACE_SOURCE};
use crate::inventory::{build_inventory, classify_groups, group_observations};
use crate::score::{self, recommend, Grade};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct SubjectState {
    running: bool,
    progress: Option<ScanProgress>,
    finished_at: Option<DateTime<Utc>>,
}

struct Inner {
    policy: ScanPolicy,
    table: ClassificationTable,
    connectors: Vec<Arc<dyn Connector>>,
    subjects: BTreeMap<String, SubjectConfig>,
    /// The only shared mutable state in the pipeline. Locked briefly,
    /// never across an await.
    states: Mutex<HashMap<String, SubjectState>>,
    slots: Semaphore,
}

impl Inner {
    fn set_stage(&self, subject_id: &str, stage: Stage) {
        let mut states = self.states.lock().expect("scan state lock poisoned");
        if let Some(state) = states.get_mut(subject_id) {
            state.progress = Some(ScanProgress {
                stage,
                percent: stage.percent(),
            });
        }
    }

    fn set_complete(&self, subject_id: &str) {
        let mut states = self.states.lock().expect("scan state lock poisoned");
        if let Some(state) = states.get_mut(subject_id) {
            state.progress = Some(ScanProgress {
                stage: Stage::Recommend,
                percent: 100,
            });
        }
    }
}

/// Returns the subject to Idle when the scan finishes, fails, or is
/// cancelled mid-flight. The cooldown window starts at drop in every case.
struct RunningGuard {
    inner: Arc<Inner>,
    subject_id: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if let Ok(mut states) = self.inner.states.lock() {
            if let Some(state) = states.get_mut(&self.subject_id) {
                state.running = false;
                state.finished_at = Some(Utc::now());
            }
        }
    }
}

/// Drives the scan pipeline end to end. Cheap to clone; all clones share
/// the same state machine and concurrency budget.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build an orchestrator. Policy and table validation happens here,
    /// before any connector can run.
    pub fn new(
        policy: ScanPolicy,
        table: ClassificationTable,
        connectors: Vec<Arc<dyn Connector>>,
        subjects: Vec<SubjectConfig>,
    ) -> Result<Self, ScanError> {
        policy
            .validate()
            .map_err(|e| ScanError::Configuration(e.to_string()))?;
        table
            .validate()
            .map_err(|e| ScanError::Configuration(e.to_string()))?;

        let slots = Semaphore::new(policy.max_concurrent_scans);
        let subjects = subjects.into_iter().map(|s| (s.id.clone(), s)).collect();

        Ok(Self {
            inner: Arc::new(Inner {
                policy,
                table,
                connectors,
                subjects,
                states: Mutex::new(HashMap::new()),
                slots,
            }),
        })
    }

    pub fn has_subject(&self, subject_id: &str) -> bool {
        self.inner.subjects.contains_key(subject_id)
    }

    pub fn subject_ids(&self) -> Vec<String> {
        self.inner.subjects.keys().cloned().collect()
    }

    pub fn is_running(&self, subject_id: &str) -> bool {
        let states = self.inner.states.lock().expect("scan state lock poisoned");
        states.get(subject_id).map(|s| s.running).unwrap_or(false)
    }

    /// Progress of the current or most recent scan for a subject.
    pub fn progress(&self, subject_id: &str) -> Option<ScanProgress> {
        let states = self.inner.states.lock().expect("scan state lock poisoned");
        states.get(subject_id).and_then(|s| s.progress)
    }

    /// Run one scan for a subject. Rejects fast (never queues) when the
    /// subject is already scanning, inside its cooldown window, or the
    /// global concurrency budget is exhausted.
    pub async fn request_scan(&self, request: ScanRequest) -> Result<ScanResult, ScanError> {
        let inner = &self.inner;

        let profile = inner
            .subjects
            .get(&request.subject_id)
            .cloned()
            .ok_or_else(|| ScanError::SubjectNotFound(request.subject_id.clone()))?;

        let _permit = inner.slots.try_acquire().map_err(|_| ScanError::Busy)?;

        {
            let mut states = inner.states.lock().expect("scan state lock poisoned");
            let state = states.entry(request.subject_id.clone()).or_default();
            if state.running {
                return Err(ScanError::InProgress(request.subject_id.clone()));
            }
            if let Some(finished_at) = state.finished_at {
                let cooldown = ChronoDuration::seconds(inner.policy.cooldown_secs);
                let elapsed = Utc::now() - finished_at;
                if elapsed < cooldown {
                    return Err(ScanError::Cooldown {
                        subject_id: request.subject_id.clone(),
                        retry_after_secs: (cooldown - elapsed).num_seconds().max(1),
                    });
                }
            }
            state.running = true;
            state.progress = Some(ScanProgress {
                stage: Stage::Collect,
                percent: 0,
            });
        }
        let _guard = RunningGuard {
            inner: Arc::clone(inner),
            subject_id: request.subject_id.clone(),
        };

        let result = self.run_pipeline(&request, &profile).await;
        match &result {
            Ok(r) => info!(
                subject = %r.subject_id,
                scan_type = %r.scan_type,
                applications = r.inventory.len(),
                composite = r.composite_score,
                grade = %r.grade,
                failed_sources = r.partial_failures.len(),
                "Scan complete"
            ),
            Err(e) => warn!(subject = %request.subject_id, error = %e, "Scan failed"),
        }
        result
    }

    fn select_connectors(&self, request: &ScanRequest) -> Vec<Arc<dyn Connector>> {
        match request.scan_type {
            ScanType::Quick => self
                .inner
                .connectors
                .iter()
                .filter(|c| c.source_id() == WORKSPACE_SOURCE)
                .cloned()
                .collect(),
            ScanType::Comprehensive | ScanType::Compliance => self.inner.connectors.clone(),
            ScanType::Custom => self
                .inner
                .connectors
                .iter()
                .filter(|c| request.sources.iter().any(|s| s == c.source_id()))
                .cloned()
                .collect(),
        }
    }

    async fn run_pipeline(
        &self,
        request: &ScanRequest,
        profile: &SubjectConfig,
    ) -> Result<ScanResult, ScanError> {
        let inner = &self.inner;
        let started_at = Utc::now();
        let subject_id = &request.subject_id;

        inner.set_stage(subject_id, Stage::Collect);

        let connectors = self.select_connectors(request);
        if connectors.is_empty() {
            warn!(subject = %subject_id, scan_type = %request.scan_type, "No sources selected for scan");
        }

        let ctx = ScanContext {
            subject_id: subject_id.clone(),
            credentials: profile.credentials.clone(),
        };
        let timeout = Duration::from_secs(inner.policy.connector_timeout_secs);

        // Connectors run concurrently as detached tasks. If this scan is
        // cancelled, in-flight tasks run to completion or timeout but
        // nobody joins them and their results are discarded.
        let mut source_ids = Vec::with_capacity(connectors.len());
        let mut handles = Vec::with_capacity(connectors.len());
        for connector in connectors {
            let ctx = ctx.clone();
            source_ids.push(connector.source_id().to_string());
            handles.push(tokio::spawn(async move {
                match tokio::time::timeout(timeout, connector.scan(&ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("timed out after {}s", timeout.as_secs())),
                }
            }));
        }

        let mut observations = Vec::new();
        let mut partial_failures = BTreeSet::new();
        for (source_id, joined) in source_ids.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(batch)) => {
                    info!(source = %source_id, observations = batch.len(), "Source collected");
                    observations.extend(batch);
                }
                Ok(Err(e)) => {
                    warn!(source = %source_id, error = %e, "Source failed, continuing without it");
                    partial_failures.insert(source_id);
                }
                Err(e) => {
                    warn!(source = %source_id, error = %e, "Source task aborted");
                    partial_failures.insert(source_id);
                }
            }
        }

        inner.set_stage(subject_id, Stage::Classify);
        let groups = group_observations(observations);
        let classified = classify_groups(&inner.table, groups);

        inner.set_stage(subject_id, Stage::Merge);
        let inventory = build_inventory(&inner.table, classified)?;

        inner.set_stage(subject_id, Stage::Score);
        let now = Utc::now();
        let dimensions = score::score_inventory(&inventory, &inner.policy, now);
        let composite_score = dimensions.composite(&inner.policy.weights);
        let grade = Grade::from_score(composite_score);

        inner.set_stage(subject_id, Stage::Recommend);
        let (recommendations, critical_findings) =
            recommend::generate(&inventory, &dimensions, &partial_failures, &inner.policy, now);

        inner.set_complete(subject_id);

        Ok(ScanResult {
            scan_id: Uuid::new_v4(),
            subject_id: subject_id.clone(),
            scan_type: request.scan_type,
            inventory,
            dimensions,
            composite_score,
            grade,
            recommendations,
            critical_findings,
            started_at,
            finished_at: Utc::now(),
            partial_failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::RawObservation;
    use anyhow::Result;
    use std::collections::BTreeSet as Set;

    struct StaticConnector {
        id: &'static str,
        observations: Vec<RawObservation>,
    }

    #[async_trait::async_trait]
    impl Connector for StaticConnector {
        fn source_id(&self) -> &str {
            self.id
        }
        async fn scan(&self, _ctx: &ScanContext) -> Result<Vec<RawObservation>> {
            Ok(self.observations.clone())
        }
    }

    struct FailingConnector;

    #[async_trait::async_trait]
    impl Connector for FailingConnector {
        fn source_id(&self) -> &str {
            "broken-source"
        }
        async fn scan(&self, _ctx: &ScanContext) -> Result<Vec<RawObservation>> {
            anyhow::bail!("credential expired")
        }
    }

    /// Blocks until the test releases the gate.
    struct GatedConnector {
        gate: Arc<Semaphore>,
    }

    #[async_trait::async_trait]
    impl Connector for GatedConnector {
        fn source_id(&self) -> &str {
            "gated-source"
        }
        async fn scan(&self, _ctx: &ScanContext) -> Result<Vec<RawObservation>> {
            let _permit = self.gate.acquire().await?;
            Ok(Vec::new())
        }
    }

    struct SlowConnector;

    #[async_trait::async_trait]
    impl Connector for SlowConnector {
        fn source_id(&self) -> &str {
            "slow-source"
        }
        async fn scan(&self, _ctx: &ScanContext) -> Result<Vec<RawObservation>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn observation(source: &str, domain: &str, perms: &[&str]) -> RawObservation {
        RawObservation {
            source_id: source.to_string(),
            domain: domain.to_string(),
            observed_at: Utc::now(),
            raw_permissions: perms.iter().map(|s| s.to_string()).collect(),
            raw_data_types: Set::new(),
        }
    }

    fn subject(id: &str) -> SubjectConfig {
        SubjectConfig {
            id: id.to_string(),
            display_name: None,
            credentials: BTreeMap::new(),
        }
    }

    fn policy(cooldown_secs: i64, max_concurrent: usize) -> ScanPolicy {
        ScanPolicy {
            cooldown_secs,
            max_concurrent_scans: max_concurrent,
            connector_timeout_secs: 1,
            ..ScanPolicy::default()
        }
    }

    fn orchestrator(
        connectors: Vec<Arc<dyn Connector>>,
        policy: ScanPolicy,
        subjects: Vec<SubjectConfig>,
    ) -> Orchestrator {
        Orchestrator::new(policy, ClassificationTable::builtin(), connectors, subjects).unwrap()
    }

    #[tokio::test]
    async fn scan_merges_observations_across_sources() {
        let orch = orchestrator(
            vec![
                Arc::new(StaticConnector {
                    id: WORKSPACE_SOURCE,
                    observations: vec![observation(WORKSPACE_SOURCE, "slack.com", &["profile"])],
                }),
                Arc::new(StaticConnector {
                    id: "browser-telemetry",
                    observations: vec![observation(
                        "browser-telemetry",
                        "Slack.com",
                        &["files_write"],
                    )],
                }),
            ],
            policy(0, 4),
            vec![subject("acme")],
        );

        let result = orch
            .request_scan(ScanRequest::new("acme", ScanType::Comprehensive))
            .await
            .unwrap();

        assert_eq!(result.inventory.len(), 1);
        let app = result.inventory.get("slack.com").unwrap();
        assert_eq!(app.source_ids.len(), 2);
        assert!(result.partial_failures.is_empty());
        assert!((0.0..=100.0).contains(&result.composite_score));
        assert_eq!(orch.progress("acme").unwrap().percent, 100);
    }

    #[tokio::test]
    async fn failing_connector_becomes_partial_failure() {
        let orch = orchestrator(
            vec![
                Arc::new(StaticConnector {
                    id: WORKSPACE_SOURCE,
                    observations: vec![observation(WORKSPACE_SOURCE, "notion.so", &[])],
                }),
                Arc::new(FailingConnector),
            ],
            policy(0, 4),
            vec![subject("acme")],
        );

        let result = orch
            .request_scan(ScanRequest::new("acme", ScanType::Comprehensive))
            .await
            .unwrap();

        assert_eq!(result.inventory.len(), 1);
        assert!(result.partial_failures.contains("broken-source"));
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.contains("re-run the scan")));
    }

    #[tokio::test]
    async fn unknown_subject_is_rejected() {
        let orch = orchestrator(Vec::new(), policy(0, 4), vec![subject("acme")]);
        let err = orch
            .request_scan(ScanRequest::new("ghost", ScanType::Quick))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::SubjectNotFound(_)));
        assert_eq!(err.code(), "SUBJECT_NOT_FOUND");
    }

    #[tokio::test]
    async fn second_scan_while_running_returns_in_progress() {
        let gate = Arc::new(Semaphore::new(0));
        let orch = orchestrator(
            vec![Arc::new(GatedConnector { gate: gate.clone() })],
            ScanPolicy {
                cooldown_secs: 0,
                connector_timeout_secs: 600,
                ..ScanPolicy::default()
            },
            vec![subject("acme")],
        );

        let first = {
            let orch = orch.clone();
            tokio::spawn(
                async move { orch.request_scan(ScanRequest::new("acme", ScanType::Comprehensive)).await },
            )
        };

        for _ in 0..1000 {
            if orch.is_running("acme") {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(orch.is_running("acme"));

        let err = orch
            .request_scan(ScanRequest::new("acme", ScanType::Comprehensive))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::InProgress(_)));

        // The rejected request must not perturb the running scan.
        gate.add_permits(1);
        let result = first.await.unwrap().unwrap();
        assert!(result.partial_failures.is_empty());
        assert!(!orch.is_running("acme"));
    }

    #[tokio::test]
    async fn cooldown_rejects_immediate_rescan() {
        let orch = orchestrator(Vec::new(), policy(300, 4), vec![subject("acme")]);

        orch.request_scan(ScanRequest::new("acme", ScanType::Quick))
            .await
            .unwrap();

        let err = orch
            .request_scan(ScanRequest::new("acme", ScanType::Quick))
            .await
            .unwrap_err();
        match err {
            ScanError::Cooldown {
                retry_after_secs, ..
            } => assert!(retry_after_secs > 0),
            other => panic!("expected cooldown, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn zero_cooldown_allows_rescan() {
        let orch = orchestrator(Vec::new(), policy(0, 4), vec![subject("acme")]);
        orch.request_scan(ScanRequest::new("acme", ScanType::Quick))
            .await
            .unwrap();
        orch.request_scan(ScanRequest::new("acme", ScanType::Quick))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn busy_when_concurrency_budget_exhausted() {
        let gate = Arc::new(Semaphore::new(0));
        let orch = orchestrator(
            vec![Arc::new(GatedConnector { gate: gate.clone() })],
            ScanPolicy {
                cooldown_secs: 0,
                max_concurrent_scans: 1,
                connector_timeout_secs: 600,
                ..ScanPolicy::default()
            },
            vec![subject("acme"), subject("globex")],
        );

        let first = {
            let orch = orch.clone();
            tokio::spawn(
                async move { orch.request_scan(ScanRequest::new("acme", ScanType::Comprehensive)).await },
            )
        };

        for _ in 0..1000 {
            if orch.is_running("acme") {
                break;
            }
            tokio::task::yield_now().await;
        }

        let err = orch
            .request_scan(ScanRequest::new("globex", ScanType::Comprehensive))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Busy));

        gate.add_permits(1);
        first.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn connector_timeout_is_partial_failure() {
        let orch = orchestrator(
            vec![Arc::new(SlowConnector)],
            policy(0, 4),
            vec![subject("acme")],
        );

        let result = orch
            .request_scan(ScanRequest::new("acme", ScanType::Comprehensive))
            .await
            .unwrap();
        assert!(result.partial_failures.contains("slow-source"));
        assert!(result.inventory.is_empty());
    }

    #[tokio::test]
    async fn cancelled_scan_returns_subject_to_idle() {
        let gate = Arc::new(Semaphore::new(0));
        let orch = orchestrator(
            vec![Arc::new(GatedConnector { gate: gate.clone() })],
            ScanPolicy {
                cooldown_secs: 300,
                connector_timeout_secs: 600,
                ..ScanPolicy::default()
            },
            vec![subject("acme")],
        );

        let handle = {
            let orch = orch.clone();
            tokio::spawn(
                async move { orch.request_scan(ScanRequest::new("acme", ScanType::Comprehensive)).await },
            )
        };

        for _ in 0..1000 {
            if orch.is_running("acme") {
                break;
            }
            tokio::task::yield_now().await;
        }

        handle.abort();
        assert!(handle.await.is_err());

        assert!(!orch.is_running("acme"));
        // The aborted run transitioned through Failed, so cooldown applies.
        let err = orch
            .request_scan(ScanRequest::new("acme", ScanType::Comprehensive))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Cooldown { .. }));
    }

    #[tokio::test]
    async fn scan_type_selects_sources() {
        let orch = orchestrator(
            vec![
                Arc::new(StaticConnector {
                    id: WORKSPACE_SOURCE,
                    observations: vec![observation(WORKSPACE_SOURCE, "a.example", &[])],
                }),
                Arc::new(StaticConnector {
                    id: "browser-telemetry",
                    observations: vec![observation("browser-telemetry", "b.example", &[])],
                }),
            ],
            policy(0, 4),
            vec![subject("acme")],
        );

        let quick = orch
            .request_scan(ScanRequest::new("acme", ScanType::Quick))
            .await
            .unwrap();
        assert!(quick.inventory.get("a.example").is_some());
        assert!(quick.inventory.get("b.example").is_none());

        let mut custom = ScanRequest::new("acme", ScanType::Custom);
        custom.sources = vec!["browser-telemetry".to_string()];
        let custom = orch.request_scan(custom).await.unwrap();
        assert!(custom.inventory.get("a.example").is_none());
        assert!(custom.inventory.get("b.example").is_some());
    }

    #[test]
    fn invalid_policy_rejected_at_construction() {
        let mut bad = ScanPolicy::default();
        bad.weights.oauth_risk = 99;
        let err = Orchestrator::new(bad, ClassificationTable::builtin(), Vec::new(), Vec::new())
            .unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));

        let err = Orchestrator::new(
            ScanPolicy::default(),
            ClassificationTable::default(),
            Vec::new(),
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
    }
}
