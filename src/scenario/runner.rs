//! Harness Runner
//!
//! Runs scenarios, each in its own namespace and tokio task, and collects
//! the outcomes into a [`RunReport`]. A failed scenario keeps its namespace
//! for investigation; a passed one is torn down.

use super::catalogue::Scenario;
use super::cleanup::CleanupSummary;
use super::context::ScenarioContext;
use crate::cluster::ResourceAccessor;
use crate::config::HarnessConfig;
use crate::domain::ports::{ClusterCliRef, HostInventoryRef, HostShellRef};
use crate::error::Result;
use crate::host::LvmInventory;
use crate::placement::PlacementModel;
use crate::wait::WaitPolicy;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

const NAMESPACE_SUFFIX_LEN: usize = 10;

// =============================================================================
// Reports
// =============================================================================

/// How a scenario ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed {
        error: String,
        /// Innermost probe error when a wait timed out
        root_cause: String,
    },
}

/// Result of one scenario run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub namespace: String,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub cleanup: CleanupSummary,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scenarios: Vec<ScenarioReport>,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &ScenarioReport> {
        self.scenarios.iter().filter(|r| !r.passed())
    }

    /// Every scenario passed and every teardown was clean
    pub fn is_success(&self) -> bool {
        self.scenarios
            .iter()
            .all(|r| r.passed() && r.cleanup.is_clean())
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for report in &self.scenarios {
            let status = match &report.outcome {
                Outcome::Passed if report.cleanup.is_clean() => "PASS",
                Outcome::Passed => "PASS (cleanup failed)",
                Outcome::Failed { .. } => "FAIL",
            };
            writeln!(
                f,
                "{:<24} {:<34} {:>8.1}s  {}",
                status,
                report.scenario,
                report.duration_ms as f64 / 1000.0,
                report.namespace
            )?;
            if let Outcome::Failed { error, .. } = &report.outcome {
                writeln!(f, "    {}", error)?;
            }
        }

        let passed = self.scenarios.iter().filter(|r| r.passed()).count();
        write!(f, "{}/{} scenarios passed", passed, self.scenarios.len())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Entry point for running scenarios against one cluster
#[derive(Clone)]
pub struct Harness {
    config: Arc<HarnessConfig>,
    cluster: ClusterCliRef,
    accessor: ResourceAccessor,
    inventory: HostInventoryRef,
    model: PlacementModel,
}

impl Harness {
    /// Build a harness over the given cluster and host shell
    pub fn new(config: HarnessConfig, cluster: ClusterCliRef, shell: HostShellRef) -> Result<Self> {
        config.validate()?;
        let accessor = ResourceAccessor::new(cluster.clone());
        let inventory: HostInventoryRef =
            Arc::new(LvmInventory::new(shell, accessor.clone(), &config.lvm));
        let model = PlacementModel::new(config.topology.clone());

        Ok(Self {
            config: Arc::new(config),
            cluster,
            accessor,
            inventory,
            model,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run one scenario in a fresh namespace
    pub async fn run(&self, scenario: Scenario) -> ScenarioReport {
        let namespace = fresh_namespace(scenario);
        self.run_in(scenario, namespace).await
    }

    async fn run_in(&self, scenario: Scenario, namespace: String) -> ScenarioReport {
        let span = info_span!("scenario", scenario = %scenario, namespace = %namespace);
        async move {
            let started_at = Utc::now();
            let clock = Instant::now();
            info!("Starting scenario");

            let ctx = ScenarioContext::new(
                namespace.clone(),
                self.config.clone(),
                self.cluster.clone(),
                self.accessor.clone(),
                self.inventory.clone(),
                self.model.clone(),
            );

            let result = async {
                ctx.create_namespace().await?;
                scenario.execute(&ctx).await
            }
            .await;

            let (outcome, cleanup) = match result {
                Ok(()) => {
                    let policy = WaitPolicy::from(&self.config.timing);
                    let cleanup = ctx.cleanup.teardown(self.cluster.as_ref(), &policy).await;
                    info!(
                        elapsed_ms = clock.elapsed().as_millis() as u64,
                        deleted = cleanup.deleted.len(),
                        "Scenario passed"
                    );
                    (Outcome::Passed, cleanup)
                }
                Err(e) => {
                    let root_cause = e.root_cause().to_string();
                    error!(error = %e, root_cause = %root_cause, "Scenario failed; retaining namespace");
                    let outcome = Outcome::Failed {
                        error: e.to_string(),
                        root_cause,
                    };
                    (outcome, ctx.cleanup.retain())
                }
            };

            ScenarioReport {
                scenario,
                namespace,
                outcome,
                started_at,
                duration_ms: clock.elapsed().as_millis() as u64,
                cleanup,
            }
        }
        .instrument(span)
        .await
    }

    /// Run scenarios as separate tasks, at most `concurrency` at a time.
    /// Reports come back in the order the scenarios were given.
    pub async fn run_all(&self, scenarios: &[Scenario], concurrency: usize) -> RunReport {
        let started_at = Utc::now();
        info!(count = scenarios.len(), concurrency, "Running scenarios");

        let mut reports: Vec<(usize, ScenarioReport)> = stream::iter(scenarios.iter().copied().enumerate())
            .map(|(index, scenario)| {
                let harness = self.clone();
                let namespace = fresh_namespace(scenario);
                async move {
                    let task = tokio::spawn({
                        let namespace = namespace.clone();
                        async move { harness.run_in(scenario, namespace).await }
                    });
                    let report = match task.await {
                        Ok(report) => report,
                        Err(e) => {
                            warn!(scenario = %scenario, error = %e, "Scenario task did not complete");
                            ScenarioReport {
                                scenario,
                                namespace,
                                outcome: Outcome::Failed {
                                    error: format!("scenario task failed: {}", e),
                                    root_cause: e.to_string(),
                                },
                                started_at: Utc::now(),
                                duration_ms: 0,
                                cleanup: CleanupSummary::default(),
                            }
                        }
                    };
                    (index, report)
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        reports.sort_by_key(|(index, _)| *index);
        RunReport {
            started_at,
            finished_at: Utc::now(),
            scenarios: reports.into_iter().map(|(_, report)| report).collect(),
        }
    }
}

/// `<prefix><10 random lowercase alphanumerics>`
fn fresh_namespace(scenario: Scenario) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..NAMESPACE_SUFFIX_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("{}{}", scenario.namespace_prefix(), suffix)
}
