//! Harness Configuration
//!
//! Static knowledge about the cluster under test: storage class names, which
//! node owns which volume group, pool capacities and timing budgets. Loaded
//! from YAML or defaulted to the standard kind-based e2e topology.

use crate::domain::model::{StorageVariant, GIB};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on any single wait or hold window (one day)
pub const MAX_WAIT_SECS: u64 = 24 * 60 * 60;

// =============================================================================
// Top-level Configuration
// =============================================================================

/// Complete harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HarnessConfig {
    pub kubectl: KubectlConfig,
    pub lvm: LvmConfig,
    pub classes: StorageClasses,
    pub topology: TopologyConfig,
    pub nodes: ScenarioNodes,
    pub timing: TimingConfig,
    pub workload: WorkloadConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            kubectl: KubectlConfig::default(),
            lvm: LvmConfig::default(),
            classes: StorageClasses::default(),
            topology: TopologyConfig::default(),
            nodes: ScenarioNodes::default(),
            timing: TimingConfig::default(),
            workload: WorkloadConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: HarnessConfig = serde_yaml::from_str(&raw).map_err(|e| {
            Error::Configuration(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Pin every scenario to a single node running lvmd as a DaemonSet.
    ///
    /// The node receives the daemonset topology unless the configuration
    /// already describes it.
    pub fn with_daemonset_node(mut self, node: &str) -> Self {
        self.nodes = ScenarioNodes {
            snapshot: node.to_string(),
            provision: node.to_string(),
            overprovision: node.to_string(),
            overprovision_limit: node.to_string(),
            thin_overcommit: node.to_string(),
        };
        self.topology
            .nodes
            .entry(node.to_string())
            .or_insert_with(NodeTopology::daemonset);
        self
    }

    /// Reject configurations the placement model cannot reason about
    pub fn validate(&self) -> Result<()> {
        if self.classes.thin == self.classes.thick {
            return Err(Error::Configuration(format!(
                "thin and thick storage classes must differ (both {:?})",
                self.classes.thin
            )));
        }

        if self.topology.overprovision_ratio < 1.0 {
            return Err(Error::Configuration(format!(
                "overprovision ratio must be >= 1.0, got {}",
                self.topology.overprovision_ratio
            )));
        }

        for node in self.nodes.all() {
            if !self.topology.nodes.contains_key(node) {
                return Err(Error::Configuration(format!(
                    "scenario node {} has no topology entry",
                    node
                )));
            }
        }

        for (name, node) in &self.topology.nodes {
            if node.thin.pool.is_none() {
                return Err(Error::Configuration(format!(
                    "node {} thin device class has no pool",
                    name
                )));
            }
            if node.thick_capacity_gib == 0 || node.thin_pool_gib == 0 {
                return Err(Error::Configuration(format!(
                    "node {} has zero thick capacity or thin pool size",
                    name
                )));
            }
        }

        let workload = &self.workload;
        if workload.thin_overcommit_claims < 2 {
            return Err(Error::Configuration(format!(
                "thin overcommit needs at least 2 claims, got {}",
                workload.thin_overcommit_claims
            )));
        }
        let requested = u64::from(workload.thin_overcommit_claims)
            .saturating_mul(workload.thin_overcommit_claim_gib);
        if let Some(node) = self.topology.nodes.get(&self.nodes.thin_overcommit) {
            if requested <= node.thin_pool_gib {
                return Err(Error::Configuration(format!(
                    "thin overcommit claims total {}Gi, which fits the {}Gi pool on {}",
                    requested, node.thin_pool_gib, self.nodes.thin_overcommit
                )));
            }
        }

        if self.timing.poll_interval_ms == 0 {
            return Err(Error::Configuration("poll interval must be non-zero".into()));
        }
        if self.timing.wait_timeout_secs > MAX_WAIT_SECS
            || self.timing.hold_window_secs > MAX_WAIT_SECS
        {
            return Err(Error::Configuration(format!(
                "wait timeout and hold window must not exceed {}s",
                MAX_WAIT_SECS
            )));
        }

        Ok(())
    }

    /// Storage class name for a variant
    pub fn storage_class(&self, variant: StorageVariant) -> &str {
        match variant {
            StorageVariant::Thin => &self.classes.thin,
            StorageVariant::Thick => &self.classes.thick,
        }
    }

    /// Variant selected by a storage class name
    pub fn variant_of(&self, storage_class: &str) -> Option<StorageVariant> {
        if storage_class == self.classes.thin {
            Some(StorageVariant::Thin)
        } else if storage_class == self.classes.thick {
            Some(StorageVariant::Thick)
        } else {
            None
        }
    }
}

// =============================================================================
// Collaborator Configuration
// =============================================================================

/// How to reach the cluster CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KubectlConfig {
    pub binary: String,
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
}

impl Default for KubectlConfig {
    fn default() -> Self {
        Self {
            binary: "kubectl".to_string(),
            kubeconfig: None,
            context: None,
        }
    }
}

/// How to reach the LVM host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LvmConfig {
    /// Prefix prepended to every host command (e.g. `sudo`, or
    /// `docker exec <node>`)
    pub command_prefix: Vec<String>,
    pub lvs_binary: String,
}

impl Default for LvmConfig {
    fn default() -> Self {
        Self {
            command_prefix: vec!["sudo".to_string()],
            lvs_binary: "lvs".to_string(),
        }
    }
}

/// Storage class and snapshot class names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageClasses {
    pub thin: String,
    pub thick: String,
    pub snapshot: String,
}

impl Default for StorageClasses {
    fn default() -> Self {
        Self {
            thin: "topolvm-provisioner-thin".to_string(),
            thick: "topolvm-provisioner-thick".to_string(),
            snapshot: "topolvm-provisioner".to_string(),
        }
    }
}

// =============================================================================
// Topology
// =============================================================================

/// Where each device class lives on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceClassTopology {
    pub volume_group: String,
    #[serde(default)]
    pub pool: Option<String>,
}

impl DeviceClassTopology {
    fn new(volume_group: &str, pool: Option<&str>) -> Self {
        Self {
            volume_group: volume_group.to_string(),
            pool: pool.map(str::to_string),
        }
    }
}

/// Volume groups and capacity of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTopology {
    pub thin: DeviceClassTopology,
    pub thick: DeviceClassTopology,
    /// Physical capacity backing thick volumes, in GiB
    #[serde(default = "default_thick_capacity_gib")]
    pub thick_capacity_gib: u64,
    /// Size of the thin pool, in GiB
    #[serde(default = "default_thin_pool_gib")]
    pub thin_pool_gib: u64,
}

fn default_thick_capacity_gib() -> u64 {
    4
}

fn default_thin_pool_gib() -> u64 {
    4
}

impl NodeTopology {
    fn worker(thin_vg: &str, thick_vg: &str) -> Self {
        Self {
            thin: DeviceClassTopology::new(thin_vg, Some("pool0")),
            thick: DeviceClassTopology::new(thick_vg, None),
            thick_capacity_gib: default_thick_capacity_gib(),
            thin_pool_gib: default_thin_pool_gib(),
        }
    }

    /// Topology of a node whose lvmd runs as a DaemonSet
    pub fn daemonset() -> Self {
        Self {
            thin: DeviceClassTopology::new("node-myvg5", Some("pool0")),
            thick: DeviceClassTopology::new("node-myvg1", None),
            thick_capacity_gib: default_thick_capacity_gib(),
            thin_pool_gib: default_thin_pool_gib(),
        }
    }

    pub fn device_class(&self, variant: StorageVariant) -> &DeviceClassTopology {
        match variant {
            StorageVariant::Thin => &self.thin,
            StorageVariant::Thick => &self.thick,
        }
    }

    pub fn thick_capacity_bytes(&self) -> u64 {
        self.thick_capacity_gib * GIB
    }

    pub fn thin_pool_bytes(&self) -> u64 {
        self.thin_pool_gib * GIB
    }
}

/// Cluster-wide topology knowledge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopologyConfig {
    /// Node label key used to pin workloads
    pub node_key: String,
    pub nodes: BTreeMap<String, NodeTopology>,
    /// Multiplier applied to thick capacity
    pub overprovision_ratio: f64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "topolvm-e2e-worker".to_string(),
            NodeTopology::worker("node1-myvg4", "node-myvg1"),
        );
        nodes.insert(
            "topolvm-e2e-worker2".to_string(),
            NodeTopology::worker("node2-myvg4", "node2-myvg1"),
        );
        nodes.insert(
            "topolvm-e2e-worker3".to_string(),
            NodeTopology::worker("node3-myvg4", "node3-myvg1"),
        );

        Self {
            node_key: "topology.topolvm.io/node".to_string(),
            nodes,
            overprovision_ratio: 5.0,
        }
    }
}

/// Node each scenario family pins its workloads to. Capacity-sensitive
/// scenarios must not share a node with each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScenarioNodes {
    pub snapshot: String,
    pub provision: String,
    pub overprovision: String,
    pub overprovision_limit: String,
    pub thin_overcommit: String,
}

impl Default for ScenarioNodes {
    fn default() -> Self {
        Self {
            snapshot: "topolvm-e2e-worker".to_string(),
            provision: "topolvm-e2e-worker".to_string(),
            overprovision: "topolvm-e2e-worker2".to_string(),
            overprovision_limit: "topolvm-e2e-worker3".to_string(),
            thin_overcommit: "topolvm-e2e-worker".to_string(),
        }
    }
}

impl ScenarioNodes {
    fn all(&self) -> [&String; 5] {
        [
            &self.snapshot,
            &self.provision,
            &self.overprovision,
            &self.overprovision_limit,
            &self.thin_overcommit,
        ]
    }
}

// =============================================================================
// Timing
// =============================================================================

/// Wait budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimingConfig {
    pub wait_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// How long a claim must stay unbound to count as rejected
    pub hold_window_secs: u64,
    /// Abort a wait on errors that cannot heal (malformed output)
    pub abort_on_fatal: bool,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: 180,
            poll_interval_ms: 1000,
            hold_window_secs: 60,
            abort_on_fatal: false,
        }
    }
}

impl TimingConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn hold_window(&self) -> Duration {
        Duration::from_secs(self.hold_window_secs)
    }
}

// =============================================================================
// Workload
// =============================================================================

/// Shape of the pods that consume claims
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkloadConfig {
    pub image: String,
    /// Where the claim is mounted inside the pod
    pub mount_path: String,
    /// File copied onto the volume before snapshotting
    pub seed_file: String,
    /// Number of claims the thin overcommit scenario creates
    pub thin_overcommit_claims: u32,
    /// Size of each thin overcommit claim in GiB
    pub thin_overcommit_claim_gib: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            image: "ubuntu:22.04".to_string(),
            mount_path: "/test1".to_string(),
            seed_file: "/var/log/bootstrap.log".to_string(),
            thin_overcommit_claims: 3,
            thin_overcommit_claim_gib: 5,
        }
    }
}
