//! Scenario Context
//!
//! The steps scenarios are written in: submit objects into the scenario's
//! namespace, wait for them to converge, and check what the driver did
//! against the placement model. Every wait goes through [`crate::wait`].

use super::cleanup::CleanupContext;
use crate::cluster::{manifest, Manifest, ResourceAccessor};
use crate::config::HarnessConfig;
use crate::domain::model::{
    gib_quantity, ClaimPhase, ClaimRecord, LogicalVolume, ObjectKind, ObjectRef, StorageVariant,
    GIB,
};
use crate::domain::ports::{ClusterCliRef, HostInventoryRef};
use crate::error::{Error, Result};
use crate::host::check_deleted;
use crate::placement::{PlacementExpectation, PlacementModel};
use crate::wait::{hold, wait, WaitPolicy};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything one scenario run needs, scoped to its namespace
pub struct ScenarioContext {
    pub namespace: String,
    config: Arc<HarnessConfig>,
    cluster: ClusterCliRef,
    accessor: ResourceAccessor,
    inventory: HostInventoryRef,
    model: PlacementModel,
    policy: WaitPolicy,
    pub cleanup: CleanupContext,
}

impl ScenarioContext {
    pub fn new(
        namespace: String,
        config: Arc<HarnessConfig>,
        cluster: ClusterCliRef,
        accessor: ResourceAccessor,
        inventory: HostInventoryRef,
        model: PlacementModel,
    ) -> Self {
        let policy = WaitPolicy::from(&config.timing);
        Self {
            namespace,
            config,
            cluster,
            accessor,
            inventory,
            model,
            policy,
            cleanup: CleanupContext::new(),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn model(&self) -> &PlacementModel {
        &self.model
    }

    /// Log a scenario step
    pub fn step(&self, description: &str) {
        info!(namespace = %self.namespace, "{}", description);
    }

    fn ns(&self) -> Option<&str> {
        Some(&self.namespace)
    }

    // =========================================================================
    // Submission
    // =========================================================================

    async fn apply(&self, manifest: &Manifest) -> Result<()> {
        debug!(kind = manifest.kind, name = %manifest.name, "Applying");
        self.cluster.apply(self.ns(), &manifest.body).await
    }

    /// Create the scenario namespace and wait until it is readable
    pub async fn create_namespace(&self) -> Result<()> {
        let m = manifest::namespace(&self.namespace)?;
        self.cluster.apply(None, &m.body).await?;
        self.cleanup.register(ObjectRef::namespace(&self.namespace));

        wait(&self.policy, &format!("namespace {}", self.namespace), || {
            self.cluster.get(ObjectKind::Namespace, None, &self.namespace)
        })
        .await?;
        Ok(())
    }

    pub async fn submit_claim(&self, name: &str, size_gib: u64, variant: StorageVariant) -> Result<Manifest> {
        let m = manifest::claim(name, size_gib, self.config.storage_class(variant))?;
        self.apply(&m).await?;
        Ok(m)
    }

    pub async fn submit_restore(
        &self,
        name: &str,
        size_gib: u64,
        variant: StorageVariant,
        snapshot: &str,
    ) -> Result<Manifest> {
        let m = manifest::restore_claim(name, size_gib, self.config.storage_class(variant), snapshot)?;
        self.apply(&m).await?;
        Ok(m)
    }

    /// Long-running pod mounting `claim`, pinned to `node`
    pub async fn submit_workload(&self, name: &str, claim: &str, node: &str) -> Result<Manifest> {
        let workload = &self.config.workload;
        let m = manifest::workload(
            name,
            claim,
            &workload.image,
            &workload.mount_path,
            self.model.node_key(),
            node,
        )?;
        self.apply(&m).await?;
        Ok(m)
    }

    pub async fn submit_snapshot(&self, name: &str, claim: &str) -> Result<Manifest> {
        let m = manifest::snapshot(name, &self.config.classes.snapshot, claim)?;
        self.apply(&m).await?;
        Ok(m)
    }

    // =========================================================================
    // Convergence
    // =========================================================================

    pub async fn wait_claim_bound(&self, claim: &str) -> Result<ClaimRecord> {
        wait(&self.policy, &format!("claim {} bound", claim), || async move {
            let record = self.accessor.get_claim(&self.namespace, claim).await?;
            if record.is_bound() {
                Ok(record)
            } else {
                Err(Error::NotConverged(format!("claim {} is {}", claim, record.phase)))
            }
        })
        .await
    }

    pub async fn wait_snapshot_ready(&self, snapshot: &str) -> Result<()> {
        wait(&self.policy, &format!("snapshot {} ready", snapshot), || async move {
            let record = self.accessor.get_snapshot(&self.namespace, snapshot).await?;
            match record.ready_to_use {
                Some(true) => Ok(()),
                Some(false) => Err(Error::NotConverged(format!("snapshot {} is not ready to use", snapshot))),
                None => Err(Error::NotConverged(format!("snapshot {} has no status yet", snapshot))),
            }
        })
        .await
    }

    /// Resolve the host logical volume behind a bound claim. The backing
    /// persistent volume is registered for cleanup.
    pub async fn resolve_volume(&self, claim: &str) -> Result<LogicalVolume> {
        let record = wait(&self.policy, &format!("claim {}", claim), || {
            self.accessor.get_claim(&self.namespace, claim)
        })
        .await?;
        if let Some(pv) = &record.volume_name {
            self.cleanup
                .register(ObjectRef::cluster_scoped(ObjectKind::PersistentVolume, pv));
            self.assert_bound_to(pv, claim).await?;
        }

        let lv_name = wait(&self.policy, &format!("logical volume name of {}", claim), || {
            self.inventory
                .get_logical_volume_name_for_claim(claim, &self.namespace)
        })
        .await?;

        let lv = wait(&self.policy, &format!("logical volume {}", lv_name), || {
            self.inventory.get_logical_volume(&lv_name)
        })
        .await?;

        debug!(
            claim = %claim,
            lv = %lv.name,
            vg = %lv.volume_group,
            pool = ?lv.pool,
            size = lv.size_bytes,
            "Resolved backing volume"
        );
        Ok(lv)
    }

    /// The persistent volume's claim reference points back at `claim`
    async fn assert_bound_to(&self, pv: &str, claim: &str) -> Result<()> {
        let volume = wait(&self.policy, &format!("persistent volume {}", pv), || {
            self.accessor.get_persistent_volume(pv)
        })
        .await?;

        let bound_to = volume
            .spec
            .as_ref()
            .and_then(|spec| spec.claim_ref.as_ref())
            .map(|r| (r.namespace.as_deref(), r.name.as_deref()));
        if bound_to != Some((Some(self.namespace.as_str()), Some(claim))) {
            return Err(Error::AssertionFailed(format!(
                "persistent volume {} is bound to {:?}, expected {}/{}",
                pv, bound_to, self.namespace, claim
            )));
        }
        Ok(())
    }

    /// Expected placement for a variant on a node
    pub fn expect(&self, variant: StorageVariant, node: &str) -> Result<PlacementExpectation> {
        self.model.expect(variant, node)
    }

    pub fn assert_placement(&self, variant: StorageVariant, node: &str, lv: &LogicalVolume) -> Result<()> {
        self.expect(variant, node)?.verify(lv)
    }

    /// The allocation is the requested size, up to extent rounding
    pub fn assert_allocation(&self, lv: &LogicalVolume, size_gib: u64) -> Result<()> {
        if !lv.satisfies(size_gib * GIB) {
            return Err(Error::AssertionFailed(format!(
                "logical volume {} has {} bytes, requested {}",
                lv.name,
                lv.size_bytes,
                gib_quantity(size_gib)
            )));
        }
        Ok(())
    }

    /// The claim still requests exactly `size_gib`
    pub fn assert_requested(&self, claim: &ClaimRecord, size_gib: u64) -> Result<()> {
        if claim.requested_bytes != size_gib * GIB {
            return Err(Error::AssertionFailed(format!(
                "claim {} requests {} bytes, expected {}",
                claim.name,
                claim.requested_bytes,
                gib_quantity(size_gib)
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Data
    // =========================================================================

    /// Path of the seed file once copied onto the mounted volume
    pub fn seed_target(&self) -> String {
        let workload = &self.config.workload;
        let file = workload
            .seed_file
            .rsplit('/')
            .next()
            .unwrap_or(workload.seed_file.as_str());
        format!("{}/{}", workload.mount_path, file)
    }

    /// Copy the seed file onto the volume mounted by `pod`, flush, and read
    /// it back. Returns the path written.
    pub async fn write_seed_file(&self, pod: &str) -> Result<String> {
        let target = self.seed_target();
        let seed = self.config.workload.seed_file.as_str();
        let dest = target.as_str();

        self.wait_pod_running(pod).await?;
        wait(&self.policy, &format!("copy seed file in {}", pod), || async move {
            self.cluster
                .exec(&self.namespace, pod, &["cp", seed, dest])
                .await
        })
        .await?;

        self.cluster.exec(&self.namespace, pod, &["sync"]).await?;
        let content = self
            .cluster
            .exec(&self.namespace, pod, &["cat", target.as_str()])
            .await?;
        if content.trim().is_empty() {
            return Err(Error::AssertionFailed(format!("{} is empty after writing", target)));
        }

        Ok(target)
    }

    pub async fn wait_pod_running(&self, pod: &str) -> Result<()> {
        wait(&self.policy, &format!("pod {} running", pod), || async move {
            let object = self.accessor.get_pod(&self.namespace, pod).await?;
            let phase = object
                .status
                .and_then(|status| status.phase)
                .unwrap_or_else(|| "Pending".to_string());
            match phase.as_str() {
                "Running" => Ok(()),
                "Failed" | "Succeeded" => Err(Error::AssertionFailed(format!(
                    "pod {} exited ({})",
                    pod, phase
                ))),
                _ => Err(Error::NotConverged(format!("pod {} is {}", pod, phase))),
            }
        })
        .await
    }

    pub async fn wait_file_present(&self, pod: &str, path: &str) -> Result<()> {
        wait(&self.policy, &format!("{} in {}", path, pod), || async move {
            let content = self.cluster.exec(&self.namespace, pod, &["cat", path]).await?;
            if content.trim().is_empty() {
                Err(Error::NotConverged(format!("{} is empty", path)))
            } else {
                Ok(())
            }
        })
        .await
    }

    /// Wait until the filesystem mounted in `pod` reports `size_gib`
    pub async fn wait_filesystem_size(&self, pod: &str, size_gib: u64) -> Result<()> {
        let mount_path = self.config.workload.mount_path.as_str();
        wait(&self.policy, &format!("filesystem in {} resized", pod), || async move {
            let out = self
                .cluster
                .exec(&self.namespace, pod, &["df", "-h", "--output=size", mount_path])
                .await?;
            let actual = parse_df_size_gib(&out)?;
            if actual == size_gib {
                Ok(())
            } else {
                Err(Error::NotConverged(format!(
                    "filesystem is {}G, expected {}G",
                    actual, size_gib
                )))
            }
        })
        .await
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Delete a namespaced object
    pub async fn delete(&self, kind: ObjectKind, name: &str) -> Result<()> {
        self.cluster.delete(kind, self.ns(), name).await
    }

    /// Delete what a manifest describes
    pub async fn delete_manifest(&self, manifest: &Manifest) -> Result<()> {
        self.cluster.delete_manifest(self.ns(), &manifest.body).await
    }

    pub async fn wait_absent(&self, kind: ObjectKind, name: &str) -> Result<()> {
        let ns = if kind.is_namespaced() { self.ns() } else { None };
        wait(&self.policy, &format!("{} {} deleted", kind, name), || {
            self.accessor.check_absent(kind, ns, name)
        })
        .await
    }

    /// Wait for a released volume to disappear from the cluster and the host
    pub async fn wait_volume_released(&self, pv: &str, lv: &str) -> Result<()> {
        self.wait_absent(ObjectKind::PersistentVolume, pv).await?;
        self.cleanup
            .deregister(&ObjectRef::cluster_scoped(ObjectKind::PersistentVolume, pv));

        wait(&self.policy, &format!("logical volume {} deleted", lv), || {
            check_deleted(self.inventory.as_ref(), lv)
        })
        .await
    }

    /// Require a claim to stay unbound for the whole hold window
    pub async fn hold_unbound(&self, claim: &str) -> Result<()> {
        let timing = &self.config.timing;
        hold(
            timing.hold_window(),
            timing.poll_interval(),
            &format!("claim {} unbound", claim),
            || async move {
                let record = self.accessor.get_claim(&self.namespace, claim).await?;
                match record.phase {
                    ClaimPhase::Bound => Err(Error::AssertionFailed(format!(
                        "claim {} bound to {:?}",
                        claim, record.volume_name
                    ))),
                    _ => Ok(()),
                }
            },
        )
        .await
    }
}

/// Parse `df -h --output=size` output into whole GiB
pub fn parse_df_size_gib(output: &str) -> Result<u64> {
    let malformed = |reason: String| Error::MalformedResponse {
        what: "df output".into(),
        reason,
    };

    let fields: Vec<&str> = output.split_whitespace().collect();
    let size = match fields.as_slice() {
        [_header, size] => *size,
        _ => return Err(malformed(format!("unexpected output {:?}", output))),
    };

    let value = size
        .strip_suffix('G')
        .ok_or_else(|| malformed(format!("size {:?} is not in G", size)))?;
    let gib: f64 = value
        .parse()
        .map_err(|_| malformed(format!("invalid size {:?}", size)))?;

    Ok(gib as u64)
}
