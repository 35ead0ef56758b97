//! Snapshot and restore scenarios

use super::context::ScenarioContext;
use crate::domain::model::{ObjectKind, StorageVariant};
use crate::error::{Error, Result};

/// Size of the source claim
pub const SOURCE_GIB: u64 = 1;
/// Size of a restore that grows the volume
pub const LARGER_GIB: u64 = 2;

const SOURCE_CLAIM: &str = "vol";
const SNAPSHOT: &str = "snap";
const RESTORE_CLAIM: &str = "restore";
const RESTORE_POD: &str = "restore-pod";

fn source_pod(variant: StorageVariant) -> String {
    format!("{}pod", variant)
}

/// Snapshot a seeded volume and restore it into a claim of `restore_gib`.
///
/// The restore lands where the model says, carries the seeded file, and
/// when it grew, the mounted filesystem reports the new size.
pub async fn restore(ctx: &ScenarioContext, variant: StorageVariant, restore_gib: u64) -> Result<()> {
    if restore_gib < SOURCE_GIB {
        return Err(Error::Configuration(format!(
            "restore size {}Gi is smaller than the source",
            restore_gib
        )));
    }
    let node = ctx.config().nodes.snapshot.clone();
    let pod = source_pod(variant);

    ctx.step("deploying Pod with PVC");
    ctx.submit_claim(SOURCE_CLAIM, SOURCE_GIB, variant).await?;
    ctx.submit_workload(&pod, SOURCE_CLAIM, &node).await?;

    ctx.step("confirming the source claim is bound and placed");
    ctx.wait_claim_bound(SOURCE_CLAIM).await?;
    let source = ctx.resolve_volume(SOURCE_CLAIM).await?;
    ctx.assert_placement(variant, &node, &source)?;

    ctx.step("writing the seed file onto the volume");
    let path = ctx.write_seed_file(&pod).await?;

    ctx.step("creating a snapshot");
    ctx.submit_snapshot(SNAPSHOT, SOURCE_CLAIM).await?;
    ctx.wait_snapshot_ready(SNAPSHOT).await?;

    ctx.step("restoring the snapshot");
    ctx.submit_restore(RESTORE_CLAIM, restore_gib, variant, SNAPSHOT).await?;
    ctx.submit_workload(RESTORE_POD, RESTORE_CLAIM, &node).await?;

    ctx.step("verifying the restored claim");
    let claim = ctx.wait_claim_bound(RESTORE_CLAIM).await?;
    ctx.assert_requested(&claim, restore_gib)?;

    let restored = ctx.resolve_volume(RESTORE_CLAIM).await?;
    ctx.assert_placement(variant, &node, &restored)?;
    ctx.assert_allocation(&restored, restore_gib)?;
    if restored.size_bytes < source.size_bytes {
        return Err(Error::AssertionFailed(format!(
            "restored volume {} ({} bytes) is smaller than its source {} ({} bytes)",
            restored.name, restored.size_bytes, source.name, source.size_bytes
        )));
    }

    ctx.step("confirming the file exists in the restore");
    ctx.wait_file_present(RESTORE_POD, &path).await?;

    if restore_gib > SOURCE_GIB {
        ctx.step("confirming the restored filesystem was resized");
        ctx.wait_filesystem_size(RESTORE_POD, restore_gib).await?;
    }

    Ok(())
}

/// A restored volume outlives its source claim and snapshot
pub async fn restore_independence(ctx: &ScenarioContext, variant: StorageVariant) -> Result<()> {
    let node = ctx.config().nodes.snapshot.clone();
    let pod = source_pod(variant);

    ctx.step("creating a PVC and application");
    let claim_manifest = ctx.submit_claim(SOURCE_CLAIM, SOURCE_GIB, variant).await?;
    let pod_manifest = ctx.submit_workload(&pod, SOURCE_CLAIM, &node).await?;
    let source_claim = ctx.wait_claim_bound(SOURCE_CLAIM).await?;
    let source = ctx.resolve_volume(SOURCE_CLAIM).await?;
    let path = ctx.write_seed_file(&pod).await?;

    ctx.step("creating a snapshot of the PVC");
    let snapshot_manifest = ctx.submit_snapshot(SNAPSHOT, SOURCE_CLAIM).await?;
    ctx.wait_snapshot_ready(SNAPSHOT).await?;

    ctx.step("restoring the snapshot");
    ctx.submit_restore(RESTORE_CLAIM, SOURCE_GIB, variant, SNAPSHOT).await?;
    ctx.submit_workload(RESTORE_POD, RESTORE_CLAIM, &node).await?;
    ctx.wait_claim_bound(RESTORE_CLAIM).await?;
    let restored = ctx.resolve_volume(RESTORE_CLAIM).await?;
    ctx.assert_placement(variant, &node, &restored)?;

    ctx.step("deleting the source volume and snapshot");
    ctx.delete_manifest(&pod_manifest).await?;
    ctx.delete_manifest(&claim_manifest).await?;
    ctx.delete_manifest(&snapshot_manifest).await?;
    ctx.wait_absent(ObjectKind::Pod, &pod).await?;
    ctx.wait_absent(ObjectKind::PersistentVolumeClaim, SOURCE_CLAIM).await?;
    ctx.wait_absent(ObjectKind::VolumeSnapshot, SNAPSHOT).await?;
    if let Some(pv) = &source_claim.volume_name {
        ctx.wait_volume_released(pv, &source.name).await?;
    }

    ctx.step("validating the restored volume is still present");
    let claim = ctx.wait_claim_bound(RESTORE_CLAIM).await?;
    let still = ctx.resolve_volume(&claim.name).await?;
    if still.name != restored.name {
        return Err(Error::AssertionFailed(format!(
            "restored claim moved from volume {} to {}",
            restored.name, still.name
        )));
    }
    ctx.wait_file_present(RESTORE_POD, &path).await?;

    Ok(())
}
