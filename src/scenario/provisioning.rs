//! Provisioning and capacity scenarios

use super::context::ScenarioContext;
use crate::domain::model::{ObjectKind, StorageVariant, GIB};
use crate::error::{Error, Result};
use tracing::info;

/// Claims the overprovision scenario fills a node with
const OVERPROVISION_CLAIMS: u64 = 5;
const OVERPROVISION_CLAIM_GIB: u64 = 3;

/// Claim that uses up most of the limit, then one that overflows it
const LIMIT_FILL_GIB: u64 = 18;
const LIMIT_OVERFLOW_GIB: u64 = 5;

/// Provision one thick volume, check its placement, then check that
/// releasing it removes both the PV and the host LV
pub async fn thick_provision(ctx: &ScenarioContext) -> Result<()> {
    let node = ctx.config().nodes.provision.clone();
    let variant = StorageVariant::Thick;

    ctx.step("deploying Pod with PVC");
    let claim_manifest = ctx.submit_claim("thickvol", 1, variant).await?;
    let pod_manifest = ctx.submit_workload("thickpod", "thickvol", &node).await?;

    ctx.step("confirming the volume was created in the thick volume group");
    let claim = ctx.wait_claim_bound("thickvol").await?;
    let lv = ctx.resolve_volume("thickvol").await?;
    ctx.assert_placement(variant, &node, &lv)?;
    ctx.assert_allocation(&lv, 1)?;

    ctx.step("deleting the Pod and PVC");
    ctx.delete_manifest(&pod_manifest).await?;
    ctx.delete_manifest(&claim_manifest).await?;

    ctx.step("confirming the PV and the logical volume are deleted");
    let pv = claim.volume_name.ok_or_else(|| {
        Error::AssertionFailed("bound claim thickvol reports no volume".into())
    })?;
    ctx.wait_volume_released(&pv, &lv.name).await
}

/// Fill a node with thick claims whose total stays within
/// `capacity × ratio`; every one must bind in the node's thick VG
pub async fn thick_overprovision(ctx: &ScenarioContext) -> Result<()> {
    let node = ctx.config().nodes.overprovision.clone();
    let variant = StorageVariant::Thick;

    let expectation = ctx.expect(variant, &node)?;
    let total = OVERPROVISION_CLAIMS * OVERPROVISION_CLAIM_GIB * GIB;
    if !expectation.admits(0, total) {
        return Err(Error::Configuration(format!(
            "node {} cannot hold {} bytes of thick volumes; limit is {:?}",
            node, total, expectation.capacity_limit_bytes
        )));
    }

    ctx.step("deploying PVCs totalling less than capacity × overprovision ratio");
    for i in 0..OVERPROVISION_CLAIMS {
        let claim = format!("thickvol{}", i);
        ctx.submit_claim(&claim, OVERPROVISION_CLAIM_GIB, variant).await?;
        ctx.submit_workload(&format!("thickpod{}", i), &claim, &node).await?;
    }

    ctx.step("confirming every volume was created in the thick volume group");
    let mut allocated = 0;
    for i in 0..OVERPROVISION_CLAIMS {
        let claim = format!("thickvol{}", i);
        ctx.wait_claim_bound(&claim).await?;
        let lv = ctx.resolve_volume(&claim).await?;
        ctx.assert_placement(variant, &node, &lv)?;
        allocated += lv.size_bytes;
    }
    info!(node = %node, allocated, limit = ?expectation.capacity_limit_bytes, "Node filled");
    if !expectation.admits(0, allocated) {
        return Err(Error::AssertionFailed(format!(
            "thick volumes on {} total {} bytes and exceed the limit {:?}",
            node, allocated, expectation.capacity_limit_bytes
        )));
    }

    ctx.step("deleting the Pods and PVCs");
    for i in 0..OVERPROVISION_CLAIMS {
        let pod = format!("thickpod{}", i);
        let claim = format!("thickvol{}", i);
        ctx.delete(ObjectKind::Pod, &pod).await?;
        ctx.delete(ObjectKind::PersistentVolumeClaim, &claim).await?;
        ctx.wait_absent(ObjectKind::Pod, &pod).await?;
        ctx.wait_absent(ObjectKind::PersistentVolumeClaim, &claim).await?;
    }

    Ok(())
}

/// Use up the limit with one claim; a second claim that would exceed
/// `capacity × ratio` must never bind
pub async fn thick_overprovision_limit(ctx: &ScenarioContext) -> Result<()> {
    let node = ctx.config().nodes.overprovision_limit.clone();
    let variant = StorageVariant::Thick;

    let expectation = ctx.expect(variant, &node)?;
    let fill = LIMIT_FILL_GIB * GIB;
    let overflow = LIMIT_OVERFLOW_GIB * GIB;
    if !expectation.admits(0, fill) || expectation.admits(fill, overflow) {
        return Err(Error::Configuration(format!(
            "node {} limit {:?} is not between {}Gi and {}Gi",
            node,
            expectation.capacity_limit_bytes,
            LIMIT_FILL_GIB,
            LIMIT_FILL_GIB + LIMIT_OVERFLOW_GIB
        )));
    }

    ctx.step("deploying a PVC that uses up the overprovisioned capacity");
    ctx.submit_claim("thickvol", LIMIT_FILL_GIB, variant).await?;
    ctx.submit_workload("thickpod", "thickvol", &node).await?;
    ctx.wait_claim_bound("thickvol").await?;
    let lv = ctx.resolve_volume("thickvol").await?;
    ctx.assert_placement(variant, &node, &lv)?;

    ctx.step("deploying a PVC beyond the limit");
    ctx.submit_claim("thickvol2", LIMIT_OVERFLOW_GIB, variant).await?;
    ctx.submit_workload("thickpod2", "thickvol2", &node).await?;
    ctx.hold_unbound("thickvol2").await?;

    ctx.step("deleting the Pods and PVCs");
    for pod in ["thickpod", "thickpod2"] {
        ctx.delete(ObjectKind::Pod, pod).await?;
    }
    for claim in ["thickvol", "thickvol2"] {
        ctx.delete(ObjectKind::PersistentVolumeClaim, claim).await?;
    }
    for pod in ["thickpod", "thickpod2"] {
        ctx.wait_absent(ObjectKind::Pod, pod).await?;
    }
    for claim in ["thickvol", "thickvol2"] {
        ctx.wait_absent(ObjectKind::PersistentVolumeClaim, claim).await?;
    }

    Ok(())
}

/// Thin claims pinned to one node, together larger than its thin pool, all
/// bind in that pool with no capacity reservation
pub async fn thin_pool_overcommit(ctx: &ScenarioContext) -> Result<()> {
    let node = ctx.config().nodes.thin_overcommit.clone();
    let variant = StorageVariant::Thin;
    let count = ctx.config().workload.thin_overcommit_claims;
    let size_gib = ctx.config().workload.thin_overcommit_claim_gib;

    let expectation = ctx.expect(variant, &node)?;
    let total = u64::from(count).saturating_mul(size_gib).saturating_mul(GIB);
    if !expectation.overcommits(total) {
        return Err(Error::Configuration(format!(
            "{} thin claims of {}Gi do not exceed the {:?} byte pool on {}",
            count, size_gib, expectation.pool_capacity_bytes, node
        )));
    }
    info!(node = %node, total, pool = ?expectation.pool_capacity_bytes, "Overcommitting thin pool");

    ctx.step("deploying thin PVCs");
    for i in 0..count {
        let claim = format!("thinvol{}", i);
        ctx.submit_claim(&claim, size_gib, variant).await?;
        ctx.submit_workload(&format!("thinpod{}", i), &claim, &node).await?;
    }

    ctx.step("confirming every volume landed in the thin pool");
    let mut released = Vec::new();
    for i in 0..count {
        let claim = format!("thinvol{}", i);
        let record = ctx.wait_claim_bound(&claim).await?;
        let lv = ctx.resolve_volume(&claim).await?;
        ctx.assert_placement(variant, &node, &lv)?;
        ctx.assert_allocation(&lv, size_gib)?;
        if let Some(pv) = record.volume_name {
            released.push((pv, lv.name));
        }
    }

    ctx.step("deleting the Pods and PVCs");
    for i in 0..count {
        ctx.delete(ObjectKind::Pod, &format!("thinpod{}", i)).await?;
        ctx.delete(ObjectKind::PersistentVolumeClaim, &format!("thinvol{}", i))
            .await?;
    }
    for (pv, lv) in &released {
        ctx.wait_volume_released(pv, lv).await?;
    }

    Ok(())
}
