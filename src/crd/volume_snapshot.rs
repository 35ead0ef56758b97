//! VolumeSnapshot CRD
//!
//! The CSI external-snapshotter's namespaced snapshot request. The harness
//! creates these and watches `status.readyToUse`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of a claim's volume
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshot",
    plural = "volumesnapshots",
    shortname = "vs",
    status = "VolumeSnapshotStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    /// Snapshot class selecting the CSI driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,

    /// What to snapshot
    pub source: VolumeSnapshotSource,
}

/// Snapshot source; exactly one field is set
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_content_name: Option<String>,
}

/// Status populated by the snapshot controller
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    #[serde(default)]
    pub bound_volume_snapshot_content_name: Option<String>,

    #[serde(default)]
    pub ready_to_use: Option<bool>,

    #[serde(default)]
    pub restore_size: Option<String>,

    #[serde(default)]
    pub error: Option<VolumeSnapshotError>,
}

/// Last error reported by the snapshot controller
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotError {
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub time: Option<String>,
}

impl VolumeSnapshot {
    /// Snapshot request for a claim in the given class
    pub fn for_claim(name: &str, class: &str, claim: &str) -> Self {
        VolumeSnapshot::new(
            name,
            VolumeSnapshotSpec {
                volume_snapshot_class_name: Some(class.to_string()),
                source: VolumeSnapshotSource {
                    persistent_volume_claim_name: Some(claim.to_string()),
                    volume_snapshot_content_name: None,
                },
            },
        )
    }
}
