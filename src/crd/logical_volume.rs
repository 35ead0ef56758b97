//! LogicalVolume CRD
//!
//! The driver's cluster-scoped bookkeeping object, named after the persistent
//! volume. Its `status.volumeID` is the name of the LV on the host.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Driver-side record of a provisioned logical volume
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "topolvm.io",
    version = "v1",
    kind = "LogicalVolume",
    plural = "logicalvolumes",
    status = "LogicalVolumeStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct LogicalVolumeSpec {
    pub name: String,

    pub node_name: String,

    #[serde(default)]
    pub device_class: Option<String>,

    /// Requested size as a quantity string
    #[serde(default)]
    pub size: Option<String>,

    /// Source LV for snapshots and restores
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub access_type: Option<String>,
}

/// Status reported by the node agent
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogicalVolumeStatus {
    /// Host LV name; empty until the node agent creates the volume
    #[serde(default, rename = "volumeID")]
    pub volume_id: Option<String>,

    #[serde(default)]
    pub code: Option<u32>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub current_size: Option<String>,
}

impl LogicalVolume {
    /// Host LV name, once the node agent has reported it
    pub fn volume_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.volume_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_id_requires_status() {
        let raw = serde_json::json!({
            "apiVersion": "topolvm.io/v1",
            "kind": "LogicalVolume",
            "metadata": {"name": "pvc-1"},
            "spec": {"name": "pvc-1", "nodeName": "topolvm-e2e-worker", "size": "1Gi"},
            "status": {"volumeID": ""}
        });
        let lv: LogicalVolume = serde_json::from_value(raw).unwrap();
        assert_eq!(lv.volume_id(), None);

        let raw = serde_json::json!({
            "apiVersion": "topolvm.io/v1",
            "kind": "LogicalVolume",
            "metadata": {"name": "pvc-1"},
            "spec": {"name": "pvc-1", "nodeName": "topolvm-e2e-worker"},
            "status": {"volumeID": "2d1b6c3e"}
        });
        let lv: LogicalVolume = serde_json::from_value(raw).unwrap();
        assert_eq!(lv.volume_id(), Some("2d1b6c3e"));
    }
}
