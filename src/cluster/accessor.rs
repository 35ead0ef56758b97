//! Resource Accessor
//!
//! Typed, read-only access to single cluster objects. Absence is reported as
//! `Error::NotFound`; output that does not decode into the expected type is
//! `Error::MalformedResponse`, never silently defaulted.

use crate::crd::{LogicalVolumeResource, VolumeSnapshot};
use crate::domain::model::{
    parse_quantity, ClaimPhase, ClaimRecord, ObjectKind, SnapshotRecord,
};
use crate::domain::ports::ClusterCliRef;
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod};
use serde::de::DeserializeOwned;

/// Typed reads over the cluster CLI
#[derive(Clone)]
pub struct ResourceAccessor {
    cluster: ClusterCliRef,
}

impl ResourceAccessor {
    pub fn new(cluster: ClusterCliRef) -> Self {
        Self { cluster }
    }

    /// Fetch one object and decode it
    pub async fn get_object<K: DeserializeOwned>(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<K> {
        let raw = self.cluster.get(kind, namespace, name).await?;
        serde_json::from_value(raw).map_err(|e| Error::MalformedResponse {
            what: format!("{} {}", kind, name),
            reason: e.to_string(),
        })
    }

    pub async fn get_claim(&self, namespace: &str, name: &str) -> Result<ClaimRecord> {
        let pvc: PersistentVolumeClaim = self
            .get_object(ObjectKind::PersistentVolumeClaim, Some(namespace), name)
            .await?;
        claim_record(namespace, name, &pvc)
    }

    pub async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<SnapshotRecord> {
        let vs: VolumeSnapshot = self
            .get_object(ObjectKind::VolumeSnapshot, Some(namespace), name)
            .await?;
        Ok(SnapshotRecord {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ready_to_use: vs.status.and_then(|s| s.ready_to_use),
        })
    }

    pub async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.get_object(ObjectKind::Pod, Some(namespace), name).await
    }

    pub async fn get_persistent_volume(&self, name: &str) -> Result<PersistentVolume> {
        self.get_object(ObjectKind::PersistentVolume, None, name).await
    }

    pub async fn get_volume_resource(&self, name: &str) -> Result<LogicalVolumeResource> {
        self.get_object(ObjectKind::LogicalVolume, None, name).await
    }

    /// Probe for absence: `Ok` once the object is gone
    pub async fn check_absent(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        match self.cluster.get(kind, namespace, name).await {
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
            Ok(_) => Err(Error::NotConverged(format!("{} {} still exists", kind, name))),
        }
    }
}

/// Map a decoded claim to the harness's record
fn claim_record(namespace: &str, name: &str, pvc: &PersistentVolumeClaim) -> Result<ClaimRecord> {
    // A freshly created claim has no status yet
    let phase = match pvc.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some(phase) => phase.parse::<ClaimPhase>()?,
        None => ClaimPhase::Pending,
    };

    let spec = pvc.spec.as_ref().ok_or_else(|| Error::MalformedResponse {
        what: format!("PersistentVolumeClaim {}", name),
        reason: "missing spec".into(),
    })?;

    let requested = spec
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"))
        .ok_or_else(|| Error::MalformedResponse {
            what: format!("PersistentVolumeClaim {}", name),
            reason: "no storage request".into(),
        })?;

    let requested_bytes = parse_quantity(&requested.0).map_err(|e| Error::MalformedResponse {
        what: format!("PersistentVolumeClaim {}", name),
        reason: e.to_string(),
    })?;

    Ok(ClaimRecord {
        name: name.to_string(),
        namespace: namespace.to_string(),
        phase,
        requested_bytes,
        volume_name: spec.volume_name.clone().filter(|v| !v.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::GIB;
    use crate::domain::ports::ClusterCli;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Serves canned JSON keyed by object name
    struct Canned(BTreeMap<String, serde_json::Value>);

    #[async_trait]
    impl ClusterCli for Canned {
        async fn apply(&self, _: Option<&str>, _: &str) -> Result<()> {
            Ok(())
        }
        async fn delete_manifest(&self, _: Option<&str>, _: &str) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _: ObjectKind, _: Option<&str>, _: &str) -> Result<()> {
            Ok(())
        }
        async fn get(
            &self,
            kind: ObjectKind,
            namespace: Option<&str>,
            name: &str,
        ) -> Result<serde_json::Value> {
            self.0
                .get(name)
                .cloned()
                .ok_or_else(|| Error::not_found(kind.to_string(), namespace, name))
        }
        async fn exec(&self, _: &str, _: &str, _: &[&str]) -> Result<String> {
            Ok(String::new())
        }
    }

    fn accessor(objects: Vec<(&str, serde_json::Value)>) -> ResourceAccessor {
        let map = objects
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        ResourceAccessor::new(Arc::new(Canned(map)))
    }

    fn pvc(phase: Option<&str>, storage: &str, volume: Option<&str>) -> serde_json::Value {
        let mut value = json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {"name": "vol", "namespace": "ns"},
            "spec": {
                "accessModes": ["ReadWriteOnce"],
                "resources": {"requests": {"storage": storage}},
                "storageClassName": "topolvm-provisioner-thin"
            }
        });
        if let Some(v) = volume {
            value["spec"]["volumeName"] = json!(v);
        }
        if let Some(p) = phase {
            value["status"] = json!({"phase": p});
        }
        value
    }

    #[tokio::test]
    async fn test_get_claim_bound() {
        let acc = accessor(vec![("vol", pvc(Some("Bound"), "2Gi", Some("pvc-123")))]);
        let claim = acc.get_claim("ns", "vol").await.unwrap();
        assert!(claim.is_bound());
        assert_eq!(claim.requested_bytes, 2 * GIB);
        assert_eq!(claim.volume_name.as_deref(), Some("pvc-123"));
    }

    #[tokio::test]
    async fn test_get_claim_without_status_is_pending() {
        let acc = accessor(vec![("vol", pvc(None, "1Gi", None))]);
        let claim = acc.get_claim("ns", "vol").await.unwrap();
        assert_eq!(claim.phase, ClaimPhase::Pending);
        assert_eq!(claim.volume_name, None);
    }

    #[tokio::test]
    async fn test_get_claim_malformed() {
        let acc = accessor(vec![
            ("bad-phase", pvc(Some("Exploded"), "1Gi", None)),
            ("bad-size", pvc(Some("Bound"), "lots", None)),
            ("not-a-pvc", json!({"spec": 17})),
        ]);
        assert_matches!(
            acc.get_claim("ns", "bad-phase").await,
            Err(Error::MalformedResponse { .. })
        );
        assert_matches!(
            acc.get_claim("ns", "bad-size").await,
            Err(Error::MalformedResponse { .. })
        );
        assert_matches!(
            acc.get_claim("ns", "not-a-pvc").await,
            Err(Error::MalformedResponse { .. })
        );
    }

    #[tokio::test]
    async fn test_get_claim_not_found() {
        let acc = accessor(vec![]);
        let err = acc.get_claim("ns", "vol").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_get_snapshot_ready_states() {
        let base = json!({
            "apiVersion": "snapshot.storage.k8s.io/v1",
            "kind": "VolumeSnapshot",
            "metadata": {"name": "snap", "namespace": "ns"},
            "spec": {"source": {"persistentVolumeClaimName": "vol"}}
        });
        let mut ready = base.clone();
        ready["status"] = json!({"readyToUse": true});

        let acc = accessor(vec![("pending", base), ("ready", ready)]);
        assert_eq!(acc.get_snapshot("ns", "pending").await.unwrap().ready_to_use, None);
        assert!(acc.get_snapshot("ns", "ready").await.unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_check_absent() {
        let acc = accessor(vec![("vol", pvc(Some("Bound"), "1Gi", None))]);
        assert!(acc
            .check_absent(ObjectKind::PersistentVolumeClaim, Some("ns"), "gone")
            .await
            .is_ok());
        assert_matches!(
            acc.check_absent(ObjectKind::PersistentVolumeClaim, Some("ns"), "vol")
                .await,
            Err(Error::NotConverged(_))
        );
    }

    #[tokio::test]
    async fn test_get_core_objects() {
        let pod = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "thickpod", "namespace": "ns"},
            "spec": {"containers": [{"name": "ubuntu", "image": "ubuntu:22.04"}]},
            "status": {"phase": "Running"}
        });
        let pv = json!({
            "apiVersion": "v1",
            "kind": "PersistentVolume",
            "metadata": {"name": "pvc-123"},
            "spec": {
                "capacity": {"storage": "1Gi"},
                "claimRef": {"namespace": "ns", "name": "vol"}
            }
        });

        let acc = accessor(vec![("thickpod", pod), ("pvc-123", pv)]);
        let pod = acc.get_pod("ns", "thickpod").await.unwrap();
        assert_eq!(
            pod.status.and_then(|s| s.phase).as_deref(),
            Some("Running")
        );
        let pv = acc.get_persistent_volume("pvc-123").await.unwrap();
        let claim_ref = pv.spec.and_then(|s| s.claim_ref).unwrap();
        assert_eq!(claim_ref.name.as_deref(), Some("vol"));
    }
}
