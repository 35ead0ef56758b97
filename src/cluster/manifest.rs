//! Manifest rendering
//!
//! Builds the objects a scenario submits: namespaces, claims (fresh or
//! restored from a snapshot), pinned workload pods and snapshots. Rendered
//! as YAML for `kubectl apply -f -`.

use crate::crd::VolumeSnapshot;
use crate::domain::model::gib_quantity;
use crate::error::Result;
use serde::Serialize;
use serde_json::{json, Value};

/// A rendered manifest plus the identity of what it describes
#[derive(Debug, Clone)]
pub struct Manifest {
    pub kind: &'static str,
    pub name: String,
    pub body: String,
}

fn render<T: Serialize>(kind: &'static str, name: &str, object: &T) -> Result<Manifest> {
    Ok(Manifest {
        kind,
        name: name.to_string(),
        body: serde_yaml::to_string(object)?,
    })
}

pub fn namespace(name: &str) -> Result<Manifest> {
    let object = json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {"name": name}
    });
    render("Namespace", name, &object)
}

fn claim_object(name: &str, size_gib: u64, storage_class: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {"name": name},
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "volumeMode": "Filesystem",
            "resources": {"requests": {"storage": gib_quantity(size_gib)}},
            "storageClassName": storage_class
        }
    })
}

/// Fresh claim of `size_gib` in the given storage class
pub fn claim(name: &str, size_gib: u64, storage_class: &str) -> Result<Manifest> {
    render("PersistentVolumeClaim", name, &claim_object(name, size_gib, storage_class))
}

/// Claim populated from a snapshot
pub fn restore_claim(
    name: &str,
    size_gib: u64,
    storage_class: &str,
    snapshot: &str,
) -> Result<Manifest> {
    let mut object = claim_object(name, size_gib, storage_class);
    object["spec"]["dataSource"] = json!({
        "name": snapshot,
        "kind": "VolumeSnapshot",
        "apiGroup": "snapshot.storage.k8s.io"
    });
    render("PersistentVolumeClaim", name, &object)
}

/// Long-running pod mounting `claim` at `mount_path`, pinned to `node` via
/// the driver's topology label
pub fn workload(
    name: &str,
    claim: &str,
    image: &str,
    mount_path: &str,
    node_key: &str,
    node: &str,
) -> Result<Manifest> {
    let object = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": name, "labels": {"app.kubernetes.io/name": name}},
        "spec": {
            "containers": [{
                "name": "ubuntu",
                "image": image,
                "command": ["sleep", "infinity"],
                "volumeMounts": [{"mountPath": mount_path, "name": "my-volume"}]
            }],
            "volumes": [{
                "name": "my-volume",
                "persistentVolumeClaim": {"claimName": claim}
            }],
            "affinity": {
                "nodeAffinity": {
                    "requiredDuringSchedulingIgnoredDuringExecution": {
                        "nodeSelectorTerms": [{
                            "matchExpressions": [{
                                "key": node_key,
                                "operator": "In",
                                "values": [node]
                            }]
                        }]
                    }
                }
            }
        }
    });
    render("Pod", name, &object)
}

pub fn snapshot(name: &str, class: &str, claim: &str) -> Result<Manifest> {
    render("VolumeSnapshot", name, &VolumeSnapshot::for_claim(name, class, claim))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(m: &Manifest) -> Value {
        serde_yaml::from_str(&m.body).unwrap()
    }

    #[test]
    fn test_restore_claim_references_snapshot() {
        let m = restore_claim("restore", 2, "topolvm-provisioner-thin", "snap").unwrap();
        let v = parse(&m);
        assert_eq!(v["kind"], "PersistentVolumeClaim");
        assert_eq!(v["spec"]["resources"]["requests"]["storage"], "2Gi");
        assert_eq!(v["spec"]["dataSource"]["kind"], "VolumeSnapshot");
        assert_eq!(v["spec"]["dataSource"]["name"], "snap");
    }

    #[test]
    fn test_workload_is_pinned() {
        let m = workload(
            "thinpod",
            "vol",
            "ubuntu:22.04",
            "/test1",
            "topology.topolvm.io/node",
            "topolvm-e2e-worker",
        )
        .unwrap();
        let v = parse(&m);
        let expr = &v["spec"]["affinity"]["nodeAffinity"]
            ["requiredDuringSchedulingIgnoredDuringExecution"]["nodeSelectorTerms"][0]
            ["matchExpressions"][0];
        assert_eq!(expr["key"], "topology.topolvm.io/node");
        assert_eq!(expr["values"][0], "topolvm-e2e-worker");
        assert_eq!(
            v["spec"]["volumes"][0]["persistentVolumeClaim"]["claimName"],
            "vol"
        );
    }

    #[test]
    fn test_snapshot_manifest() {
        let m = snapshot("snap", "topolvm-provisioner", "vol").unwrap();
        let v = parse(&m);
        assert_eq!(v["apiVersion"], "snapshot.storage.k8s.io/v1");
        assert_eq!(v["metadata"]["name"], "snap");
        assert_eq!(v["spec"]["volumeSnapshotClassName"], "topolvm-provisioner");
    }
}
