//! In-memory Backend
//!
//! [`FakeCluster`] implements the cluster CLI port over a simulated cluster
//! with a toy provisioner, and [`FakeHostShell`] answers `lvs` from the same
//! state. Every `get`, `exec` and `lvs` call advances the simulation by one
//! tick, so eventual conditions converge after a few polls:
//!
//! - claims bind once a pinned consumer pod exists (wait-for-first-consumer),
//!   placed per the [`PlacementModel`]; thick claims that would exceed the
//!   node's overprovisioned capacity stay `Pending`
//! - snapshots report no status, then `readyToUse: false`, then `true`
//! - restored claims wait for a ready snapshot and copy its files
//! - deletions take effect on the next tick; a deleted claim releases its PV
//!   one tick later, which removes the host volume
//! - a PV whose claim still exists is held back from deletion, as the
//!   `kubernetes.io/pv-protection` finalizer does

use crate::config::HarnessConfig;
use crate::domain::model::{
    parse_quantity, LogicalVolume, ObjectKind, StorageVariant, GIB, LVM_EXTENT_BYTES,
};
use crate::domain::ports::{ClusterCli, HostShell};
use crate::error::{Error, Result};
use crate::placement::PlacementModel;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

/// Content of the seed file shipped in the simulated workload image
pub const SEED_CONTENT: &str = "Setting up ubuntu-minimal (1.481) ...\n";

type Key = (ObjectKind, Option<String>, String);

fn key(kind: ObjectKind, namespace: Option<&str>, name: &str) -> Key {
    let namespace = if kind.is_namespaced() {
        namespace.map(str::to_string)
    } else {
        None
    };
    (kind, namespace, name.to_string())
}

/// Misbehaviour the simulated driver can be told to exhibit
#[derive(Debug, Clone, Default)]
pub struct FakeFaults {
    /// Upcoming `get` calls that fail as if the API server were unreachable
    pub failing_gets: u32,
    /// Put every new volume in this volume group instead of the modelled one
    pub misplace_volume_group: Option<String>,
    /// Bind thick claims regardless of the capacity limit
    pub ignore_capacity: bool,
    /// Allocate this many GiB beyond every request
    pub overallocate_gib: u64,
    /// Removing a volume also removes the volumes restored from it
    pub cascade_restores: bool,
}

struct HostVolume {
    node: String,
    variant: StorageVariant,
    lv: LogicalVolume,
    files: BTreeMap<String, String>,
    /// Volume this one was restored from
    origin: Option<String>,
}

#[derive(Default)]
struct SnapshotProgress {
    ticks: u32,
    captured: Option<BTreeMap<String, String>>,
    source_volume: Option<String>,
}

struct State {
    config: HarnessConfig,
    model: PlacementModel,
    objects: BTreeMap<Key, Value>,
    terminating: Vec<Key>,
    volumes: BTreeMap<String, HostVolume>,
    snapshots: BTreeMap<(String, String), SnapshotProgress>,
    next_id: u64,
    faults: FakeFaults,
    /// PV deletions issued while the bound claim still existed
    protected_deletes: u32,
}

// =============================================================================
// Simulation
// =============================================================================

impl State {
    fn new(config: &HarnessConfig) -> Self {
        Self {
            config: config.clone(),
            model: PlacementModel::new(config.topology.clone()),
            objects: BTreeMap::new(),
            terminating: Vec::new(),
            volumes: BTreeMap::new(),
            snapshots: BTreeMap::new(),
            next_id: 1,
            faults: FakeFaults::default(),
            protected_deletes: 0,
        }
    }

    fn advance(&mut self) {
        self.reap();
        self.bind_claims();
        self.progress_snapshots();
        self.start_pods();
    }

    fn is_terminating(&self, key: &Key) -> bool {
        self.terminating.contains(key)
    }

    fn reap(&mut self) {
        let mut protected = Vec::new();
        for target in std::mem::take(&mut self.terminating) {
            if self.claim_protects(&target) {
                protected.push(target);
            } else {
                self.remove(&target);
            }
        }
        for target in protected {
            if !self.is_terminating(&target) {
                self.terminating.push(target);
            }
        }
    }

    /// A persistent volume stays while the claim it is bound to exists
    /// (`kubernetes.io/pv-protection`)
    fn claim_protects(&self, target: &Key) -> bool {
        if target.0 != ObjectKind::PersistentVolume {
            return false;
        }
        let Some(pv) = self.objects.get(target) else {
            return false;
        };
        let claim_ref = &pv["spec"]["claimRef"];
        match (claim_ref["namespace"].as_str(), claim_ref["name"].as_str()) {
            (Some(ns), Some(name)) => self
                .objects
                .contains_key(&key(ObjectKind::PersistentVolumeClaim, Some(ns), name)),
            _ => false,
        }
    }

    fn remove_volume(&mut self, id: &str) {
        if self.volumes.remove(id).is_none() || !self.faults.cascade_restores {
            return;
        }
        let restores: Vec<String> = self
            .volumes
            .iter()
            .filter(|(_, v)| v.origin.as_deref() == Some(id))
            .map(|(name, _)| name.clone())
            .collect();
        for restore in restores {
            trace!(lv = %restore, origin = %id, "Fake restore removed with its origin");
            self.remove_volume(&restore);
        }
    }

    fn remove(&mut self, target: &Key) {
        let Some(object) = self.objects.remove(target) else {
            return;
        };
        trace!(kind = %target.0, name = %target.2, "Fake object removed");

        match target.0 {
            ObjectKind::Namespace => {
                let contained: Vec<Key> = self
                    .objects
                    .keys()
                    .filter(|(_, ns, _)| ns.as_deref() == Some(target.2.as_str()))
                    .cloned()
                    .collect();
                for k in contained {
                    self.remove(&k);
                }
            }
            ObjectKind::PersistentVolumeClaim => {
                if let Some(pv) = object["spec"]["volumeName"].as_str() {
                    let pv_key = key(ObjectKind::PersistentVolume, None, pv);
                    if !self.is_terminating(&pv_key) {
                        self.terminating.push(pv_key);
                    }
                }
            }
            ObjectKind::PersistentVolume => {
                let lv_key = key(ObjectKind::LogicalVolume, None, &target.2);
                if let Some(resource) = self.objects.remove(&lv_key) {
                    if let Some(id) = resource["status"]["volumeID"].as_str() {
                        self.remove_volume(id);
                    }
                }
            }
            ObjectKind::VolumeSnapshot => {
                if let Some(ns) = &target.1 {
                    self.snapshots.remove(&(ns.clone(), target.2.clone()));
                }
            }
            ObjectKind::Pod | ObjectKind::LogicalVolume => {}
        }
    }

    /// Host volume name behind a bound claim
    fn claim_volume(&self, namespace: &str, claim: &str) -> Option<String> {
        let pvc = self
            .objects
            .get(&key(ObjectKind::PersistentVolumeClaim, Some(namespace), claim))?;
        let pv = pvc["spec"]["volumeName"].as_str()?;
        let resource = self.objects.get(&key(ObjectKind::LogicalVolume, None, pv))?;
        resource["status"]["volumeID"].as_str().map(str::to_string)
    }

    /// Node of the first pod in `namespace` that mounts `claim`
    fn consumer_node(&self, namespace: &str, claim: &str) -> Option<String> {
        self.objects
            .iter()
            .filter(|((kind, ns, _), _)| *kind == ObjectKind::Pod && ns.as_deref() == Some(namespace))
            .filter(|(k, _)| !self.is_terminating(k))
            .find(|(_, pod)| pod_claim(pod) == Some(claim))
            .and_then(|(_, pod)| pod_node(pod))
    }

    fn thick_allocated_on(&self, node: &str) -> u64 {
        self.volumes
            .values()
            .filter(|v| v.node == node && v.variant == StorageVariant::Thick)
            .map(|v| v.lv.size_bytes)
            .sum()
    }

    fn bind_claims(&mut self) {
        let pending: Vec<Key> = self
            .objects
            .iter()
            .filter(|(k, v)| {
                k.0 == ObjectKind::PersistentVolumeClaim && v["spec"]["volumeName"].is_null()
            })
            .map(|(k, _)| k.clone())
            .filter(|k| !self.is_terminating(k))
            .collect();

        for k in pending {
            if let Some(ns) = k.1.clone() {
                self.try_bind(&ns, &k.2);
            }
        }
    }

    fn try_bind(&mut self, namespace: &str, claim: &str) -> Option<()> {
        let claim_key = key(ObjectKind::PersistentVolumeClaim, Some(namespace), claim);
        let pvc = self.objects.get(&claim_key)?.clone();

        let class = pvc["spec"]["storageClassName"].as_str()?;
        let variant = self.config.variant_of(class)?;
        let quantity = pvc["spec"]["resources"]["requests"]["storage"].as_str()?.to_string();
        let requested = parse_quantity(&quantity).ok()?;
        let node = self.consumer_node(namespace, claim)?;

        let (files, origin) = match pvc["spec"]["dataSource"]["name"].as_str() {
            Some(snapshot) => {
                let progress = self
                    .snapshots
                    .get(&(namespace.to_string(), snapshot.to_string()))?;
                (progress.captured.clone()?, progress.source_volume.clone())
            }
            None => (BTreeMap::new(), None),
        };

        let expectation = self.model.expect(variant, &node).ok()?;
        if !self.faults.ignore_capacity
            && !expectation.admits(self.thick_allocated_on(&node), requested)
        {
            trace!(claim = %claim, node = %node, "Fake provisioner out of capacity");
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;
        let pv_name = format!("pvc-{:08x}-0000-4000-8000-{:012x}", id, id);
        let lv_name = format!("{:08x}-1111-4000-8000-{:012x}", id, id);
        let size_bytes = requested.div_ceil(LVM_EXTENT_BYTES) * LVM_EXTENT_BYTES
            + self.faults.overallocate_gib * GIB;

        let volume_group = self
            .faults
            .misplace_volume_group
            .clone()
            .unwrap_or_else(|| expectation.expected_volume_group.clone());

        self.volumes.insert(
            lv_name.clone(),
            HostVolume {
                node: node.clone(),
                variant,
                lv: LogicalVolume {
                    name: lv_name.clone(),
                    volume_group,
                    pool: expectation.expected_pool.clone(),
                    size_bytes,
                },
                files,
                origin,
            },
        );

        self.objects.insert(
            key(ObjectKind::PersistentVolume, None, &pv_name),
            json!({
                "apiVersion": "v1",
                "kind": "PersistentVolume",
                "metadata": {"name": pv_name},
                "spec": {
                    "capacity": {"storage": quantity},
                    "accessModes": ["ReadWriteOnce"],
                    "storageClassName": class,
                    "persistentVolumeReclaimPolicy": "Delete",
                    "claimRef": {"namespace": namespace, "name": claim},
                    "csi": {"driver": "topolvm.io", "volumeHandle": lv_name}
                },
                "status": {"phase": "Bound"}
            }),
        );

        self.objects.insert(
            key(ObjectKind::LogicalVolume, None, &pv_name),
            json!({
                "apiVersion": "topolvm.io/v1",
                "kind": "LogicalVolume",
                "metadata": {"name": pv_name},
                "spec": {
                    "name": pv_name,
                    "nodeName": node,
                    "size": quantity,
                    "accessType": "rw"
                },
                "status": {"volumeID": lv_name, "currentSize": quantity}
            }),
        );

        let object = self.objects.get_mut(&claim_key)?;
        object["spec"]["volumeName"] = json!(pv_name);
        object["status"] = json!({"phase": "Bound", "capacity": {"storage": quantity}});
        trace!(claim = %claim, pv = %pv_name, lv = %lv_name, "Fake claim bound");
        Some(())
    }

    fn progress_snapshots(&mut self) {
        let snapshots: Vec<(Key, Option<String>)> = self
            .objects
            .iter()
            .filter(|(k, _)| k.0 == ObjectKind::VolumeSnapshot)
            .map(|(k, v)| {
                let source = v["spec"]["source"]["persistentVolumeClaimName"]
                    .as_str()
                    .map(str::to_string);
                (k.clone(), source)
            })
            .collect();

        for (k, source) in snapshots {
            let Some(ns) = k.1.clone() else { continue };
            let source_volume = source.and_then(|claim| self.claim_volume(&ns, &claim));
            let files = source_volume
                .as_ref()
                .and_then(|lv| self.volumes.get(lv))
                .map(|v| v.files.clone());

            let progress = self.snapshots.entry((ns, k.2.clone())).or_default();
            progress.ticks += 1;

            if progress.captured.is_none() && progress.ticks >= 2 && files.is_some() {
                progress.captured = files;
                progress.source_volume = source_volume;
            }
            let status = json!({"readyToUse": progress.captured.is_some()});

            if let Some(object) = self.objects.get_mut(&k) {
                object["status"] = status;
            }
        }
    }

    fn start_pods(&mut self) {
        let pending: Vec<Key> = self
            .objects
            .iter()
            .filter(|(k, v)| k.0 == ObjectKind::Pod && v["status"]["phase"] != "Running")
            .map(|(k, _)| k.clone())
            .collect();

        for k in pending {
            let ready = match (&k.1, self.objects.get(&k).and_then(pod_claim)) {
                (Some(ns), Some(claim)) => self.claim_volume(ns, claim).is_some(),
                _ => true,
            };
            if ready {
                if let Some(pod) = self.objects.get_mut(&k) {
                    pod["status"] = json!({"phase": "Running"});
                }
            }
        }
    }

    /// Host volume mounted by a running pod
    fn pod_volume(&mut self, namespace: &str, pod: &str) -> Result<&mut HostVolume> {
        let object = self
            .objects
            .get(&key(ObjectKind::Pod, Some(namespace), pod))
            .ok_or_else(|| Error::not_found("Pod", Some(namespace), pod))?;

        let not_running = || Error::ExternalCallFailed {
            command: format!("exec {}/{}", namespace, pod),
            reason: "container not running".into(),
        };
        if object["status"]["phase"] != "Running" {
            return Err(not_running());
        }

        let claim = pod_claim(object).ok_or_else(not_running)?.to_string();
        let lv = self.claim_volume(namespace, &claim).ok_or_else(not_running)?;
        self.volumes.get_mut(&lv).ok_or_else(not_running)
    }

    fn exec(&mut self, namespace: &str, pod: &str, command: &[&str]) -> Result<String> {
        let mount_path = self.config.workload.mount_path.clone();
        let seed_file = self.config.workload.seed_file.clone();
        let volume = self.pod_volume(namespace, pod)?;

        let failed = |reason: String| Error::ExternalCallFailed {
            command: command.join(" "),
            reason,
        };
        let on_volume = |path: &str| path.starts_with(&format!("{}/", mount_path));

        match command {
            ["cp", src, dst] => {
                if *src != seed_file {
                    return Err(failed(format!("cannot stat '{}': No such file or directory", src)));
                }
                if !on_volume(*dst) {
                    return Err(failed(format!("cannot create '{}': Read-only file system", dst)));
                }
                volume.files.insert(dst.to_string(), SEED_CONTENT.to_string());
                Ok(String::new())
            }
            ["sync"] => Ok(String::new()),
            ["cat", path] => volume
                .files
                .get(*path)
                .cloned()
                .ok_or_else(|| failed(format!("{}: No such file or directory", path))),
            ["df", "-h", "--output=size", path] if *path == mount_path => Ok(format!(
                " Size\n {:.1}G\n",
                volume.lv.size_bytes as f64 / GIB as f64
            )),
            _ => Err(failed("executable file not found in $PATH".into())),
        }
    }
}

fn pod_claim(pod: &Value) -> Option<&str> {
    pod["spec"]["volumes"]
        .as_array()?
        .iter()
        .find_map(|v| v["persistentVolumeClaim"]["claimName"].as_str())
}

fn pod_node(pod: &Value) -> Option<String> {
    pod["spec"]["affinity"]["nodeAffinity"]["requiredDuringSchedulingIgnoredDuringExecution"]
        ["nodeSelectorTerms"][0]["matchExpressions"][0]["values"][0]
        .as_str()
        .map(str::to_string)
}

// =============================================================================
// Fake Cluster
// =============================================================================

/// Simulated cluster behind the cluster CLI port
#[derive(Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new(config))),
        }
    }

    /// Host shell sharing this cluster's volumes
    pub fn host_shell(&self) -> FakeHostShell {
        FakeHostShell {
            state: self.state.clone(),
        }
    }

    pub fn set_faults(&self, faults: FakeFaults) {
        self.state.lock().faults = faults;
    }

    pub fn contains(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> bool {
        self.state
            .lock()
            .objects
            .contains_key(&key(kind, namespace, name))
    }

    /// Host volumes currently allocated on a node
    pub fn volumes_on(&self, node: &str) -> Vec<LogicalVolume> {
        self.state
            .lock()
            .volumes
            .values()
            .filter(|v| v.node == node)
            .map(|v| v.lv.clone())
            .collect()
    }

    pub fn volume_count(&self) -> usize {
        self.state.lock().volumes.len()
    }

    /// PV deletions requested while the bound claim still existed
    pub fn protected_deletes(&self) -> u32 {
        self.state.lock().protected_deletes
    }

    /// Names of namespaces that still exist
    pub fn namespaces(&self) -> Vec<String> {
        self.state
            .lock()
            .objects
            .keys()
            .filter(|(kind, _, _)| *kind == ObjectKind::Namespace)
            .map(|(_, _, name)| name.clone())
            .collect()
    }
}

fn identity(object: &Value, namespace: Option<&str>) -> Result<(ObjectKind, Option<String>, String)> {
    let kind_name = object["kind"].as_str().unwrap_or_default();
    let kind = ObjectKind::from_manifest_kind(kind_name).ok_or_else(|| Error::ExternalCallFailed {
        command: "apply".into(),
        reason: format!("no matches for kind {:?}", kind_name),
    })?;

    let name = object["metadata"]["name"]
        .as_str()
        .ok_or_else(|| Error::ExternalCallFailed {
            command: "apply".into(),
            reason: "resource name may not be empty".into(),
        })?
        .to_string();

    let namespace = if kind.is_namespaced() {
        let ns = namespace
            .or_else(|| object["metadata"]["namespace"].as_str())
            .unwrap_or("default");
        Some(ns.to_string())
    } else {
        None
    };

    Ok((kind, namespace, name))
}

#[async_trait]
impl ClusterCli for FakeCluster {
    async fn apply(&self, namespace: Option<&str>, manifest: &str) -> Result<()> {
        let mut object: Value = serde_yaml::from_str(manifest)?;
        let (kind, namespace, name) = identity(&object, namespace)?;
        let mut state = self.state.lock();

        if let Some(ns) = &namespace {
            let ns_key = key(ObjectKind::Namespace, None, ns);
            if !state.objects.contains_key(&ns_key) {
                return Err(Error::not_found("Namespace", None, ns.as_str()));
            }
            if state.is_terminating(&ns_key) {
                return Err(Error::ExternalCallFailed {
                    command: "apply".into(),
                    reason: format!("namespace {} is being terminated", ns),
                });
            }
            object["metadata"]["namespace"] = json!(ns);
        }

        let k = key(kind, namespace.as_deref(), &name);
        if state.objects.contains_key(&k) {
            return Ok(());
        }

        match kind {
            ObjectKind::Namespace => object["status"] = json!({"phase": "Active"}),
            ObjectKind::Pod | ObjectKind::PersistentVolumeClaim => {
                object["status"] = json!({"phase": "Pending"})
            }
            _ => {}
        }
        trace!(kind = %kind, name = %name, "Fake object created");
        state.objects.insert(k, object);
        Ok(())
    }

    async fn delete_manifest(&self, namespace: Option<&str>, manifest: &str) -> Result<()> {
        let object: Value = serde_yaml::from_str(manifest)?;
        let (kind, namespace, name) = identity(&object, namespace)?;
        self.delete(kind, namespace.as_deref(), &name).await
    }

    async fn delete(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let k = key(kind, namespace, name);
        if !state.objects.contains_key(&k) {
            return Err(Error::not_found(kind.to_string(), namespace, name));
        }
        if state.claim_protects(&k) {
            trace!(pv = %name, "Fake PV delete held by its bound claim");
            state.protected_deletes += 1;
        }
        if !state.is_terminating(&k) {
            state.terminating.push(k);
        }
        Ok(())
    }

    async fn get(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> Result<Value> {
        let mut state = self.state.lock();
        state.advance();

        if state.faults.failing_gets > 0 {
            state.faults.failing_gets -= 1;
            return Err(Error::ExternalCallFailed {
                command: format!("get {} {}", kind.resource(), name),
                reason: "connection refused".into(),
            });
        }

        state
            .objects
            .get(&key(kind, namespace, name))
            .cloned()
            .ok_or_else(|| Error::not_found(kind.to_string(), namespace, name))
    }

    async fn exec(&self, namespace: &str, pod: &str, command: &[&str]) -> Result<String> {
        let mut state = self.state.lock();
        state.advance();
        state.exec(namespace, pod, command)
    }
}

// =============================================================================
// Fake Host Shell
// =============================================================================

/// Answers `lvs` selections from the simulated host volumes
#[derive(Clone)]
pub struct FakeHostShell {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl HostShell for FakeHostShell {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let mut state = self.state.lock();
        state.advance();

        if program != state.config.lvm.lvs_binary {
            return Err(Error::ExternalCallFailed {
                command: program.to_string(),
                reason: "command not found".into(),
            });
        }

        let selected = args
            .iter()
            .skip_while(|a| a.as_str() != "-S")
            .nth(1)
            .and_then(|s| s.strip_prefix("lv_name="));

        let rows = state
            .volumes
            .values()
            .filter(|v| selected.map_or(true, |name| v.lv.name == name))
            .map(|v| {
                format!(
                    "  {},{},{},{}\n",
                    v.lv.name,
                    v.lv.volume_group,
                    v.lv.pool.as_deref().unwrap_or(""),
                    v.lv.size_bytes
                )
            })
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::manifest;
    use crate::host::parse_lvs;
    use assert_matches::assert_matches;

    const NS: &str = "fake-test";
    const NODE: &str = "topolvm-e2e-worker3";

    async fn cluster() -> FakeCluster {
        let fake = FakeCluster::new(&HarnessConfig::default());
        fake.apply(None, &manifest::namespace(NS).unwrap().body)
            .await
            .unwrap();
        fake
    }

    async fn claim_with_pod(fake: &FakeCluster, claim: &str, gib: u64, class: &str) {
        let pvc = manifest::claim(claim, gib, class).unwrap();
        fake.apply(Some(NS), &pvc.body).await.unwrap();
        let pod = manifest::workload(
            &format!("{}-pod", claim),
            claim,
            "ubuntu:22.04",
            "/test1",
            "topology.topolvm.io/node",
            NODE,
        )
        .unwrap();
        fake.apply(Some(NS), &pod.body).await.unwrap();
    }

    async fn phase(fake: &FakeCluster, claim: &str) -> String {
        let pvc = fake
            .get(ObjectKind::PersistentVolumeClaim, Some(NS), claim)
            .await
            .unwrap();
        pvc["status"]["phase"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_claim_waits_for_consumer() {
        let fake = cluster().await;
        let pvc = manifest::claim("vol", 1, "topolvm-provisioner-thick").unwrap();
        fake.apply(Some(NS), &pvc.body).await.unwrap();
        assert_eq!(phase(&fake, "vol").await, "Pending");
        assert_eq!(phase(&fake, "vol").await, "Pending");
        assert_eq!(fake.volume_count(), 0);
    }

    #[tokio::test]
    async fn test_thick_capacity_enforced() {
        let fake = cluster().await;
        claim_with_pod(&fake, "big", 18, "topolvm-provisioner-thick").await;
        assert_eq!(phase(&fake, "big").await, "Bound");

        claim_with_pod(&fake, "overflow", 5, "topolvm-provisioner-thick").await;
        for _ in 0..5 {
            assert_eq!(phase(&fake, "overflow").await, "Pending");
        }

        let vols = fake.volumes_on(NODE);
        assert_eq!(vols.len(), 1);
        assert_eq!(vols[0].volume_group, "node3-myvg1");
        assert_eq!(vols[0].size_bytes, 18 * GIB);
    }

    #[tokio::test]
    async fn test_thin_overcommits() {
        let fake = cluster().await;
        for i in 0..5 {
            claim_with_pod(&fake, &format!("thin{}", i), 10, "topolvm-provisioner-thin").await;
        }
        for i in 0..5 {
            assert_eq!(phase(&fake, &format!("thin{}", i)).await, "Bound");
        }
        assert!(fake
            .volumes_on(NODE)
            .iter()
            .all(|lv| lv.pool.as_deref() == Some("pool0")));
    }

    #[tokio::test]
    async fn test_exec_and_lvs() {
        let fake = cluster().await;
        claim_with_pod(&fake, "vol", 2, "topolvm-provisioner-thin").await;
        assert_eq!(phase(&fake, "vol").await, "Bound");

        fake.exec(NS, "vol-pod", &["cp", "/var/log/bootstrap.log", "/test1/bootstrap.log"])
            .await
            .unwrap();
        let content = fake
            .exec(NS, "vol-pod", &["cat", "/test1/bootstrap.log"])
            .await
            .unwrap();
        assert_eq!(content, SEED_CONTENT);

        let df = fake
            .exec(NS, "vol-pod", &["df", "-h", "--output=size", "/test1"])
            .await
            .unwrap();
        assert!(df.contains("2.0G"));

        assert_matches!(
            fake.exec(NS, "vol-pod", &["cat", "/test1/missing"]).await,
            Err(Error::ExternalCallFailed { .. })
        );

        let out = fake.host_shell().run("lvs", &[]).await.unwrap();
        let lvs = parse_lvs(&out).unwrap();
        assert_eq!(lvs.len(), 1);
        assert_eq!(lvs[0].volume_group, "node3-myvg4");
    }

    #[tokio::test]
    async fn test_deleting_claim_releases_volume() {
        let fake = cluster().await;
        claim_with_pod(&fake, "vol", 1, "topolvm-provisioner-thick").await;
        assert_eq!(phase(&fake, "vol").await, "Bound");
        assert_eq!(fake.volume_count(), 1);

        fake.delete(ObjectKind::Pod, Some(NS), "vol-pod").await.unwrap();
        fake.delete(ObjectKind::PersistentVolumeClaim, Some(NS), "vol")
            .await
            .unwrap();
        assert!(fake
            .get(ObjectKind::PersistentVolumeClaim, Some(NS), "vol")
            .await
            .unwrap_err()
            .is_not_found());
        // PV is released one tick later
        let _ = fake.host_shell().run("lvs", &[]).await;
        assert_eq!(fake.volume_count(), 0);

        assert!(fake
            .delete(ObjectKind::Pod, Some(NS), "vol-pod")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_namespace_deletion_cascades() {
        let fake = cluster().await;
        claim_with_pod(&fake, "vol", 1, "topolvm-provisioner-thin").await;
        assert_eq!(phase(&fake, "vol").await, "Bound");

        fake.delete(ObjectKind::Namespace, None, NS).await.unwrap();
        let _ = fake.get(ObjectKind::Namespace, None, NS).await;
        let _ = fake.get(ObjectKind::Namespace, None, NS).await;
        assert!(fake.namespaces().is_empty());
        assert_eq!(fake.volume_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_requires_namespace() {
        let fake = FakeCluster::new(&HarnessConfig::default());
        let pvc = manifest::claim("vol", 1, "topolvm-provisioner-thin").unwrap();
        assert!(fake.apply(Some("nowhere"), &pvc.body).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_failing_gets() {
        let fake = cluster().await;
        fake.set_faults(FakeFaults {
            failing_gets: 2,
            ..Default::default()
        });
        for _ in 0..2 {
            assert_matches!(
                fake.get(ObjectKind::Namespace, None, NS).await,
                Err(Error::ExternalCallFailed { .. })
            );
        }
        assert!(fake.get(ObjectKind::Namespace, None, NS).await.is_ok());
    }

    #[tokio::test]
    async fn test_bound_volume_is_protected() {
        let fake = cluster().await;
        claim_with_pod(&fake, "vol", 1, "topolvm-provisioner-thick").await;
        let pvc = fake
            .get(ObjectKind::PersistentVolumeClaim, Some(NS), "vol")
            .await
            .unwrap();
        let pv = pvc["spec"]["volumeName"].as_str().unwrap().to_string();

        fake.delete(ObjectKind::PersistentVolume, None, &pv).await.unwrap();
        assert_eq!(fake.protected_deletes(), 1);
        for _ in 0..3 {
            assert!(fake.get(ObjectKind::PersistentVolume, None, &pv).await.is_ok());
        }
        assert_eq!(fake.volume_count(), 1);

        fake.delete(ObjectKind::PersistentVolumeClaim, Some(NS), "vol")
            .await
            .unwrap();
        let _ = fake.get(ObjectKind::Namespace, None, NS).await;
        assert!(fake
            .get(ObjectKind::PersistentVolume, None, &pv)
            .await
            .unwrap_err()
            .is_not_found());
        assert_eq!(fake.volume_count(), 0);
        assert_eq!(fake.protected_deletes(), 1);
    }

    #[tokio::test]
    async fn test_overallocation_fault() {
        let fake = cluster().await;
        fake.set_faults(FakeFaults {
            overallocate_gib: 3,
            ..Default::default()
        });
        claim_with_pod(&fake, "vol", 2, "topolvm-provisioner-thin").await;
        assert_eq!(phase(&fake, "vol").await, "Bound");
        assert_eq!(fake.volumes_on(NODE)[0].size_bytes, 5 * GIB);
    }
}
