//! Cleanup Context
//!
//! Registrations of objects a scenario created or discovered outside its own
//! namespace (and the namespace itself). Teardown is a backstop: scenarios
//! delete what they test explicitly and deregister it.

use crate::domain::model::{ObjectKind, ObjectRef};
use crate::domain::ports::ClusterCli;
use crate::error::{Error, Result};
use crate::wait::{wait, WaitPolicy};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Outcome of one teardown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSummary {
    /// Objects deleted by the teardown
    pub deleted: Vec<String>,
    /// Objects already gone when the teardown reached them
    pub already_gone: Vec<String>,
    /// Objects whose deletion failed, with the reason
    pub failed: Vec<(String, String)>,
    /// Objects left in place for investigation
    pub retained: Vec<String>,
}

impl CleanupSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Scenario-local registry of objects to delete on teardown
#[derive(Debug, Default)]
pub struct CleanupContext {
    registered: Mutex<Vec<ObjectRef>>,
}

impl CleanupContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object; registering twice is a no-op
    pub fn register(&self, object: ObjectRef) {
        let mut registered = self.registered.lock();
        if !registered.contains(&object) {
            debug!(object = %object, "Registered for cleanup");
            registered.push(object);
        }
    }

    /// Forget an object the scenario already deleted
    pub fn deregister(&self, object: &ObjectRef) {
        self.registered.lock().retain(|o| o != object);
    }

    pub fn registered(&self) -> Vec<ObjectRef> {
        self.registered.lock().clone()
    }

    /// Leave every registration in place; the summary lists them
    pub fn retain(&self) -> CleanupSummary {
        let retained = std::mem::take(&mut *self.registered.lock());
        CleanupSummary {
            retained: retained.iter().map(ToString::to_string).collect(),
            ..Default::default()
        }
    }

    /// Delete every registration, newest first. Namespaced objects and
    /// namespaces go first and each namespace must disappear before any
    /// cluster-scoped object is touched: a persistent volume cannot go while
    /// the claim bound to it exists. `NotFound` counts as success; other
    /// errors are logged and reported, never raised.
    pub async fn teardown(&self, cluster: &dyn ClusterCli, policy: &WaitPolicy) -> CleanupSummary {
        let objects = std::mem::take(&mut *self.registered.lock());
        let (cluster_scoped, scoped): (Vec<ObjectRef>, Vec<ObjectRef>) = objects
            .into_iter()
            .rev()
            .partition(|o| o.namespace.is_none() && o.kind != ObjectKind::Namespace);

        let mut summary = CleanupSummary::default();
        let mut lingering = false;

        for object in scoped {
            let label = object.to_string();
            match cluster
                .delete(object.kind, object.namespace.as_deref(), &object.name)
                .await
            {
                Ok(()) if object.kind == ObjectKind::Namespace => {
                    let what = format!("namespace {} to go away", object.name);
                    match wait(policy, &what, || check_gone(cluster, &object)).await {
                        Ok(()) => {
                            debug!(object = %label, "Deleted during cleanup");
                            summary.deleted.push(label);
                        }
                        Err(e) => {
                            warn!(object = %label, error = %e, "Namespace outlived cleanup");
                            lingering = true;
                            summary.failed.push((label, e.to_string()));
                        }
                    }
                }
                Ok(()) => {
                    debug!(object = %label, "Deleted during cleanup");
                    summary.deleted.push(label);
                }
                Err(e) if e.is_not_found() => summary.already_gone.push(label),
                Err(e) => {
                    warn!(object = %label, error = %e, "Cleanup failed");
                    lingering |= object.kind == ObjectKind::Namespace;
                    summary.failed.push((label, e.to_string()));
                }
            }
        }

        for object in cluster_scoped {
            let label = object.to_string();
            if lingering {
                // Claims may still hold these
                summary.retained.push(label);
                continue;
            }
            match cluster.delete(object.kind, None, &object.name).await {
                Ok(()) => {
                    debug!(object = %label, "Deleted during cleanup");
                    summary.deleted.push(label);
                }
                Err(e) if e.is_not_found() => summary.already_gone.push(label),
                Err(e) => {
                    warn!(object = %label, error = %e, "Cleanup failed");
                    summary.failed.push((label, e.to_string()));
                }
            }
        }

        summary
    }
}

async fn check_gone(cluster: &dyn ClusterCli, object: &ObjectRef) -> Result<()> {
    match cluster
        .get(object.kind, object.namespace.as_deref(), &object.name)
        .await
    {
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
        Ok(_) => Err(Error::NotConverged(format!("{} still exists", object))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    fn policy() -> WaitPolicy {
        WaitPolicy::new(Duration::from_secs(10), Duration::from_millis(100))
    }

    /// Records deletions; answers per object name
    #[derive(Default)]
    struct Deleter {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ClusterCli for Deleter {
        async fn apply(&self, _: Option<&str>, _: &str) -> Result<()> {
            Ok(())
        }
        async fn delete_manifest(&self, _: Option<&str>, _: &str) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> Result<()> {
            self.calls.lock().push(name.to_string());
            match name {
                "gone" => Err(Error::not_found(kind.to_string(), namespace, name)),
                "stuck" => Err(Error::ExternalCallFailed {
                    command: "kubectl delete".into(),
                    reason: "forbidden".into(),
                }),
                _ => Ok(()),
            }
        }
        async fn get(&self, kind: ObjectKind, ns: Option<&str>, name: &str) -> Result<serde_json::Value> {
            match name {
                "sticky" => Ok(serde_json::json!({"metadata": {"name": name}})),
                _ => Err(Error::not_found(kind.to_string(), ns, name)),
            }
        }
        async fn exec(&self, _: &str, _: &str, _: &[&str]) -> Result<String> {
            Ok(String::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_namespaces_before_volumes() {
        let cleanup = CleanupContext::new();
        cleanup.register(ObjectRef::namespace("ns"));
        cleanup.register(ObjectRef::cluster_scoped(ObjectKind::PersistentVolume, "gone"));
        cleanup.register(ObjectRef::cluster_scoped(ObjectKind::PersistentVolume, "stuck"));
        cleanup.register(ObjectRef::namespace("ns"));

        let cluster = Deleter::default();
        let summary = cleanup.teardown(&cluster, &policy()).await;

        assert_eq!(*cluster.calls.lock(), vec!["ns", "stuck", "gone"]);
        assert_eq!(summary.deleted, vec!["namespace/ns"]);
        assert_eq!(summary.already_gone, vec!["pv/gone"]);
        assert_eq!(summary.failed.len(), 1);
        assert!(!summary.is_clean());
        assert!(cleanup.registered().is_empty());
    }

    #[tokio::test]
    async fn test_deregistered_objects_are_skipped() {
        let cleanup = CleanupContext::new();
        let pv = ObjectRef::cluster_scoped(ObjectKind::PersistentVolume, "pv-1");
        cleanup.register(pv.clone());
        cleanup.deregister(&pv);

        let cluster = Deleter::default();
        let summary = cleanup.teardown(&cluster, &policy()).await;
        assert!(cluster.calls.lock().is_empty());
        assert_eq!(summary, CleanupSummary::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lingering_namespace_keeps_volumes() {
        let cleanup = CleanupContext::new();
        cleanup.register(ObjectRef::namespace("sticky"));
        cleanup.register(ObjectRef::cluster_scoped(ObjectKind::PersistentVolume, "pv-1"));

        let cluster = Deleter::default();
        let summary = cleanup.teardown(&cluster, &policy()).await;

        assert_eq!(*cluster.calls.lock(), vec!["sticky"]);
        assert!(summary.deleted.is_empty());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "namespace/sticky");
        assert_eq!(summary.retained, vec!["pv/pv-1"]);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_retain_lists_everything() {
        let cleanup = CleanupContext::new();
        cleanup.register(ObjectRef::namespace("snap-test-abc"));
        let summary = cleanup.retain();
        assert_eq!(summary.retained, vec!["namespace/snap-test-abc"]);
        assert!(summary.is_clean());
        assert!(cleanup.registered().is_empty());
    }
}
