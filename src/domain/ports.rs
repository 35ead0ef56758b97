//! Domain Ports - The harness's narrow view of its external collaborators
//!
//! The cluster CLI and the LVM host are owned by someone else. These traits
//! define the only operations the harness performs against them; real
//! adapters shell out to processes, fakes keep state in memory.

use crate::domain::model::{LogicalVolume, ObjectKind};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// Cluster CLI Port
// =============================================================================

/// Port for orchestration API operations
#[async_trait]
pub trait ClusterCli: Send + Sync {
    /// Apply a rendered manifest, optionally into a namespace
    async fn apply(&self, namespace: Option<&str>, manifest: &str) -> Result<()>;

    /// Delete every object described by a rendered manifest
    async fn delete_manifest(&self, namespace: Option<&str>, manifest: &str) -> Result<()>;

    /// Delete a single object; `Error::NotFound` if it does not exist
    async fn delete(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> Result<()>;

    /// Fetch a single object as JSON; `Error::NotFound` if it does not exist
    async fn get(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<serde_json::Value>;

    /// Run a command inside a pod and return its stdout
    async fn exec(&self, namespace: &str, pod: &str, command: &[&str]) -> Result<String>;
}

// =============================================================================
// Host Shell Port
// =============================================================================

/// Port for running privileged commands on the LVM host
#[async_trait]
pub trait HostShell: Send + Sync {
    /// Run a command and return its stdout
    async fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

// =============================================================================
// Host Inventory Port
// =============================================================================

/// Port for logical volume lookups against the LVM backend
#[async_trait]
pub trait HostInventory: Send + Sync {
    /// Look up a logical volume by name; `Error::NotFound` if absent
    async fn get_logical_volume(&self, name: &str) -> Result<LogicalVolume>;

    /// Resolve the host logical volume name backing a claim
    async fn get_logical_volume_name_for_claim(&self, claim: &str, namespace: &str)
        -> Result<String>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterCliRef = Arc<dyn ClusterCli>;
pub type HostShellRef = Arc<dyn HostShell>;
pub type HostInventoryRef = Arc<dyn HostInventory>;
