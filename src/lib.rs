//! LVM Conformance - End-to-end checks for an LVM-backed CSI driver
//!
//! Drives a live cluster through the orchestration CLI and inspects the LVM
//! host directly, asserting that volumes land where the driver's placement
//! policy says they must.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Scenario Orchestrator                        │
//! │   snapshot/restore · thick provisioning · capacity · thin pools     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────────┐  ┌───────────────────┐  ┌─────────────────┐  │
//! │  │ Resource Accessor │  │  Host Inventory   │  │   Placement /   │  │
//! │  │  (typed objects)  │  │      (lvs)        │  │ Capacity Model  │  │
//! │  └─────────┬─────────┘  └─────────┬─────────┘  └─────────────────┘  │
//! │            │                      │                                 │
//! │            └──────────┬───────────┘                                 │
//! │               Eventual Condition Poller                             │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │        ClusterCli port (kubectl)     HostShell port (process)       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`scenario`]: Scenario catalogue, per-run context, runner and cleanup
//! - [`wait`]: Eventual condition polling
//! - [`cluster`]: kubectl adapter, typed reads and manifests
//! - [`host`]: LVM host inventory
//! - [`placement`]: Placement/capacity model
//! - [`crd`]: Custom Resource Definitions read by the harness
//! - [`domain`]: Core domain types and ports
//! - [`config`]: Harness configuration
//! - [`fake`]: In-memory cluster and host for tests and dry runs
//! - [`error`]: Error types and handling

pub mod cluster;
pub mod config;
pub mod crd;
pub mod domain;
pub mod error;
pub mod fake;
pub mod host;
pub mod placement;
pub mod scenario;
pub mod wait;

// Re-export commonly used types
pub use cluster::{Kubectl, ResourceAccessor};
pub use config::HarnessConfig;
pub use domain::model::{ClaimPhase, ClaimRecord, LogicalVolume, ObjectKind, ObjectRef, StorageVariant};
pub use domain::ports::{ClusterCli, HostInventory, HostShell};
pub use error::{Error, ProbeAction, Result};
pub use fake::{FakeCluster, FakeFaults, FakeHostShell};
pub use host::{LvmInventory, ProcessShell};
pub use placement::{PlacementExpectation, PlacementModel};
pub use scenario::{Harness, Outcome, RunReport, Scenario, ScenarioReport};
pub use wait::{hold, wait, WaitPolicy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
