//! Scenario Orchestrator
//!
//! Conformance scenarios for snapshot/restore and thin/thick provisioning.
//! Each run gets a fresh namespace, drives the driver through cluster
//! objects only, and checks the result on the LVM host.

pub mod catalogue;
pub mod cleanup;
pub mod context;
pub mod provisioning;
pub mod runner;
pub mod snapshot;

pub use catalogue::Scenario;
pub use cleanup::{CleanupContext, CleanupSummary};
pub use context::ScenarioContext;
pub use runner::{Harness, Outcome, RunReport, ScenarioReport};
