//! Cluster Module
//!
//! The kubectl adapter for the cluster CLI port, typed object reads, and
//! the manifests scenarios submit.

pub mod accessor;
pub mod kubectl;
pub mod manifest;

pub use accessor::ResourceAccessor;
pub use kubectl::Kubectl;
pub use manifest::Manifest;
