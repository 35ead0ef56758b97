//! Host Module
//!
//! Queries against the LVM backend on the storage host.

pub mod lvm;

pub use lvm::{check_deleted, parse_lvs, LvmInventory, ProcessShell};
