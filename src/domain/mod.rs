//! Domain layer - Observed records and port definitions
//!
//! This module defines the typed facts the harness reasons about and the
//! traits (ports) its external collaborators are reached through.

pub mod model;
pub mod ports;

pub use model::*;
pub use ports::*;
