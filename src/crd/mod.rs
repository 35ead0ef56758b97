//! Custom Resource Definitions observed by the harness
//!
//! - VolumeSnapshot: CSI snapshot request (created by scenarios)
//! - LogicalVolume: the driver's PV-to-host-LV mapping (read only)

pub mod logical_volume;
pub mod volume_snapshot;

pub use logical_volume::{LogicalVolume as LogicalVolumeResource, LogicalVolumeSpec, LogicalVolumeStatus};
pub use volume_snapshot::*;
