//! Domain Model - Typed facts observed from the cluster and the LVM host
//!
//! Every record here is read-only to the harness: the driver mutates the
//! underlying objects asynchronously and the harness re-queries them.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One gibibyte in bytes
pub const GIB: u64 = 1024 * 1024 * 1024;

/// LVM physical extent size used when comparing requested and allocated sizes
pub const LVM_EXTENT_BYTES: u64 = 4 * 1024 * 1024;

// =============================================================================
// Object Kinds
// =============================================================================

/// Kinds of cluster objects the harness reads or deletes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Namespace,
    Pod,
    PersistentVolumeClaim,
    PersistentVolume,
    VolumeSnapshot,
    /// The driver's cluster-scoped record mapping a PV to its host LV
    LogicalVolume,
}

impl ObjectKind {
    /// Resource name understood by the cluster CLI
    pub fn resource(&self) -> &'static str {
        match self {
            ObjectKind::Namespace => "namespace",
            ObjectKind::Pod => "pod",
            ObjectKind::PersistentVolumeClaim => "pvc",
            ObjectKind::PersistentVolume => "pv",
            ObjectKind::VolumeSnapshot => "volumesnapshot",
            ObjectKind::LogicalVolume => "logicalvolumes.topolvm.io",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        matches!(
            self,
            ObjectKind::Pod | ObjectKind::PersistentVolumeClaim | ObjectKind::VolumeSnapshot
        )
    }

    /// Map a manifest `kind` field back to an object kind
    pub fn from_manifest_kind(kind: &str) -> Option<Self> {
        match kind {
            "Namespace" => Some(ObjectKind::Namespace),
            "Pod" => Some(ObjectKind::Pod),
            "PersistentVolumeClaim" => Some(ObjectKind::PersistentVolumeClaim),
            "PersistentVolume" => Some(ObjectKind::PersistentVolume),
            "VolumeSnapshot" => Some(ObjectKind::VolumeSnapshot),
            "LogicalVolume" => Some(ObjectKind::LogicalVolume),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Namespace => write!(f, "Namespace"),
            ObjectKind::Pod => write!(f, "Pod"),
            ObjectKind::PersistentVolumeClaim => write!(f, "PersistentVolumeClaim"),
            ObjectKind::PersistentVolume => write!(f, "PersistentVolume"),
            ObjectKind::VolumeSnapshot => write!(f, "VolumeSnapshot"),
            ObjectKind::LogicalVolume => write!(f, "LogicalVolume"),
        }
    }
}

/// Reference to a single cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    /// `None` for cluster-scoped objects
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn namespaced(kind: ObjectKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster_scoped(kind: ObjectKind, name: &str) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.to_string(),
        }
    }

    pub fn namespace(name: &str) -> Self {
        Self::cluster_scoped(ObjectKind::Namespace, name)
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", ns, self.kind.resource(), self.name),
            None => write!(f, "{}/{}", self.kind.resource(), self.name),
        }
    }
}

// =============================================================================
// Storage Variant
// =============================================================================

/// Provisioning variant selected by the storage class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageVariant {
    /// Thin-provisioned from a thin pool; overcommit allowed
    Thin,
    /// Fully reserved against the node's capacity limit
    Thick,
}

impl std::fmt::Display for StorageVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageVariant::Thin => write!(f, "thin"),
            StorageVariant::Thick => write!(f, "thick"),
        }
    }
}

// =============================================================================
// Claim Record
// =============================================================================

/// Binding phase of a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Lost,
}

impl FromStr for ClaimPhase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(ClaimPhase::Pending),
            "Bound" => Ok(ClaimPhase::Bound),
            "Lost" => Ok(ClaimPhase::Lost),
            other => Err(Error::MalformedResponse {
                what: "claim phase".into(),
                reason: format!("unknown phase {:?}", other),
            }),
        }
    }
}

impl std::fmt::Display for ClaimPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimPhase::Pending => write!(f, "Pending"),
            ClaimPhase::Bound => write!(f, "Bound"),
            ClaimPhase::Lost => write!(f, "Lost"),
        }
    }
}

/// A volume claim as last observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub name: String,
    pub namespace: String,
    pub phase: ClaimPhase,
    /// Requested storage in bytes
    pub requested_bytes: u64,
    /// Name of the bound persistent volume, once bound
    pub volume_name: Option<String>,
}

impl ClaimRecord {
    pub fn is_bound(&self) -> bool {
        self.phase == ClaimPhase::Bound
    }
}

// =============================================================================
// Snapshot Record
// =============================================================================

/// A volume snapshot as last observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub name: String,
    pub namespace: String,
    /// Absent until the driver populates status
    pub ready_to_use: Option<bool>,
}

impl SnapshotRecord {
    pub fn is_ready(&self) -> bool {
        self.ready_to_use == Some(true)
    }
}

// =============================================================================
// Logical Volume
// =============================================================================

/// A logical volume as reported by the LVM host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub name: String,
    pub volume_group: String,
    /// Thin pool backing the volume, if any
    pub pool: Option<String>,
    pub size_bytes: u64,
}

impl LogicalVolume {
    /// Whether the allocation satisfies a request, allowing for LVM rounding
    /// the size up to a whole extent
    pub fn satisfies(&self, requested_bytes: u64) -> bool {
        self.size_bytes >= requested_bytes && self.size_bytes - requested_bytes < LVM_EXTENT_BYTES
    }
}

// =============================================================================
// Quantities
// =============================================================================

/// Parse a Kubernetes quantity (e.g. "1Gi", "500M", "2") to bytes
pub fn parse_quantity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::QuantityParse("empty quantity string".into()));
    }

    let num_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (num_str, unit_str) = s.split_at(num_end);

    let num: f64 = num_str
        .parse()
        .map_err(|_| Error::QuantityParse(format!("invalid number: {}", s)))?;

    let multiplier: u64 = match unit_str {
        "" => 1,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        _ => return Err(Error::QuantityParse(format!("unknown unit: {}", unit_str))),
    };

    Ok((num * multiplier as f64).round() as u64)
}

/// Render a whole number of gibibytes as a quantity
pub fn gib_quantity(gib: u64) -> String {
    format!("{}Gi", gib)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("100").unwrap(), 100);
        assert_eq!(parse_quantity("1Ki").unwrap(), 1024);
        assert_eq!(parse_quantity("1Gi").unwrap(), GIB);
        assert_eq!(parse_quantity("18Gi").unwrap(), 18 * GIB);
        assert_eq!(parse_quantity("1G").unwrap(), 1_000_000_000);
        assert_eq!(parse_quantity("1.5Gi").unwrap(), GIB + GIB / 2);

        assert!(parse_quantity("").is_err());
        assert!(parse_quantity("Gi").is_err());
        assert!(parse_quantity("100X").is_err());
    }

    #[test]
    fn test_claim_phase_parse() {
        assert_eq!("Bound".parse::<ClaimPhase>().unwrap(), ClaimPhase::Bound);
        assert!(matches!(
            "Released".parse::<ClaimPhase>(),
            Err(Error::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_logical_volume_satisfies() {
        let lv = LogicalVolume {
            name: "lv".into(),
            volume_group: "vg".into(),
            pool: None,
            size_bytes: 2 * GIB,
        };
        assert!(lv.satisfies(2 * GIB));
        assert!(lv.satisfies(2 * GIB - 1024));
        assert!(!lv.satisfies(3 * GIB));
        assert!(!lv.satisfies(GIB));
    }

    #[test]
    fn test_object_ref_display() {
        let r = ObjectRef::namespaced(ObjectKind::PersistentVolumeClaim, "ns", "vol");
        assert_eq!(r.to_string(), "ns/pvc/vol");
        assert_eq!(ObjectRef::namespace("ns").to_string(), "namespace/ns");
        assert!(!ObjectKind::LogicalVolume.is_namespaced());
    }
}
