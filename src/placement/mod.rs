//! Placement/Capacity Model
//!
//! Encodes the driver's placement policy as ground truth for assertions:
//! which volume group (and pool) a volume of a given variant must land in on
//! a given node, and how much thick capacity the node admits.
//!
//! - Thin: node's thin volume group and thin pool, no capacity enforcement;
//!   claims may total more than the pool.
//! - Thick: node's thick volume group; the sum of thick sizes on the node
//!   never exceeds `capacity × overprovision ratio`.

use crate::config::TopologyConfig;
use crate::domain::model::{LogicalVolume, StorageVariant};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Placement Expectation
// =============================================================================

/// Where a volume must land and what it may consume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementExpectation {
    pub variant: StorageVariant,
    pub node: String,
    pub expected_volume_group: String,
    pub expected_pool: Option<String>,
    /// Limit on the sum of volume sizes on the node; `None` means unbounded
    pub capacity_limit_bytes: Option<u64>,
    /// Size of the thin pool volumes are carved from
    pub pool_capacity_bytes: Option<u64>,
}

impl PlacementExpectation {
    /// Compare an observed logical volume against this expectation
    pub fn verify(&self, lv: &LogicalVolume) -> Result<()> {
        if lv.volume_group != self.expected_volume_group {
            return Err(Error::AssertionFailed(format!(
                "{} volume {} on {} landed in volume group {}, expected {}",
                self.variant, lv.name, self.node, lv.volume_group, self.expected_volume_group
            )));
        }

        if lv.pool != self.expected_pool {
            return Err(Error::AssertionFailed(format!(
                "{} volume {} on {} is in pool {:?}, expected {:?}",
                self.variant, lv.name, self.node, lv.pool, self.expected_pool
            )));
        }

        Ok(())
    }

    /// Whether a new volume of `requested` bytes fits next to `allocated`
    /// bytes already on the node
    pub fn admits(&self, allocated: u64, requested: u64) -> bool {
        match self.capacity_limit_bytes {
            None => true,
            Some(limit) => allocated
                .checked_add(requested)
                .map_or(false, |total| total <= limit),
        }
    }

    /// Whether `requested` bytes of claims exceed the thin pool
    pub fn overcommits(&self, requested: u64) -> bool {
        self.pool_capacity_bytes
            .map_or(false, |pool| requested > pool)
    }
}

// =============================================================================
// Placement Model
// =============================================================================

/// Read-only view of the configured topology
#[derive(Debug, Clone)]
pub struct PlacementModel {
    topology: TopologyConfig,
}

impl PlacementModel {
    pub fn new(topology: TopologyConfig) -> Self {
        Self { topology }
    }

    /// Expected placement for a volume of `variant` pinned to `node`
    pub fn expect(&self, variant: StorageVariant, node: &str) -> Result<PlacementExpectation> {
        let node_topology = self.topology.nodes.get(node).ok_or_else(|| {
            Error::Configuration(format!("no topology configured for node {}", node))
        })?;

        let class = node_topology.device_class(variant);
        let (capacity_limit_bytes, pool_capacity_bytes) = match variant {
            StorageVariant::Thin => (None, Some(node_topology.thin_pool_bytes())),
            StorageVariant::Thick => (
                Some(overprovisioned(
                    node_topology.thick_capacity_bytes(),
                    self.topology.overprovision_ratio,
                )),
                None,
            ),
        };

        Ok(PlacementExpectation {
            variant,
            node: node.to_string(),
            expected_volume_group: class.volume_group.clone(),
            expected_pool: class.pool.clone(),
            capacity_limit_bytes,
            pool_capacity_bytes,
        })
    }

    pub fn node_key(&self) -> &str {
        &self.topology.node_key
    }
}

/// `capacity × ratio`, floored to whole bytes
fn overprovisioned(capacity_bytes: u64, ratio: f64) -> u64 {
    (capacity_bytes as f64 * ratio).floor() as u64
}
