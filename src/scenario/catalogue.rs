//! Scenario Catalogue

use super::context::ScenarioContext;
use super::{provisioning, snapshot};
use crate::domain::model::StorageVariant;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Every conformance scenario the harness knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    ThinSnapshotRestoreSameSize,
    ThinSnapshotRestoreLarger,
    ThinRestoreIndependence,
    ThickSnapshotRestoreSameSize,
    ThickSnapshotRestoreLarger,
    ThickRestoreIndependence,
    ThickProvision,
    ThickOverprovision,
    ThickOverprovisionLimit,
    ThinPoolOvercommit,
}

impl Scenario {
    pub const ALL: [Scenario; 10] = [
        Scenario::ThinSnapshotRestoreSameSize,
        Scenario::ThinSnapshotRestoreLarger,
        Scenario::ThinRestoreIndependence,
        Scenario::ThickSnapshotRestoreSameSize,
        Scenario::ThickSnapshotRestoreLarger,
        Scenario::ThickRestoreIndependence,
        Scenario::ThickProvision,
        Scenario::ThickOverprovision,
        Scenario::ThickOverprovisionLimit,
        Scenario::ThinPoolOvercommit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::ThinSnapshotRestoreSameSize => "thin-snapshot-restore-same-size",
            Scenario::ThinSnapshotRestoreLarger => "thin-snapshot-restore-larger",
            Scenario::ThinRestoreIndependence => "thin-restore-independence",
            Scenario::ThickSnapshotRestoreSameSize => "thick-snapshot-restore-same-size",
            Scenario::ThickSnapshotRestoreLarger => "thick-snapshot-restore-larger",
            Scenario::ThickRestoreIndependence => "thick-restore-independence",
            Scenario::ThickProvision => "thick-provision",
            Scenario::ThickOverprovision => "thick-overprovision",
            Scenario::ThickOverprovisionLimit => "thick-overprovision-limit",
            Scenario::ThinPoolOvercommit => "thin-pool-overcommit",
        }
    }

    /// One-line description for listings
    pub fn description(&self) -> &'static str {
        match self {
            Scenario::ThinSnapshotRestoreSameSize => "restore a thin snapshot at the source size",
            Scenario::ThinSnapshotRestoreLarger => "restore a thin snapshot into a larger claim",
            Scenario::ThinRestoreIndependence => "thin restore survives deleting its source",
            Scenario::ThickSnapshotRestoreSameSize => "restore a thick snapshot at the source size",
            Scenario::ThickSnapshotRestoreLarger => "restore a thick snapshot into a larger claim",
            Scenario::ThickRestoreIndependence => "thick restore survives deleting its source",
            Scenario::ThickProvision => "provision and release a thick volume",
            Scenario::ThickOverprovision => "bind thick claims up to the overprovisioned capacity",
            Scenario::ThickOverprovisionLimit => "reject a thick claim beyond the capacity limit",
            Scenario::ThinPoolOvercommit => "overcommit a thin pool",
        }
    }

    pub fn variant(&self) -> StorageVariant {
        match self {
            Scenario::ThinSnapshotRestoreSameSize
            | Scenario::ThinSnapshotRestoreLarger
            | Scenario::ThinRestoreIndependence
            | Scenario::ThinPoolOvercommit => StorageVariant::Thin,
            _ => StorageVariant::Thick,
        }
    }

    /// Prefix of the per-run namespace
    pub fn namespace_prefix(&self) -> &'static str {
        match self {
            Scenario::ThickProvision
            | Scenario::ThickOverprovision
            | Scenario::ThickOverprovisionLimit => "thickptest-",
            Scenario::ThinPoolOvercommit => "thinptest-",
            _ => "snap-test-",
        }
    }

    pub async fn execute(self, ctx: &ScenarioContext) -> Result<()> {
        let variant = self.variant();
        match self {
            Scenario::ThinSnapshotRestoreSameSize | Scenario::ThickSnapshotRestoreSameSize => {
                snapshot::restore(ctx, variant, snapshot::SOURCE_GIB).await
            }
            Scenario::ThinSnapshotRestoreLarger | Scenario::ThickSnapshotRestoreLarger => {
                snapshot::restore(ctx, variant, snapshot::LARGER_GIB).await
            }
            Scenario::ThinRestoreIndependence | Scenario::ThickRestoreIndependence => {
                snapshot::restore_independence(ctx, variant).await
            }
            Scenario::ThickProvision => provisioning::thick_provision(ctx).await,
            Scenario::ThickOverprovision => provisioning::thick_overprovision(ctx).await,
            Scenario::ThickOverprovisionLimit => provisioning::thick_overprovision_limit(ctx).await,
            Scenario::ThinPoolOvercommit => provisioning::thin_pool_overcommit(ctx).await,
        }
    }
}

impl FromStr for Scenario {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Scenario::ALL
            .iter()
            .copied()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Scenario::ALL.iter().map(Scenario::name).collect();
                Error::Configuration(format!(
                    "unknown scenario {:?}; known: {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in Scenario::ALL {
            assert_eq!(scenario.name().parse::<Scenario>().unwrap(), scenario);
        }
        assert!(matches!(
            "thick-everything".parse::<Scenario>(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_serde_uses_catalogue_names() {
        let json = serde_json::to_string(&Scenario::ThickOverprovisionLimit).unwrap();
        assert_eq!(json, "\"thick-overprovision-limit\"");
    }

    #[test]
    fn test_namespace_prefixes() {
        assert_eq!(Scenario::ThinRestoreIndependence.namespace_prefix(), "snap-test-");
        assert_eq!(Scenario::ThickProvision.namespace_prefix(), "thickptest-");
        assert_eq!(Scenario::ThinPoolOvercommit.variant(), StorageVariant::Thin);
        assert_eq!(Scenario::ThickSnapshotRestoreLarger.variant(), StorageVariant::Thick);
    }
}
