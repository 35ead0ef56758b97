//! LVM Host Inventory
//!
//! Looks up logical volumes with `lvs` on the LVM host and resolves which
//! host volume backs a claim (claim → PV → driver LogicalVolume →
//! `status.volumeID`).

use crate::cluster::ResourceAccessor;
use crate::config::LvmConfig;
use crate::domain::model::LogicalVolume;
use crate::domain::ports::{HostInventory, HostShell, HostShellRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

/// Columns requested from `lvs`, in output order
const LVS_COLUMNS: &str = "lv_name,vg_name,pool_lv,lv_size";

// =============================================================================
// Process Shell
// =============================================================================

/// Runs host commands as local processes behind a fixed prefix
/// (e.g. `sudo`, or `docker exec <node>`)
pub struct ProcessShell {
    prefix: Vec<String>,
}

impl ProcessShell {
    pub fn new(prefix: Vec<String>) -> Self {
        Self { prefix }
    }

    /// Full argv for a command under this shell's prefix
    fn argv(&self, program: &str, args: &[String]) -> Vec<String> {
        let mut argv = self.prefix.clone();
        argv.push(program.to_string());
        argv.extend(args.iter().cloned());
        argv
    }
}

#[async_trait]
impl HostShell for ProcessShell {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let argv = self.argv(program, args);
        let rendered = argv.join(" ");
        trace!(command = %rendered, "Running host command");

        let (bin, rest) = argv.split_first().ok_or_else(|| Error::Configuration("empty host command".into()))?;
        let output = Command::new(bin)
            .args(rest)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::ExternalCallFailed {
                command: rendered.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::ExternalCallFailed {
                command: rendered,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// =============================================================================
// LVM Inventory
// =============================================================================

/// Host inventory backed by `lvs`
pub struct LvmInventory {
    shell: HostShellRef,
    accessor: ResourceAccessor,
    lvs_binary: String,
}

impl LvmInventory {
    pub fn new(shell: HostShellRef, accessor: ResourceAccessor, config: &LvmConfig) -> Self {
        Self {
            shell,
            accessor,
            lvs_binary: config.lvs_binary.clone(),
        }
    }

    fn lvs_args(name: &str) -> Vec<String> {
        [
            "--noheadings",
            "--separator",
            ",",
            "--units",
            "b",
            "--nosuffix",
            "-o",
            LVS_COLUMNS,
            "-S",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain(std::iter::once(format!("lv_name={}", name)))
        .collect()
    }
}

#[async_trait]
impl HostInventory for LvmInventory {
    async fn get_logical_volume(&self, name: &str) -> Result<LogicalVolume> {
        let out = self.shell.run(&self.lvs_binary, &Self::lvs_args(name)).await?;
        let mut volumes = parse_lvs(&out)?;

        match volumes.len() {
            0 => Err(Error::not_found("LogicalVolume", None, name)),
            1 => {
                let lv = volumes.remove(0);
                if lv.name != name {
                    return Err(Error::MalformedResponse {
                        what: format!("lvs {}", name),
                        reason: format!("selection returned {}", lv.name),
                    });
                }
                debug!(lv = %lv.name, vg = %lv.volume_group, pool = ?lv.pool, size = lv.size_bytes, "Found logical volume");
                Ok(lv)
            }
            n => Err(Error::MalformedResponse {
                what: format!("lvs {}", name),
                reason: format!("{} volumes share the name", n),
            }),
        }
    }

    async fn get_logical_volume_name_for_claim(
        &self,
        claim: &str,
        namespace: &str,
    ) -> Result<String> {
        let record = self.accessor.get_claim(namespace, claim).await?;
        // Not yet registered by the backend; absent rather than broken
        let pv_name = record.volume_name.ok_or_else(|| {
            Error::not_found(
                "PersistentVolume",
                None,
                format!("for claim {}/{}", namespace, claim),
            )
        })?;

        let resource = self.accessor.get_volume_resource(&pv_name).await?;
        let lv_name = resource.volume_id().ok_or_else(|| {
            Error::not_found("LogicalVolume", None, format!("{} (volumeID not reported)", pv_name))
        })?;

        Ok(lv_name.to_string())
    }
}

/// Check that a volume is gone from the host; `Ok` once `NotFound`
pub async fn check_deleted(inventory: &dyn HostInventory, name: &str) -> Result<()> {
    match inventory.get_logical_volume(name).await {
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
        Ok(lv) => Err(Error::NotConverged(format!(
            "logical volume {} still exists in {}",
            lv.name, lv.volume_group
        ))),
    }
}

/// Parse `lvs --noheadings --separator , --units b --nosuffix` output
pub fn parse_lvs(output: &str) -> Result<Vec<LogicalVolume>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_lvs_line)
        .collect()
}

fn parse_lvs_line(line: &str) -> Result<LogicalVolume> {
    let malformed = |reason: String| Error::MalformedResponse {
        what: "lvs output".into(),
        reason,
    };

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [name, vg, pool, size] = fields.as_slice() else {
        return Err(malformed(format!(
            "expected 4 columns ({}), got {}: {:?}",
            LVS_COLUMNS,
            fields.len(),
            line
        )));
    };

    if name.is_empty() || vg.is_empty() {
        return Err(malformed(format!("empty name or volume group: {:?}", line)));
    }

    let size_bytes = size
        .parse::<u64>()
        .map_err(|_| malformed(format!("invalid size {:?}", size)))?;

    Ok(LogicalVolume {
        name: name.to_string(),
        volume_group: vg.to_string(),
        pool: (!pool.is_empty()).then(|| pool.to_string()),
        size_bytes,
    })
}
