//! Disk planning and block-device enumeration.
//!
//! [`partition_names`] is the pure planner: the boot and root partition
//! paths follow from the disk path's lexical pattern alone. NVMe namespaces
//! (`/dev/nvme0n1`) take a `p` before the partition index, every other
//! device name takes the bare index.

use serde::Deserialize;

use crate::error::Result;

/// Boot and root partition paths derived from a disk path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskLayout {
    pub boot: String,
    pub root: String,
}

/// Returns true if the device name carries an NVMe controller/namespace
/// pattern (`nvme<digits>n<digits>`).
pub fn is_nvme_style(disk: &str) -> bool {
    let name = disk.rsplit('/').next().unwrap_or(disk);
    let mut rest = name;
    while let Some(idx) = rest.find("nvme") {
        let after = &rest[idx + 4..];
        let controller = after.chars().take_while(|c| c.is_ascii_digit()).count();
        if controller > 0 {
            let tail = &after[controller..];
            if let Some(ns) = tail.strip_prefix('n') {
                if ns.starts_with(|c: char| c.is_ascii_digit()) {
                    return true;
                }
            }
        }
        rest = after;
    }
    false
}

/// Derive `(boot, root)` partition paths for `disk`.
pub fn partition_names(disk: &str) -> DiskLayout {
    let sep = if is_nvme_style(disk) { "p" } else { "" };
    DiskLayout {
        boot: format!("{disk}{sep}1"),
        root: format!("{disk}{sep}2"),
    }
}

/// A whole-disk block device offered for installation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlockDevice {
    pub path: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    ro: Option<serde_json::Value>,
}

impl BlockDevice {
    /// Human-readable line shown to the operator.
    pub fn label(&self) -> String {
        let size = self.size.as_deref().unwrap_or("?");
        let model = self.model.as_deref().map(str::trim).unwrap_or("");
        if model.is_empty() {
            format!("{}  {}", self.path, size)
        } else {
            format!("{}  {}  {}", self.path, size, model)
        }
    }

    fn is_read_only(&self) -> bool {
        // lsblk emits booleans on newer util-linux, "0"/"1" on older ones
        match &self.ro {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s == "1",
            Some(serde_json::Value::Number(n)) => n.as_u64() == Some(1),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<BlockDevice>,
}

/// Parse `lsblk -J -d -o PATH,SIZE,MODEL,TYPE,RO` output, keeping writable disks.
pub fn parse_lsblk(json: &str) -> Result<Vec<BlockDevice>> {
    let out: LsblkOutput = serde_json::from_str(json)?;
    Ok(out
        .blockdevices
        .into_iter()
        .filter(|d| d.kind == "disk" && !d.is_read_only())
        .collect())
}
