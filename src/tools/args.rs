//! Typed arguments for the tools the pipeline drives.
//!
//! One struct per invocation shape. Each doc table maps fields to the flag
//! the tool actually parses.

use std::path::PathBuf;

use super::ToolArgs;

// ============================================================================
// Storage
// ============================================================================

/// `wipefs -af <device>`: erase every filesystem, RAID and table signature.
#[derive(Debug, Clone)]
pub struct WipefsArgs {
    pub device: String,
}

impl ToolArgs for WipefsArgs {
    fn program(&self) -> &'static str {
        "wipefs"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-af".to_string(), self.device.clone()]
    }
}

/// Partition table label understood by `parted mklabel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionTable {
    Gpt,
    Msdos,
}

impl PartitionTable {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Msdos => "msdos",
        }
    }
}

/// One scripted `parted` operation.
///
/// | Variant   | Command line |
/// |-----------|--------------|
/// | `Mklabel` | `parted -s <disk> mklabel <table>` |
/// | `Mkpart`  | `parted -s -a optimal <disk> mkpart primary <fs> <start> <end>` |
/// | `SetFlag` | `parted -s <disk> set <index> <flag> on` |
#[derive(Debug, Clone)]
pub enum PartedArgs {
    Mklabel {
        disk: String,
        table: PartitionTable,
    },
    Mkpart {
        disk: String,
        fs_type: &'static str,
        start: String,
        end: String,
    },
    SetFlag {
        disk: String,
        index: u32,
        flag: &'static str,
    },
}

impl ToolArgs for PartedArgs {
    fn program(&self) -> &'static str {
        "parted"
    }

    fn to_cli_args(&self) -> Vec<String> {
        match self {
            Self::Mklabel { disk, table } => vec![
                "-s".into(),
                disk.clone(),
                "mklabel".into(),
                table.as_str().into(),
            ],
            Self::Mkpart {
                disk,
                fs_type,
                start,
                end,
            } => vec![
                "-s".into(),
                "-a".into(),
                "optimal".into(),
                disk.clone(),
                "mkpart".into(),
                "primary".into(),
                (*fs_type).into(),
                start.clone(),
                end.clone(),
            ],
            Self::SetFlag { disk, index, flag } => vec![
                "-s".into(),
                disk.clone(),
                "set".into(),
                index.to_string(),
                (*flag).into(),
                "on".into(),
            ],
        }
    }
}

/// Filesystem created by [`MkfsArgs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    Fat32,
    Ext4,
    Btrfs,
}

/// `mkfs.*` with non-interactive force flags.
///
/// | Kind    | Command line |
/// |---------|--------------|
/// | `Fat32` | `mkfs.fat -F 32 <device>` |
/// | `Ext4`  | `mkfs.ext4 -F <device>` |
/// | `Btrfs` | `mkfs.btrfs -f <device>` |
#[derive(Debug, Clone)]
pub struct MkfsArgs {
    pub device: String,
    pub kind: FsKind,
}

impl ToolArgs for MkfsArgs {
    fn program(&self) -> &'static str {
        match self.kind {
            FsKind::Fat32 => "mkfs.fat",
            FsKind::Ext4 => "mkfs.ext4",
            FsKind::Btrfs => "mkfs.btrfs",
        }
    }

    fn to_cli_args(&self) -> Vec<String> {
        match self.kind {
            FsKind::Fat32 => vec!["-F".into(), "32".into(), self.device.clone()],
            FsKind::Ext4 => vec!["-F".into(), self.device.clone()],
            FsKind::Btrfs => vec!["-f".into(), self.device.clone()],
        }
    }
}

/// `mount --mkdir <device> <target>`
#[derive(Debug, Clone)]
pub struct MountArgs {
    pub device: String,
    pub target: PathBuf,
}

impl ToolArgs for MountArgs {
    fn program(&self) -> &'static str {
        "mount"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--mkdir".into(),
            self.device.clone(),
            self.target.display().to_string(),
        ]
    }
}

/// `blkid -s <tag> -o value <device>`: read one identifier tag.
#[derive(Debug, Clone)]
pub struct BlkidArgs {
    pub device: String,
    /// `UUID` or `PARTUUID`
    pub tag: &'static str,
}

impl ToolArgs for BlkidArgs {
    fn program(&self) -> &'static str {
        "blkid"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-s".into(),
            self.tag.into(),
            "-o".into(),
            "value".into(),
            self.device.clone(),
        ]
    }
}

// ============================================================================
// Encryption
// ============================================================================

/// Type-safe arguments for `cryptsetup`.
///
/// | Variant      | Command line |
/// |--------------|--------------|
/// | `LuksFormat` | `cryptsetup -q --type luks2 --key-file <kf> luksFormat <device>` |
/// | `Open`       | `cryptsetup --key-file <kf> open <device> <name>` |
/// | `Close`      | `cryptsetup close <name>` |
/// | `LuksUuid`   | `cryptsetup luksUUID <device>` |
///
/// # Security
///
/// The passphrase is never an argument. `key_file` points at a
/// [`SecretFile`](crate::secret::SecretFile) that outlives the command.
#[derive(Debug, Clone)]
pub enum CryptsetupArgs {
    LuksFormat { device: String, key_file: PathBuf },
    Open {
        device: String,
        name: String,
        key_file: PathBuf,
    },
    Close { name: String },
    LuksUuid { device: String },
}

impl ToolArgs for CryptsetupArgs {
    fn program(&self) -> &'static str {
        "cryptsetup"
    }

    fn to_cli_args(&self) -> Vec<String> {
        match self {
            Self::LuksFormat { device, key_file } => vec![
                "-q".into(),
                "--type".into(),
                "luks2".into(),
                "--key-file".into(),
                key_file.display().to_string(),
                "luksFormat".into(),
                device.clone(),
            ],
            Self::Open {
                device,
                name,
                key_file,
            } => vec![
                "--key-file".into(),
                key_file.display().to_string(),
                "open".into(),
                device.clone(),
                name.clone(),
            ],
            Self::Close { name } => vec!["close".into(), name.clone()],
            Self::LuksUuid { device } => vec!["luksUUID".into(), device.clone()],
        }
    }
}

// ============================================================================
// Target system
// ============================================================================

/// `pacstrap -K <root> <packages...>`: install into a fresh root with an
/// initialized keyring.
#[derive(Debug, Clone)]
pub struct PacstrapArgs {
    pub root: PathBuf,
    pub packages: Vec<String>,
}

impl ToolArgs for PacstrapArgs {
    fn program(&self) -> &'static str {
        "pacstrap"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["-K".to_string(), self.root.display().to_string()];
        args.extend(self.packages.iter().cloned());
        args
    }
}

/// `genfstab -U <root>`: fstab for the current mounts, by UUID.
#[derive(Debug, Clone)]
pub struct GenfstabArgs {
    pub root: PathBuf,
}

impl ToolArgs for GenfstabArgs {
    fn program(&self) -> &'static str {
        "genfstab"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-U".into(), self.root.display().to_string()]
    }
}

/// `arch-chroot [-u <user>] <root> <argv...>`
#[derive(Debug, Clone)]
pub struct ChrootArgs {
    pub root: PathBuf,
    pub user: Option<String>,
    pub argv: Vec<String>,
}

impl ToolArgs for ChrootArgs {
    fn program(&self) -> &'static str {
        "arch-chroot"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.argv.len() + 3);
        if let Some(user) = &self.user {
            args.push("-u".to_string());
            args.push(user.clone());
        }
        args.push(self.root.display().to_string());
        args.extend(self.argv.iter().cloned());
        args
    }
}
