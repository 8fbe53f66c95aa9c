//! Capability providers.
//!
//! The pipeline never builds a command line itself. It talks to one trait
//! per tool family:
//!
//! | Trait                 | Operations |
//! |-----------------------|------------|
//! | [`DiskProvider`]        | wipe signatures, create table/partition, format, mount, fstab |
//! | [`Encryptor`]           | initialize container, open, close, container UUID |
//! | [`PackageManager`]      | bootstrap, install set, refresh, query orphans, remove |
//! | [`BootloaderInstaller`] | install to ESP or disk, regenerate config |
//! | [`ChrootExecutor`]      | run a command inside the target root |
//! | [`Geolocator`]          | best-effort timezone guess |
//!
//! [`SystemBackend`] implements all of them over a [`CommandRunner`]; with a
//! [`RecordingRunner`](crate::tools::RecordingRunner) the same backend
//! records instead of executing.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Result;
use crate::secret::{Secret, SecretFile};
use crate::tools::args::{
    BlkidArgs, ChrootArgs, CryptsetupArgs, FsKind, GenfstabArgs, MkfsArgs, MountArgs,
    PacstrapArgs, PartedArgs, PartitionTable, WipefsArgs,
};
use crate::tools::{CommandRunner, ToolArgs, ToolCommand, ToolOutput};
use crate::types::{AurHelper, Bootloader};

/// One partition to create with `parted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    /// 1-based partition number, used for flags.
    pub index: u32,
    pub fs_type: &'static str,
    pub start: &'static str,
    pub end: &'static str,
    pub flag: Option<&'static str>,
}

/// Where a bootloader is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootTarget {
    /// The EFI system partition mounted at `/boot` in the target.
    Esp,
    /// The raw disk's boot sector (legacy BIOS).
    Disk(String),
}

pub trait DiskProvider {
    fn wipe_signatures(&self, disk: &str) -> Result<()>;
    fn create_table(&self, disk: &str, table: PartitionTable) -> Result<()>;
    fn create_partition(&self, disk: &str, part: &PartitionSpec) -> Result<()>;
    fn format(&self, device: &str, kind: FsKind) -> Result<()>;
    fn mount(&self, device: &str, target: &Path) -> Result<()>;
    /// fstab text for everything mounted under `root`.
    fn generate_fstab(&self, root: &Path) -> Result<String>;
    fn partition_uuid(&self, device: &str) -> Result<String>;
}

pub trait Encryptor {
    fn initialize(&self, device: &str, passphrase: &Secret) -> Result<()>;
    /// Unlock `device` as `name`, returning the mapped device path.
    fn open(&self, device: &str, name: &str, passphrase: &Secret) -> Result<String>;
    fn close(&self, name: &str) -> Result<()>;
    fn container_uuid(&self, device: &str) -> Result<String>;
}

pub trait PackageManager {
    /// Install into the fresh target root (before it is chrootable).
    fn bootstrap(&self, packages: &[String]) -> Result<()>;
    /// Install into the target through its own package manager.
    fn install(&self, packages: &[String]) -> Result<()>;
    fn refresh(&self) -> Result<()>;
    fn query_orphans(&self) -> Result<Vec<String>>;
    fn remove(&self, packages: &[String]) -> Result<()>;
    /// Install AUR packages as `user` through an installed helper.
    fn aur_install(&self, user: &str, helper: AurHelper, packages: &[String]) -> Result<()>;
}

pub trait BootloaderInstaller {
    fn install(&self, loader: Bootloader, target: &BootTarget) -> Result<()>;
    fn regenerate_config(&self, loader: Bootloader) -> Result<()>;
}

pub trait ChrootExecutor {
    /// Run in the target root, failing on a non-zero exit. Returns stdout.
    fn run(&self, argv: &[&str]) -> Result<String>;
    /// Run with a secret on stdin.
    fn run_with_input(&self, argv: &[&str], input: Secret) -> Result<()>;
    fn run_as(&self, user: &str, argv: &[&str]) -> Result<()>;
    /// Run without checking the exit status.
    fn try_run(&self, argv: &[&str]) -> Result<ToolOutput>;
}

pub trait Geolocator {
    /// A timezone identifier, or `None` when the lookup is unavailable.
    fn guess_timezone(&self) -> Option<String>;
}

/// Tool-backed implementation of every provider trait.
pub struct SystemBackend<'r> {
    runner: &'r dyn CommandRunner,
    root: PathBuf,
    key_dir: PathBuf,
}

impl<'r> SystemBackend<'r> {
    /// `root` is the target mount point; key files are written to `key_dir`.
    pub fn new(runner: &'r dyn CommandRunner, root: impl Into<PathBuf>, key_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            root: root.into(),
            key_dir: key_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    #[track_caller]
    fn exec(&self, args: &impl ToolArgs) -> Result<ToolOutput> {
        self.exec_command(args.to_command())
    }

    #[track_caller]
    fn exec_command(&self, command: ToolCommand) -> Result<ToolOutput> {
        self.runner.run(&command)?.ensure_success(&command)
    }

    fn chroot(&self, user: Option<&str>, argv: &[&str]) -> ToolCommand {
        ChrootArgs {
            root: self.root.clone(),
            user: user.map(str::to_string),
            argv: argv.iter().map(|s| s.to_string()).collect(),
        }
        .to_command()
    }
}

impl DiskProvider for SystemBackend<'_> {
    fn wipe_signatures(&self, disk: &str) -> Result<()> {
        self.exec(&WipefsArgs {
            device: disk.to_string(),
        })?;
        Ok(())
    }

    fn create_table(&self, disk: &str, table: PartitionTable) -> Result<()> {
        self.exec(&PartedArgs::Mklabel {
            disk: disk.to_string(),
            table,
        })?;
        Ok(())
    }

    fn create_partition(&self, disk: &str, part: &PartitionSpec) -> Result<()> {
        self.exec(&PartedArgs::Mkpart {
            disk: disk.to_string(),
            fs_type: part.fs_type,
            start: part.start.to_string(),
            end: part.end.to_string(),
        })?;
        if let Some(flag) = part.flag {
            self.exec(&PartedArgs::SetFlag {
                disk: disk.to_string(),
                index: part.index,
                flag,
            })?;
        }
        Ok(())
    }

    fn format(&self, device: &str, kind: FsKind) -> Result<()> {
        self.exec(&MkfsArgs {
            device: device.to_string(),
            kind,
        })?;
        Ok(())
    }

    fn mount(&self, device: &str, target: &Path) -> Result<()> {
        self.exec(&MountArgs {
            device: device.to_string(),
            target: target.to_path_buf(),
        })?;
        Ok(())
    }

    fn generate_fstab(&self, root: &Path) -> Result<String> {
        Ok(self
            .exec(&GenfstabArgs {
                root: root.to_path_buf(),
            })?
            .stdout)
    }

    fn partition_uuid(&self, device: &str) -> Result<String> {
        Ok(self
            .exec(&BlkidArgs {
                device: device.to_string(),
                tag: "PARTUUID",
            })?
            .stdout
            .trim()
            .to_string())
    }
}

impl Encryptor for SystemBackend<'_> {
    fn initialize(&self, device: &str, passphrase: &Secret) -> Result<()> {
        let key = SecretFile::new(&self.key_dir, passphrase)?;
        self.exec(&CryptsetupArgs::LuksFormat {
            device: device.to_string(),
            key_file: key.path().to_path_buf(),
        })?;
        Ok(())
    }

    fn open(&self, device: &str, name: &str, passphrase: &Secret) -> Result<String> {
        let key = SecretFile::new(&self.key_dir, passphrase)?;
        self.exec(&CryptsetupArgs::Open {
            device: device.to_string(),
            name: name.to_string(),
            key_file: key.path().to_path_buf(),
        })?;
        Ok(format!("/dev/mapper/{name}"))
    }

    fn close(&self, name: &str) -> Result<()> {
        self.exec(&CryptsetupArgs::Close {
            name: name.to_string(),
        })?;
        Ok(())
    }

    fn container_uuid(&self, device: &str) -> Result<String> {
        Ok(self
            .exec(&CryptsetupArgs::LuksUuid {
                device: device.to_string(),
            })?
            .stdout
            .trim()
            .to_string())
    }
}

impl PackageManager for SystemBackend<'_> {
    fn bootstrap(&self, packages: &[String]) -> Result<()> {
        self.exec(&PacstrapArgs {
            root: self.root.clone(),
            packages: packages.to_vec(),
        })?;
        Ok(())
    }

    fn install(&self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut argv = vec!["pacman", "-S", "--needed", "--noconfirm"];
        argv.extend(packages.iter().map(String::as_str));
        self.exec_command(self.chroot(None, &argv))?;
        Ok(())
    }

    fn refresh(&self) -> Result<()> {
        self.exec_command(self.chroot(None, &["pacman", "-Sy", "--noconfirm"]))?;
        Ok(())
    }

    fn query_orphans(&self) -> Result<Vec<String>> {
        let command = self.chroot(None, &["pacman", "-Qdtq"]);
        let output = self.runner.run(&command)?;
        // pacman exits 1 with no output when there is nothing to report
        if !output.success && output.stdout.trim().is_empty() && output.stderr.trim().is_empty() {
            return Ok(Vec::new());
        }
        let output = output.ensure_success(&command)?;
        Ok(output.stdout.split_whitespace().map(str::to_string).collect())
    }

    fn remove(&self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut argv = vec!["pacman", "-Rns", "--noconfirm"];
        argv.extend(packages.iter().map(String::as_str));
        self.exec_command(self.chroot(None, &argv))?;
        Ok(())
    }

    fn aur_install(&self, user: &str, helper: AurHelper, packages: &[String]) -> Result<()> {
        if packages.is_empty() || helper.is_none() {
            return Ok(());
        }
        let program = helper.to_string();
        let mut argv = vec![program.as_str(), "-S", "--needed", "--noconfirm"];
        argv.extend(packages.iter().map(String::as_str));
        self.exec_command(self.chroot(Some(user), &argv))?;
        Ok(())
    }
}

impl BootloaderInstaller for SystemBackend<'_> {
    fn install(&self, loader: Bootloader, target: &BootTarget) -> Result<()> {
        let argv: Vec<&str> = match (loader, target) {
            (Bootloader::SystemdBoot, _) => vec!["bootctl", "install", "--esp-path=/boot"],
            (Bootloader::Grub, BootTarget::Esp) => vec![
                "grub-install",
                "--target=x86_64-efi",
                "--efi-directory=/boot",
                "--bootloader-id=GRUB",
            ],
            (Bootloader::Grub, BootTarget::Disk(disk)) => {
                vec!["grub-install", "--target=i386-pc", disk.as_str()]
            }
        };
        self.exec_command(self.chroot(None, &argv))?;
        Ok(())
    }

    fn regenerate_config(&self, loader: Bootloader) -> Result<()> {
        match loader {
            Bootloader::Grub => {
                self.exec_command(self.chroot(None, &["grub-mkconfig", "-o", "/boot/grub/grub.cfg"]))?;
            }
            // loader.conf and entries are plain files written by the pipeline
            Bootloader::SystemdBoot => {}
        }
        Ok(())
    }
}

impl ChrootExecutor for SystemBackend<'_> {
    fn run(&self, argv: &[&str]) -> Result<String> {
        Ok(self.exec_command(self.chroot(None, argv))?.stdout)
    }

    fn run_with_input(&self, argv: &[&str], input: Secret) -> Result<()> {
        self.exec_command(self.chroot(None, argv).stdin(input))?;
        Ok(())
    }

    fn run_as(&self, user: &str, argv: &[&str]) -> Result<()> {
        self.exec_command(self.chroot(Some(user), argv))?;
        Ok(())
    }

    fn try_run(&self, argv: &[&str]) -> Result<ToolOutput> {
        self.runner.run(&self.chroot(None, argv))
    }
}

/// The provider set handed to the pipeline.
#[derive(Clone, Copy)]
pub struct Toolbox<'a> {
    pub disks: &'a dyn DiskProvider,
    pub crypt: &'a dyn Encryptor,
    pub packages: &'a dyn PackageManager,
    pub bootloader: &'a dyn BootloaderInstaller,
    pub chroot: &'a dyn ChrootExecutor,
}

impl<'a> Toolbox<'a> {
    pub fn from_backend(backend: &'a SystemBackend<'_>) -> Self {
        Self {
            disks: backend,
            crypt: backend,
            packages: backend,
            bootloader: backend,
            chroot: backend,
        }
    }
}

// ============================================================================
// Geolocation
// ============================================================================

const GEO_ENDPOINT: &str = "https://ipapi.co/timezone";

/// Timezone lookup through a public IP geolocation endpoint.
pub struct IpGeolocator<'r> {
    runner: &'r dyn CommandRunner,
    online: bool,
}

impl<'r> IpGeolocator<'r> {
    /// `online` comes from the connectivity probe; offline hosts skip the lookup.
    pub fn new(runner: &'r dyn CommandRunner, online: bool) -> Self {
        Self { runner, online }
    }
}

impl Geolocator for IpGeolocator<'_> {
    fn guess_timezone(&self) -> Option<String> {
        if !self.online {
            tracing::debug!("Offline, skipping timezone lookup");
            return None;
        }
        let command = ToolCommand::new("curl").args(["-fsS", "--max-time", "5", GEO_ENDPOINT]);
        let output = match self.runner.run(&command) {
            Ok(out) if out.success => out,
            Ok(out) => {
                tracing::warn!("Timezone lookup failed: {}", out.stderr.trim());
                return None;
            }
            Err(e) => {
                tracing::warn!("Timezone lookup failed: {}", e);
                return None;
            }
        };
        let guess = output.stdout.trim();
        match chrono_tz::Tz::from_str(guess) {
            Ok(_) => Some(guess.to_string()),
            Err(_) => {
                tracing::warn!("Timezone lookup returned an unknown zone '{}'", guess);
                None
            }
        }
    }
}
