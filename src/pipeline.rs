//! Installation pipeline.
//!
//! Fifteen stages run strictly in order against a fully resolved
//! [`ConfigRecord`]. A stage either does its work, reports itself skipped
//! because its own precondition is false, or fails. The first failure stops
//! the run; nothing already applied to the disk is rolled back.
//!
//! # Stage Flow
//!
//! ```text
//! DetectBootMode → Partition → Encrypt → Format → Mount → InstallBase
//!     → Configure → Bootloader → Multilib → Desktop → GraphicsDriver
//!     → AurHelper → Packages → AuxiliaryFiles → Finalize
//! ```
//!
//! Every external effect goes through the [`Toolbox`] providers or the
//! [`TargetRoot`] file editor, so a recording runner exercises the whole
//! pipeline without privileges.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::catalog::HostPaths;
use crate::config_store::{ConfigRecord, FieldGroup};
use crate::error::{InstallError, Result};
use crate::hardware;
use crate::process_guard;
use crate::profiles::{self, desktop_spec, driver_packages};
use crate::prompt::{Prompt, PromptError, Prompter};
use crate::providers::{BootTarget, PartitionSpec, Toolbox};
use crate::recovery::Recovery;
use crate::secret::Secret;
use crate::target::{self, AurGrant, Initramfs, RootDevice, TargetRoot, WHEEL_DROPIN};
use crate::tools::args::{FsKind, PartitionTable};
use crate::types::{
    AurHelper, BootMode, Bootloader, DesktopEnvironment, Filesystem, GraphicsDriver,
    PackageProfile,
};

/// Device-mapper name of the unlocked root container.
pub const MAPPER_NAME: &str = "cryptroot";

/// Auxiliary tree under the data directory copied into the target.
pub const AUX_TREE: &str = "files";
/// Optional OS identity overlaid onto `/etc/os-release`.
pub const OS_RELEASE: &str = "os-release";

/// Installation stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Stage {
    DetectBootMode = 1,
    /// Destructive: wipes the chosen disk.
    Partition = 2,
    Encrypt = 3,
    Format = 4,
    Mount = 5,
    InstallBase = 6,
    Configure = 7,
    Bootloader = 8,
    Multilib = 9,
    Desktop = 10,
    GraphicsDriver = 11,
    AurHelper = 12,
    Packages = 13,
    AuxiliaryFiles = 14,
    Finalize = 15,
}

impl Stage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::DetectBootMode => "Detect boot mode",
            Self::Partition => "Wipe and partition disk",
            Self::Encrypt => "Set up encryption",
            Self::Format => "Format partitions",
            Self::Mount => "Mount filesystems",
            Self::InstallBase => "Install base system",
            Self::Configure => "Configure system",
            Self::Bootloader => "Install bootloader",
            Self::Multilib => "Enable multilib",
            Self::Desktop => "Install desktop environment",
            Self::GraphicsDriver => "Install graphics driver",
            Self::AurHelper => "Install AUR helper",
            Self::Packages => "Install profile packages",
            Self::AuxiliaryFiles => "Copy auxiliary files",
            Self::Finalize => "Finalize installation",
        }
    }

    pub const fn all() -> &'static [Self] {
        &[
            Self::DetectBootMode,
            Self::Partition,
            Self::Encrypt,
            Self::Format,
            Self::Mount,
            Self::InstallBase,
            Self::Configure,
            Self::Bootloader,
            Self::Multilib,
            Self::Desktop,
            Self::GraphicsDriver,
            Self::AurHelper,
            Self::Packages,
            Self::AuxiliaryFiles,
            Self::Finalize,
        ]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Result of one stage that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Done,
    Skipped(&'static str),
}

/// Everything the run learned or decided along the way.
#[derive(Debug, Clone, Default)]
pub struct InstallSession {
    boot_mode: Option<BootMode>,
    bootloader: Option<Bootloader>,
    root_device: Option<String>,
    history: Vec<(Stage, StageOutcome)>,
    failed_at: Option<Stage>,
}

impl InstallSession {
    pub fn boot_mode(&self) -> Option<BootMode> {
        self.boot_mode
    }

    /// Bootloader actually installed (may differ from the choice on BIOS).
    pub fn bootloader(&self) -> Option<Bootloader> {
        self.bootloader
    }

    /// Raw root partition, or the opened mapping when encrypted.
    pub fn root_device(&self) -> Option<&str> {
        self.root_device.as_deref()
    }

    pub fn history(&self) -> &[(Stage, StageOutcome)] {
        &self.history
    }

    /// Stages that did their work, in order.
    pub fn executed(&self) -> Vec<Stage> {
        self.history
            .iter()
            .filter(|(_, outcome)| *outcome == StageOutcome::Done)
            .map(|(stage, _)| *stage)
            .collect()
    }

    pub fn skipped(&self) -> Vec<Stage> {
        self.history
            .iter()
            .filter(|(_, outcome)| matches!(outcome, StageOutcome::Skipped(_)))
            .map(|(stage, _)| *stage)
            .collect()
    }

    pub fn failed_at(&self) -> Option<Stage> {
        self.failed_at
    }
}

/// A [`ConfigRecord`] with every field resolved.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub username: String,
    pub user_password: Secret,
    pub root_password: Secret,
    pub timezone: String,
    pub language: String,
    pub locales: Vec<String>,
    pub keymap: String,
    pub disk: String,
    pub boot_partition: String,
    pub root_partition: String,
    pub filesystem: Filesystem,
    pub bootloader: Bootloader,
    pub encryption: bool,
    /// `None` when no desktop is enabled.
    pub desktop: Option<DesktopEnvironment>,
    pub graphics_driver: Option<GraphicsDriver>,
    pub multilib: bool,
    pub aur_helper: AurHelper,
    pub profile: PackageProfile,
}

fn required<T: Clone>(value: &Option<T>, field: FieldGroup) -> Result<T> {
    value
        .clone()
        .ok_or_else(|| InstallError::validation(format!("{field} is not set")))
}

impl InstallPlan {
    pub fn from_record(record: &ConfigRecord) -> Result<Self> {
        let missing = record.missing();
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(|g| g.to_string()).collect();
            return Err(InstallError::validation(format!(
                "configuration incomplete: {}",
                names.join(", ")
            )));
        }

        let desktop_enabled = required(&record.desktop_enabled, FieldGroup::Desktop)?;
        let desktop = required(&record.desktop_environment, FieldGroup::Desktop)?;
        Ok(Self {
            username: required(&record.username, FieldGroup::Username)?,
            user_password: required(&record.user_password, FieldGroup::UserPassword)?,
            root_password: required(&record.root_password, FieldGroup::RootPassword)?,
            timezone: required(&record.timezone, FieldGroup::Timezone)?,
            language: required(&record.language, FieldGroup::Language)?,
            locales: required(&record.locales, FieldGroup::Language)?,
            keymap: required(&record.keymap, FieldGroup::Keymap)?,
            disk: required(&record.disk, FieldGroup::Disk)?,
            boot_partition: required(&record.boot_partition, FieldGroup::Disk)?,
            root_partition: required(&record.root_partition, FieldGroup::Disk)?,
            filesystem: required(&record.filesystem, FieldGroup::Filesystem)?,
            bootloader: required(&record.bootloader, FieldGroup::Bootloader)?,
            encryption: required(&record.encryption, FieldGroup::Encryption)?,
            desktop: desktop_enabled.then_some(desktop),
            graphics_driver: if desktop_enabled { record.graphics_driver } else { None },
            multilib: required(&record.multilib, FieldGroup::Multilib)?,
            aur_helper: required(&record.aur_helper, FieldGroup::AurHelper)?,
            profile: required(&record.profile, FieldGroup::Profile)?,
        })
    }
}

/// Host-side paths and files the pipeline reads.
#[derive(Debug, Clone)]
pub struct PipelineEnv {
    pub host: HostPaths,
    /// Package lists and the auxiliary tree.
    pub data_dir: PathBuf,
    /// Persisted configuration, copied into the new home directory.
    pub config_path: PathBuf,
    pub log_path: PathBuf,
}

pub struct InstallPipeline<'a> {
    tools: Toolbox<'a>,
    target: &'a TargetRoot,
    env: &'a PipelineEnv,
    prompter: &'a mut dyn Prompter,
    session: InstallSession,
}

impl<'a> InstallPipeline<'a> {
    pub fn new(
        tools: Toolbox<'a>,
        target: &'a TargetRoot,
        env: &'a PipelineEnv,
        prompter: &'a mut dyn Prompter,
    ) -> Self {
        Self {
            tools,
            target,
            env,
            prompter,
            session: InstallSession::default(),
        }
    }

    pub fn session(&self) -> &InstallSession {
        &self.session
    }

    /// Run every stage. The first error is handed to `recovery` and returned.
    #[tracing::instrument(skip_all)]
    pub fn run(&mut self, record: &ConfigRecord, recovery: &mut Recovery) -> Result<()> {
        let plan = match InstallPlan::from_record(record) {
            Ok(plan) => plan,
            Err(e) => {
                recovery.on_error("Validate configuration", &e);
                return Err(e);
            }
        };

        let total = Stage::all().len();
        for &stage in Stage::all() {
            let result = if process_guard::cancel_requested() {
                Err(InstallError::Cancelled)
            } else {
                tracing::info!("[{}/{}] {}", stage.order(), total, stage);
                self.run_stage(stage, &plan)
            };

            match result {
                Ok(StageOutcome::Done) => {
                    self.session.history.push((stage, StageOutcome::Done));
                }
                Ok(StageOutcome::Skipped(reason)) => {
                    tracing::info!("Skipping {}: {}", stage, reason);
                    self.session.history.push((stage, StageOutcome::Skipped(reason)));
                }
                Err(e) => {
                    self.session.failed_at = Some(stage);
                    recovery.on_error(stage.description(), &e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn run_stage(&mut self, stage: Stage, plan: &InstallPlan) -> Result<StageOutcome> {
        match stage {
            Stage::DetectBootMode => self.detect_boot_mode(plan),
            Stage::Partition => self.partition(plan),
            Stage::Encrypt => self.encrypt(plan),
            Stage::Format => self.format(plan),
            Stage::Mount => self.mount(plan),
            Stage::InstallBase => self.install_base(plan),
            Stage::Configure => self.configure(plan),
            Stage::Bootloader => self.install_bootloader(plan),
            Stage::Multilib => self.enable_multilib(plan),
            Stage::Desktop => self.install_desktop(plan),
            Stage::GraphicsDriver => self.install_graphics_driver(plan),
            Stage::AurHelper => self.install_aur_helper(plan),
            Stage::Packages => self.install_profile_packages(plan),
            Stage::AuxiliaryFiles => self.copy_auxiliary_files(),
            Stage::Finalize => self.finalize(plan),
        }
    }

    fn boot_mode(&self) -> BootMode {
        self.session.boot_mode.unwrap_or(BootMode::Bios)
    }

    fn root_device<'p>(&'p self, plan: &'p InstallPlan) -> &'p str {
        self.session.root_device.as_deref().unwrap_or(&plan.root_partition)
    }

    // ========================================================================
    // Storage
    // ========================================================================

    #[tracing::instrument(skip_all)]
    fn detect_boot_mode(&mut self, plan: &InstallPlan) -> Result<StageOutcome> {
        let mode = hardware::detect_boot_mode(&self.env.host.efi_marker);
        self.session.boot_mode = Some(mode);
        self.session.bootloader = Some(hardware::effective_bootloader(mode, plan.bootloader));
        Ok(StageOutcome::Done)
    }

    #[tracing::instrument(skip_all)]
    fn partition(&mut self, plan: &InstallPlan) -> Result<StageOutcome> {
        // a mapping left open by an aborted run keeps the disk busy
        if self.env.host.mapper_dir.join(MAPPER_NAME).exists() {
            tracing::warn!("Closing stale /dev/mapper/{}", MAPPER_NAME);
            self.tools.crypt.close(MAPPER_NAME)?;
        }

        tracing::warn!("Erasing all data on {}", plan.disk);
        self.tools.disks.wipe_signatures(&plan.disk)?;

        let (table, parts) = partition_layout(self.boot_mode(), plan.filesystem);
        self.tools.disks.create_table(&plan.disk, table)?;
        for part in &parts {
            self.tools.disks.create_partition(&plan.disk, part)?;
        }
        self.session.root_device = Some(plan.root_partition.clone());
        Ok(StageOutcome::Done)
    }

    #[tracing::instrument(skip_all)]
    fn encrypt(&mut self, plan: &InstallPlan) -> Result<StageOutcome> {
        if !plan.encryption {
            return Ok(StageOutcome::Skipped("encryption disabled"));
        }
        self.tools.crypt.initialize(&plan.root_partition, &plan.user_password)?;
        let mapped = self
            .tools
            .crypt
            .open(&plan.root_partition, MAPPER_NAME, &plan.user_password)?;
        tracing::info!("Root device is now {}", mapped);
        self.session.root_device = Some(mapped);
        Ok(StageOutcome::Done)
    }

    #[tracing::instrument(skip_all)]
    fn format(&mut self, plan: &InstallPlan) -> Result<StageOutcome> {
        self.tools.disks.format(&plan.boot_partition, FsKind::Fat32)?;
        let kind = match plan.filesystem {
            Filesystem::Ext4 => FsKind::Ext4,
            Filesystem::Btrfs => FsKind::Btrfs,
        };
        self.tools.disks.format(self.root_device(plan), kind)?;
        Ok(StageOutcome::Done)
    }

    #[tracing::instrument(skip_all)]
    fn mount(&mut self, plan: &InstallPlan) -> Result<StageOutcome> {
        self.tools.disks.mount(self.root_device(plan), self.target.root())?;
        self.tools
            .disks
            .mount(&plan.boot_partition, &self.target.path("boot"))?;
        Ok(StageOutcome::Done)
    }

    #[tracing::instrument(skip_all)]
    fn install_base(&mut self, plan: &InstallPlan) -> Result<StageOutcome> {
        let loader = self.session.bootloader.unwrap_or(plan.bootloader);
        let packages = profiles::base_packages(plan.filesystem, self.boot_mode(), loader);
        self.tools.packages.bootstrap(&packages)?;

        let fstab = self.tools.disks.generate_fstab(self.target.root())?;
        self.target
            .edit("etc/fstab", |current| format!("{current}{fstab}"))?;
        Ok(StageOutcome::Done)
    }

    // ========================================================================
    // System configuration
    // ========================================================================

    #[tracing::instrument(skip_all)]
    fn configure(&mut self, plan: &InstallPlan) -> Result<StageOutcome> {
        let chroot = self.tools.chroot;
        let zoneinfo = format!("/usr/share/zoneinfo/{}", plan.timezone);
        chroot.run(&["ln", "-sf", &zoneinfo, "/etc/localtime"])?;
        chroot.run(&["hwclock", "--systohc"])?;

        self.target
            .edit("etc/locale.gen", |c| target::enable_locales(c, &plan.locales))?;
        chroot.run(&["locale-gen"])?;
        self.target
            .write("etc/locale.conf", &format!("LANG={}\n", plan.language))?;
        self.target
            .write("etc/vconsole.conf", &format!("KEYMAP={}\n", plan.keymap))?;
        self.target
            .write("etc/hostname", &format!("{}\n", target::HOSTNAME))?;
        self.target.write("etc/hosts", &target::hosts_file())?;

        if plan.encryption {
            self.target
                .edit("etc/mkinitcpio.conf", target::insert_encrypt_hook)?;
        }
        chroot.run(&["mkinitcpio", "-P"])?;

        chroot.run(&[
            "useradd",
            "-m",
            "-G",
            "wheel,audio,video,storage,optical",
            "-s",
            "/bin/bash",
            &plan.username,
        ])?;
        let credentials = Secret::new(format!(
            "{}:{}\nroot:{}\n",
            plan.username,
            plan.user_password.expose(),
            plan.root_password.expose()
        ));
        chroot.run_with_input(&["chpasswd"], credentials)?;
        self.target
            .write_mode(WHEEL_DROPIN, "%wheel ALL=(ALL:ALL) ALL\n", 0o440)?;

        chroot.run(&["systemctl", "enable", "NetworkManager"])?;
        Ok(StageOutcome::Done)
    }

    #[tracing::instrument(skip_all)]
    fn install_bootloader(&mut self, plan: &InstallPlan) -> Result<StageOutcome> {
        let args = if plan.encryption {
            let uuid = self.tools.crypt.container_uuid(&plan.root_partition)?;
            let initramfs = Initramfs::detect(&self.target.read("etc/mkinitcpio.conf")?);
            target::kernel_args(RootDevice::Luks { uuid: &uuid, initramfs })
        } else {
            let partuuid = self.tools.disks.partition_uuid(&plan.root_partition)?;
            target::kernel_args(RootDevice::Plain { partuuid: &partuuid })
        };
        let loader = self.session.bootloader.unwrap_or(plan.bootloader);
        let installer = self.tools.bootloader;

        match (self.boot_mode(), loader) {
            (BootMode::Uefi, Bootloader::SystemdBoot) => {
                installer.install(Bootloader::SystemdBoot, &BootTarget::Esp)?;
                self.target
                    .write("boot/loader/loader.conf", target::systemd_boot_loader_conf())?;
                self.target
                    .write("boot/loader/entries/arch.conf", &target::systemd_boot_entry(&args))?;
                self.secure_boot()?;
            }
            (mode, _) => {
                self.tools.packages.install(&["grub".to_string()])?;
                let boot_target = if mode.is_uefi() {
                    BootTarget::Esp
                } else {
                    BootTarget::Disk(plan.disk.clone())
                };
                installer.install(Bootloader::Grub, &boot_target)?;
                self.target
                    .edit("etc/default/grub", |c| target::append_grub_cmdline(c, &args))?;
                installer.regenerate_config(Bootloader::Grub)?;
            }
        }
        Ok(StageOutcome::Done)
    }

    /// Key generation, enrollment and signing. Failures only warn.
    #[tracing::instrument(skip_all)]
    fn secure_boot(&mut self) -> Result<()> {
        const STEPS: &[&[&str]] = &[
            &["pacman", "-S", "--needed", "--noconfirm", "sbctl"],
            &["sbctl", "create-keys"],
            &["sbctl", "enroll-keys", "-m"],
            &["sbctl", "sign", "-s", "/boot/vmlinuz-linux"],
            &["sbctl", "sign", "-s", "/boot/EFI/systemd/systemd-bootx64.efi"],
            &["sbctl", "sign", "-s", "/boot/EFI/BOOT/BOOTX64.EFI"],
        ];

        for argv in STEPS {
            match self.tools.chroot.try_run(argv) {
                Ok(out) if out.success => {}
                Ok(out) => {
                    tracing::warn!(
                        "Secure boot setup stopped at '{}': {}",
                        argv.join(" "),
                        out.stderr.trim()
                    );
                    return Ok(());
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    tracing::warn!("Secure boot setup stopped at '{}': {}", argv.join(" "), e);
                    return Ok(());
                }
            }
        }
        tracing::info!("Secure boot keys enrolled and boot files signed");
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    fn enable_multilib(&mut self, plan: &InstallPlan) -> Result<StageOutcome> {
        if !plan.multilib {
            return Ok(StageOutcome::Skipped("multilib not requested"));
        }
        self.target.edit("etc/pacman.conf", target::enable_multilib)?;
        self.tools.packages.refresh()?;
        Ok(StageOutcome::Done)
    }

    // ========================================================================
    // Packages
    // ========================================================================

    #[tracing::instrument(skip_all)]
    fn install_desktop(&mut self, plan: &InstallPlan) -> Result<StageOutcome> {
        let Some(spec) = plan.desktop.and_then(desktop_spec) else {
            return Ok(StageOutcome::Skipped("no desktop environment"));
        };
        self.tools.packages.install(&owned(spec.packages))?;
        for (path, contents) in spec.configs {
            self.target.write(path, contents)?;
        }
        for service in spec.services {
            self.tools.chroot.run(&["systemctl", "enable", *service])?;
        }
        Ok(StageOutcome::Done)
    }

    #[tracing::instrument(skip_all)]
    fn install_graphics_driver(&mut self, plan: &InstallPlan) -> Result<StageOutcome> {
        let packages = match plan.graphics_driver {
            Some(driver) => driver_packages(driver, plan.multilib),
            None => Vec::new(),
        };
        if packages.is_empty() {
            return Ok(StageOutcome::Skipped("no graphics driver"));
        }
        self.tools.packages.install(&packages)?;
        Ok(StageOutcome::Done)
    }

    #[tracing::instrument(skip_all)]
    fn install_aur_helper(&mut self, plan: &InstallPlan) -> Result<StageOutcome> {
        let Some(repo) = profiles::aur_helper_repo(plan.aur_helper) else {
            return Ok(StageOutcome::Skipped("no AUR helper"));
        };
        self.tools
            .packages
            .install(&owned(&["git", "base-devel"]))?;

        let dir = repo_dir(repo);
        let script = format!(
            "cd /tmp && rm -rf {dir} && git clone {repo} && cd {dir} && makepkg -si --noconfirm"
        );
        let grant = AurGrant::new(self.target, &plan.username)?;
        self.tools
            .chroot
            .run_as(&plan.username, &["bash", "-c", &script])?;
        grant.revoke()?;
        Ok(StageOutcome::Done)
    }

    #[tracing::instrument(skip_all)]
    fn install_profile_packages(&mut self, plan: &InstallPlan) -> Result<StageOutcome> {
        if plan.profile == PackageProfile::Minimal {
            self.tools.packages.install(&owned(profiles::MINIMAL_PACKAGES))?;
            return Ok(StageOutcome::Done);
        }

        let mut packages = owned(profiles::BASELINE_PACKAGES);
        packages.extend(profiles::profile_list(&self.env.data_dir, plan.profile)?);
        if plan.profile == PackageProfile::Custom {
            packages.extend(self.ask_custom_packages()?);
        }
        self.tools.packages.install(&packages)?;

        if let Some(extra) = profiles::aur_extra(plan.profile) {
            if plan.aur_helper.is_none() {
                tracing::warn!("Skipping {}: no AUR helper installed", extra);
            } else {
                let grant = AurGrant::new(self.target, &plan.username)?;
                self.tools.packages.aur_install(
                    &plan.username,
                    plan.aur_helper,
                    &[extra.to_string()],
                )?;
                grant.revoke()?;
            }
        }
        Ok(StageOutcome::Done)
    }

    fn ask_custom_packages(&mut self) -> Result<Vec<String>> {
        let prompt = Prompt::new(
            "Custom packages",
            "Space-separated package names to install on top of the baseline",
        );
        match self.prompter.input(&prompt, Some("")) {
            Ok(answer) => Ok(profiles::parse_package_list(&answer.replace(',', " "))),
            Err(PromptError::Interrupted) => Err(InstallError::Cancelled),
            Err(e) => Err(InstallError::prompt(e.to_string())),
        }
    }

    // ========================================================================
    // Files
    // ========================================================================

    #[tracing::instrument(skip_all)]
    fn copy_auxiliary_files(&mut self) -> Result<StageOutcome> {
        let source = self.env.data_dir.join(AUX_TREE);
        if !source.is_dir() {
            return Ok(StageOutcome::Skipped("no auxiliary files"));
        }
        let copied = copy_tree(&source, self.target.root())?;
        tracing::info!("Copied {} auxiliary file(s)", copied);

        let os_release = self.env.data_dir.join(OS_RELEASE);
        if os_release.is_file() {
            let contents = fs::read_to_string(&os_release)?;
            self.target.write("etc/os-release", &contents)?;
        }
        Ok(StageOutcome::Done)
    }

    #[tracing::instrument(skip_all)]
    fn finalize(&mut self, plan: &InstallPlan) -> Result<StageOutcome> {
        let home = format!("home/{}", plan.username);
        for (source, name) in [
            (&self.env.config_path, "archsetup.conf"),
            (&self.env.log_path, "archsetup.log"),
        ] {
            if source.is_file() {
                let dest = self.target.path(&format!("{home}/{name}"));
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(source, &dest)?;
            }
        }

        let owner = format!("{0}:{0}", plan.username);
        let home_abs = format!("/{home}");
        self.tools.chroot.run(&["chown", "-R", &owner, &home_abs])?;

        let orphans = self.tools.packages.query_orphans()?;
        if !orphans.is_empty() {
            tracing::info!("Removing {} orphaned package(s)", orphans.len());
            self.tools.packages.remove(&orphans)?;
        }
        Ok(StageOutcome::Done)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Partition table and the two partitions for this firmware.
pub fn partition_layout(mode: BootMode, fs: Filesystem) -> (PartitionTable, [PartitionSpec; 2]) {
    let root_type = match fs {
        Filesystem::Ext4 => "ext4",
        Filesystem::Btrfs => "btrfs",
    };
    match mode {
        BootMode::Uefi => (
            PartitionTable::Gpt,
            [
                PartitionSpec {
                    index: 1,
                    fs_type: "fat32",
                    start: "1MiB",
                    end: "1025MiB",
                    flag: Some("esp"),
                },
                PartitionSpec {
                    index: 2,
                    fs_type: root_type,
                    start: "1025MiB",
                    end: "100%",
                    flag: None,
                },
            ],
        ),
        BootMode::Bios => (
            PartitionTable::Msdos,
            [
                PartitionSpec {
                    index: 1,
                    fs_type: "fat32",
                    start: "1MiB",
                    end: "513MiB",
                    flag: Some("boot"),
                },
                PartitionSpec {
                    index: 2,
                    fs_type: root_type,
                    start: "513MiB",
                    end: "100%",
                    flag: None,
                },
            ],
        ),
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Checkout directory of a git URL: `.../paru-bin.git` -> `paru-bin`.
fn repo_dir(repo: &str) -> &str {
    let name = repo.rsplit('/').next().unwrap_or(repo);
    name.strip_suffix(".git").unwrap_or(name)
}

/// Copy every file under `source` into `dest`, keeping relative paths.
fn copy_tree(source: &Path, dest: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        let Ok(rel) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}
