//! Install pipeline tests
//!
//! The whole pipeline runs against a `RecordingRunner`: nothing executes,
//! every command is journaled, and failures or cancellations are injected by
//! pattern. The target root, firmware marker and mapper directory live in a
//! temporary directory.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use archsetup::catalog::HostPaths;
use archsetup::config_store::ConfigRecord;
use archsetup::error::{InstallError, Result};
use archsetup::pipeline::{InstallPipeline, InstallSession, PipelineEnv, Stage};
use archsetup::prompt::ScriptedPrompter;
use archsetup::providers::{SystemBackend, Toolbox};
use archsetup::recovery::{Outcome, Recovery};
use archsetup::secret::Secret;
use archsetup::target::{AUR_GRANT_DROPIN, TargetRoot, WHEEL_DROPIN};
use archsetup::tools::RecordingRunner;
use archsetup::types::{
    AurHelper, Bootloader, DesktopEnvironment, Filesystem, GraphicsDriver, PackageProfile,
};

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    dir: tempfile::TempDir,
    target: TargetRoot,
    env: PipelineEnv,
}

impl Harness {
    fn new(uefi: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("target");
        let data = dir.path().join("data");
        let mapper = dir.path().join("mapper");
        let efi = dir.path().join("efi");
        for d in [&root, &data, &mapper] {
            fs::create_dir_all(d).unwrap();
        }
        if uefi {
            fs::create_dir_all(&efi).unwrap();
        }
        let config_path = dir.path().join("archsetup.conf");
        fs::write(&config_path, "USERNAME='alice'\n").unwrap();

        let env = PipelineEnv {
            host: HostPaths {
                efi_marker: efi,
                mapper_dir: mapper,
                ..HostPaths::default()
            },
            data_dir: data,
            config_path,
            log_path: dir.path().join("archsetup.log"),
        };
        Self {
            target: TargetRoot::new(root),
            dir,
            env,
        }
    }

    fn run(
        &self,
        runner: &RecordingRunner,
        record: &ConfigRecord,
        answers: &[&str],
    ) -> (Result<()>, InstallSession, Recovery) {
        let backend = SystemBackend::new(runner, self.target.root(), self.dir.path());
        let mut prompter = ScriptedPrompter::new(answers);
        let mut recovery = Recovery::new(&self.env.log_path).unwrap();
        let mut pipeline = InstallPipeline::new(
            Toolbox::from_backend(&backend),
            &self.target,
            &self.env,
            &mut prompter,
        );
        let result = pipeline.run(record, &mut recovery);
        let session = pipeline.session().clone();
        (result, session, recovery)
    }

    fn read(&self, rel: &str) -> String {
        self.target.read(rel).unwrap()
    }
}

/// sda, ext4, grub, no encryption, TTY, Minimal.
fn minimal_record() -> ConfigRecord {
    ConfigRecord {
        username: Some("alice".into()),
        user_password: Some(Secret::new("userpw")),
        root_password: Some(Secret::new("rootpw")),
        timezone: Some("Europe/Berlin".into()),
        language: Some("en_US.UTF-8".into()),
        locales: Some(vec!["en_US.UTF-8 UTF-8".into()]),
        keymap: Some("us".into()),
        disk: Some("/dev/sda".into()),
        boot_partition: Some("/dev/sda1".into()),
        root_partition: Some("/dev/sda2".into()),
        filesystem: Some(Filesystem::Ext4),
        bootloader: Some(Bootloader::Grub),
        encryption: Some(false),
        desktop_enabled: Some(false),
        desktop_environment: Some(DesktopEnvironment::Tty),
        graphics_driver: None,
        multilib: Some(false),
        aur_helper: Some(AurHelper::None),
        profile: Some(PackageProfile::Minimal),
    }
}

/// NVMe, btrfs, systemd-boot, LUKS, KDE + nvidia, multilib, paru, Developer.
fn full_record() -> ConfigRecord {
    ConfigRecord {
        disk: Some("/dev/nvme0n1".into()),
        boot_partition: Some("/dev/nvme0n1p1".into()),
        root_partition: Some("/dev/nvme0n1p2".into()),
        filesystem: Some(Filesystem::Btrfs),
        bootloader: Some(Bootloader::SystemdBoot),
        encryption: Some(true),
        desktop_enabled: Some(true),
        desktop_environment: Some(DesktopEnvironment::Kde),
        graphics_driver: Some(GraphicsDriver::Nvidia),
        multilib: Some(true),
        aur_helper: Some(AurHelper::Paru),
        profile: Some(PackageProfile::Developer),
        ..minimal_record()
    }
}

fn position(commands: &[String], pattern: &str) -> usize {
    commands
        .iter()
        .position(|c| c.contains(pattern))
        .unwrap_or_else(|| panic!("no command matching '{pattern}' in {commands:#?}"))
}

// =============================================================================
// End to end
// =============================================================================

#[test]
fn test_minimal_bios_install() {
    let h = Harness::new(false);
    let runner = RecordingRunner::dry_run();
    let (result, session, _recovery) = h.run(&runner, &minimal_record(), &[]);
    result.unwrap();

    assert_eq!(
        session.executed(),
        vec![
            Stage::DetectBootMode,
            Stage::Partition,
            Stage::Format,
            Stage::Mount,
            Stage::InstallBase,
            Stage::Configure,
            Stage::Bootloader,
            Stage::Packages,
            Stage::Finalize,
        ]
    );
    assert_eq!(
        session.skipped(),
        vec![
            Stage::Encrypt,
            Stage::Multilib,
            Stage::Desktop,
            Stage::GraphicsDriver,
            Stage::AurHelper,
            Stage::AuxiliaryFiles,
        ]
    );
    assert_eq!(session.root_device(), Some("/dev/sda2"));

    let commands = runner.commands();
    assert!(runner.commands_matching("cryptsetup").is_empty());
    assert!(commands.contains(&"parted -s /dev/sda mklabel msdos".to_string()));
    assert!(commands.contains(&"parted -s /dev/sda set 1 boot on".to_string()));
    assert!(commands.contains(&"mkfs.ext4 -F /dev/sda2".to_string()));
    assert_eq!(runner.commands_matching("grub-install --target=i386-pc /dev/sda").len(), 1);
    assert_eq!(runner.commands_matching("grub-mkconfig").len(), 1);
    assert_eq!(
        runner.commands_matching("pacman -S --needed --noconfirm man-db openssh").len(),
        1
    );
    assert!(runner.commands_matching("sbctl").is_empty());

    // order: wipe before table, format before mount, base before chroot work
    assert!(position(&commands, "wipefs") < position(&commands, "mklabel"));
    assert!(position(&commands, "mkfs.ext4") < position(&commands, "mount"));
    assert!(position(&commands, "pacstrap") < position(&commands, "locale-gen"));
    assert!(position(&commands, "useradd") < position(&commands, "chpasswd"));

    assert_eq!(runner.stdin_recipients(), vec!["arch-chroot"]);
}

#[test]
fn test_minimal_install_writes_target_files() {
    let h = Harness::new(false);
    let runner = RecordingRunner::dry_run();
    let (result, _, _recovery) = h.run(&runner, &minimal_record(), &[]);
    result.unwrap();

    assert_eq!(h.read("etc/hostname"), "archlinux\n");
    assert_eq!(h.read("etc/vconsole.conf"), "KEYMAP=us\n");
    assert_eq!(h.read("etc/locale.conf"), "LANG=en_US.UTF-8\n");
    assert!(h.read("etc/locale.gen").contains("en_US.UTF-8 UTF-8"));
    assert!(h.read("etc/default/grub").contains("root=PARTUUID="));
    assert!(h.read(WHEEL_DROPIN).contains("%wheel ALL=(ALL:ALL) ALL"));
    assert!(!h.target.path("etc/mkinitcpio.conf").exists());

    let mode = fs::metadata(h.target.path(WHEEL_DROPIN)).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o440);

    assert_eq!(h.read("home/alice/archsetup.conf"), "USERNAME='alice'\n");
}

#[test]
fn test_full_uefi_install() {
    let h = Harness::new(true);
    fs::create_dir_all(h.env.data_dir.join("files/etc")).unwrap();
    fs::write(h.env.data_dir.join("files/etc/motd"), "welcome\n").unwrap();
    fs::write(h.env.data_dir.join("os-release"), "NAME=\"Custom Arch\"\n").unwrap();

    let runner = RecordingRunner::dry_run();
    let (result, session, _recovery) = h.run(&runner, &full_record(), &[]);
    result.unwrap();

    assert_eq!(session.executed(), Stage::all().to_vec());
    assert_eq!(session.root_device(), Some("/dev/mapper/cryptroot"));
    assert_eq!(session.bootloader(), Some(Bootloader::SystemdBoot));

    let commands = runner.commands();
    assert!(commands.contains(&"parted -s /dev/nvme0n1 mklabel gpt".to_string()));
    assert!(commands.contains(&"parted -s /dev/nvme0n1 set 1 esp on".to_string()));
    assert!(commands.contains(&"mkfs.fat -F 32 /dev/nvme0n1p1".to_string()));
    assert!(commands.contains(&"mkfs.btrfs -f /dev/mapper/cryptroot".to_string()));
    assert!(position(&commands, "luksFormat /dev/nvme0n1p2") < position(&commands, "mkfs.btrfs"));
    assert_eq!(runner.commands_matching("bootctl install --esp-path=/boot").len(), 1);
    assert!(runner.commands_matching("grub-install").is_empty());
    assert!(!runner.commands_matching("sbctl enroll-keys").is_empty());
    assert!(!runner.commands_matching("pacman -Sy --noconfirm").is_empty());
    assert!(!runner.commands_matching("nvidia").is_empty());
    assert!(!runner.commands_matching("git clone https://aur.archlinux.org/paru-bin.git").is_empty());
    assert_eq!(
        runner.commands_matching("-u alice").len(),
        2,
        "helper build and AUR extra run as the user"
    );
    assert!(!runner.commands_matching("paru -S --needed --noconfirm visual-studio-code-bin").is_empty());

    assert!(h.read("etc/mkinitcpio.conf").contains("encrypt filesystems"));
    assert!(h.read("boot/loader/entries/arch.conf").contains("cryptdevice=UUID="));
    assert!(h.read("boot/loader/loader.conf").contains("default arch.conf"));
    assert!(h.read("etc/pacman.conf").contains("[multilib]"));
    assert_eq!(h.read("etc/motd"), "welcome\n");
    assert!(h.read("etc/os-release").contains("Custom Arch"));
    assert!(!h.target.path(AUR_GRANT_DROPIN).exists());
}

#[test]
fn test_systemd_initramfs_unlocks_with_sd_encrypt() {
    let h = Harness::new(true);
    h.target
        .write(
            "etc/mkinitcpio.conf",
            "MODULES=()\nHOOKS=(base systemd autodetect microcode modconf kms keyboard sd-vconsole block filesystems fsck)\n",
        )
        .unwrap();
    let record = ConfigRecord {
        aur_helper: Some(AurHelper::None),
        profile: Some(PackageProfile::Minimal),
        ..full_record()
    };
    let runner = RecordingRunner::dry_run();
    let (result, _session, _recovery) = h.run(&runner, &record, &[]);
    result.unwrap();

    let hooks = h.read("etc/mkinitcpio.conf");
    assert!(hooks.contains("block sd-encrypt filesystems"), "{hooks}");
    assert!(!hooks.contains(" encrypt "));
    let entry = h.read("boot/loader/entries/arch.conf");
    assert!(entry.contains("rd.luks.name="), "{entry}");
    assert!(entry.contains("=cryptroot root=/dev/mapper/cryptroot"));
    assert!(!entry.contains("cryptdevice="));
}

#[test]
fn test_systemd_boot_on_bios_falls_back_to_grub() {
    let h = Harness::new(false);
    let record = ConfigRecord {
        bootloader: Some(Bootloader::SystemdBoot),
        ..minimal_record()
    };
    let runner = RecordingRunner::dry_run();
    let (result, session, _recovery) = h.run(&runner, &record, &[]);
    result.unwrap();

    assert_eq!(session.bootloader(), Some(Bootloader::Grub));
    assert!(runner.commands_matching("bootctl").is_empty());
    assert_eq!(runner.commands_matching("grub-install --target=i386-pc /dev/sda").len(), 1);
}

#[test]
fn test_secure_boot_failure_only_warns() {
    let h = Harness::new(true);
    let record = ConfigRecord {
        bootloader: Some(Bootloader::SystemdBoot),
        ..minimal_record()
    };
    let runner = RecordingRunner::dry_run().fail_on("sbctl create-keys", 1, "setup mode disabled");
    let (result, session, _recovery) = h.run(&runner, &record, &[]);
    result.unwrap();

    assert!(session.executed().contains(&Stage::Bootloader));
    assert!(runner.commands_matching("sbctl enroll-keys").is_empty());
}

// =============================================================================
// Profiles
// =============================================================================

#[test]
fn test_named_profile_reads_package_list() {
    let h = Harness::new(false);
    fs::create_dir_all(h.env.data_dir.join("packages")).unwrap();
    fs::write(h.env.data_dir.join("packages/standard.txt"), "firefox # browser\nhtop\n").unwrap();
    let record = ConfigRecord {
        profile: Some(PackageProfile::Standard),
        ..minimal_record()
    };

    let runner = RecordingRunner::dry_run();
    let (result, _, _recovery) = h.run(&runner, &record, &[]);
    result.unwrap();

    let install = runner.commands_matching("firefox htop");
    assert_eq!(install.len(), 1);
    assert!(!install[0].contains("man-db openssh"));
}

#[test]
fn test_custom_profile_prompts_for_packages() {
    let h = Harness::new(false);
    let record = ConfigRecord {
        profile: Some(PackageProfile::Custom),
        ..minimal_record()
    };
    let runner = RecordingRunner::dry_run();
    let (result, _, _recovery) = h.run(&runner, &record, &["neovim, tmux"]);
    result.unwrap();

    assert_eq!(runner.commands_matching("neovim tmux").len(), 1);
}

#[test]
fn test_custom_profile_interrupt_cancels() {
    let h = Harness::new(false);
    let record = ConfigRecord {
        profile: Some(PackageProfile::Custom),
        ..minimal_record()
    };
    let runner = RecordingRunner::dry_run();
    let (result, session, _recovery) = h.run(&runner, &record, &["^C"]);

    assert!(result.unwrap_err().is_cancellation());
    assert_eq!(session.failed_at(), Some(Stage::Packages));
    assert!(runner.commands_matching("pacman -Qdtq").is_empty());
}

// =============================================================================
// Failure and cancellation
// =============================================================================

#[test]
fn test_first_failure_stops_pipeline_and_keeps_exit_code() {
    let h = Harness::new(false);
    let runner = RecordingRunner::dry_run().fail_on("mkfs.ext4", 5, "bad superblock");
    let (result, session, mut recovery) = h.run(&runner, &minimal_record(), &[]);

    let err = result.unwrap_err();
    assert!(matches!(err, InstallError::ExternalOperation { exit_code: Some(5), .. }));
    assert_eq!(session.failed_at(), Some(Stage::Format));
    assert_eq!(session.executed(), vec![Stage::DetectBootMode, Stage::Partition]);
    assert!(runner.commands_matching("mount").is_empty());
    assert!(runner.commands_matching("pacstrap").is_empty());

    let diagnostic = recovery.diagnostic().cloned().unwrap();
    assert_eq!(diagnostic.context, Stage::Format.description());
    assert!(diagnostic.operation.contains("mkfs.ext4"));
    assert!(diagnostic.location.unwrap().file.ends_with("providers.rs"));

    let mut record = minimal_record();
    let outcome = recovery.finish(&mut record, Err(err));
    assert_eq!(outcome.exit_code(), 5);
    assert!(outcome.report().contains("Format partitions failed"));
    assert!(record.user_password.is_none());
    assert!(record.root_password.is_none());
}

#[test]
fn test_cancellation_mid_pipeline() {
    let h = Harness::new(false);
    let runner = RecordingRunner::dry_run().cancel_on("pacstrap");
    let (result, session, mut recovery) = h.run(&runner, &minimal_record(), &[]);

    let err = result.unwrap_err();
    assert!(err.is_cancellation());
    assert_eq!(session.failed_at(), Some(Stage::InstallBase));
    assert!(recovery.diagnostic().is_none());
    assert!(runner.commands_matching("arch-chroot").is_empty());

    let mut record = minimal_record();
    assert_eq!(recovery.finish(&mut record, Err(err)), Outcome::Cancelled);
}

#[test]
fn test_aur_grant_revoked_when_build_fails() {
    let h = Harness::new(false);
    let record = ConfigRecord {
        aur_helper: Some(AurHelper::Yay),
        ..minimal_record()
    };
    let runner = RecordingRunner::dry_run().fail_on("makepkg", 1, "build failed");
    let (result, session, _recovery) = h.run(&runner, &record, &[]);

    assert!(result.is_err());
    assert_eq!(session.failed_at(), Some(Stage::AurHelper));
    assert_eq!(runner.commands_matching("yay-bin.git").len(), 1);
    assert!(!h.target.path(AUR_GRANT_DROPIN).exists());
}

#[test]
fn test_stale_mapping_closed_before_wipe() {
    let h = Harness::new(false);
    fs::write(h.env.host.mapper_dir.join("cryptroot"), b"").unwrap();
    let runner = RecordingRunner::dry_run();
    let (result, _, _recovery) = h.run(&runner, &minimal_record(), &[]);
    result.unwrap();

    let commands = runner.commands();
    assert!(position(&commands, "cryptsetup close cryptroot") < position(&commands, "wipefs"));
}

#[test]
fn test_incomplete_record_runs_nothing() {
    let h = Harness::new(false);
    let record = ConfigRecord {
        keymap: None,
        ..minimal_record()
    };
    let runner = RecordingRunner::dry_run();
    let (result, session, recovery) = h.run(&runner, &record, &[]);

    assert!(result.unwrap_err().is_validation());
    assert!(runner.commands().is_empty());
    assert!(session.history().is_empty());
    assert!(recovery.diagnostic().unwrap().operation.contains("Keyboard layout"));
}
