//! Selection engine tests
//!
//! Every step runs against a scripted prompter, an in-memory catalog and a
//! config file in a temporary directory.

use archsetup::catalog::SystemCatalog;
use archsetup::config_store::{ConfigRecord, ConfigStore, FieldGroup, MASK_TOKEN};
use archsetup::disk::{BlockDevice, parse_lsblk};
use archsetup::error::{InstallError, Result};
use archsetup::prompt::ScriptedPrompter;
use archsetup::providers::Geolocator;
use archsetup::secret::Secret;
use archsetup::selection::{RetryPolicy, SelectionEngine, StepReport};
use archsetup::types::{
    AurHelper, Bootloader, DesktopEnvironment, Filesystem, GraphicsDriver, PackageProfile,
};

// =============================================================================
// Fixtures
// =============================================================================

struct FakeCatalog;

impl SystemCatalog for FakeCatalog {
    fn locale_gen_entries(&self) -> Result<Vec<String>> {
        Ok(vec![
            "en_US.UTF-8 UTF-8".to_string(),
            "en_US ISO-8859-1".to_string(),
            "de_DE.UTF-8 UTF-8".to_string(),
        ])
    }

    fn locale_definitions(&self) -> Result<Vec<String>> {
        Ok(vec!["de_DE".to_string(), "en_US".to_string()])
    }

    fn keymaps(&self) -> Result<Vec<String>> {
        Ok(vec!["de-latin1".to_string(), "us".to_string()])
    }

    fn block_devices(&self) -> Result<Vec<BlockDevice>> {
        parse_lsblk(
            r#"{"blockdevices": [
                {"path": "/dev/sda", "size": "64G", "model": "QEMU HARDDISK", "type": "disk", "ro": false},
                {"path": "/dev/nvme0n1", "size": "512G", "model": "Samsung 980", "type": "disk", "ro": false}
            ]}"#,
        )
    }
}

struct FixedGeo(Option<&'static str>);

impl Geolocator for FixedGeo {
    fn guess_timezone(&self) -> Option<String> {
        self.0.map(str::to_string)
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    store: ConfigStore,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("archsetup.conf"));
    Fixture { _dir: dir, store }
}

fn complete_record() -> ConfigRecord {
    ConfigRecord {
        username: Some("alice".into()),
        user_password: Some(Secret::new("pw")),
        root_password: Some(Secret::new("pw")),
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

/// Answers for a fresh record choosing TTY, then the final confirmation.
const FRESH_TTY_ANSWERS: &[&str] = &[
    "alice",       // username
    "pw",          // password
    "pw",          // password again
    "n",           // separate root password?
    "",            // timezone: accept the guess
    "en_US.UTF-8", // language
    "us",          // keymap
    "1",           // disk by index
    "ext4",
    "grub",
    "n", // encryption
    "TTY",
    "n", // multilib
    "none",
    "Minimal",
    "y", // final confirmation
];

// =============================================================================
// Whole-record resolution
// =============================================================================

#[test]
fn test_fresh_run_resolves_and_persists() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(FRESH_TTY_ANSWERS);
    let mut record = ConfigRecord::default();
    {
        let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(Some("Europe/Berlin")), &fx.store);
        engine.run(&mut record).unwrap();
    }

    assert!(record.is_complete());
    assert_eq!(prompter.prompts_shown(), FRESH_TTY_ANSWERS.len());
    assert_eq!(prompter.remaining(), 0);

    assert_eq!(record.timezone.as_deref(), Some("Europe/Berlin"));
    assert_eq!(record.disk.as_deref(), Some("/dev/sda"));
    assert_eq!(record.boot_partition.as_deref(), Some("/dev/sda1"));
    assert_eq!(record.root_partition.as_deref(), Some("/dev/sda2"));
    assert_eq!(
        record.locales,
        Some(vec!["en_US.UTF-8 UTF-8".to_string(), "en_US ISO-8859-1".to_string()])
    );
    assert_eq!(record.root_password, record.user_password);
    assert_eq!(record.desktop_enabled, Some(false));

    let persisted = std::fs::read_to_string(fx.store.path()).unwrap();
    assert!(persisted.contains("USERNAME='alice'"));
    assert!(persisted.contains(&format!("USER_PASSWORD='{MASK_TOKEN}'")));
    assert!(!persisted.contains("'pw'"));
}

#[test]
fn test_resolved_record_prompts_nothing() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(Vec::<String>::new());
    let mut record = complete_record();
    let before = record.clone();

    let reports = {
        let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);
        engine.resolve_all(&mut record).unwrap()
    };

    assert_eq!(prompter.prompts_shown(), 0);
    assert_eq!(record, before);
    assert_eq!(reports.len(), 15);
    for (field, report) in reports {
        let expected = if field == FieldGroup::GraphicsDriver {
            StepReport::NotApplicable
        } else {
            StepReport::Kept
        };
        assert_eq!(report, expected, "{field}");
    }
}

#[test]
fn test_exhausted_answers_are_a_prompt_error() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["alice"]);
    let mut record = ConfigRecord::default();
    let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);

    let err = engine.run(&mut record).unwrap_err();
    assert!(matches!(err, InstallError::Prompt(_)), "{err:?}");
    assert_eq!(record.username.as_deref(), Some("alice"));
}

// =============================================================================
// Password rule
// =============================================================================

#[test]
fn test_password_mismatch_exhausts_bounded_retries() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["secret", "secreT"]);
    let mut record = ConfigRecord::default();
    let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store)
        .with_policy(RetryPolicy { max_attempts: Some(1) });

    let err = engine.user_password(&mut record).unwrap_err();
    assert!(matches!(err, InstallError::RetriesExhausted { attempts: 1, .. }), "{err:?}");
    assert!(record.user_password.is_none());
}

#[test]
fn test_password_mismatch_reprompts() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["a", "b", "", "", "c", "c"]);
    let mut record = ConfigRecord::default();
    {
        let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);
        assert_eq!(engine.user_password(&mut record).unwrap(), StepReport::Resolved);
    }
    assert_eq!(record.user_password.as_ref().map(|s| s.expose()), Some("c"));
    assert_eq!(prompter.prompts_shown(), 6);
}

#[test]
fn test_separate_root_password() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["y", "toor", "toor"]);
    let mut record = ConfigRecord {
        user_password: Some(Secret::new("pw")),
        ..Default::default()
    };
    let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);

    engine.root_password(&mut record).unwrap();
    assert_eq!(record.root_password.as_ref().map(|s| s.expose()), Some("toor"));
}

// =============================================================================
// Desktop branch
// =============================================================================

#[test]
fn test_tty_disables_desktop() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["tty"]);
    let mut record = ConfigRecord {
        graphics_driver: Some(GraphicsDriver::Nvidia),
        ..Default::default()
    };
    let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);

    engine.desktop(&mut record).unwrap();
    assert_eq!(record.desktop_enabled, Some(false));
    assert_eq!(record.desktop_environment, Some(DesktopEnvironment::Tty));
    assert_eq!(record.graphics_driver, None);
    assert_eq!(engine.graphics_driver(&mut record).unwrap(), StepReport::NotApplicable);
}

#[test]
fn test_named_desktop_enables_desktop_and_driver_defaults_to_mesa() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["KDE", ""]);
    let mut record = ConfigRecord::default();
    let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);

    engine.desktop(&mut record).unwrap();
    assert_eq!(record.desktop_enabled, Some(true));
    assert_eq!(record.desktop_environment, Some(DesktopEnvironment::Kde));

    assert_eq!(engine.graphics_driver(&mut record).unwrap(), StepReport::Resolved);
    assert_eq!(record.graphics_driver, Some(GraphicsDriver::Mesa));
}

// =============================================================================
// Interrupts
// =============================================================================

#[test]
fn test_interrupt_then_decline_reprompts() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["^C", "n", "bob"]);
    let mut record = ConfigRecord::default();
    {
        let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);
        assert_eq!(engine.username(&mut record).unwrap(), StepReport::Resolved);
    }
    assert_eq!(record.username.as_deref(), Some("bob"));
    assert_eq!(prompter.headers(), ["Username", "Cancel installation?", "Username"]);
}

#[test]
fn test_declined_cancel_does_not_spend_an_attempt() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["^C", "n", "^C", "n", "bob"]);
    let mut record = ConfigRecord::default();
    {
        let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store)
            .with_policy(RetryPolicy { max_attempts: Some(1) });
        assert_eq!(engine.username(&mut record).unwrap(), StepReport::Resolved);
    }
    assert_eq!(record.username.as_deref(), Some("bob"));
}

#[test]
fn test_declined_cancel_repeats_only_the_interrupted_entry() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["pw", "^C", "n", "pw"]);
    let mut record = ConfigRecord::default();
    {
        let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store)
            .with_policy(RetryPolicy { max_attempts: Some(1) });
        assert_eq!(engine.user_password(&mut record).unwrap(), StepReport::Resolved);
    }
    assert_eq!(record.user_password.as_ref().map(|s| s.expose()), Some("pw"));
}

#[test]
fn test_interrupt_then_confirm_cancels() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["^C", "y"]);
    let mut record = ConfigRecord::default();
    let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);

    let err = engine.username(&mut record).unwrap_err();
    assert!(err.is_cancellation());
    assert!(record.username.is_none());
}

#[test]
fn test_second_interrupt_cancels() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["^C", "^C"]);
    let mut record = ConfigRecord::default();
    let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);

    assert!(engine.timezone(&mut record).unwrap_err().is_cancellation());
}

#[test]
fn test_interrupt_at_final_confirmation_cancels_immediately() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["^C", "n"]);
    let mut record = complete_record();
    {
        let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);
        assert!(engine.run(&mut record).unwrap_err().is_cancellation());
    }
    // the "n" is never consumed
    assert_eq!(prompter.remaining(), 1);
}

// =============================================================================
// Field rules
// =============================================================================

#[test]
fn test_invalid_timezone_reprompts() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["Mars/Olympus_Mons", "Europe/Paris"]);
    let mut record = ConfigRecord::default();
    let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);

    engine.timezone(&mut record).unwrap();
    assert_eq!(record.timezone.as_deref(), Some("Europe/Paris"));
}

#[test]
fn test_timezone_defaults_to_utc_without_guess() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new([""]);
    let mut record = ConfigRecord::default();
    let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);

    engine.timezone(&mut record).unwrap();
    assert_eq!(record.timezone.as_deref(), Some("UTC"));
}

#[test]
fn test_nvme_disk_by_path() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["/dev/sdz", "/dev/nvme0n1"]);
    let mut record = ConfigRecord::default();
    let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);

    engine.disk(&mut record).unwrap();
    assert_eq!(record.boot_partition.as_deref(), Some("/dev/nvme0n1p1"));
    assert_eq!(record.root_partition.as_deref(), Some("/dev/nvme0n1p2"));
}

#[test]
fn test_unknown_enum_answer_reprompts() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["zfs", "", "2"]);
    let mut record = ConfigRecord::default();
    {
        let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);
        engine.filesystem(&mut record).unwrap();
    }
    assert_eq!(record.filesystem, Some(Filesystem::Btrfs));
    assert_eq!(prompter.prompts_shown(), 3);
}

#[test]
fn test_saved_language_and_keymap_are_checked_against_catalog() {
    let fx = fixture();
    std::fs::write(
        fx.store.path(),
        "LANGUAGE='xx_XX.UTF-8'\nLOCALES=('xx_XX.UTF-8 UTF-8')\nKEYMAP='colemak-nowhere'\n",
    )
    .unwrap();
    let mut record = fx.store.load().unwrap().unwrap();
    let mut prompter = ScriptedPrompter::new(["de_DE.UTF-8", "de-latin1"]);
    {
        let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);
        assert_eq!(engine.language(&mut record).unwrap(), StepReport::Resolved);
        assert_eq!(engine.keymap(&mut record).unwrap(), StepReport::Resolved);
    }
    assert_eq!(record.language.as_deref(), Some("de_DE.UTF-8"));
    assert_eq!(
        record.locales,
        Some(vec!["de_DE.UTF-8 UTF-8".to_string(), "en_US.UTF-8 UTF-8".to_string()])
    );
    assert_eq!(record.keymap.as_deref(), Some("de-latin1"));
}

#[test]
fn test_saved_partitions_follow_saved_disk() {
    let fx = fixture();
    std::fs::write(
        fx.store.path(),
        "DISK='/dev/nvme0n1'\nBOOT_PARTITION='/dev/sda1'\nROOT_PARTITION='/dev/sda2'\n",
    )
    .unwrap();
    let mut record = fx.store.load().unwrap().unwrap();
    let mut prompter = ScriptedPrompter::new(Vec::<&str>::new());
    let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);

    assert_eq!(engine.disk(&mut record).unwrap(), StepReport::Kept);
    assert_eq!(record.boot_partition.as_deref(), Some("/dev/nvme0n1p1"));
    assert_eq!(record.root_partition.as_deref(), Some("/dev/nvme0n1p2"));
}

// =============================================================================
// Final confirmation
// =============================================================================

#[test]
fn test_declining_summary_reconfigures_one_field() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["n", "Filesystem", "btrfs", "y"]);
    let mut record = complete_record();
    {
        let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);
        engine.run(&mut record).unwrap();
    }
    assert_eq!(record.filesystem, Some(Filesystem::Btrfs));
    assert_eq!(record.username.as_deref(), Some("alice"));
    assert_eq!(prompter.remaining(), 0);

    let reloaded = fx.store.load().unwrap().unwrap();
    assert_eq!(reloaded.filesystem, Some(Filesystem::Btrfs));
}

#[test]
fn test_reconfiguring_disk_clears_partitions() {
    let fx = fixture();
    let mut prompter = ScriptedPrompter::new(["n", "Disk", "/dev/nvme0n1", "y"]);
    let mut record = complete_record();
    {
        let mut engine = SelectionEngine::new(&mut prompter, &FakeCatalog, &FixedGeo(None), &fx.store);
        engine.run(&mut record).unwrap();
    }
    assert_eq!(record.disk.as_deref(), Some("/dev/nvme0n1"));
    assert_eq!(record.root_partition.as_deref(), Some("/dev/nvme0n1p2"));
}
