//! Recovery: exit outcomes, diagnostics, and guaranteed cleanup.

use std::path::PathBuf;

use archsetup::config_store::ConfigRecord;
use archsetup::error::InstallError;
use archsetup::recovery::{Outcome, Recovery};
use archsetup::secret::Secret;

fn record_with_secrets() -> ConfigRecord {
    ConfigRecord {
        username: Some("alice".into()),
        user_password: Some(Secret::new("pw")),
        root_password: Some(Secret::new("rpw")),
        ..ConfigRecord::default()
    }
}

fn work_dir_of(recovery: &Recovery) -> PathBuf {
    recovery.work_dir().to_path_buf()
}

#[test]
fn test_success_cleans_up_everything() {
    let dir = tempfile::tempdir().unwrap();
    let mut recovery = Recovery::new(dir.path().join("a.log")).unwrap();
    let work = work_dir_of(&recovery);
    std::fs::write(work.join("key"), "material").unwrap();

    let mut record = record_with_secrets();
    let outcome = recovery.finish(&mut record, Ok(()));

    assert_eq!(outcome, Outcome::Success);
    assert_eq!(outcome.exit_code(), 0);
    assert!(!work.exists());
    assert!(record.user_password.is_none());
    assert!(record.root_password.is_none());
    assert_eq!(record.username.as_deref(), Some("alice"));
}

#[test]
fn test_cancellation_is_reported_distinctly() {
    let dir = tempfile::tempdir().unwrap();
    let mut recovery = Recovery::new(dir.path().join("a.log")).unwrap();
    let work = work_dir_of(&recovery);

    let mut record = record_with_secrets();
    let outcome = recovery.finish(&mut record, Err(InstallError::Cancelled));

    assert_eq!(outcome.exit_code(), 130);
    assert!(outcome.report().contains("cancelled"));
    assert!(!outcome.report().contains("See the full log"));
    assert!(!work.exists());
    assert!(record.user_password.is_none());
}

#[test]
fn test_failure_report_points_at_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("a.log");
    let mut recovery = Recovery::new(&log).unwrap();

    let err = InstallError::external("pacstrap -K /mnt base", Some(3), "mirror unreachable");
    recovery.on_error("Install base system", &err);

    let mut record = record_with_secrets();
    let outcome = recovery.finish(&mut record, Err(err));

    assert_eq!(outcome.exit_code(), 3);
    let report = outcome.report();
    assert!(report.starts_with("Install base system failed: pacstrap -K /mnt base"));
    assert!(report.contains("mirror unreachable"));
    assert!(report.ends_with(&format!("See the full log at {}", log.display())));
}

#[test]
fn test_external_failure_without_code_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let mut recovery = Recovery::new(dir.path().join("a.log")).unwrap();
    let err = InstallError::external("arch-chroot", None, "killed");

    let outcome = recovery.finish(&mut ConfigRecord::default(), Err(err));
    assert_eq!(outcome.exit_code(), 1);
}

#[test]
fn test_later_errors_do_not_replace_the_first() {
    let dir = tempfile::tempdir().unwrap();
    let mut recovery = Recovery::new(dir.path().join("a.log")).unwrap();

    recovery.on_error("Format partitions", &InstallError::external("mkfs.ext4", Some(1), "busy"));
    recovery.on_error("Mount filesystems", &InstallError::external("mount", Some(32), "no fs"));

    let outcome = recovery.finish(
        &mut ConfigRecord::default(),
        Err(InstallError::external("mount", Some(32), "no fs")),
    );
    match outcome {
        Outcome::Failed { code, diagnostic, .. } => {
            assert_eq!(code, 32);
            assert_eq!(diagnostic.unwrap().context, "Format partitions");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn test_work_dirs_are_unique() {
    let dir = tempfile::tempdir().unwrap();
    let a = Recovery::new(dir.path().join("a.log")).unwrap();
    let b = Recovery::new(dir.path().join("a.log")).unwrap();
    assert_ne!(a.work_dir(), b.work_dir());
    assert!(a.work_dir().is_dir());
}
