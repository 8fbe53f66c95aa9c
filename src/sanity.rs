//! Pre-flight sanity checks
//!
//! Verified before any disk is touched:
//! - Running with root privileges (EUID 0)
//! - Every tool the pipeline shells out to is in PATH
//!
//! Dry runs skip these checks; nothing is executed.

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
}

impl SanityCheckResult {
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && self.is_root
    }

    /// One-paragraph description of what failed, for the FATAL record.
    pub fn describe(&self) -> String {
        let mut problems = Vec::new();
        if !self.is_root {
            problems.push("root privileges required (run with sudo or as root)".to_string());
        }
        if !self.missing_binaries.is_empty() {
            let packages: Vec<&str> = self
                .missing_binaries
                .iter()
                .map(|b| package_for_binary(b))
                .collect();
            problems.push(format!(
                "missing binaries: {} (install: pacman -S {})",
                self.missing_binaries.join(", "),
                packages.join(" ")
            ));
        }
        problems.join("; ")
    }
}

/// Tools invoked on the live system during provisioning.
pub const REQUIRED_BINARIES: &[&str] = &[
    "wipefs",
    "parted",
    "mkfs.fat",
    "mkfs.ext4",
    "mount",
    "pacstrap",
    "genfstab",
    "arch-chroot",
    "cryptsetup",
    "blkid",
];

/// Binaries only some configurations need.
const OPTIONAL_BINARIES: &[&str] = &["mkfs.btrfs", "lsblk", "localectl", "curl"];

fn binary_exists(name: &str) -> bool {
    which::which(name).is_ok()
}

fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Check the given binaries and root privileges.
pub fn verify_environment(required: &[&str]) -> SanityCheckResult {
    let missing = required
        .iter()
        .filter(|b| !binary_exists(b))
        .map(|b| (*b).to_string())
        .collect();

    for binary in OPTIONAL_BINARIES {
        if !binary_exists(binary) {
            tracing::debug!("Optional binary not found: {}", binary);
        }
    }

    SanityCheckResult {
        missing_binaries: missing,
        is_root: is_running_as_root(),
    }
}

/// Map binary names to their Arch Linux package names
fn package_for_binary(binary: &str) -> &'static str {
    match binary {
        "wipefs" | "mount" | "blkid" | "lsblk" => "util-linux",
        "parted" => "parted",
        "mkfs.fat" => "dosfstools",
        "mkfs.ext4" => "e2fsprogs",
        "mkfs.btrfs" => "btrfs-progs",
        "pacstrap" | "genfstab" | "arch-chroot" => "arch-install-scripts",
        "cryptsetup" => "cryptsetup",
        "localectl" => "systemd",
        "curl" => "curl",
        _ => "unknown",
    }
}

/// Verify the environment, returning a description of every failure.
pub fn run_preflight_checks() -> Result<(), String> {
    tracing::debug!("Running pre-flight sanity checks...");

    let result = verify_environment(REQUIRED_BINARIES);
    if !result.is_ok() {
        return Err(result.describe());
    }

    tracing::info!("Pre-flight checks passed: root, all binaries present");
    Ok(())
}
