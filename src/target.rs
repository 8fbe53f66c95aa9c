//! Edits of configuration files inside the target root.
//!
//! The text transforms are pure functions over file contents; [`TargetRoot`]
//! applies them to files under the mount point. A missing file is edited as
//! if it were empty, so a transform either finds its anchor or appends.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Static hostname of every installed system.
pub const HOSTNAME: &str = "archlinux";

/// Fallback HOOKS line used when mkinitcpio.conf has none.
const DEFAULT_HOOKS: &str =
    "HOOKS=(base udev autodetect microcode modconf kms keyboard keymap consolefont block encrypt filesystems fsck)";

pub const WHEEL_DROPIN: &str = "etc/sudoers.d/10-wheel";
pub const AUR_GRANT_DROPIN: &str = "etc/sudoers.d/99-aur-build";

// ============================================================================
// Pure transforms
// ============================================================================

/// Uncomment `entries` in locale.gen, appending any that are absent.
pub fn enable_locales(content: &str, entries: &[String]) -> String {
    let mut found = vec![false; entries.len()];
    let mut out = String::with_capacity(content.len());

    for line in content.lines() {
        let bare = line.trim_start().trim_start_matches('#').trim();
        match entries.iter().position(|e| e == bare) {
            Some(idx) => {
                found[idx] = true;
                out.push_str(bare);
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }

    for (entry, seen) in entries.iter().zip(found) {
        if !seen {
            out.push_str(entry);
            out.push('\n');
        }
    }
    out
}

/// Which initramfs the active HOOKS line builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initramfs {
    /// busybox init; unlocks with `encrypt` and `cryptdevice=`
    Busybox,
    /// systemd init; unlocks with `sd-encrypt` and `rd.luks.name=`
    Systemd,
}

impl Initramfs {
    /// Inspect mkinitcpio.conf. Without a HOOKS line the fallback applies.
    pub fn detect(mkinitcpio_conf: &str) -> Self {
        match active_hooks_line(mkinitcpio_conf) {
            Some(line) if hook_names(line).any(|h| h == "systemd") => Self::Systemd,
            _ => Self::Busybox,
        }
    }

    pub fn encrypt_hook(self) -> &'static str {
        match self {
            Self::Busybox => "encrypt",
            Self::Systemd => "sd-encrypt",
        }
    }
}

fn active_hooks_line(content: &str) -> Option<&str> {
    content
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("HOOKS=("))
}

fn hook_names(line: &str) -> impl Iterator<Item = &str> {
    line.trim_start_matches("HOOKS=(")
        .trim_end_matches(')')
        .split_whitespace()
}

/// Put the unlock hook matching the initramfs before `filesystems` in the
/// active HOOKS line.
pub fn insert_encrypt_hook(content: &str) -> String {
    let hook = Initramfs::detect(content).encrypt_hook();
    let mut replaced = false;
    let mut out = String::with_capacity(content.len() + 16);

    for line in content.lines() {
        if !replaced && line.trim_start().starts_with("HOOKS=(") {
            replaced = true;
            out.push_str(&add_hook(line.trim(), hook));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    if !replaced {
        out.push_str(DEFAULT_HOOKS);
        out.push('\n');
    }
    out
}

fn add_hook(line: &str, hook: &'static str) -> String {
    let mut hooks: Vec<&str> = hook_names(line).collect();
    if hooks.contains(&hook) {
        return line.to_string();
    }
    match hooks.iter().position(|h| *h == "filesystems") {
        Some(idx) => hooks.insert(idx, hook),
        None => hooks.push(hook),
    }
    format!("HOOKS=({})", hooks.join(" "))
}

/// Uncomment the `[multilib]` section header and its Include line.
pub fn enable_multilib(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.iter().any(|l| l.trim() == "[multilib]") {
        return ensure_trailing_newline(content);
    }

    let mut out = String::with_capacity(content.len());
    let mut in_block = false;
    let mut enabled = false;
    for line in lines {
        let trimmed = line.trim();
        if !enabled && trimmed == "#[multilib]" {
            in_block = true;
            enabled = true;
            out.push_str("[multilib]\n");
            continue;
        }
        if in_block {
            if let Some(rest) = trimmed.strip_prefix('#').map(str::trim_start) {
                if rest.starts_with("Include") {
                    out.push_str(rest);
                    out.push('\n');
                    in_block = false;
                    continue;
                }
            }
            in_block = false;
        }
        out.push_str(line);
        out.push('\n');
    }

    if !enabled {
        out.push_str("\n[multilib]\nInclude = /etc/pacman.d/mirrorlist\n");
    }
    out
}

/// Append `args` to `GRUB_CMDLINE_LINUX`.
pub fn append_grub_cmdline(content: &str, args: &str) -> String {
    let mut done = false;
    let mut out = String::with_capacity(content.len() + args.len());

    for line in content.lines() {
        if !done && line.starts_with("GRUB_CMDLINE_LINUX=") {
            done = true;
            let current = line
                .trim_start_matches("GRUB_CMDLINE_LINUX=")
                .trim_matches('"')
                .trim();
            if current.is_empty() {
                out.push_str(&format!("GRUB_CMDLINE_LINUX=\"{args}\""));
            } else if current.contains(args) {
                out.push_str(line);
            } else {
                out.push_str(&format!("GRUB_CMDLINE_LINUX=\"{current} {args}\""));
            }
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    if !done {
        out.push_str(&format!("GRUB_CMDLINE_LINUX=\"{args}\"\n"));
    }
    out
}

fn ensure_trailing_newline(content: &str) -> String {
    if content.is_empty() || content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{content}\n")
    }
}

/// How the kernel finds the root filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootDevice<'a> {
    /// LUKS container, unlocked by UUID and mounted through the mapping
    Luks { uuid: &'a str, initramfs: Initramfs },
    Plain { partuuid: &'a str },
}

/// Kernel command line identifying the root device.
pub fn kernel_args(root: RootDevice<'_>) -> String {
    match root {
        RootDevice::Luks { uuid, initramfs: Initramfs::Busybox } => {
            format!("cryptdevice=UUID={uuid}:cryptroot root=/dev/mapper/cryptroot rw")
        }
        RootDevice::Luks { uuid, initramfs: Initramfs::Systemd } => {
            format!("rd.luks.name={uuid}=cryptroot root=/dev/mapper/cryptroot rw")
        }
        RootDevice::Plain { partuuid } => format!("root=PARTUUID={partuuid} rw"),
    }
}

pub fn systemd_boot_loader_conf() -> &'static str {
    "default arch.conf\ntimeout 3\neditor no\n"
}

pub fn systemd_boot_entry(kernel_args: &str) -> String {
    format!(
        "title   Arch Linux\nlinux   /vmlinuz-linux\ninitrd  /initramfs-linux.img\noptions {kernel_args}\n"
    )
}

pub fn hosts_file() -> String {
    format!(
        "127.0.0.1   localhost\n::1         localhost\n127.0.1.1   {HOSTNAME}.localdomain {HOSTNAME}\n"
    )
}

// ============================================================================
// Target root
// ============================================================================

/// The mounted target system.
#[derive(Debug, Clone)]
pub struct TargetRoot {
    root: PathBuf,
}

impl TargetRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute host path of a target-relative path like `etc/hostname`.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel.trim_start_matches('/'))
    }

    pub fn read(&self, rel: &str) -> io::Result<String> {
        match fs::read_to_string(self.path(rel)) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    /// Rewrite `rel` through `transform`.
    pub fn edit(&self, rel: &str, transform: impl FnOnce(&str) -> String) -> io::Result<()> {
        let current = self.read(rel)?;
        self.write(rel, &transform(&current))
    }

    pub fn write(&self, rel: &str, contents: &str) -> io::Result<()> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        tracing::debug!("Wrote {}", path.display());
        Ok(())
    }

    /// Write with an explicit mode (sudoers drop-ins must be 0440).
    pub fn write_mode(&self, rel: &str, contents: &str, mode: u32) -> io::Result<()> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let _ = fs::remove_file(&path);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&path)?;
        file.write_all(contents.as_bytes())?;
        tracing::debug!("Wrote {} (mode {:o})", path.display(), mode);
        Ok(())
    }
}

/// Temporary passwordless package-manager access for the build user.
///
/// Call [`AurGrant::revoke`] once the build is done so a failed removal is
/// reported. Dropping an unrevoked grant still removes the file but can only
/// log a failure.
#[derive(Debug)]
pub struct AurGrant {
    path: Option<PathBuf>,
}

impl AurGrant {
    pub fn new(target: &TargetRoot, user: &str) -> io::Result<Self> {
        target.write_mode(
            AUR_GRANT_DROPIN,
            &format!("{user} ALL=(ALL) NOPASSWD: /usr/bin/pacman\n"),
            0o440,
        )?;
        tracing::info!("Granted {} temporary package-manager access", user);
        Ok(Self {
            path: Some(target.path(AUR_GRANT_DROPIN)),
        })
    }

    pub fn revoke(mut self) -> io::Result<()> {
        match self.path.take() {
            Some(path) => remove_grant(&path),
            None => Ok(()),
        }
    }
}

fn remove_grant(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::info!("Revoked temporary package-manager access");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

impl Drop for AurGrant {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = remove_grant(&path) {
                tracing::error!("Failed to revoke {}: {}", path.display(), e);
            }
        }
    }
}
