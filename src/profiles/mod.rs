//! Package, service and config data.
//!
//! Lists are kept in Rust so a typo fails a test instead of a half-finished
//! installation.
//!
//! | Desktop   | Display manager |
//! |-----------|-----------------|
//! | GNOME     | gdm |
//! | KDE       | sddm |
//! | XFCE      | lightdm |
//! | Cinnamon  | lightdm |
//! | Hyprland  | sddm |
//!
//! Package profiles are the baseline list plus `<data-dir>/packages/<profile>.txt`
//! when that file exists, except `Minimal`, which replaces the baseline with
//! a reduced set.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::Result;
use crate::types::{
    AurHelper, BootMode, Bootloader, DesktopEnvironment, Filesystem, GraphicsDriver,
    PackageProfile,
};

/// Base system always passed to pacstrap.
pub const BASE_PACKAGES: &[&str] = &[
    "base",
    "linux",
    "linux-firmware",
    "sudo",
    "networkmanager",
    "vim",
];

/// Base set plus the conditional extras for this storage/boot combination.
pub fn base_packages(fs: Filesystem, mode: BootMode, loader: Bootloader) -> Vec<String> {
    let mut packages: Vec<String> = BASE_PACKAGES.iter().map(|p| p.to_string()).collect();
    if fs == Filesystem::Btrfs {
        packages.push("btrfs-progs".into());
    }
    if mode.is_uefi() && loader == Bootloader::Grub {
        packages.push("efibootmgr".into());
    }
    packages
}

/// What installing one desktop environment means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesktopSpec {
    pub packages: &'static [&'static str],
    /// Enabled with `systemctl enable` in the target.
    pub services: &'static [&'static str],
    /// `(path inside target, contents)` written after the packages.
    pub configs: &'static [(&'static str, &'static str)],
}

const SDDM_BREEZE: (&str, &str) = (
    "etc/sddm.conf.d/10-theme.conf",
    "[Theme]\nCurrent=breeze\n",
);

const LIGHTDM_GTK: (&str, &str) = (
    "etc/lightdm/lightdm.conf.d/50-greeter.conf",
    "[Seat:*]\ngreeter-session=lightdm-gtk-greeter\n",
);

const LIGHTDM_SLICK: (&str, &str) = (
    "etc/lightdm/lightdm.conf.d/50-greeter.conf",
    "[Seat:*]\ngreeter-session=lightdm-slick-greeter\n",
);

/// Package/service/config set for `desktop`, `None` for TTY.
pub fn desktop_spec(desktop: DesktopEnvironment) -> Option<DesktopSpec> {
    let spec = match desktop {
        DesktopEnvironment::Tty => return None,
        DesktopEnvironment::Gnome => DesktopSpec {
            packages: &["gnome", "gnome-tweaks", "gdm", "pipewire", "pipewire-pulse", "firefox"],
            services: &["gdm"],
            configs: &[],
        },
        DesktopEnvironment::Kde => DesktopSpec {
            packages: &[
                "plasma-meta",
                "konsole",
                "dolphin",
                "ark",
                "sddm",
                "pipewire",
                "pipewire-pulse",
                "firefox",
            ],
            services: &["sddm"],
            configs: &[SDDM_BREEZE],
        },
        DesktopEnvironment::Xfce => DesktopSpec {
            packages: &[
                "xfce4",
                "xfce4-goodies",
                "lightdm",
                "lightdm-gtk-greeter",
                "network-manager-applet",
                "pipewire",
                "pipewire-pulse",
                "pavucontrol",
                "firefox",
            ],
            services: &["lightdm"],
            configs: &[LIGHTDM_GTK],
        },
        DesktopEnvironment::Cinnamon => DesktopSpec {
            packages: &[
                "cinnamon",
                "nemo-fileroller",
                "gnome-terminal",
                "lightdm",
                "lightdm-slick-greeter",
                "pipewire",
                "pipewire-pulse",
                "firefox",
            ],
            services: &["lightdm"],
            configs: &[LIGHTDM_SLICK],
        },
        DesktopEnvironment::Hyprland => DesktopSpec {
            packages: &[
                "hyprland",
                "xdg-desktop-portal-hyprland",
                "waybar",
                "kitty",
                "wofi",
                "mako",
                "grim",
                "slurp",
                "wl-clipboard",
                "sddm",
                "pipewire",
                "pipewire-pulse",
                "polkit-kde-agent",
                "noto-fonts",
            ],
            services: &["sddm"],
            configs: &[],
        },
    };
    Some(spec)
}

/// Driver packages; 32-bit userspace is added when multilib is enabled.
pub fn driver_packages(driver: GraphicsDriver, multilib: bool) -> Vec<String> {
    let (native, lib32): (&[&str], &[&str]) = match driver {
        GraphicsDriver::None => (&[], &[]),
        GraphicsDriver::Mesa => (&["mesa"], &["lib32-mesa"]),
        GraphicsDriver::Amd => (
            &["mesa", "xf86-video-amdgpu", "vulkan-radeon"],
            &["lib32-mesa", "lib32-vulkan-radeon"],
        ),
        GraphicsDriver::Intel => (
            &["mesa", "vulkan-intel", "intel-media-driver"],
            &["lib32-mesa", "lib32-vulkan-intel"],
        ),
        GraphicsDriver::Nvidia => (
            &["nvidia", "nvidia-utils", "nvidia-settings"],
            &["lib32-nvidia-utils"],
        ),
        GraphicsDriver::NvidiaOpen => (
            &["nvidia-open", "nvidia-utils", "nvidia-settings"],
            &["lib32-nvidia-utils"],
        ),
        GraphicsDriver::VirtualMachine => (&["mesa", "qemu-guest-agent", "spice-vdagent"], &[]),
    };

    let mut packages: Vec<String> = native.iter().map(|p| p.to_string()).collect();
    if multilib {
        packages.extend(lib32.iter().map(|p| p.to_string()));
    }
    packages
}

/// Installed for every profile except `Minimal`.
pub const BASELINE_PACKAGES: &[&str] = &[
    "git",
    "curl",
    "wget",
    "htop",
    "man-db",
    "man-pages",
    "bash-completion",
    "openssh",
    "unzip",
    "reflector",
];

/// Reduced set installed instead of the baseline for `Minimal`.
pub const MINIMAL_PACKAGES: &[&str] = &["man-db", "openssh"];

/// AUR package a profile asks for once a helper is installed.
pub fn aur_extra(profile: PackageProfile) -> Option<&'static str> {
    match profile {
        PackageProfile::Developer => Some("visual-studio-code-bin"),
        PackageProfile::Gaming => Some("protonup-qt"),
        _ => None,
    }
}

/// Source repository of an AUR helper's prebuilt package.
pub fn aur_helper_repo(helper: AurHelper) -> Option<&'static str> {
    match helper {
        AurHelper::Paru => Some("https://aur.archlinux.org/paru-bin.git"),
        AurHelper::Yay => Some("https://aur.archlinux.org/yay-bin.git"),
        AurHelper::None => None,
    }
}

/// Parse a package list: whitespace-separated names, `#` starts a comment.
pub fn parse_package_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .flat_map(str::split_whitespace)
        .map(str::to_string)
        .collect()
}

/// Read `<data_dir>/packages/<profile>.txt`, or nothing if the file is absent.
pub fn profile_list(data_dir: &Path, profile: PackageProfile) -> Result<Vec<String>> {
    let path = data_dir
        .join("packages")
        .join(format!("{}.txt", profile.to_string().to_lowercase()));
    match fs::read_to_string(&path) {
        Ok(text) => {
            tracing::info!("Using package list {}", path.display());
            Ok(parse_package_list(&text))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("No package list at {}", path.display());
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}
