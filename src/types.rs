//! Type-safe configuration types for archsetup
//!
//! Every closed enumeration the selection engine offers lives here. The
//! `Display` strings are what the persisted configuration stores and what
//! the operator sees; parsing is case-insensitive so scripted answers do not
//! have to match capitalization.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Boot firmware mode of the running system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum BootMode {
    /// UEFI firmware: GPT + EFI system partition
    #[strum(serialize = "UEFI")]
    Uefi,
    /// Legacy BIOS firmware: MBR + boot flag
    #[strum(serialize = "BIOS")]
    Bios,
}

impl BootMode {
    pub fn is_uefi(self) -> bool {
        matches!(self, Self::Uefi)
    }
}

/// Root filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum Filesystem {
    #[strum(serialize = "ext4")]
    Ext4,
    #[strum(serialize = "btrfs")]
    Btrfs,
}

/// Bootloader selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum Bootloader {
    #[strum(serialize = "grub")]
    Grub,
    #[strum(serialize = "systemd-boot")]
    SystemdBoot,
}

/// Desktop environment selection.
///
/// `Tty` is the none-variant: choosing it records the name and turns the
/// desktop flag off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum DesktopEnvironment {
    #[strum(serialize = "TTY")]
    Tty,
    #[strum(serialize = "GNOME")]
    Gnome,
    #[strum(serialize = "KDE")]
    Kde,
    #[strum(serialize = "XFCE")]
    Xfce,
    #[strum(serialize = "Cinnamon")]
    Cinnamon,
    #[strum(serialize = "Hyprland")]
    Hyprland,
}

impl DesktopEnvironment {
    /// Whether this choice installs a graphical environment at all.
    pub fn is_graphical(self) -> bool {
        !matches!(self, Self::Tty)
    }
}

/// Graphics driver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum GraphicsDriver {
    /// Baseline open-source stack, used when the answer is empty
    #[default]
    #[strum(serialize = "mesa")]
    Mesa,
    #[strum(serialize = "amd")]
    Amd,
    #[strum(serialize = "intel")]
    Intel,
    #[strum(serialize = "nvidia")]
    Nvidia,
    #[strum(serialize = "nvidia-open")]
    NvidiaOpen,
    /// Guest additions for virtual machines
    #[strum(serialize = "vm")]
    VirtualMachine,
    #[strum(serialize = "none")]
    None,
}

/// AUR helper selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum AurHelper {
    #[strum(serialize = "paru")]
    Paru,
    #[strum(serialize = "yay")]
    Yay,
    #[strum(serialize = "none")]
    None,
}

impl AurHelper {
    pub fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

/// Package profile selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum PackageProfile {
    /// Small fixed set instead of the baseline
    #[strum(serialize = "Minimal")]
    Minimal,
    #[strum(serialize = "Standard")]
    Standard,
    #[strum(serialize = "Developer")]
    Developer,
    #[strum(serialize = "Gaming")]
    Gaming,
    /// Baseline plus a free-form list typed by the operator
    #[strum(serialize = "Custom")]
    Custom,
}

/// Display names of every variant, in declaration order.
pub fn variant_names<E: IntoEnumIterator + ToString>() -> Vec<String> {
    E::iter().map(|v| v.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_boot_mode_serialization() {
        assert_eq!(BootMode::Uefi.to_string(), "UEFI");
        assert_eq!(BootMode::Bios.to_string(), "BIOS");
        assert_eq!(BootMode::from_str("uefi").unwrap(), BootMode::Uefi);
    }

    #[test]
    fn test_desktop_none_variant() {
        assert_eq!(DesktopEnvironment::Tty.to_string(), "TTY");
        assert!(!DesktopEnvironment::Tty.is_graphical());
        assert!(DesktopEnvironment::Kde.is_graphical());
    }

    #[test]
    fn test_case_insensitive_parsing() {
        assert_eq!(Bootloader::from_str("Systemd-Boot").unwrap(), Bootloader::SystemdBoot);
        assert_eq!(PackageProfile::from_str("minimal").unwrap(), PackageProfile::Minimal);
        assert_eq!(GraphicsDriver::from_str("NVIDIA-OPEN").unwrap(), GraphicsDriver::NvidiaOpen);
        assert!(Filesystem::from_str("xfs").is_err());
    }

    #[test]
    fn test_enumerations_are_closed() {
        assert_eq!(variant_names::<Filesystem>(), vec!["ext4", "btrfs"]);
        assert_eq!(variant_names::<Bootloader>(), vec!["grub", "systemd-boot"]);
        assert!(variant_names::<AurHelper>().contains(&"none".to_string()));
    }

    #[test]
    fn test_graphics_driver_default_is_baseline() {
        assert_eq!(GraphicsDriver::default(), GraphicsDriver::Mesa);
    }
}
