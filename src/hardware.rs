//! Hardware environment detection
//!
//! Boot firmware mode and network connectivity, both detected without
//! shelling out.
//!
//! - Firmware: the kernel exposes `/sys/firmware/efi` only when booted in
//!   UEFI mode. The marker path is a parameter so tests can point it at a
//!   temporary directory.
//! - Network: a TCP connect with a short timeout. ICMP is often filtered and
//!   would need an external `ping`.

use std::fmt;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use crate::types::{BootMode, Bootloader};

/// Default firmware-interface marker on a running Linux system.
pub const EFI_MARKER: &str = "/sys/firmware/efi";

/// Probe endpoint: archlinux.org HTTPS.
const PROBE_HOST: &str = "archlinux.org:443";
/// Used when DNS is unavailable but routing may still work.
const PROBE_FALLBACK: &str = "95.217.163.246:443";

/// Network connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Online,
    Offline,
}

impl NetworkState {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "Online"),
            Self::Offline => write!(f, "Offline"),
        }
    }
}

/// UEFI if the firmware-interface marker exists, legacy BIOS otherwise.
pub fn detect_boot_mode(efi_marker: &Path) -> BootMode {
    if efi_marker.exists() {
        tracing::info!("UEFI firmware detected ({} exists)", efi_marker.display());
        BootMode::Uefi
    } else {
        tracing::info!("BIOS firmware detected ({} not found)", efi_marker.display());
        BootMode::Bios
    }
}

/// Bootloader that will actually be installed for this firmware.
///
/// systemd-boot needs an EFI system partition; on BIOS machines GRUB is
/// installed to the raw disk whatever the operator picked.
pub fn effective_bootloader(mode: BootMode, choice: Bootloader) -> Bootloader {
    match (mode, choice) {
        (BootMode::Bios, Bootloader::SystemdBoot) => {
            tracing::warn!("systemd-boot requires UEFI; installing GRUB for BIOS instead");
            Bootloader::Grub
        }
        (_, choice) => choice,
    }
}

/// Detect connectivity via a TCP connection to archlinux.org.
///
/// Any failure (DNS, timeout, refusal) reports `Offline`.
pub fn detect_internet(timeout: Duration) -> NetworkState {
    let mut candidates: Vec<SocketAddr> = PROBE_HOST
        .to_socket_addrs()
        .map(|addrs| addrs.collect())
        .unwrap_or_default();
    if let Ok(addr) = PROBE_FALLBACK.parse() {
        candidates.push(addr);
    }

    for addr in &candidates {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(_stream) => {
                tracing::info!("Network connectivity confirmed (TCP to {})", addr);
                return NetworkState::Online;
            }
            Err(e) => tracing::debug!("Connectivity probe to {} failed: {}", addr, e),
        }
    }

    tracing::warn!("Network connectivity check failed, continuing offline");
    NetworkState::Offline
}
