//! Persisted installation configuration.
//!
//! [`ConfigRecord`] is the single source of truth the selection engine fills
//! in and the pipeline reads. Every field is `None` until a selection step
//! has validated it. [`ConfigStore`] writes the record as newline-delimited
//! `KEY='value'` assignments that a shell can source directly:
//!
//! ```text
//! USERNAME='alice'
//! USER_PASSWORD='********'
//! LOCALES=('en_US.UTF-8 UTF-8' 'en_US ISO-8859-1')
//! ENCRYPTION='false'
//! ```
//!
//! Secret fields are always written as [`MASK_TOKEN`], whatever their value.
//!
//! # Known limitation
//!
//! `save` rewrites the file in place. A crash in the middle of a write can
//! leave a truncated file behind; the next `load` then either reports a
//! `ConfigLoad` error (start fresh) or imports the fields that survived.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use strum::{Display, EnumIter, IntoStaticStr};

use crate::disk::partition_names;
use crate::error::{InstallError, Result};
use crate::secret::Secret;
use crate::types::{
    AurHelper, Bootloader, DesktopEnvironment, Filesystem, GraphicsDriver, PackageProfile,
};

/// Placeholder written for every secret field.
pub const MASK_TOKEN: &str = "********";

/// The configuration being built for this run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigRecord {
    // Identity
    pub username: Option<String>,
    pub user_password: Option<Secret>,
    pub root_password: Option<Secret>,

    // Locale
    pub timezone: Option<String>,
    pub language: Option<String>,
    pub locales: Option<Vec<String>>,
    pub keymap: Option<String>,

    // Storage
    pub disk: Option<String>,
    pub boot_partition: Option<String>,
    pub root_partition: Option<String>,
    pub filesystem: Option<Filesystem>,
    pub bootloader: Option<Bootloader>,
    pub encryption: Option<bool>,

    // Features
    pub desktop_enabled: Option<bool>,
    pub desktop_environment: Option<DesktopEnvironment>,
    pub graphics_driver: Option<GraphicsDriver>,
    pub multilib: Option<bool>,
    pub aur_helper: Option<AurHelper>,
    pub profile: Option<PackageProfile>,
}

/// Field groups resolved by one selection step each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
pub enum FieldGroup {
    #[strum(serialize = "Username")]
    Username,
    #[strum(serialize = "User password")]
    UserPassword,
    #[strum(serialize = "Root password")]
    RootPassword,
    #[strum(serialize = "Timezone")]
    Timezone,
    #[strum(serialize = "Language")]
    Language,
    #[strum(serialize = "Keyboard layout")]
    Keymap,
    #[strum(serialize = "Disk")]
    Disk,
    #[strum(serialize = "Filesystem")]
    Filesystem,
    #[strum(serialize = "Bootloader")]
    Bootloader,
    #[strum(serialize = "Encryption")]
    Encryption,
    #[strum(serialize = "Desktop environment")]
    Desktop,
    #[strum(serialize = "Graphics driver")]
    GraphicsDriver,
    #[strum(serialize = "Multilib")]
    Multilib,
    #[strum(serialize = "AUR helper")]
    AurHelper,
    #[strum(serialize = "Package profile")]
    Profile,
}

impl FieldGroup {
    /// Reset every field this group owns to unresolved.
    pub fn clear(self, record: &mut ConfigRecord) {
        match self {
            Self::Username => record.username = None,
            Self::UserPassword => {
                record.user_password = None;
                // an inherited root password must follow the user password
                record.root_password = None;
            }
            Self::RootPassword => record.root_password = None,
            Self::Timezone => record.timezone = None,
            Self::Language => {
                record.language = None;
                record.locales = None;
            }
            Self::Keymap => record.keymap = None,
            Self::Disk => {
                record.disk = None;
                record.boot_partition = None;
                record.root_partition = None;
            }
            Self::Filesystem => record.filesystem = None,
            Self::Bootloader => record.bootloader = None,
            Self::Encryption => record.encryption = None,
            Self::Desktop => {
                record.desktop_enabled = None;
                record.desktop_environment = None;
                record.graphics_driver = None;
            }
            Self::GraphicsDriver => record.graphics_driver = None,
            Self::Multilib => record.multilib = None,
            Self::AurHelper => record.aur_helper = None,
            Self::Profile => record.profile = None,
        }
    }

    /// Whether this group currently holds a resolved value.
    pub fn is_resolved(self, record: &ConfigRecord) -> bool {
        match self {
            Self::Username => record.username.is_some(),
            Self::UserPassword => record.user_password.is_some(),
            Self::RootPassword => record.root_password.is_some(),
            Self::Timezone => record.timezone.is_some(),
            Self::Language => record.language.is_some() && record.locales.is_some(),
            Self::Keymap => record.keymap.is_some(),
            Self::Disk => {
                record.disk.is_some()
                    && record.boot_partition.is_some()
                    && record.root_partition.is_some()
            }
            Self::Filesystem => record.filesystem.is_some(),
            Self::Bootloader => record.bootloader.is_some(),
            Self::Encryption => record.encryption.is_some(),
            Self::Desktop => {
                record.desktop_enabled.is_some() && record.desktop_environment.is_some()
            }
            // only required once a desktop is chosen
            Self::GraphicsDriver => {
                record.desktop_enabled != Some(true) || record.graphics_driver.is_some()
            }
            Self::Multilib => record.multilib.is_some(),
            Self::AurHelper => record.aur_helper.is_some(),
            Self::Profile => record.profile.is_some(),
        }
    }
}

impl ConfigRecord {
    /// Groups that still need a selection step.
    pub fn missing(&self) -> Vec<FieldGroup> {
        use strum::IntoEnumIterator;
        FieldGroup::iter().filter(|g| !g.is_resolved(self)).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Drop both passwords, zeroing their buffers.
    pub fn scrub_secrets(&mut self) {
        if let Some(mut pw) = self.user_password.take() {
            pw.scrub();
        }
        if let Some(mut pw) = self.root_password.take() {
            pw.scrub();
        }
    }

    /// Serialize as sourceable `KEY='value'` lines.
    pub fn to_persisted(&self) -> String {
        let mut out = String::from("# archsetup configuration\n");
        let mut scalar = |key: &str, value: Option<String>| {
            out.push_str(&format!("{key}={}\n", quote(value.as_deref().unwrap_or(""))));
        };

        scalar("USERNAME", self.username.clone());
        scalar("USER_PASSWORD", Some(MASK_TOKEN.to_string()));
        scalar("ROOT_PASSWORD", Some(MASK_TOKEN.to_string()));
        scalar("TIMEZONE", self.timezone.clone());
        scalar("LANGUAGE", self.language.clone());
        scalar("KEYMAP", self.keymap.clone());
        scalar("DISK", self.disk.clone());
        scalar("BOOT_PARTITION", self.boot_partition.clone());
        scalar("ROOT_PARTITION", self.root_partition.clone());
        scalar("FILESYSTEM", self.filesystem.map(|v| v.to_string()));
        scalar("BOOTLOADER", self.bootloader.map(|v| v.to_string()));
        scalar("ENCRYPTION", self.encryption.map(|v| v.to_string()));
        scalar("DESKTOP", self.desktop_enabled.map(|v| v.to_string()));
        scalar("DESKTOP_ENVIRONMENT", self.desktop_environment.map(|v| v.to_string()));
        scalar("GRAPHICS_DRIVER", self.graphics_driver.map(|v| v.to_string()));
        scalar("MULTILIB", self.multilib.map(|v| v.to_string()));
        scalar("AUR_HELPER", self.aur_helper.map(|v| v.to_string()));
        scalar("PROFILE", self.profile.map(|v| v.to_string()));

        let locales = self
            .locales
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|l| quote(l))
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!("LOCALES=({locales})\n"));
        out
    }

    /// Parse the persisted form.
    ///
    /// Unknown keys are ignored. Values that fail their field's rule are
    /// dropped so the field stays unresolved. Masked secrets are never
    /// imported as passwords.
    pub fn from_persisted(text: &str) -> Result<Self> {
        let mut record = Self::default();

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim_start();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                tracing::warn!("Ignoring malformed config line {}", lineno + 1);
                continue;
            };
            let key = key.trim();

            if key == "LOCALES" {
                let inner = value
                    .trim()
                    .strip_prefix('(')
                    .and_then(|v| v.strip_suffix(')'))
                    .ok_or_else(|| {
                        InstallError::config_load(format!(
                            "line {}: LOCALES must be a parenthesized list",
                            lineno + 1
                        ))
                    })?;
                let items = split_words(inner, lineno)?;
                record.locales = (!items.is_empty()).then_some(items);
                continue;
            }

            let words = split_words(value, lineno)?;
            let value = words.join(" ");
            if value.is_empty() {
                continue;
            }

            match key {
                "USERNAME" => record.username = Some(value),
                "USER_PASSWORD" | "ROOT_PASSWORD" => {
                    if value != MASK_TOKEN {
                        tracing::warn!("Ignoring cleartext {} in persisted config", key);
                    }
                }
                "TIMEZONE" => {
                    if chrono_tz::Tz::from_str(&value).is_ok() {
                        record.timezone = Some(value);
                    } else {
                        tracing::warn!("Ignoring unknown timezone '{}'", value);
                    }
                }
                "LANGUAGE" => record.language = Some(value),
                "KEYMAP" => record.keymap = Some(value),
                "DISK" => record.disk = Some(value),
                "BOOT_PARTITION" => record.boot_partition = Some(value),
                "ROOT_PARTITION" => record.root_partition = Some(value),
                "FILESYSTEM" => record.filesystem = parse_field(key, &value),
                "BOOTLOADER" => record.bootloader = parse_field(key, &value),
                "ENCRYPTION" => record.encryption = parse_field(key, &value),
                "DESKTOP" => record.desktop_enabled = parse_field(key, &value),
                "DESKTOP_ENVIRONMENT" => record.desktop_environment = parse_field(key, &value),
                "GRAPHICS_DRIVER" => record.graphics_driver = parse_field(key, &value),
                "MULTILIB" => record.multilib = parse_field(key, &value),
                "AUR_HELPER" => record.aur_helper = parse_field(key, &value),
                "PROFILE" => record.profile = parse_field(key, &value),
                other => tracing::debug!("Ignoring unknown config key {}", other),
            }
        }

        record.derive_partitions();
        Ok(record)
    }

    /// Partition names always follow from the disk; stored ones are only
    /// checked against it.
    fn derive_partitions(&mut self) {
        let Some(disk) = &self.disk else {
            if self.boot_partition.is_some() || self.root_partition.is_some() {
                tracing::warn!("Ignoring partitions persisted without a disk");
            }
            self.boot_partition = None;
            self.root_partition = None;
            return;
        };
        let layout = partition_names(disk);
        for (key, stored, derived) in [
            ("BOOT_PARTITION", &mut self.boot_partition, layout.boot),
            ("ROOT_PARTITION", &mut self.root_partition, layout.root),
        ] {
            if let Some(old) = stored.as_deref() {
                if old != derived {
                    tracing::warn!("{} '{}' does not belong to {}, using {}", key, old, disk, derived);
                }
            }
            *stored = Some(derived);
        }
    }
}

/// Single-quote `value` for a POSIX shell.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn split_words(value: &str, lineno: usize) -> Result<Vec<String>> {
    shell_words::split(value)
        .map_err(|e| InstallError::config_load(format!("line {}: {}", lineno + 1, e)))
}

fn parse_field<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid {} value '{}'", key, value);
            None
        }
    }
}

/// Reads and writes the persisted configuration file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the prior record.
    ///
    /// Returns `Ok(None)` when no file exists. An unreadable or corrupt file
    /// is a `ConfigLoad` error; callers treat it as "start fresh".
    pub fn load(&self) -> Result<Option<ConfigRecord>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(InstallError::config_load(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        let record = ConfigRecord::from_persisted(&text)?;
        tracing::info!("Loaded configuration from {}", self.path.display());
        Ok(Some(record))
    }

    /// The prior record, or an empty one when there is none or it is unreadable.
    pub fn load_or_default(&self) -> ConfigRecord {
        match self.load() {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::info!("No saved configuration at {}, starting fresh", self.path.display());
                ConfigRecord::default()
            }
            Err(e) => {
                tracing::warn!("{}; starting fresh", e);
                ConfigRecord::default()
            }
        }
    }

    /// Overwrite the persisted record with `record`.
    pub fn save(&self, record: &ConfigRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, record.to_persisted())?;
        tracing::debug!("Saved configuration to {}", self.path.display());
        Ok(())
    }
}
