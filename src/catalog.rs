//! Host catalogs offered during selection: locales, keymaps, disks.
//!
//! Reading them is harmless, so [`HostCatalog`] always queries the live
//! system, dry run or not.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use walkdir::WalkDir;

use crate::disk::{self, BlockDevice};
use crate::error::{InstallError, Result};
use crate::tools::{CommandRunner, ToolCommand};

/// Entry appended to every derived locale set.
pub const FALLBACK_LOCALE: &str = "en_US.UTF-8 UTF-8";

/// Host paths the catalogs and firmware detection read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub efi_marker: PathBuf,
    pub locale_gen: PathBuf,
    pub locales_dir: PathBuf,
    pub keymaps_dir: PathBuf,
    pub mapper_dir: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            efi_marker: PathBuf::from(crate::hardware::EFI_MARKER),
            locale_gen: PathBuf::from("/etc/locale.gen"),
            locales_dir: PathBuf::from("/usr/share/i18n/locales"),
            keymaps_dir: PathBuf::from("/usr/share/kbd/keymaps"),
            mapper_dir: PathBuf::from("/dev/mapper"),
        }
    }
}

/// Enumerations the selection engine offers.
pub trait SystemCatalog {
    /// Every locale.gen entry (`"en_US.UTF-8 UTF-8"`), enabled or commented.
    fn locale_gen_entries(&self) -> Result<Vec<String>>;
    /// Names of installed locale definitions (`"en_US"`, `"de_DE"`).
    fn locale_definitions(&self) -> Result<Vec<String>>;
    fn keymaps(&self) -> Result<Vec<String>>;
    fn block_devices(&self) -> Result<Vec<BlockDevice>>;
}

pub struct HostCatalog<'r> {
    paths: HostPaths,
    runner: &'r dyn CommandRunner,
}

impl<'r> HostCatalog<'r> {
    pub fn new(paths: HostPaths, runner: &'r dyn CommandRunner) -> Self {
        Self { paths, runner }
    }

    fn keymaps_from_tree(&self) -> Vec<String> {
        let mut maps: Vec<String> = WalkDir::new(&self.paths.keymaps_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".map.gz")
                    .or_else(|| name.strip_suffix(".map"))
                    .map(str::to_string)
            })
            .collect();
        maps.sort();
        maps.dedup();
        maps
    }
}

impl SystemCatalog for HostCatalog<'_> {
    fn locale_gen_entries(&self) -> Result<Vec<String>> {
        let text = fs::read_to_string(&self.paths.locale_gen)?;
        Ok(parse_locale_gen(&text))
    }

    fn locale_definitions(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(&self.paths.locales_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    fn keymaps(&self) -> Result<Vec<String>> {
        let command = ToolCommand::new("localectl").arg("list-keymaps");
        match self.runner.run(&command) {
            Ok(out) if out.success && !out.stdout.trim().is_empty() => {
                Ok(out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
            }
            _ => {
                tracing::debug!("localectl unavailable, scanning {}", self.paths.keymaps_dir.display());
                Ok(self.keymaps_from_tree())
            }
        }
    }

    fn block_devices(&self) -> Result<Vec<BlockDevice>> {
        let command = ToolCommand::new("lsblk").args(["-J", "-d", "-o", "PATH,SIZE,MODEL,TYPE,RO"]);
        let output = self.runner.run(&command)?.ensure_success(&command)?;
        disk::parse_lsblk(&output.stdout)
    }
}

/// Parse locale.gen into normalized `"<locale> <charset>"` entries.
///
/// Comment prose is skipped: an entry has exactly two fields and starts
/// with a lowercase letter (or is a `C.` locale).
pub fn parse_locale_gen(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.lines()
        .filter_map(|line| {
            let bare = line.trim().trim_start_matches('#').trim();
            let fields: Vec<&str> = bare.split_whitespace().collect();
            if fields.len() != 2 {
                return None;
            }
            let name = fields[0];
            let charset = fields[1];
            let name_ok = name.starts_with(|c: char| c.is_ascii_lowercase()) || name.starts_with("C.");
            let charset_ok = charset
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '_');
            (name_ok && charset_ok).then(|| format!("{name} {charset}"))
        })
        .filter(|entry| seen.insert(entry.clone()))
        .collect()
}

/// Locale name without codeset or modifier: `de_DE.UTF-8@euro` -> `de_DE`.
fn locale_base(name: &str) -> &str {
    name.split(['.', '@']).next().unwrap_or(name)
}

/// Languages offered to the operator: locale.gen names whose base has an
/// installed definition.
pub fn candidate_languages(entries: &[String], definitions: &[String]) -> Vec<String> {
    let defined: HashSet<&str> = definitions.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter_map(|entry| entry.split_whitespace().next())
        .filter(|name| defined.contains(locale_base(name)))
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}

/// Every locale.gen entry for the chosen language's prefix, plus the fallback.
pub fn derive_locales(language: &str, entries: &[String]) -> Vec<String> {
    let prefix = locale_base(language);
    let mut derived: Vec<String> = entries
        .iter()
        .filter(|entry| {
            entry
                .split_whitespace()
                .next()
                .is_some_and(|name| locale_base(name) == prefix)
        })
        .cloned()
        .collect();
    if !derived.iter().any(|e| e == FALLBACK_LOCALE) {
        derived.push(FALLBACK_LOCALE.to_string());
    }
    derived
}
