//! Configuration selection.
//!
//! One step per field group. Every step follows the same contract:
//!
//! 1. Already resolved: report the value and return [`StepReport::Kept`]
//!    without prompting.
//! 2. Otherwise prompt, validate, and on success write the field(s) and save
//!    the whole record.
//!
//! A rejected answer is a `Validation` error that the [`retry`] combinator
//! turns into a re-prompt, bounded by [`RetryPolicy`]. An interrupt at a
//! prompt asks whether to cancel the whole installation; declining asks the
//! same question again.
//!
//! [`retry`]: SelectionEngine::retry

use std::str::FromStr;

use strum::IntoEnumIterator;

use crate::catalog::{SystemCatalog, candidate_languages, derive_locales};
use crate::config_store::{ConfigRecord, ConfigStore, FieldGroup, MASK_TOKEN};
use crate::disk::partition_names;
use crate::error::{InstallError, Result};
use crate::prompt::{Prompt, PromptError, PromptResult, Prompter, match_option};
use crate::providers::Geolocator;
use crate::secret::Secret;
use crate::types::{
    AurHelper, Bootloader, DesktopEnvironment, Filesystem, GraphicsDriver, PackageProfile,
    variant_names,
};

/// Timezone offered when geolocation has no answer.
pub const DEFAULT_TIMEZONE: &str = "UTC";

const START_OVER: &str = "Start over";

/// What a selection step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepReport {
    /// The field already held a valid value; nothing was asked.
    Kept,
    /// The operator answered and the record was saved.
    Resolved,
    /// The field does not apply to this configuration.
    NotApplicable,
}

/// How many invalid answers a step tolerates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` re-prompts until a valid answer or cancellation.
    pub max_attempts: Option<u32>,
}

pub struct SelectionEngine<'a> {
    prompter: &'a mut dyn Prompter,
    catalog: &'a dyn SystemCatalog,
    geolocator: &'a dyn Geolocator,
    store: &'a ConfigStore,
    policy: RetryPolicy,
}

impl<'a> SelectionEngine<'a> {
    pub fn new(
        prompter: &'a mut dyn Prompter,
        catalog: &'a dyn SystemCatalog,
        geolocator: &'a dyn Geolocator,
        store: &'a ConfigStore,
    ) -> Self {
        Self {
            prompter,
            catalog,
            geolocator,
            store,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    // ========================================================================
    // Combinators
    // ========================================================================

    /// Re-run `step` while it fails validation.
    fn retry<T>(&mut self, label: &str, mut step: impl FnMut(&mut Self) -> Result<T>) -> Result<T> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match step(self) {
                Err(InstallError::Validation(msg)) => {
                    tracing::warn!("{}: {}", label, msg);
                    if self.policy.max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(InstallError::RetriesExhausted {
                            field: label.to_string(),
                            attempts,
                        });
                    }
                }
                other => return other,
            }
        }
    }

    /// Run one prompt, routing an interrupt to the cancel confirmation.
    ///
    /// Declining the cancellation repeats the same prompt. That is not an
    /// invalid answer and does not count against [`RetryPolicy`].
    fn ask<T>(&mut self, mut f: impl FnMut(&mut dyn Prompter) -> PromptResult<T>) -> Result<T> {
        loop {
            match f(&mut *self.prompter) {
                Ok(value) => return Ok(value),
                Err(PromptError::Interrupted) => {
                    if self.confirm_cancel()? {
                        return Err(InstallError::Cancelled);
                    }
                    tracing::info!("Interrupted, asking again");
                }
                Err(e) => return Err(prompt_failure(e)),
            }
        }
    }

    fn confirm_cancel(&mut self) -> Result<bool> {
        let prompt = Prompt::new(
            "Cancel installation?",
            "Nothing has been written to disk yet. Answers given so far are saved.",
        );
        match self.prompter.confirm(&prompt, false) {
            Ok(cancel) => Ok(cancel),
            // a second interrupt is taken as the answer
            Err(PromptError::Interrupted) => Ok(true),
            Err(e) => Err(prompt_failure(e)),
        }
    }

    fn persist(&self, record: &ConfigRecord) -> Result<()> {
        self.store.save(record)
    }

    fn kept(&self, field: FieldGroup, shown: &str) -> Result<StepReport> {
        tracing::info!("{}: {} (already set)", field, shown);
        Ok(StepReport::Kept)
    }

    fn resolved(&self, field: FieldGroup, record: &ConfigRecord) -> Result<StepReport> {
        self.persist(record)?;
        tracing::info!("{}: {}", field, display_value(field, record));
        Ok(StepReport::Resolved)
    }

    /// Single choice from a closed enumeration.
    fn pick_enum<E>(&mut self, field: FieldGroup, description: &str) -> Result<E>
    where
        E: IntoEnumIterator + ToString + FromStr,
    {
        let options = variant_names::<E>();
        let label: &'static str = field.into();
        self.retry(label, |s| {
            let answer = s.ask(|p| p.choose(&Prompt::new(label, description), &options))?;
            let picked = match_option(&answer, &options)
                .ok_or_else(|| invalid_choice(&answer, &options))?;
            picked
                .parse::<E>()
                .map_err(|_| invalid_choice(&answer, &options))
        })
    }

    fn yes_no(&mut self, field: FieldGroup, description: &str, default: bool) -> Result<bool> {
        let label: &'static str = field.into();
        self.retry(label, |s| s.ask(|p| p.confirm(&Prompt::new(label, description), default)))
    }

    /// Two masked entries that must agree.
    fn new_password(&mut self, field: FieldGroup) -> Result<Secret> {
        let label: &'static str = field.into();
        self.retry(label, |s| {
            let first = s.ask(|p| p.password(&Prompt::new(label, "Enter the password")))?;
            let second = s.ask(|p| p.password(&Prompt::new(label, "Enter it again")))?;
            check_password_pair(first, second)
        })
    }

    // ========================================================================
    // Steps
    // ========================================================================

    #[tracing::instrument(skip_all)]
    pub fn username(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::Username;
        if let Some(name) = &record.username {
            return self.kept(FIELD, name);
        }
        let name = self.retry(FIELD.into(), |s| {
            let answer = s.ask(|p| {
                p.input(&Prompt::new("Username", "Login name of the administrative user"), None)
            })?;
            validate_username(&answer)
        })?;
        record.username = Some(name);
        self.resolved(FIELD, record)
    }

    #[tracing::instrument(skip_all)]
    pub fn user_password(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::UserPassword;
        if record.user_password.is_some() {
            return self.kept(FIELD, MASK_TOKEN);
        }
        record.user_password = Some(self.new_password(FIELD)?);
        self.resolved(FIELD, record)
    }

    /// Either a distinct root password or a copy of the user password.
    #[tracing::instrument(skip_all)]
    pub fn root_password(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::RootPassword;
        if record.root_password.is_some() {
            return self.kept(FIELD, MASK_TOKEN);
        }
        let Some(user_password) = record.user_password.clone() else {
            return Err(InstallError::validation(
                "the user password must be set before the root password",
            ));
        };
        let separate = self.yes_no(
            FIELD,
            "Set a separate root password? Otherwise root gets the user password.",
            false,
        )?;
        let root = if separate {
            self.new_password(FIELD)?
        } else {
            user_password
        };
        record.root_password = Some(root);
        self.resolved(FIELD, record)
    }

    #[tracing::instrument(skip_all)]
    pub fn timezone(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::Timezone;
        if let Some(tz) = &record.timezone {
            return self.kept(FIELD, tz);
        }
        let guess = self
            .geolocator
            .guess_timezone()
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let tz = self.retry(FIELD.into(), |s| {
            let answer = s.ask(|p| {
                p.input(
                    &Prompt::new("Timezone", "Region/City, for example Europe/Berlin"),
                    Some(&guess),
                )
            })?;
            validate_timezone(&answer)
        })?;
        record.timezone = Some(tz);
        self.resolved(FIELD, record)
    }

    /// Language plus the locale.gen entries derived from it.
    #[tracing::instrument(skip_all)]
    pub fn language(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::Language;
        let entries = self.catalog.locale_gen_entries()?;
        let definitions = self.catalog.locale_definitions()?;
        let candidates = candidate_languages(&entries, &definitions);
        if let (Some(lang), Some(_)) = (&record.language, &record.locales) {
            if candidates.contains(lang) {
                return self.kept(FIELD, lang);
            }
            tracing::warn!("Saved language '{}' is not available here, asking again", lang);
            FIELD.clear(record);
        }
        if candidates.is_empty() {
            return Err(InstallError::external(
                "read locale catalog",
                None,
                "no locale.gen entry has an installed definition",
            ));
        }

        let language = self.retry(FIELD.into(), |s| {
            let answer = s.ask(|p| {
                p.filter(&Prompt::new("Language", "Type to search, e.g. en_US.UTF-8"), &candidates)
            })?;
            pick_listed(&answer, &candidates, "language")
        })?;

        record.locales = Some(derive_locales(&language, &entries));
        record.language = Some(language);
        self.resolved(FIELD, record)
    }

    #[tracing::instrument(skip_all)]
    pub fn keymap(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::Keymap;
        let keymaps = self.catalog.keymaps()?;
        if let Some(map) = &record.keymap {
            if keymaps.contains(map) {
                return self.kept(FIELD, map);
            }
            tracing::warn!("Saved keyboard layout '{}' is not available here, asking again", map);
            FIELD.clear(record);
        }
        let map = self.retry(FIELD.into(), |s| {
            let answer = s.ask(|p| {
                p.filter(&Prompt::new("Keyboard layout", "Type to search, e.g. us or de-latin1"), &keymaps)
            })?;
            pick_listed(&answer, &keymaps, "keyboard layout")
        })?;
        record.keymap = Some(map);
        self.resolved(FIELD, record)
    }

    /// Target disk; boot and root partition names follow from it.
    #[tracing::instrument(skip_all)]
    pub fn disk(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::Disk;
        if FIELD.is_resolved(record) {
            let disk = record.disk.clone().unwrap_or_default();
            return self.kept(FIELD, &disk);
        }
        let devices = self.catalog.block_devices()?;
        if devices.is_empty() {
            return Err(InstallError::external(
                "enumerate block devices",
                None,
                "no writable disk found",
            ));
        }
        let labels: Vec<String> = devices.iter().map(|d| d.label()).collect();

        let disk = self.retry(FIELD.into(), |s| {
            let answer = s.ask(|p| {
                p.choose(
                    &Prompt::new("Disk", "ALL DATA on the chosen disk will be destroyed"),
                    &labels,
                )
            })?;
            let by_label = match_option(&answer, &labels)
                .and_then(|l| devices.iter().find(|d| d.label() == l));
            let by_path = devices.iter().find(|d| d.path == answer.trim());
            by_label
                .or(by_path)
                .map(|d| d.path.clone())
                .ok_or_else(|| invalid_choice(&answer, &labels))
        })?;

        let layout = partition_names(&disk);
        record.disk = Some(disk);
        record.boot_partition = Some(layout.boot);
        record.root_partition = Some(layout.root);
        self.resolved(FIELD, record)
    }

    #[tracing::instrument(skip_all)]
    pub fn filesystem(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::Filesystem;
        if let Some(fs) = record.filesystem {
            return self.kept(FIELD, &fs.to_string());
        }
        record.filesystem = Some(self.pick_enum::<Filesystem>(FIELD, "Root filesystem")?);
        self.resolved(FIELD, record)
    }

    #[tracing::instrument(skip_all)]
    pub fn bootloader(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::Bootloader;
        if let Some(loader) = record.bootloader {
            return self.kept(FIELD, &loader.to_string());
        }
        record.bootloader = Some(self.pick_enum::<Bootloader>(
            FIELD,
            "systemd-boot needs UEFI; BIOS machines always get GRUB",
        )?);
        self.resolved(FIELD, record)
    }

    #[tracing::instrument(skip_all)]
    pub fn encryption(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::Encryption;
        if let Some(enabled) = record.encryption {
            return self.kept(FIELD, &enabled.to_string());
        }
        record.encryption = Some(self.yes_no(
            FIELD,
            "Encrypt the root partition with LUKS? The user password unlocks it.",
            false,
        )?);
        self.resolved(FIELD, record)
    }

    /// The TTY choice records its name and turns the desktop flag off.
    #[tracing::instrument(skip_all)]
    pub fn desktop(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::Desktop;
        if let (Some(_), Some(desktop)) = (record.desktop_enabled, record.desktop_environment) {
            return self.kept(FIELD, &desktop.to_string());
        }
        let desktop = self.pick_enum::<DesktopEnvironment>(FIELD, "TTY installs no graphical environment")?;
        record.desktop_environment = Some(desktop);
        record.desktop_enabled = Some(desktop.is_graphical());
        if !desktop.is_graphical() {
            record.graphics_driver = None;
        }
        self.resolved(FIELD, record)
    }

    /// Only asked when a desktop is enabled. An empty answer picks mesa.
    #[tracing::instrument(skip_all)]
    pub fn graphics_driver(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::GraphicsDriver;
        if record.desktop_enabled != Some(true) {
            return Ok(StepReport::NotApplicable);
        }
        if let Some(driver) = record.graphics_driver {
            return self.kept(FIELD, &driver.to_string());
        }
        let options = variant_names::<GraphicsDriver>();
        let label: &'static str = FIELD.into();
        let driver = self.retry(label, |s| {
            let answer = s.ask(|p| {
                p.choose(&Prompt::new(label, "Leave empty for mesa"), &options)
            })?;
            if answer.trim().is_empty() {
                return Ok(GraphicsDriver::default());
            }
            match_option(&answer, &options)
                .and_then(|name| name.parse::<GraphicsDriver>().ok())
                .ok_or_else(|| invalid_choice(&answer, &options))
        })?;
        record.graphics_driver = Some(driver);
        self.resolved(FIELD, record)
    }

    #[tracing::instrument(skip_all)]
    pub fn multilib(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::Multilib;
        if let Some(enabled) = record.multilib {
            return self.kept(FIELD, &enabled.to_string());
        }
        record.multilib = Some(self.yes_no(FIELD, "Enable the 32-bit multilib repository?", false)?);
        self.resolved(FIELD, record)
    }

    #[tracing::instrument(skip_all)]
    pub fn aur_helper(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::AurHelper;
        if let Some(helper) = record.aur_helper {
            return self.kept(FIELD, &helper.to_string());
        }
        record.aur_helper = Some(self.pick_enum::<AurHelper>(FIELD, "Built from the AUR as your user")?);
        self.resolved(FIELD, record)
    }

    #[tracing::instrument(skip_all)]
    pub fn profile(&mut self, record: &mut ConfigRecord) -> Result<StepReport> {
        const FIELD: FieldGroup = FieldGroup::Profile;
        if let Some(profile) = record.profile {
            return self.kept(FIELD, &profile.to_string());
        }
        record.profile = Some(self.pick_enum::<PackageProfile>(
            FIELD,
            "Minimal installs a reduced set; Custom asks for a package list later",
        )?);
        self.resolved(FIELD, record)
    }

    // ========================================================================
    // Whole record
    // ========================================================================

    /// Run every step in order.
    #[tracing::instrument(skip_all)]
    pub fn resolve_all(&mut self, record: &mut ConfigRecord) -> Result<Vec<(FieldGroup, StepReport)>> {
        let mut reports = Vec::with_capacity(15);
        for field in FieldGroup::iter() {
            let report = match field {
                FieldGroup::Username => self.username(record)?,
                FieldGroup::UserPassword => self.user_password(record)?,
                FieldGroup::RootPassword => self.root_password(record)?,
                FieldGroup::Timezone => self.timezone(record)?,
                FieldGroup::Language => self.language(record)?,
                FieldGroup::Keymap => self.keymap(record)?,
                FieldGroup::Disk => self.disk(record)?,
                FieldGroup::Filesystem => self.filesystem(record)?,
                FieldGroup::Bootloader => self.bootloader(record)?,
                FieldGroup::Encryption => self.encryption(record)?,
                FieldGroup::Desktop => self.desktop(record)?,
                FieldGroup::GraphicsDriver => self.graphics_driver(record)?,
                FieldGroup::Multilib => self.multilib(record)?,
                FieldGroup::AurHelper => self.aur_helper(record)?,
                FieldGroup::Profile => self.profile(record)?,
            };
            reports.push((field, report));
        }
        Ok(reports)
    }

    /// Resolve everything, then loop on the summary until the operator
    /// confirms. Declining lets one field (or everything) be answered again.
    /// An interrupt at the summary cancels immediately.
    #[tracing::instrument(skip_all)]
    pub fn run(&mut self, record: &mut ConfigRecord) -> Result<()> {
        loop {
            self.resolve_all(record)?;

            let summary = summarize(record);
            let prompt = Prompt::new("Begin installation with these settings?", &summary);
            match self.prompter.confirm(&prompt, false) {
                Ok(true) => {
                    tracing::info!("Configuration confirmed");
                    return Ok(());
                }
                Ok(false) => self.reconfigure(record)?,
                Err(PromptError::Interrupted) => return Err(InstallError::Cancelled),
                Err(e) => return Err(prompt_failure(e)),
            }
        }
    }

    #[tracing::instrument(skip_all)]
    fn reconfigure(&mut self, record: &mut ConfigRecord) -> Result<()> {
        let mut options: Vec<String> = FieldGroup::iter().map(|g| g.to_string()).collect();
        options.push(START_OVER.to_string());

        let picked = self.retry("Reconfigure", |s| {
            let answer = s.ask(|p| {
                p.choose(&Prompt::new("Change which setting?", ""), &options)
            })?;
            match_option(&answer, &options).ok_or_else(|| invalid_choice(&answer, &options))
        })?;

        if picked == START_OVER {
            tracing::info!("Clearing every setting");
            for group in FieldGroup::iter() {
                group.clear(record);
            }
        } else if let Some(group) = FieldGroup::iter().find(|g| g.to_string() == picked) {
            tracing::info!("Clearing {}", group);
            group.clear(record);
        }
        self.persist(record)
    }
}

// ============================================================================
// Validators
// ============================================================================

pub fn validate_username(answer: &str) -> Result<String> {
    let name = answer.trim();
    if name.is_empty() {
        return Err(InstallError::validation("username must not be empty"));
    }
    Ok(name.to_string())
}

/// Both entries non-empty and byte-for-byte equal.
pub fn check_password_pair(first: Secret, second: Secret) -> Result<Secret> {
    if first.is_empty() || second.is_empty() {
        return Err(InstallError::validation("password must not be empty"));
    }
    if first.expose().as_bytes() != second.expose().as_bytes() {
        return Err(InstallError::validation("passwords do not match"));
    }
    Ok(first)
}

pub fn validate_timezone(answer: &str) -> Result<String> {
    let tz = answer.trim();
    if tz.is_empty() {
        return Err(InstallError::validation("timezone must not be empty"));
    }
    chrono_tz::Tz::from_str(tz)
        .map(|_| tz.to_string())
        .map_err(|_| InstallError::validation(format!("'{tz}' is not a known timezone")))
}

fn pick_listed(answer: &str, options: &[String], what: &str) -> Result<String> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(InstallError::validation(format!("a {what} is required")));
    }
    options
        .iter()
        .find(|o| o.as_str() == answer)
        .cloned()
        .ok_or_else(|| InstallError::validation(format!("'{answer}' is not a known {what}")))
}

fn invalid_choice(answer: &str, options: &[String]) -> InstallError {
    let answer = answer.trim();
    if answer.is_empty() {
        InstallError::validation("a choice is required")
    } else {
        InstallError::validation(format!("'{answer}' is not one of: {}", options.join(", ")))
    }
}

fn prompt_failure(e: PromptError) -> InstallError {
    match e {
        PromptError::Closed => InstallError::prompt("input closed before every setting was answered"),
        other => InstallError::prompt(other.to_string()),
    }
}

// ============================================================================
// Summary
// ============================================================================

fn display_value(field: FieldGroup, record: &ConfigRecord) -> String {
    fn show<T: ToString>(value: &Option<T>) -> String {
        value.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
    }

    match field {
        FieldGroup::Username => show(&record.username),
        FieldGroup::UserPassword => masked(record.user_password.is_some()),
        FieldGroup::RootPassword => masked(record.root_password.is_some()),
        FieldGroup::Timezone => show(&record.timezone),
        FieldGroup::Language => show(&record.language),
        FieldGroup::Keymap => show(&record.keymap),
        FieldGroup::Disk => format!(
            "{} (boot {}, root {})",
            show(&record.disk),
            show(&record.boot_partition),
            show(&record.root_partition)
        ),
        FieldGroup::Filesystem => show(&record.filesystem),
        FieldGroup::Bootloader => show(&record.bootloader),
        FieldGroup::Encryption => show(&record.encryption),
        FieldGroup::Desktop => show(&record.desktop_environment),
        FieldGroup::GraphicsDriver => show(&record.graphics_driver),
        FieldGroup::Multilib => show(&record.multilib),
        FieldGroup::AurHelper => show(&record.aur_helper),
        FieldGroup::Profile => show(&record.profile),
    }
}

fn masked(set: bool) -> String {
    if set { MASK_TOKEN.to_string() } else { "-".to_string() }
}

/// One `Label: value` line per field group.
pub fn summarize(record: &ConfigRecord) -> String {
    FieldGroup::iter()
        .map(|g| format!("{:<20} {}", format!("{g}:"), display_value(g, record)))
        .collect::<Vec<_>>()
        .join("\n")
}
