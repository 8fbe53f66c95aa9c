//! archsetup - main entry point
//!
//! `install` runs selection, pre-flight checks and the pipeline under one
//! [`Recovery`], whose outcome decides the exit status.

use std::fs;
use std::path::Path;
use std::process;
use std::time::Duration;

use anyhow::Context;

use archsetup::catalog::{HostCatalog, HostPaths};
use archsetup::cli::{Cli, Commands, InstallArgs};
use archsetup::config_store::{ConfigRecord, ConfigStore};
use archsetup::error::{InstallError, Result};
use archsetup::pipeline::{InstallPipeline, PipelineEnv};
use archsetup::prompt::{Prompter, ScriptedPrompter, TerminalPrompter};
use archsetup::providers::{IpGeolocator, SystemBackend, Toolbox};
use archsetup::recovery::Recovery;
use archsetup::selection::{RetryPolicy, SelectionEngine};
use archsetup::target::TargetRoot;
use archsetup::tools::{CommandRunner, RecordingRunner, SystemRunner};
use archsetup::{fatal, hardware, logging, process_guard, sanity};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let cli = Cli::parse_args();

    if let Err(e) = logging::init(&cli.log) {
        eprintln!("archsetup: {e:#}");
        process::exit(1);
    }

    match cli.command {
        Some(Commands::Version) => println!("archsetup {VERSION}"),
        Some(Commands::Install(args)) => {
            let code = run_install(&cli.log, &args);
            process::exit(code);
        }
        None => fatal!("No directive given; run `archsetup install` or see `archsetup --help`"),
    }
}

/// Returns the process exit status.
fn run_install(log_path: &Path, args: &InstallArgs) -> i32 {
    tracing::info!("archsetup {} starting{}", VERSION, if args.dry_run { " (dry run)" } else { "" });

    if let Err(e) = process_guard::init_signal_handlers() {
        tracing::warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = process_guard::ProcessGuard::new();

    let mut recovery = match Recovery::new(log_path) {
        Ok(recovery) => recovery,
        Err(e) => fatal!("Cannot create working directory: {}", e),
    };

    let store = ConfigStore::new(&args.config);
    let mut record = store.load_or_default();

    let result = install(args, &store, &mut record, &mut recovery);
    let outcome = recovery.finish(&mut record, result);
    eprintln!("{}", outcome.report());
    outcome.exit_code()
}

fn install(
    args: &InstallArgs,
    store: &ConfigStore,
    record: &mut ConfigRecord,
    recovery: &mut Recovery,
) -> Result<()> {
    if !args.dry_run {
        if let Err(e) = preflight() {
            let err = InstallError::external("pre-flight checks", None, format!("{e:#}"));
            recovery.on_error("Pre-flight checks", &err);
            return Err(err);
        }
    }

    let mut prompter: Box<dyn Prompter> = match &args.answers {
        Some(path) => Box::new(ScriptedPrompter::from_file(path).map_err(|e| {
            InstallError::prompt(format!("cannot read answers from {}: {e}", path.display()))
        })?),
        None => Box::new(TerminalPrompter::new()),
    };

    let live = SystemRunner::new();
    let host = HostPaths::default();
    {
        let network = hardware::detect_internet(Duration::from_secs(3));
        let catalog = HostCatalog::new(host.clone(), &live);
        let geolocator = IpGeolocator::new(&live, network.is_online());
        let mut engine = SelectionEngine::new(prompter.as_mut(), &catalog, &geolocator, store)
            .with_policy(RetryPolicy {
                max_attempts: args.max_attempts,
            });
        if let Err(e) = engine.run(record) {
            recovery.on_error("Select configuration", &e);
            return Err(e);
        }
    }

    let recorder = RecordingRunner::dry_run();
    let runner: &dyn CommandRunner = if args.dry_run { &recorder } else { &live };
    let target_root = if args.dry_run {
        recovery.work_dir().join("target")
    } else {
        args.target.clone()
    };
    fs::create_dir_all(&target_root)?;
    tracing::info!("Target root {}", target_root.display());

    let backend = SystemBackend::new(runner, &target_root, recovery.work_dir());
    let target = TargetRoot::new(&target_root);
    let env = PipelineEnv {
        host,
        data_dir: args.data_dir.clone(),
        config_path: args.config.clone(),
        log_path: recovery.log_path().to_path_buf(),
    };

    let mut pipeline = InstallPipeline::new(
        Toolbox::from_backend(&backend),
        &target,
        &env,
        prompter.as_mut(),
    );
    pipeline.run(record, recovery)?;

    if args.dry_run {
        tracing::info!("Dry run: {} command(s) recorded", recorder.commands().len());
    }
    Ok(())
}

fn preflight() -> anyhow::Result<()> {
    sanity::run_preflight_checks()
        .map_err(anyhow::Error::msg)
        .context("pre-flight checks failed")
}
