use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Default persisted configuration, relative to the working directory.
pub const DEFAULT_CONFIG: &str = "archsetup.conf";
pub const DEFAULT_LOG: &str = "archsetup.log";
pub const DEFAULT_TARGET: &str = "/mnt";
pub const DEFAULT_DATA_DIR: &str = "data";

/// archsetup - guided Arch Linux provisioning
#[derive(Parser, Debug)]
#[command(name = "archsetup")]
#[command(about = "Configure once, then partition, encrypt, install and boot an Arch Linux system")]
#[command(version)]
pub struct Cli {
    /// Log file; records are appended.
    #[arg(long, global = true, default_value = DEFAULT_LOG)]
    pub log: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the interactive installation
    Install(InstallArgs),
    /// Print the version and exit
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct InstallArgs {
    /// Persisted configuration; answers found here are not asked again.
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Mount point of the target system.
    #[arg(long, default_value = DEFAULT_TARGET)]
    pub target: PathBuf,

    /// Directory holding package lists and the auxiliary file tree.
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Replay answers from a file, one per line (`^C` simulates an interrupt).
    #[arg(long)]
    pub answers: Option<PathBuf>,

    /// Log every command instead of running it.
    ///
    /// The target root is redirected into the working directory and
    /// pre-flight checks are skipped. Catalog queries (disks, keymaps)
    /// still read the live system so the choices are realistic.
    #[arg(long)]
    pub dry_run: bool,

    /// Give up on a field after this many invalid answers.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_no_args() {
        // parses; main rejects the missing directive
        let cli = Cli::try_parse_from(["archsetup"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log, PathBuf::from(DEFAULT_LOG));
    }

    #[test]
    fn test_cli_install_defaults() {
        let cli = Cli::try_parse_from(["archsetup", "install"]).unwrap();
        match cli.command {
            Some(Commands::Install(args)) => {
                assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG));
                assert_eq!(args.target, PathBuf::from(DEFAULT_TARGET));
                assert!(!args.dry_run);
                assert!(args.answers.is_none());
                assert!(args.max_attempts.is_none());
            }
            _ => panic!("Expected Install command"),
        }
    }

    #[test]
    fn test_cli_install_with_options() {
        let cli = Cli::try_parse_from([
            "archsetup",
            "install",
            "--config",
            "/tmp/a.conf",
            "--answers",
            "/tmp/answers",
            "--dry-run",
            "--max-attempts",
            "3",
            "--log",
            "/tmp/a.log",
        ])
        .unwrap();
        assert_eq!(cli.log, PathBuf::from("/tmp/a.log"));
        match cli.command {
            Some(Commands::Install(args)) => {
                assert_eq!(args.config.to_str().unwrap(), "/tmp/a.conf");
                assert!(args.dry_run);
                assert_eq!(args.max_attempts, Some(3));
            }
            _ => panic!("Expected Install command"),
        }
    }

    #[test]
    fn test_cli_rejects_zero_attempts() {
        assert!(Cli::try_parse_from(["archsetup", "install", "--max-attempts", "0"]).is_err());
    }

    #[test]
    fn test_cli_version_command() {
        let cli = Cli::try_parse_from(["archsetup", "version"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Version)));
    }

    #[test]
    fn test_cli_unknown_directive() {
        assert!(Cli::try_parse_from(["archsetup", "frobnicate"]).is_err());
    }
}
