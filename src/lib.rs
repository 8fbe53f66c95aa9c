//! archsetup library
//!
//! Configuration selection and the staged installation pipeline behind the
//! `archsetup` binary.

pub mod catalog;
pub mod cli;
pub mod config_store;
pub mod disk;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod pipeline;
pub mod process_guard;
pub mod profiles;
pub mod prompt;
pub mod providers;
pub mod recovery;
pub mod sanity;
pub mod secret;
pub mod selection;
pub mod target;
pub mod tools;
pub mod types;

// Re-export main types for convenience
pub use config_store::{ConfigRecord, ConfigStore, FieldGroup};
pub use disk::{DiskLayout, partition_names};
pub use error::{InstallError, Result};
pub use pipeline::{InstallPipeline, InstallSession, Stage};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use recovery::{Outcome, Recovery};
pub use secret::{Secret, SecretFile};
pub use selection::{RetryPolicy, SelectionEngine, StepReport};
pub use types::{
    AurHelper, BootMode, Bootloader, DesktopEnvironment, Filesystem, GraphicsDriver,
    PackageProfile,
};
