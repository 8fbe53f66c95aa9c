//! Secret material held for the lifetime of one run.
//!
//! Passwords live in [`Secret`], backed by `zeroize::Zeroizing`, so the
//! buffer is overwritten when dropped or scrubbed. When a tool needs a
//! passphrase on disk (cryptsetup), a [`SecretFile`] is written into the
//! transient working directory with mode 0600 and wiped again when it goes
//! out of scope.
//!
//! # Limitation
//!
//! Only the live buffer is scrubbed. Copies left behind by earlier
//! reallocations of the source `String`, or inside a child process, are out
//! of reach.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use zeroize::{Zeroize, Zeroizing};

use crate::process_guard::CleanupRegistry;

/// A password or passphrase that never prints and zeroes itself on drop.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Borrow the cleartext. Keep the borrow short.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overwrite the buffer with zeros and truncate it.
    pub fn scrub(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

static KEYFILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// RAII wrapper for a temporary key file.
///
/// Created with mode 0600 inside `dir`; overwritten with zeros and unlinked
/// on drop, including on early return and unwinding.
#[derive(Debug)]
pub struct SecretFile {
    path: PathBuf,
    size: usize,
}

impl SecretFile {
    pub fn new(dir: &Path, secret: &Secret) -> std::io::Result<Self> {
        let seq = KEYFILE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!(".keyfile-{}-{}", std::process::id(), seq));

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)?;
        file.write_all(secret.expose().as_bytes())?;
        file.sync_all()?;

        tracing::debug!("Key file created: {}", path.display());

        let size = secret.expose().len();
        if let Ok(mut cleanup) = CleanupRegistry::global().lock() {
            cleanup.register_key_file(&path, size);
        }
        Ok(Self { path, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn secure_wipe(&self) {
        if let Ok(mut file) = OpenOptions::new().write(true).open(&self.path) {
            let zeros = vec![0u8; self.size];
            let _ = file.write_all(&zeros);
            let _ = file.sync_all();
        }

        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove key file {}: {}", self.path.display(), e);
        } else {
            tracing::debug!("Key file wiped: {}", self.path.display());
        }
        if let Ok(mut cleanup) = CleanupRegistry::global().lock() {
            cleanup.unregister_key_file(&self.path);
        }
    }
}

impl Drop for SecretFile {
    fn drop(&mut self) {
        self.secure_wipe();
    }
}
