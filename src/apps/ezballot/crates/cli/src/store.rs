//! File-backed registry snapshots.

use anyhow::{Context, Result, bail};
use ezballot_core::{Hash, Registry};
use fd_lock::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    /// BLAKE3 digest of `registry`.
    digest: Hash,
    /// CBOR-encoded registry.
    registry: Vec<u8>,
}

/// Stores the whole registry in a single CBOR file.
///
/// Writers take an exclusive lock on a sibling `.lock` file, so runs
/// against the same store never overwrite each other's changes.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn open_lock(&self) -> Result<RwLock<File>> {
        std::fs::create_dir_all(self.dir())?;
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;
        Ok(RwLock::new(file))
    }

    fn acquire<'a>(&self, lock: &'a mut RwLock<File>) -> Result<RwLockWriteGuard<'a, File>> {
        lock.write()
            .with_context(|| format!("Failed to lock store {}", self.path.display()))
    }

    /// Load the registry, or an empty one if the file does not exist yet.
    ///
    /// The store file is only ever replaced whole, so a plain read sees
    /// one complete snapshot.
    pub fn load(&self) -> Result<Registry> {
        if !self.path.exists() {
            debug!("No store at {}, starting empty", self.path.display());
            return Ok(Registry::new());
        }

        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read store {}", self.path.display()))?;
        let snapshot: Snapshot = ciborium::from_reader(bytes.as_slice())
            .with_context(|| format!("Failed to decode store {}", self.path.display()))?;

        if snapshot.version != SNAPSHOT_VERSION {
            bail!(
                "Unsupported store version {} in {}",
                snapshot.version,
                self.path.display()
            );
        }

        let digest = Hash::of(&snapshot.registry);
        if digest != snapshot.digest {
            bail!(
                "Store {} is damaged: digest {} does not match recorded {}",
                self.path.display(),
                digest,
                snapshot.digest
            );
        }

        let registry = Registry::from_cbor(&snapshot.registry)
            .with_context(|| format!("Invalid registry in {}", self.path.display()))?;
        debug!(
            "Loaded {} sessions from {}",
            registry.session_counter(),
            self.path.display()
        );
        Ok(registry)
    }

    /// Write the registry, replacing the previous file in one rename.
    pub fn save(&self, registry: &Registry) -> Result<()> {
        let mut lock = self.open_lock()?;
        let _guard = self.acquire(&mut lock)?;
        self.write_snapshot(registry)
    }

    /// Load, apply and save as one step under the store lock.
    ///
    /// `apply` returns its output and, if it changed anything, the registry
    /// to write back. The lock is held until that write has landed.
    pub fn update<T>(
        &self,
        apply: impl FnOnce(Registry) -> Result<(T, Option<Registry>)>,
    ) -> Result<T> {
        let mut lock = self.open_lock()?;
        let _guard = self.acquire(&mut lock)?;

        let (output, changed) = apply(self.load()?)?;
        if let Some(registry) = changed {
            self.write_snapshot(&registry)?;
        }
        Ok(output)
    }

    fn write_snapshot(&self, registry: &Registry) -> Result<()> {
        let encoded = registry.to_cbor()?;
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            digest: Hash::of(&encoded),
            registry: encoded,
        };

        let mut buf = Vec::new();
        ciborium::into_writer(&snapshot, &mut buf)?;

        let mut tmp = NamedTempFile::new_in(self.dir())
            .with_context(|| format!("Failed to create temp file in {}", self.dir().display()))?;
        tmp.write_all(&buf)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace store {}", self.path.display()))?;

        info!(
            "Saved {} sessions to {} (digest {})",
            registry.session_counter(),
            self.path.display(),
            snapshot.digest
        );
        Ok(())
    }
}
