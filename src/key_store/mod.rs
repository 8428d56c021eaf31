//! In-memory key cache mirroring a directory of `*.key` files.
//!
//! # Concurrency model
//!
//! The cache is a single immutable [`Snapshot`] behind a
//! `parking_lot::RwLock<Arc<Snapshot>>`:
//!
//! - [`KeyStore::get`] / [`KeyStore::list`] take the shared lock only long
//!   enough to clone the `Arc`, then work on the snapshot lock-free. Readers
//!   never touch the disk.
//! - [`KeyStore::reload`] enumerates and reads the backing store **before**
//!   taking the exclusive lock, builds a complete new snapshot, and swaps the
//!   `Arc` under the write lock. Readers observe either the old or the new
//!   snapshot, never a mix.
//! - A failed reload returns before the swap, so the previous snapshot stays
//!   in force.
//!
//! Concurrent reloads are not coalesced. Each reload draws a generation
//! number before it scans; the swap installs its snapshot only if that
//! generation is newer than the installed one, so a slow scan that started
//! earlier can never replace the result of a later one.

pub mod backing;
pub mod name;

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::observability;

pub use backing::{BackingStore, FsBackingStore};
pub use name::{InvalidIdentifier, KEY_SUFFIX, clean_path, validate_identifier};

/// Errors returned by [`KeyStore`] operations.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// The requested identifier violates the naming rules.
    #[error("invalid key identifier: {0}")]
    InvalidIdentifier(#[from] InvalidIdentifier),

    /// The identifier is well-formed but not in the cache.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The backing store could not be enumerated.
    #[error("failed to scan key store: {source}")]
    Scan {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A key file was listed but could not be read.
    #[error("failed to read key {name}: {source}")]
    Read {
        /// Identifier of the unreadable entry.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl KeyStoreError {
    /// Returns `true` when the caller sent a bad or unknown identifier.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidIdentifier(_) | Self::NotFound(_))
    }
}

/// Outcome of a successful reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Number of keys in the snapshot installed when the reload returned.
    pub loaded: usize,
    /// Entries this scan skipped because their names failed validation.
    pub skipped: usize,
    /// A newer reload finished first, so this scan was discarded and
    /// `loaded` describes the newer snapshot.
    pub superseded: bool,
}

/// Immutable point-in-time mapping of identifier to key bytes.
#[derive(Debug, Default)]
pub struct Snapshot {
    generation: u64,
    keys: HashMap<String, Bytes>,
}

impl Snapshot {
    /// Reload generation that produced this snapshot (0 = never loaded).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` when the snapshot holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Borrow the bytes for `identifier` as of this snapshot.
    ///
    /// Unlike [`KeyStore::get`] this does not validate the identifier; names
    /// that fail validation are never present in a snapshot.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&[u8]> {
        self.keys.get(identifier).map(Bytes::as_ref)
    }
}

/// Read-mostly cache of content keys.
///
/// Construct once at startup and share via `Arc<KeyStore>`.
pub struct KeyStore {
    backing: Arc<dyn BackingStore>,
    snapshot: RwLock<Arc<Snapshot>>,
    next_generation: AtomicU64,
}

impl KeyStore {
    /// Create an empty store over `backing`. Call [`reload`](Self::reload)
    /// to populate it.
    #[must_use]
    pub fn new(backing: Arc<dyn BackingStore>) -> Self {
        Self {
            backing,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Open a directory-backed store and perform the initial load.
    ///
    /// The directory is created if it does not exist.
    pub async fn open(dir: impl Into<std::path::PathBuf>) -> Result<Self, KeyStoreError> {
        let backing = FsBackingStore::create(dir)
            .await
            .map_err(|source| KeyStoreError::Scan { source })?;
        let store = Self::new(Arc::new(backing));
        store.reload().await?;
        Ok(store)
    }

    /// Look up a key by identifier.
    ///
    /// The identifier is validated before the cache is consulted. The returned
    /// buffer is an owned copy; mutating it never affects the cache.
    pub fn get(&self, identifier: &str) -> Result<Vec<u8>, KeyStoreError> {
        validate_identifier(identifier)?;

        let snapshot = self.snapshot();
        snapshot
            .keys
            .get(identifier)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| KeyStoreError::NotFound(identifier.to_string()))
    }

    /// All cached identifiers, in no particular order.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.snapshot().keys.keys().cloned().collect()
    }

    /// Number of cached keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns `true` when no keys are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// The currently installed snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Rebuild the cache from the backing store and swap it in atomically.
    ///
    /// Entries whose names fail validation are skipped and counted. Entries
    /// that disappear between enumeration and read are skipped. Any other
    /// read failure aborts the reload and leaves the current snapshot
    /// untouched; the call is always safe to retry.
    pub async fn reload(&self) -> Result<ReloadSummary, KeyStoreError> {
        let start = Instant::now();
        let result = self.scan_and_swap().await;
        match &result {
            Ok(summary) => {
                observability::record_reload(start.elapsed(), Some(summary.loaded), summary.skipped);
            }
            Err(_) => observability::record_reload(start.elapsed(), None, 0),
        }
        result
    }

    async fn scan_and_swap(&self) -> Result<ReloadSummary, KeyStoreError> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let entries = self
            .backing
            .entries()
            .await
            .map_err(|source| KeyStoreError::Scan { source })?;

        let mut keys = HashMap::with_capacity(entries.len());
        let mut skipped = 0usize;

        for name in entries {
            if let Err(reason) = validate_identifier(&name) {
                debug!(name = %name.escape_debug(), %reason, "Skipping invalid key file name");
                skipped += 1;
                continue;
            }

            match self.backing.read(&name).await {
                Ok(data) => {
                    keys.insert(name, Bytes::from(data));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(key = %name, "Key file vanished during reload");
                }
                Err(source) => {
                    warn!(key = %name, error = %source, "Key reload aborted, keeping previous snapshot");
                    return Err(KeyStoreError::Read { name, source });
                }
            }
        }

        let scanned = keys.len();
        let installed_len = {
            let mut current = self.snapshot.write();
            if current.generation < generation {
                *current = Arc::new(Snapshot { generation, keys });
                None
            } else {
                Some(current.len())
            }
        };

        let summary = match installed_len {
            None => {
                info!(
                    location = %self.backing.location(),
                    generation,
                    count = scanned,
                    skipped,
                    "Keys reloaded"
                );
                ReloadSummary {
                    loaded: scanned,
                    skipped,
                    superseded: false,
                }
            }
            Some(loaded) => {
                debug!(generation, "Newer snapshot already installed, discarding reload result");
                ReloadSummary {
                    loaded,
                    skipped,
                    superseded: true,
                }
            }
        };

        Ok(summary)
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("KeyStore")
            .field("location", &self.backing.location())
            .field("generation", &snapshot.generation)
            .field("keys", &snapshot.len())
            .finish_non_exhaustive()
    }
}
