//! Backing store collaborator consumed by [`KeyStore::reload`](super::KeyStore::reload).
//!
//! The [`BackingStore`] trait abstracts the two I/O primitives a reload needs:
//! enumerate the candidate key names and read one key's bytes. The only
//! production implementation is [`FsBackingStore`], a flat directory of
//! `*.key` files.

use std::io;
use std::path::PathBuf;

use tracing::debug;

/// Source of truth for key material.
///
/// Implementations must be `Send + Sync` because the store is shared across
/// request handlers and the reload trigger.
#[async_trait::async_trait]
pub trait BackingStore: Send + Sync + 'static {
    /// List the names of every candidate key entry.
    ///
    /// Names are returned unvalidated; the caller applies the identifier rules.
    async fn entries(&self) -> io::Result<Vec<String>>;

    /// Read the full contents of the named entry.
    async fn read(&self, name: &str) -> io::Result<Vec<u8>>;

    /// Human-readable location, used in log lines.
    fn location(&self) -> String;
}

/// Directory-backed key source.
#[derive(Debug, Clone)]
pub struct FsBackingStore {
    dir: PathBuf,
}

impl FsBackingStore {
    /// Use `dir` as the key directory, creating it if it does not exist.
    pub async fn create(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        if dir.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "key directory path is empty",
            ));
        }
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }
}

#[async_trait::async_trait]
impl BackingStore for FsBackingStore {
    async fn entries(&self) -> io::Result<Vec<String>> {
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => debug!(name = ?raw, "Skipping non UTF-8 file name"),
            }
        }

        Ok(names)
    }

    async fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.dir.join(name)).await
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}
