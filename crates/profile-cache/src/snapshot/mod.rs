//! On-disk snapshot persistence.
//!
//! # File Layout
//!
//! ```text
//! {data_dir}/
//!   skin_cache.json         # primary snapshot
//!   skin_cache_backup.json  # previous generation of the primary
//!   skin_cache_temp.json    # staging file, only present mid-write
//! ```
//!
//! Writes go to the staging file first and are renamed over the primary,
//! so the primary is always either the previous or the new complete
//! snapshot. Loads fall back from primary to backup to an empty table.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::error::CacheResult;

pub mod codec;
mod io;

pub use codec::{DecodedSnapshot, Table};

/// Primary snapshot file name.
pub const SNAPSHOT_FILE: &str = "skin_cache.json";

/// Backup snapshot file name.
pub const BACKUP_FILE: &str = "skin_cache_backup.json";

/// Staging file name.
pub const STAGING_FILE: &str = "skin_cache_temp.json";

/// Resolved paths of the snapshot files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    pub dir: PathBuf,
    pub primary: PathBuf,
    pub backup: PathBuf,
    pub staging: PathBuf,
}

impl SnapshotPaths {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            primary: dir.join(SNAPSHOT_FILE),
            backup: dir.join(BACKUP_FILE),
            staging: dir.join(STAGING_FILE),
            dir,
        }
    }
}

/// Where a loaded table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Primary,
    Backup,
    Empty,
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Backup => write!(f, "backup"),
            Self::Empty => write!(f, "empty"),
        }
    }
}

/// Outcome of [`SnapshotStore::load`].
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub records: Table,
    pub source: LoadSource,
    /// Entries dropped while decoding.
    pub skipped: usize,
}

/// Owns the snapshot, its backup and the staging file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    paths: SnapshotPaths,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: SnapshotPaths::in_dir(dir),
        }
    }

    pub fn paths(&self) -> &SnapshotPaths {
        &self.paths
    }

    pub fn primary_exists(&self) -> bool {
        self.paths.primary.exists()
    }

    pub fn backup_exists(&self) -> bool {
        self.paths.backup.exists()
    }

    /// Load the table: primary, then backup, then empty.
    ///
    /// Never fails; every problem is logged and degrades to the next tier.
    pub async fn load(&self) -> LoadedSnapshot {
        if let Err(e) = io::ensure_dir(&self.paths.dir).await {
            error!(error = %e, "failed to create snapshot directory");
        }

        match io::remove_if_exists(&self.paths.staging).await {
            Ok(true) => warn!(path = %self.paths.staging.display(), "removed stale staging file"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to remove stale staging file"),
        }

        if let Some(decoded) = self.try_load(&self.paths.primary, LoadSource::Primary).await {
            return LoadedSnapshot {
                records: decoded.records,
                source: LoadSource::Primary,
                skipped: decoded.skipped,
            };
        }

        if let Some(decoded) = self.try_load(&self.paths.backup, LoadSource::Backup).await {
            info!(
                records = decoded.records.len(),
                "recovered profile cache from backup snapshot"
            );
            self.restore_primary(&decoded.records).await;
            return LoadedSnapshot {
                records: decoded.records,
                source: LoadSource::Backup,
                skipped: decoded.skipped,
            };
        }

        info!("no usable profile cache snapshot found, starting empty");
        LoadedSnapshot {
            records: Table::new(),
            source: LoadSource::Empty,
            skipped: 0,
        }
    }

    async fn try_load(&self, path: &Path, source: LoadSource) -> Option<DecodedSnapshot> {
        let content = match io::read_optional(path).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                debug!(%source, "snapshot file not present");
                return None;
            }
            Err(e) => {
                error!(%source, error = %e, "failed to read snapshot");
                return None;
            }
        };

        match codec::decode(&content) {
            Ok(decoded) => {
                info!(
                    %source,
                    records = decoded.records.len(),
                    skipped = decoded.skipped,
                    "loaded profile cache snapshot"
                );
                Some(decoded)
            }
            Err(e) => {
                error!(%source, error = %e, "failed to decode snapshot");
                None
            }
        }
    }

    /// Rewrite the primary from a table recovered out of the backup, so the
    /// next flush never copies a corrupt primary over the good backup.
    async fn restore_primary(&self, table: &Table) {
        let restored = match self.stage(table).await {
            Ok(()) => self.commit().await,
            Err(e) => Err(e),
        };
        match restored {
            Ok(()) => info!("restored primary snapshot from backup"),
            Err(e) => error!(error = %e, "failed to restore primary snapshot from backup"),
        }
    }

    /// Persist `table`: back up the current primary, stage, then rename.
    pub async fn write(&self, table: &Table) -> CacheResult<()> {
        io::ensure_dir(&self.paths.dir).await?;
        self.backup_primary().await;
        self.stage(table).await?;
        self.commit().await
    }

    /// Copy the primary over the backup. Failure is logged and ignored so
    /// an unwritable backup never blocks the primary save. A primary that
    /// does not decode is never copied; the existing backup is kept.
    pub async fn backup_primary(&self) {
        let content = match io::read_optional(&self.paths.primary).await {
            Ok(Some(content)) => content,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to read primary snapshot for backup");
                return;
            }
        };
        if let Err(e) = codec::decode(&content) {
            warn!(error = %e, "primary snapshot does not decode, keeping existing backup");
            return;
        }
        match io::write_synced(&self.paths.backup, &content).await {
            Ok(()) => debug!("refreshed snapshot backup"),
            Err(e) => warn!(error = %e, "failed to create snapshot backup"),
        }
    }

    /// Serialize `table` into the staging file. The primary is untouched.
    pub async fn stage(&self, table: &Table) -> CacheResult<()> {
        let content = codec::encode(table)?;
        io::write_synced(&self.paths.staging, &content).await
    }

    /// Rename the staging file over the primary.
    pub async fn commit(&self) -> CacheResult<()> {
        io::replace(&self.paths.staging, &self.paths.primary).await
    }
}
