//! Rate-limited persistence of the profile table.
//!
//! Bursts of mutations collapse into at most one snapshot write per
//! minimum interval. Shutdown uses [`FlushScheduler::force_flush`], which
//! ignores the interval.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::CacheResult;
use crate::snapshot::SnapshotStore;
use crate::store::{CacheStore, FlushDue};

/// Result of a flush request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Snapshot written with this many records.
    Written(usize),
    /// Nothing unflushed.
    Clean,
    /// Dirty, but the minimum interval has not elapsed yet.
    RateLimited,
    /// Write failed; the store stays dirty and a later flush retries.
    Failed,
}

impl fmt::Display for FlushOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Written(n) => write!(f, "written:{}", n),
            Self::Clean => write!(f, "clean"),
            Self::RateLimited => write!(f, "rate-limited"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Decides when the table goes to disk.
#[derive(Debug, Clone)]
pub struct FlushScheduler {
    store: CacheStore,
    snapshots: SnapshotStore,
    min_interval: Duration,

    /// Serializes writers so two flushes never share the staging file.
    /// Never acquired while a table lock is held.
    gate: Arc<Mutex<()>>,
}

impl FlushScheduler {
    pub fn new(store: CacheStore, snapshots: SnapshotStore, min_interval: Duration) -> Self {
        Self {
            store,
            snapshots,
            min_interval,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Write the current table regardless of dirty state or interval.
    ///
    /// Returns the number of records written. On error the dirty flag is
    /// left untouched.
    pub async fn flush_now(&self) -> CacheResult<usize> {
        let _gate = self.gate.lock().await;
        self.write_snapshot().await
    }

    /// Flush only if dirty and the minimum interval has elapsed since the
    /// last successful flush.
    pub async fn flush_rate_limited(&self) -> FlushOutcome {
        // cheap pre-check so rate-limited callers never queue on the gate
        if let Some(outcome) = self.skip_reason().await {
            return outcome;
        }

        let _gate = self.gate.lock().await;
        // another task may have flushed while we waited
        if let Some(outcome) = self.skip_reason().await {
            return outcome;
        }
        report(self.write_snapshot().await)
    }

    /// Flush if dirty, ignoring the interval. Used at shutdown.
    pub async fn force_flush(&self) -> FlushOutcome {
        let _gate = self.gate.lock().await;
        if !self.store.is_dirty().await {
            debug!("profile cache clean, nothing to force-save");
            return FlushOutcome::Clean;
        }
        info!("force saving profile cache");
        report(self.write_snapshot().await)
    }

    async fn skip_reason(&self) -> Option<FlushOutcome> {
        match self.store.flush_due(self.min_interval).await {
            FlushDue::Clean => Some(FlushOutcome::Clean),
            FlushDue::TooSoon => Some(FlushOutcome::RateLimited),
            FlushDue::Due => None,
        }
    }

    /// Caller holds the gate. The table lock is only held while cloning.
    async fn write_snapshot(&self) -> CacheResult<usize> {
        let snapshot = self.store.snapshot().await;
        let count = snapshot.records.len();
        self.snapshots.write(&snapshot.records).await?;
        self.store.mark_flushed(snapshot.generation).await;

        debug!(records = count, "saved profile cache");
        Ok(count)
    }
}

fn report(result: CacheResult<usize>) -> FlushOutcome {
    match result {
        Ok(count) => FlushOutcome::Written(count),
        Err(e) => {
            error!(error = %e, "failed to save profile cache");
            FlushOutcome::Failed
        }
    }
}
