//! In-memory profile table.
//!
//! One reader/writer lock guards the whole table together with its dirty
//! bookkeeping. Lookups take the shared lock, mutations the exclusive one.
//! Nothing in this module touches the filesystem.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{Profile, Record};
use crate::snapshot::Table;

/// What [`CacheStore::put`] did with a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The profile had no id.
    Ignored,
    /// New id, record added.
    Inserted,
    /// Incoming record had strictly more attributes and replaced the entry.
    Replaced,
    /// Existing entry kept.
    Unchanged,
}

impl PutOutcome {
    /// Whether the table was modified.
    pub fn changed(self) -> bool {
        matches!(self, Self::Inserted | Self::Replaced)
    }
}

/// Point-in-time counters read under the shared lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCounts {
    pub records: usize,
    pub with_textures: usize,
    pub dirty: bool,
    pub last_flush_at: Option<DateTime<Utc>>,
    pub flush_count: u64,
}

/// A consistent copy of the table for serialization.
#[derive(Debug)]
pub(crate) struct TableSnapshot {
    pub(crate) records: Table,
    pub(crate) generation: u64,
}

/// Shared profile table.
///
/// Cloning is cheap and yields another handle onto the same table.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Debug, Default)]
struct StoreInner {
    records: Table,

    /// Unflushed changes exist.
    dirty: bool,

    /// Bumped on every mutation; lets a flush tell whether it is still current.
    generation: u64,

    last_flush_at: Option<DateTime<Utc>>,
    last_flush_instant: Option<Instant>,
    flush_count: u64,
}

impl StoreInner {
    fn touch(&mut self) {
        self.dirty = true;
        self.generation = self.generation.wrapping_add(1);
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Valid record for `id`, cloned out of the table.
    pub async fn get(&self, id: &Uuid) -> Option<Record> {
        let inner = self.inner.read().await;
        inner.records.get(id).filter(|r| r.is_valid()).cloned()
    }

    pub async fn contains_valid(&self, id: &Uuid) -> bool {
        let inner = self.inner.read().await;
        inner.records.get(id).is_some_and(Record::is_valid)
    }

    /// Insert or enrich the entry for the profile's id.
    ///
    /// An existing entry is replaced only when the incoming record has
    /// strictly more attributes. Recency is not considered.
    pub async fn put(&self, profile: &Profile) -> PutOutcome {
        match Record::from_profile(profile) {
            Some(record) => self.put_record(record).await,
            None => PutOutcome::Ignored,
        }
    }

    /// Same merge policy as [`CacheStore::put`] for an already built record.
    pub async fn put_record(&self, record: Record) -> PutOutcome {
        let id = record.id();
        let mut inner = self.inner.write().await;

        let outcome = match inner.records.get(&id) {
            None => PutOutcome::Inserted,
            Some(existing) if record.attribute_count() > existing.attribute_count() => {
                PutOutcome::Replaced
            }
            Some(_) => PutOutcome::Unchanged,
        };

        if outcome.changed() {
            inner.records.insert(id, record);
            inner.touch();
        }
        drop(inner);

        match outcome {
            PutOutcome::Inserted => info!(%id, "cached profile"),
            PutOutcome::Replaced => debug!(%id, "replaced cached profile with richer data"),
            _ => {}
        }
        outcome
    }

    /// Evict every record failing validation. Returns the number removed.
    pub async fn remove_invalid(&self) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.records.len();
        inner.records.retain(|id, record| {
            let keep = record.is_valid();
            if !keep {
                warn!(%id, "removed invalid cached profile");
            }
            keep
        });
        let removed = before - inner.records.len();
        if removed > 0 {
            inner.touch();
        }
        drop(inner);

        if removed > 0 {
            info!(removed, "cleaned invalid profile cache entries");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }

    pub async fn is_dirty(&self) -> bool {
        self.inner.read().await.dirty
    }

    pub async fn counts(&self) -> StoreCounts {
        let inner = self.inner.read().await;
        StoreCounts {
            records: inner.records.len(),
            with_textures: inner.records.values().filter(|r| r.has_textures()).count(),
            dirty: inner.dirty,
            last_flush_at: inner.last_flush_at,
            flush_count: inner.flush_count,
        }
    }

    /// Swap in a freshly loaded table. The result counts as clean.
    pub(crate) async fn replace_all(&self, records: Table) {
        let mut inner = self.inner.write().await;
        inner.records = records;
        inner.generation = inner.generation.wrapping_add(1);
        inner.dirty = false;
    }

    pub(crate) async fn mark_dirty(&self) {
        self.inner.write().await.touch();
    }

    /// Clone the table under the shared lock.
    pub(crate) async fn snapshot(&self) -> TableSnapshot {
        let inner = self.inner.read().await;
        TableSnapshot {
            records: inner.records.clone(),
            generation: inner.generation,
        }
    }

    /// Record a successful flush of the snapshot taken at `generation`.
    ///
    /// The dirty flag is cleared only if nothing changed since.
    pub(crate) async fn mark_flushed(&self, generation: u64) {
        let mut inner = self.inner.write().await;
        if inner.generation == generation {
            inner.dirty = false;
        }
        inner.last_flush_at = Some(Utc::now());
        inner.last_flush_instant = Some(Instant::now());
        inner.flush_count += 1;
    }

    /// Dirty, and either never flushed or flushed at least `min_interval` ago.
    pub(crate) async fn flush_due(&self, min_interval: std::time::Duration) -> FlushDue {
        let inner = self.inner.read().await;
        if !inner.dirty {
            return FlushDue::Clean;
        }
        match inner.last_flush_instant {
            Some(at) if at.elapsed() < min_interval => FlushDue::TooSoon,
            _ => FlushDue::Due,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushDue {
    Clean,
    TooSoon,
    Due,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attribute, Identity, TEXTURES};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn profile(id: Uuid, name: &str, attrs: &[&str]) -> Profile {
        attrs.iter().fold(Profile::new(id, name), |p, attr| {
            p.with_property(Attribute::new(*attr, format!("{}-value", attr)))
        })
    }

    #[tokio::test]
    async fn test_put_without_id_is_ignored() {
        let store = CacheStore::new();
        let outcome = store.put(&Profile::default()).await;
        assert_eq!(outcome, PutOutcome::Ignored);
        assert!(store.is_empty().await);
        assert!(!store.is_dirty().await);
    }

    #[tokio::test]
    async fn test_insert_marks_dirty() {
        let store = CacheStore::new();
        let id = Uuid::new_v4();

        assert_eq!(store.put(&profile(id, "Ash", &[TEXTURES])).await, PutOutcome::Inserted);
        assert!(store.is_dirty().await);
        assert_eq!(store.get(&id).await.unwrap().identity().name(), "Ash");
    }

    #[tokio::test]
    async fn test_richer_wins() {
        let store = CacheStore::new();
        let id = Uuid::new_v4();

        store.put(&profile(id, "Ash", &[TEXTURES])).await;
        let outcome = store.put(&profile(id, "Ash2", &[TEXTURES, "cape"])).await;
        assert_eq!(outcome, PutOutcome::Replaced);
        assert_eq!(store.get(&id).await.unwrap().identity().name(), "Ash2");
    }

    #[tokio::test]
    async fn test_equal_or_poorer_is_unchanged() {
        let store = CacheStore::new();
        let id = Uuid::new_v4();

        store.put(&profile(id, "Ash", &[TEXTURES, "cape"])).await;
        let kept = store.get(&id).await.unwrap();

        // newer but not richer: still ignored
        let equal = store.put(&profile(id, "Newer", &[TEXTURES, "elytra"])).await;
        let poorer = store.put(&profile(id, "Poorer", &[])).await;

        assert_eq!(equal, PutOutcome::Unchanged);
        assert_eq!(poorer, PutOutcome::Unchanged);
        assert_eq!(store.get(&id).await.unwrap(), kept);
    }

    #[tokio::test]
    async fn test_same_put_twice_is_idempotent() {
        let store = CacheStore::new();
        let id = Uuid::new_v4();
        let p = profile(id, "Ash", &[TEXTURES]);

        assert_eq!(store.put(&p).await, PutOutcome::Inserted);
        let first = store.get(&id).await.unwrap();
        assert_eq!(store.put(&p).await, PutOutcome::Unchanged);
        assert_eq!(store.get(&id).await.unwrap(), first);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_hides_invalid_records() {
        let store = CacheStore::new();
        let id = Uuid::new_v4();

        store.put(&profile(id, "", &[TEXTURES])).await;
        assert_eq!(store.len().await, 1);
        assert!(store.get(&id).await.is_none());
        assert!(!store.contains_valid(&id).await);
    }

    #[tokio::test]
    async fn test_remove_invalid() {
        let store = CacheStore::new();
        let good = Uuid::new_v4();
        let bad = Uuid::new_v4();
        let stale = Uuid::new_v4();

        let mut table = Table::new();
        for (id, record) in [
            (good, Record::new(Identity::from_parts(good, "Ash", 1, "1.1.0"), BTreeMap::new())),
            (bad, Record::new(Identity::from_parts(bad, "", 1, "1.1.0"), BTreeMap::new())),
            (stale, Record::new(Identity::from_parts(stale, "Old", 0, "1.1.0"), BTreeMap::new())),
        ] {
            table.insert(id, record);
        }
        store.replace_all(table).await;
        assert!(!store.is_dirty().await);

        assert_eq!(store.remove_invalid().await, 2);
        assert!(store.is_dirty().await);
        assert_eq!(store.len().await, 1);
        assert!(store.get(&good).await.is_some());

        assert_eq!(store.remove_invalid().await, 0);
    }

    #[tokio::test]
    async fn test_counts() {
        let store = CacheStore::new();
        store.put(&profile(Uuid::new_v4(), "Ash", &[TEXTURES])).await;
        store.put(&profile(Uuid::new_v4(), "Misty", &["cape"])).await;

        let counts = store.counts().await;
        assert_eq!(counts.records, 2);
        assert_eq!(counts.with_textures, 1);
        assert!(counts.dirty);
        assert_eq!(counts.last_flush_at, None);
        assert_eq!(counts.flush_count, 0);
    }

    #[tokio::test]
    async fn test_mark_flushed_keeps_dirty_after_concurrent_put() {
        let store = CacheStore::new();
        store.put(&profile(Uuid::new_v4(), "Ash", &[TEXTURES])).await;

        let snapshot = store.snapshot().await;
        store.put(&profile(Uuid::new_v4(), "Brock", &[TEXTURES])).await;
        store.mark_flushed(snapshot.generation).await;

        assert!(store.is_dirty().await);
        assert_eq!(store.counts().await.flush_count, 1);

        let snapshot = store.snapshot().await;
        store.mark_flushed(snapshot.generation).await;
        assert!(!store.is_dirty().await);
    }

    #[tokio::test]
    async fn test_flush_due() {
        let store = CacheStore::new();
        let interval = Duration::from_secs(60);
        assert_eq!(store.flush_due(interval).await, FlushDue::Clean);

        store.mark_dirty().await;
        assert_eq!(store.flush_due(interval).await, FlushDue::Due);

        let snapshot = store.snapshot().await;
        store.mark_flushed(snapshot.generation).await;
        store.mark_dirty().await;
        assert_eq!(store.flush_due(interval).await, FlushDue::TooSoon);
        assert_eq!(store.flush_due(Duration::ZERO).await, FlushDue::Due);
    }

    #[tokio::test]
    async fn test_returned_records_are_copies() {
        let store = CacheStore::new();
        let id = Uuid::new_v4();
        store.put(&profile(id, "Ash", &[TEXTURES])).await;

        let mut copy = store.get(&id).await.unwrap().to_profile();
        copy.name = "Tampered".to_string();
        copy.properties.clear();

        assert_eq!(store.get(&id).await.unwrap().identity().name(), "Ash");
    }
}
