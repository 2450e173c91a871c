//! Profile resolution.
//!
//! Resolves a profile id with the following priority:
//! 1. Live session (currently connected player), written through to the cache
//! 2. Cache (if a valid record exists)
//! 3. Upstream directory, cached only when it carries at least one attribute

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::flush::{FlushOutcome, FlushScheduler};
use crate::model::{Profile, Record};
use crate::snapshot::{LoadSource, SnapshotStore};
use crate::store::{CacheStore, PutOutcome};

/// Registry of currently connected players.
pub trait LiveSessions: Send + Sync {
    fn lookup_connected(&self, id: Uuid) -> Option<Profile>;
}

/// Authoritative identity directory.
///
/// A successful lookup may carry zero attributes. Errors are treated as
/// "not found" by the resolver.
#[async_trait]
pub trait UpstreamDirectory: Send + Sync {
    async fn lookup(&self, id: Uuid) -> CacheResult<Profile>;
}

/// Source of a resolved profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveSource {
    /// Connected player.
    Live,

    /// From the local cache.
    Cache,

    /// From the upstream directory.
    Upstream,
}

impl fmt::Display for ResolveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Cache => write!(f, "cache"),
            Self::Upstream => write!(f, "upstream"),
        }
    }
}

/// Resolved profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub profile: Profile,
    pub source: ResolveSource,
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub cached_profiles: usize,
    pub profiles_with_textures: usize,
    pub has_unsaved_changes: bool,
    pub last_flush_at: Option<DateTime<Utc>>,
    pub flush_count: u64,
    pub snapshot_exists: bool,
    pub backup_exists: bool,
}

/// Profile resolver and entry point for collaborators.
///
/// Built once at startup and shared by reference.
pub struct ProfileResolver {
    store: CacheStore,
    scheduler: FlushScheduler,
    live: Option<Arc<dyn LiveSessions>>,
    upstream: Option<Arc<dyn UpstreamDirectory>>,
    upstream_timeout: Duration,
}

impl ProfileResolver {
    /// Create a resolver without collaborators; lookups use the cache only.
    pub fn new(config: &CacheConfig) -> Self {
        let store = CacheStore::new();
        let scheduler = FlushScheduler::new(
            store.clone(),
            SnapshotStore::new(config.data_dir.clone()),
            config.min_flush_interval(),
        );
        Self {
            store,
            scheduler,
            live: None,
            upstream: None,
            upstream_timeout: config.upstream_timeout(),
        }
    }

    /// Create a resolver configured from the environment.
    pub fn from_env() -> Self {
        Self::new(&CacheConfig::from_env())
    }

    /// Attach the live session source.
    pub fn with_live_sessions(mut self, live: Arc<dyn LiveSessions>) -> Self {
        self.live = Some(live);
        self
    }

    /// Attach the upstream directory.
    pub fn with_upstream(mut self, upstream: Arc<dyn UpstreamDirectory>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Resolve a profile: live session, then cache, then upstream.
    pub async fn resolve(&self, id: Uuid) -> Option<ResolvedProfile> {
        if let Some(profile) = self.lookup_live(id) {
            self.cache(&profile).await;
            debug!(%id, "resolved profile from live session");
            return Some(ResolvedProfile {
                profile,
                source: ResolveSource::Live,
            });
        }

        if let Some(record) = self.store.get(&id).await {
            debug!(%id, "cache hit");
            return Some(ResolvedProfile {
                profile: record.to_profile(),
                source: ResolveSource::Cache,
            });
        }

        let profile = self.lookup_upstream(id).await?;
        if profile.has_properties() {
            self.cache(&profile).await;
        } else {
            debug!(%id, "upstream profile has no attributes, not caching");
        }
        Some(ResolvedProfile {
            profile,
            source: ResolveSource::Upstream,
        })
    }

    /// Warm the cache for a known set of ids.
    ///
    /// Connected players are always written through. Others are fetched
    /// upstream only when no valid record is cached, and kept only when
    /// they carry attributes. Returns the number of ids refreshed.
    pub async fn refresh_batch(&self, ids: &[Uuid]) -> usize {
        let mut refreshed = 0;

        for &id in ids {
            if let Some(profile) = self.lookup_live(id) {
                self.store.put(&profile).await;
                refreshed += 1;
                continue;
            }

            if self.store.contains_valid(&id).await {
                continue;
            }

            if let Some(profile) = self.lookup_upstream(id).await {
                if profile.has_properties() {
                    self.store.put(&profile).await;
                    refreshed += 1;
                }
            }
        }

        if refreshed > 0 {
            debug!(refreshed, requested = ids.len(), "refreshed profile cache batch");
            self.scheduler.flush_rate_limited().await;
        }
        refreshed
    }

    /// Cache a profile and request a rate-limited flush if it changed the table.
    pub async fn cache(&self, profile: &Profile) -> PutOutcome {
        let outcome = self.store.put(profile).await;
        if outcome.changed() {
            self.scheduler.flush_rate_limited().await;
        }
        outcome
    }

    /// Valid cached record for `id`.
    pub async fn get(&self, id: &Uuid) -> Option<Record> {
        self.store.get(id).await
    }

    pub async fn stats(&self) -> CacheStats {
        let counts = self.store.counts().await;
        let snapshots = self.scheduler.snapshots();
        CacheStats {
            cached_profiles: counts.records,
            profiles_with_textures: counts.with_textures,
            has_unsaved_changes: counts.dirty,
            last_flush_at: counts.last_flush_at,
            flush_count: counts.flush_count,
            snapshot_exists: snapshots.primary_exists(),
            backup_exists: snapshots.backup_exists(),
        }
    }

    /// Load the snapshot into the table and purge invalid records.
    pub async fn load_on_startup(&self) -> LoadSource {
        let loaded = self.scheduler.snapshots().load().await;
        let source = loaded.source;
        self.store.replace_all(loaded.records).await;

        // decode-time drops and backup recoveries must reach disk even if
        // nothing else changes
        if loaded.skipped > 0 || source == LoadSource::Backup {
            self.store.mark_dirty().await;
        }
        self.store.remove_invalid().await;

        let stats = self.stats().await;
        info!(
            %source,
            cached_profiles = stats.cached_profiles,
            with_textures = stats.profiles_with_textures,
            snapshot_exists = stats.snapshot_exists,
            "profile cache loaded"
        );
        source
    }

    /// Flush unconditionally of the interval. Call once at shutdown.
    pub async fn force_flush_on_shutdown(&self) -> FlushOutcome {
        let outcome = self.scheduler.force_flush().await;
        let cached_profiles = self.store.len().await;
        match outcome {
            FlushOutcome::Failed => {
                warn!(cached_profiles, "final profile cache save failed, unsaved data lost")
            }
            _ => info!(cached_profiles, %outcome, "final profile cache save completed"),
        }
        outcome
    }

    /// The underlying table.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// The flush scheduler.
    pub fn scheduler(&self) -> &FlushScheduler {
        &self.scheduler
    }

    fn lookup_live(&self, id: Uuid) -> Option<Profile> {
        self.live.as_ref()?.lookup_connected(id)
    }

    async fn lookup_upstream(&self, id: Uuid) -> Option<Profile> {
        let upstream = self.upstream.as_ref()?;

        let result = match tokio::time::timeout(self.upstream_timeout, upstream.lookup(id)).await
        {
            Ok(result) => result,
            Err(_) => Err(CacheError::UpstreamTimeout {
                timeout: self.upstream_timeout,
            }),
        };

        match result {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(%id, error = %e, "upstream lookup failed");
                None
            }
        }
    }
}
