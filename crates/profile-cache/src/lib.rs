//! Durable write-back cache for player identity records.
//!
//! This crate keeps one record per player id (display name plus signed
//! attributes such as `textures`) and provides:
//!
//! - A shared in-memory table behind a single reader/writer lock
//! - Richer-wins merging: an entry is replaced only by a record with more attributes
//! - Atomic snapshot writes with a backup generation and fallback recovery
//! - Rate-limited flushing, plus an unconditional flush for shutdown
//! - Resolution across live sessions, the cache and an upstream directory
//!
//! # Quick Start
//!
//! ```no_run
//! use profile_cache::{CacheConfig, ProfileResolver};
//! use uuid::Uuid;
//!
//! # async fn example() {
//! let resolver = ProfileResolver::new(&CacheConfig::from_env());
//! resolver.load_on_startup().await;
//!
//! if let Some(resolved) = resolver.resolve(Uuid::new_v4()).await {
//!     println!("{} from {}", resolved.profile.name, resolved.source);
//! }
//!
//! resolver.force_flush_on_shutdown().await;
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `PROFILE_CACHE_DIR` | Snapshot directory (default: `config/tournaments`) |
//! | `PROFILE_CACHE_FLUSH_INTERVAL_MS` | Minimum interval between flushes (default: 10000) |
//! | `PROFILE_CACHE_UPSTREAM_TIMEOUT_MS` | Upstream lookup timeout (default: 5000) |

pub mod config;
pub mod error;
pub mod flush;
pub mod model;
pub mod resolver;
pub mod snapshot;
pub mod store;

// Re-export main types
pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use flush::{FlushOutcome, FlushScheduler};
pub use model::{Attribute, Identity, Profile, Record, SCHEMA_VERSION, TEXTURES};
pub use resolver::{
    CacheStats, LiveSessions, ProfileResolver, ResolveSource, ResolvedProfile, UpstreamDirectory,
};
pub use snapshot::{
    LoadSource, LoadedSnapshot, SnapshotPaths, SnapshotStore, Table, BACKUP_FILE, SNAPSHOT_FILE,
    STAGING_FILE,
};
pub use store::{CacheStore, PutOutcome, StoreCounts};
