//! Hierarchical key–value dictionary layered over a relational database.
//!
//! Clients address data as slash-separated paths (`shared/config/…`,
//! `priv/quota/…`). A set of declarative pattern maps binds path segments to
//! typed SQL columns; the core translates dictionary operations into SQL
//! statements and hands them to a pluggable [`SqlBackend`]:
//!
//! - point lookup, sync and async, with TTL rows skipped on read;
//! - streaming iteration across all matching maps, with exact, one-level,
//!   and fully recursive modes plus optional ordering;
//! - transactions whose consecutive `set`s (and consecutive `inc`s) coalesce
//!   into single multi-column UPSERT/UPDATE statements;
//! - bulk expiry of rows past their TTL column.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sqldict_core::SqlDict;
//! use sqldict_types::{DictOpSettings, DictSettings};
//!
//! # fn example(backend: Arc<dyn sqldict_driver::SqlBackend>) -> sqldict_error::Result<()> {
//! let settings = Arc::new(DictSettings::from_json_str(
//!     r#"{
//!         "connect": "host=localhost dbname=mails",
//!         "maps": [{
//!             "pattern": "shared/quota/$/limit",
//!             "table": "quota",
//!             "pattern_fields": [{"name": "owner"}],
//!             "value_fields": [{"name": "bytes", "value_type": "uint"}]
//!         }]
//!     }"#,
//! )?);
//! let dict = SqlDict::new(settings, backend);
//! let op = DictOpSettings::default();
//! let limit = dict.lookup(&op, "shared/quota/alice/limit")?;
//! # let _ = limit;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sqldict_driver::{DbHandle, SqlBackend, SqlDbCache};
use sqldict_error::Result;
use sqldict_types::op::{DictOpSettings, IterateFlags};
use sqldict_types::settings::DictSettings;

mod expire;
pub mod iterate;
mod lookup;
pub mod pattern;
mod query;
pub mod transaction;

pub use iterate::{DictEntry, SqlDictIter};
pub use transaction::{CommitOutcome, SqlDictTransaction};

/// A dictionary handle bound to one SQL connection and one map
/// configuration. Cheap to share behind an `Arc`; all mutation happens in
/// the database.
pub struct SqlDict {
    settings: Arc<DictSettings>,
    db: Arc<dyn SqlBackend>,
    // keeps the cache refcount alive for handles obtained via `connect`
    _cache_handle: Option<DbHandle>,
}

impl SqlDict {
    /// A dictionary over an already-open backend.
    pub fn new(settings: Arc<DictSettings>, db: Arc<dyn SqlBackend>) -> Self {
        Self {
            settings,
            db,
            _cache_handle: None,
        }
    }

    /// A dictionary over a cached connection: reuses the connection for
    /// `(driver, settings.connect)` when one exists, otherwise opens it via
    /// `factory` and leaves it cached for the next handle.
    pub fn connect<F>(
        settings: Arc<DictSettings>,
        cache: &Arc<SqlDbCache>,
        driver: &str,
        factory: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> Result<Arc<dyn SqlBackend>>,
    {
        let handle = cache.acquire(driver, &settings.connect, factory)?;
        let db = Arc::clone(handle.backend());
        Ok(Self {
            settings,
            db,
            _cache_handle: Some(handle),
        })
    }

    /// The map configuration.
    pub fn settings(&self) -> &DictSettings {
        &self.settings
    }

    pub(crate) fn db(&self) -> &Arc<dyn SqlBackend> {
        &self.db
    }

    /// Wait until the backend has no in-flight work.
    pub async fn wait(&self) {
        self.db.wait().await;
    }

    /// Start iterating `path`. See [`IterateFlags`] for the recursion,
    /// ordering, and projection options.
    pub fn iterate(&self, op: DictOpSettings, path: &str, flags: IterateFlags) -> SqlDictIter<'_> {
        SqlDictIter::new(self, op, path, flags)
    }

    /// Open a transaction carrying `op`'s username, TTL, and timestamp.
    pub fn transaction(&self, op: DictOpSettings) -> SqlDictTransaction<'_> {
        SqlDictTransaction::new(self, op)
    }
}

/// Current time as whole seconds since the epoch. TTL writes and the expiry
/// sweep both use second resolution.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
