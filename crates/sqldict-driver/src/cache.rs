//! Process-wide connection cache.
//!
//! Connections are shared by `(driver name, connect string)` and refcounted
//! through [`DbHandle`]. When the last handle for a key drops, the connection
//! moves to an idle list instead of closing; the oldest idle connections are
//! evicted once the list exceeds the cap.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use sqldict_error::Result;

use crate::SqlBackend;

/// Default cap on idle cached connections.
pub const MAX_UNUSED_CONNECTIONS: usize = 10;

type CacheKey = (String, String);

struct CacheEntry {
    db: Arc<dyn SqlBackend>,
    refs: usize,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Keys with zero refs, oldest first.
    idle: VecDeque<CacheKey>,
}

/// A refcounted cache of SQL connections.
pub struct SqlDbCache {
    max_idle: usize,
    inner: Mutex<CacheInner>,
}

impl SqlDbCache {
    /// A cache holding at most `max_idle` unused connections.
    pub fn new(max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            max_idle,
            inner: Mutex::new(CacheInner::default()),
        })
    }

    /// The process-wide cache instance.
    pub fn global() -> &'static Arc<Self> {
        static GLOBAL: OnceLock<Arc<SqlDbCache>> = OnceLock::new();
        GLOBAL.get_or_init(|| Self::new(MAX_UNUSED_CONNECTIONS))
    }

    /// Get or create the connection for `(driver, connect)`. The factory runs
    /// only when the key is absent.
    pub fn acquire<F>(self: &Arc<Self>, driver: &str, connect: &str, factory: F) -> Result<DbHandle>
    where
        F: FnOnce() -> Result<Arc<dyn SqlBackend>>,
    {
        let key = (driver.to_owned(), connect.to_owned());
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.refs += 1;
            let db = Arc::clone(&entry.db);
            inner.idle.retain(|k| *k != key);
            return Ok(DbHandle {
                cache: Arc::clone(self),
                key,
                db,
            });
        }
        drop(inner);

        let db = factory()?;
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry {
                db: Arc::clone(&db),
                refs: 0,
            });
        entry.refs += 1;
        let db = Arc::clone(&entry.db);
        inner.idle.retain(|k| *k != key);
        Ok(DbHandle {
            cache: Arc::clone(self),
            key,
            db,
        })
    }

    /// Number of live (referenced or idle) connections. Test hook.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no connections.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &CacheKey) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(key) else {
            return;
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            return;
        }
        inner.idle.push_back(key.clone());
        while inner.idle.len() > self.max_idle {
            let Some(evict) = inner.idle.pop_front() else {
                break;
            };
            inner.entries.remove(&evict);
        }
    }
}

/// A refcounted handle on a cached connection. Dropping the handle releases
/// the reference; the connection itself stays cached until evicted.
pub struct DbHandle {
    cache: Arc<SqlDbCache>,
    key: CacheKey,
    db: Arc<dyn SqlBackend>,
}

impl DbHandle {
    /// The underlying connection.
    pub fn backend(&self) -> &Arc<dyn SqlBackend> {
        &self.db
    }
}

impl Clone for DbHandle {
    fn clone(&self) -> Self {
        let mut inner = self.cache.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&self.key) {
            entry.refs += 1;
        }
        drop(inner);
        Self {
            cache: Arc::clone(&self.cache),
            key: self.key.clone(),
            db: Arc::clone(&self.db),
        }
    }
}

impl Drop for DbHandle {
    fn drop(&mut self) {
        self.cache.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use sqldict_types::RawValue;

    use super::*;
    use crate::{SqlCapabilities, SqlRows, SqlStatement, SqlTransaction};

    struct NullBackend;

    struct NoRows;

    #[async_trait]
    impl SqlRows for NoRows {
        fn next_row_sync(&mut self) -> Result<bool> {
            Ok(false)
        }
        async fn next_row(&mut self) -> Result<bool> {
            Ok(false)
        }
        fn column_count(&self) -> usize {
            0
        }
        fn column(&self, _column_idx: usize) -> RawValue {
            RawValue::Null
        }
    }

    struct NullTransaction;

    #[async_trait]
    impl SqlTransaction for NullTransaction {
        fn update(&mut self, _stmt: SqlStatement) {}
        fn update_rows(&mut self, _stmt: SqlStatement, _rows: Arc<crate::AffectedRows>) {}
        fn commit_sync(self: Box<Self>) -> Result<()> {
            Ok(())
        }
        async fn commit(self: Box<Self>) -> Result<()> {
            Ok(())
        }
        fn rollback(self: Box<Self>) {}
    }

    #[async_trait]
    impl SqlBackend for NullBackend {
        fn name(&self) -> &str {
            "null"
        }
        fn capabilities(&self) -> SqlCapabilities {
            SqlCapabilities::empty()
        }
        fn query_sync(&self, _stmt: SqlStatement) -> Result<Box<dyn SqlRows>> {
            Ok(Box::new(NoRows))
        }
        async fn query(&self, _stmt: SqlStatement) -> Result<Box<dyn SqlRows>> {
            Ok(Box::new(NoRows))
        }
        fn begin(&self) -> Box<dyn SqlTransaction> {
            Box::new(NullTransaction)
        }
    }

    fn counting_factory(counter: &AtomicUsize) -> Result<Arc<dyn SqlBackend>> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(NullBackend))
    }

    #[test]
    fn same_key_shares_connection() {
        let cache = SqlDbCache::new(10);
        let made = AtomicUsize::new(0);
        let a = cache
            .acquire("null", "host=a", || counting_factory(&made))
            .expect("acquire");
        let b = cache
            .acquire("null", "host=a", || counting_factory(&made))
            .expect("acquire");
        assert!(Arc::ptr_eq(a.backend(), b.backend()));
        assert_eq!(made.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn released_connection_stays_cached() {
        let cache = SqlDbCache::new(10);
        let made = AtomicUsize::new(0);
        let handle = cache
            .acquire("null", "host=a", || counting_factory(&made))
            .expect("acquire");
        drop(handle);
        assert_eq!(cache.len(), 1);
        let _again = cache
            .acquire("null", "host=a", || counting_factory(&made))
            .expect("acquire");
        assert_eq!(made.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn idle_overflow_evicts_oldest() {
        let cache = SqlDbCache::new(2);
        let made = AtomicUsize::new(0);
        for conn in ["host=a", "host=b", "host=c"] {
            let handle = cache
                .acquire("null", conn, || counting_factory(&made))
                .expect("acquire");
            drop(handle);
        }
        // a was evicted; b and c remain idle
        assert_eq!(cache.len(), 2);
        let _again = cache
            .acquire("null", "host=a", || counting_factory(&made))
            .expect("acquire");
        assert_eq!(made.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn clone_keeps_connection_referenced() {
        let cache = SqlDbCache::new(0);
        let made = AtomicUsize::new(0);
        let handle = cache
            .acquire("null", "host=a", || counting_factory(&made))
            .expect("acquire");
        let clone = handle.clone();
        drop(handle);
        // still referenced through the clone, so not evicted despite cap 0
        assert_eq!(cache.len(), 1);
        drop(clone);
        assert_eq!(cache.len(), 0);
    }
}
