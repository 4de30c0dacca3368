use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OnceCell};

use crate::db::{ConnectionParams, Database};
use crate::error::AppError;

struct CachedConnection {
    db: Database,
    opened_at: Instant,
}

/// Filled at most once; concurrent callers for the same key wait on the
/// same connect attempt.
type Slot = Arc<OnceCell<CachedConnection>>;

/// Open pools shared by every session, keyed by connection parameters.
///
/// Entries older than `ttl` are dropped from the map and reopened on next
/// use. Pools are never closed here; a pool shuts down once its last clone
/// is dropped.
pub struct ConnectionCache {
    ttl: Duration,
    sqlite_path: PathBuf,
    entries: Mutex<HashMap<ConnectionParams, Slot>>,
}

impl ConnectionCache {
    pub fn new(ttl: Duration, sqlite_path: PathBuf) -> Self {
        Self {
            ttl,
            sqlite_path,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn is_expired(&self, slot: &Slot) -> bool {
        slot.get()
            .is_some_and(|entry| entry.opened_at.elapsed() >= self.ttl)
    }

    pub async fn get_or_connect(&self, params: &ConnectionParams) -> Result<Database, AppError> {
        let slot = {
            let mut entries = self.entries.lock().await;
            if entries.get(params).is_some_and(|slot| self.is_expired(slot)) {
                tracing::debug!(database = %params.describe(), "connection cache entry expired");
                entries.remove(params);
            }
            entries.entry(params.clone()).or_default().clone()
        };

        // the map lock is released; only callers for this key wait here
        let result = slot
            .get_or_try_init(|| async {
                let db = Database::connect(params, &self.sqlite_path).await?;
                tracing::info!(database = %params.describe(), "opened connection pool");
                Ok::<_, AppError>(CachedConnection {
                    db,
                    opened_at: Instant::now(),
                })
            })
            .await;

        match result {
            Ok(entry) => Ok(entry.db.clone()),
            Err(e) => {
                let mut entries = self.entries.lock().await;
                if entries
                    .get(params)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot) && !current.initialized())
                {
                    entries.remove(params);
                }
                Err(e)
            }
        }
    }

    pub async fn evict_expired(&self) {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, slot| !self.is_expired(slot));
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted expired connections");
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
