// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Persistent analysis cache keyed by fingerprint and analyzer identity
//!
//! Entries live in a SQLite table with one row per
//! `(fingerprint, analyzer_id)`. Workers share a [`ResultCache`] handle and
//! check connections out of a small pool, so reads run in parallel while
//! SQLite (WAL mode plus a busy timeout) serializes the writers.
//!
//! The cache is advisory. Lookup failures are logged and reported as misses,
//! which only costs a re-analysis. Expiry happens in explicit sweeps, so an
//! entry past its TTL can still be served until the next sweep runs.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::analyzer::AnalysisResult;
use crate::fingerprint::Fingerprint;
use crate::{ArgusError, Result};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS analysis_cache (
        fingerprint TEXT NOT NULL,
        analyzer_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (fingerprint, analyzer_id)
    );

    CREATE INDEX IF NOT EXISTS idx_analysis_cache_created ON analysis_cache(created_at);
"#;

/// A stored analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub analyzer_id: String,
    pub payload: AnalysisResult,
    pub created_at: DateTime<Utc>,
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: i64,
    pub by_analyzer: Vec<(String, i64)>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

enum Store {
    File(PathBuf),
    Memory,
}

struct Pool {
    store: Store,
    idle: Mutex<Vec<Connection>>,
    returned: Condvar,
    capacity: usize,
}

/// Shared handle to the analysis cache
#[derive(Clone)]
pub struct ResultCache {
    pool: Arc<Pool>,
}

/// A pooled connection, returned to the pool on drop
struct PooledConn<'a> {
    pool: &'a Pool,
    conn: Option<Connection>,
}

impl Deref for PooledConn<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConn<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConn<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let mut idle = self.pool.lock_idle();
            if idle.len() < self.pool.capacity {
                idle.push(conn);
                self.pool.returned.notify_one();
            }
        }
    }
}

impl ResultCache {
    /// Open or create the cache at `path`, pooling up to `pool_size` connections
    pub fn open<P: AsRef<Path>>(path: P, pool_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ArgusError::io(parent, e))?;
        }

        let pool = Pool {
            store: Store::File(path),
            idle: Mutex::new(Vec::new()),
            returned: Condvar::new(),
            capacity: pool_size.max(1),
        };
        let first = pool.connect()?;
        first.execute_batch(SCHEMA)?;
        pool.lock_idle().push(first);

        Ok(Self { pool: Arc::new(pool) })
    }

    /// Open a private in-memory cache (for testing)
    pub fn in_memory() -> Result<Self> {
        let pool = Pool {
            store: Store::Memory,
            idle: Mutex::new(Vec::new()),
            returned: Condvar::new(),
            capacity: 1,
        };
        let conn = pool.connect()?;
        conn.execute_batch(SCHEMA)?;
        pool.lock_idle().push(conn);

        Ok(Self { pool: Arc::new(pool) })
    }

    fn checkout(&self) -> Result<PooledConn<'_>> {
        Ok(PooledConn {
            pool: &self.pool,
            conn: Some(self.pool.acquire()?),
        })
    }

    /// Look up a cached analysis; errors are logged and reported as a miss
    pub fn get(&self, fingerprint: &Fingerprint, analyzer_id: &str) -> Option<AnalysisResult> {
        match self.try_get(fingerprint, analyzer_id) {
            Ok(found) => found,
            Err(e) => {
                warn!("Cache lookup failed for {}, treating as miss: {}", fingerprint, e);
                None
            }
        }
    }

    fn try_get(&self, fingerprint: &Fingerprint, analyzer_id: &str) -> Result<Option<AnalysisResult>> {
        let conn = self.checkout()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM analysis_cache WHERE fingerprint = ?1 AND analyzer_id = ?2",
                params![fingerprint.to_hex(), analyzer_id],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Store an analysis, replacing any previous entry for the same key
    pub fn set(&self, fingerprint: &Fingerprint, analyzer_id: &str, result: &AnalysisResult) -> Result<()> {
        self.insert_at(fingerprint, analyzer_id, result, Utc::now())
    }

    pub(crate) fn insert_at(
        &self,
        fingerprint: &Fingerprint,
        analyzer_id: &str,
        result: &AnalysisResult,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let payload = serde_json::to_string(result)?;
        let conn = self.checkout()?;
        conn.execute(
            r#"INSERT OR REPLACE INTO analysis_cache (fingerprint, analyzer_id, payload, created_at)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![fingerprint.to_hex(), analyzer_id, payload, created_at.timestamp_millis()],
        )?;
        debug!("Cached analysis {} for {}", fingerprint, analyzer_id);
        Ok(())
    }

    /// Remove entries created more than `ttl` ago
    pub fn sweep_expired(&self, ttl: Duration) -> Result<usize> {
        // A TTL reaching past the earliest representable date expires nothing
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            debug!("Cache TTL {:?} reaches past every entry, nothing to sweep", ttl);
            return Ok(0);
        };

        let conn = self.checkout()?;
        let removed = conn.execute(
            "DELETE FROM analysis_cache WHERE created_at < ?1",
            params![cutoff.timestamp_millis()],
        )?;
        if removed > 0 {
            debug!("Swept {} expired cache entries", removed);
        }
        Ok(removed)
    }

    /// Remove a single entry
    pub fn evict(&self, fingerprint: &Fingerprint, analyzer_id: &str) -> Result<bool> {
        let conn = self.checkout()?;
        let removed = conn.execute(
            "DELETE FROM analysis_cache WHERE fingerprint = ?1 AND analyzer_id = ?2",
            params![fingerprint.to_hex(), analyzer_id],
        )?;
        Ok(removed > 0)
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<usize> {
        let conn = self.checkout()?;
        Ok(conn.execute("DELETE FROM analysis_cache", [])?)
    }

    pub fn len(&self) -> Result<i64> {
        let conn = self.checkout()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM analysis_cache", [], |row| row.get(0))?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All entries ordered by key
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let conn = self.checkout()?;
        let mut stmt = conn.prepare(
            r#"SELECT fingerprint, analyzer_id, payload, created_at
               FROM analysis_cache ORDER BY fingerprint, analyzer_id"#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(fp, analyzer_id, payload, created)| {
                Ok(CacheEntry {
                    fingerprint: Fingerprint::from_hex(&fp)?,
                    analyzer_id,
                    payload: serde_json::from_str(&payload)?,
                    created_at: millis_to_datetime(created),
                })
            })
            .collect()
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.checkout()?;
        let (entries, oldest, newest): (i64, Option<i64>, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), MIN(created_at), MAX(created_at) FROM analysis_cache",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut stmt = conn.prepare(
            r#"SELECT analyzer_id, COUNT(*) FROM analysis_cache
               GROUP BY analyzer_id ORDER BY COUNT(*) DESC, analyzer_id"#,
        )?;
        let by_analyzer = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(CacheStats {
            entries,
            by_analyzer,
            oldest: oldest.map(millis_to_datetime),
            newest: newest.map(millis_to_datetime),
        })
    }

    /// Close every pooled connection
    ///
    /// Connections still checked out by other clones are closed when those
    /// clones drop them.
    pub fn close(self) -> Result<()> {
        let idle = std::mem::take(&mut *self.pool.lock_idle());
        let mut first_error = None;
        for conn in idle {
            if let Err((_, e)) = conn.close() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Pool {
    /// Take an idle connection, opening an overflow one for file stores.
    /// An in-memory store has exactly one connection, so callers wait for it.
    fn acquire(&self) -> Result<Connection> {
        let mut idle = self.lock_idle();
        loop {
            if let Some(conn) = idle.pop() {
                return Ok(conn);
            }
            match self.store {
                Store::File(_) => {
                    drop(idle);
                    return self.connect();
                }
                Store::Memory => {
                    idle = self.returned.wait(idle).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn connect(&self) -> Result<Connection> {
        match &self.store {
            Store::File(path) => {
                let conn = Connection::open(path)?;
                conn.busy_timeout(Duration::from_secs(5))?;
                conn.execute_batch(
                    "PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;",
                )?;
                Ok(conn)
            }
            Store::Memory => Ok(Connection::open_in_memory()?),
        }
    }

    /// A panic elsewhere cannot leave the idle list inconsistent, so a
    /// poisoned lock is still usable
    fn lock_idle(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}
