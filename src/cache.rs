//! Result cache with single-flight computation
//!
//! Stitching a large selection is expensive; repeating it for an
//! identical request is wasted work. The cache keys finished
//! [`StrikeSet`]s by a [`Fingerprint`] over everything that can change
//! the answer: the dataset identity, the full parameter set, and the
//! predicate list. Entries never expire; they are dropped only by an
//! explicit [`StrikeCache::clear`] or a changed fingerprint input.
//!
//! Concurrent requests for the same fingerprint are collapsed into one
//! computation. Later arrivals wait on the in-flight run and share its
//! result instead of recomputing.
//!
//! Persistence is optional: with a directory configured, entries are
//! mirrored to disk as JSON and survive restarts. A corrupt or
//! unreadable entry is treated as a miss, never as an error.

use crate::error::{CacheError, Result};
use crate::params::StitchParams;
use crate::query::Predicate;
use crate::types::StrikeSet;
use crc::{Crc, CRC_64_ECMA_182};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const FINGERPRINT_CRC: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Cache key over (dataset identity, parameters, predicates)
///
/// Predicate order is normalized away; the conjunction is the same
/// selection no matter how its clauses are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Compute the fingerprint of one request
    pub fn compute(
        dataset_identity: &str,
        params: &StitchParams,
        predicates: &[Predicate],
    ) -> Self {
        let mut clauses: Vec<String> = predicates.iter().map(Predicate::canonical).collect();
        clauses.sort_unstable();

        let mut digest = FINGERPRINT_CRC.digest();
        digest.update(dataset_identity.as_bytes());
        digest.update(b"|");
        digest.update(params.canonical().as_bytes());
        for clause in &clauses {
            digest.update(b"|");
            digest.update(clause.as_bytes());
        }
        Fingerprint(digest.finalize())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Configuration for the result cache
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Pass every request straight to computation when false
    pub disabled: bool,

    /// Directory for persisted entries; memory-only when `None`
    pub persist_dir: Option<PathBuf>,
}

/// Cache counters
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Requests answered from memory or disk
    pub hits: AtomicU64,

    /// Requests that had to compute
    pub misses: AtomicU64,

    /// Requests that waited on an in-flight computation
    pub single_flight_waits: AtomicU64,
}

/// Keyed store of finished stitching results
///
/// Shared across requests behind an `Arc`; all methods take `&self`.
pub struct StrikeCache {
    config: CacheConfig,
    entries: RwLock<HashMap<Fingerprint, Arc<StrikeSet>>>,
    /// One async gate per fingerprint currently being computed
    gates: Mutex<HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>>,
    stats: CacheStats,
}

impl StrikeCache {
    /// Create a cache, preparing the persistence directory if configured
    pub fn new(config: CacheConfig) -> Result<Self> {
        if let Some(dir) = &config.persist_dir {
            std::fs::create_dir_all(dir).map_err(|e| CacheError::Directory {
                path: dir.display().to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(Self {
            config,
            entries: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            stats: CacheStats::default(),
        })
    }

    /// Memory-only cache with default settings
    pub fn in_memory() -> Self {
        Self {
            config: CacheConfig::default(),
            entries: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    /// Return the cached result, computing it at most once per fingerprint
    ///
    /// A hit skips `compute` entirely. On a miss, concurrent callers with
    /// the same fingerprint serialize on a per-key gate; the first runs
    /// `compute`, the rest pick up its stored result. A failed
    /// computation caches nothing, so the next caller retries.
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        compute: F,
    ) -> Result<Arc<StrikeSet>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StrikeSet>>,
    {
        if self.config.disabled {
            return Ok(Arc::new(compute().await?));
        }

        if let Some(hit) = self.lookup(fingerprint) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        let gate = {
            let mut gates = self.gates.lock();
            gates.entry(fingerprint).or_default().clone()
        };
        let _guard = match gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.stats.single_flight_waits.fetch_add(1, Ordering::Relaxed);
                gate.lock().await
            }
        };

        // Another flight may have finished while we waited on the gate
        if let Some(hit) = self.lookup(fingerprint) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let result = compute().await;
        self.gates.lock().remove(&fingerprint);
        let set = Arc::new(result?);

        self.entries.write().insert(fingerprint, set.clone());
        self.persist(fingerprint, &set);
        debug!(fingerprint = %fingerprint, strikes = set.len(), "cached stitching result");
        Ok(set)
    }

    /// Look up a fingerprint without computing
    pub fn peek(&self, fingerprint: Fingerprint) -> Option<Arc<StrikeSet>> {
        if self.config.disabled {
            return None;
        }
        self.lookup(fingerprint)
    }

    /// Drop every entry, in memory and on disk
    pub fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        if let Some(dir) = &self.config.persist_dir {
            for entry in std::fs::read_dir(dir).map_err(CacheError::from)? {
                let path = entry.map_err(CacheError::from)?.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    std::fs::remove_file(&path).map_err(CacheError::from)?;
                }
            }
        }
        debug!("result cache cleared");
        Ok(())
    }

    /// Number of entries currently held in memory
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Cache counters
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Hit ratio over the cache lifetime, 0.0 to 1.0
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    fn lookup(&self, fingerprint: Fingerprint) -> Option<Arc<StrikeSet>> {
        if let Some(set) = self.entries.read().get(&fingerprint) {
            return Some(set.clone());
        }
        let set = Arc::new(self.load_persisted(fingerprint)?);
        self.entries.write().insert(fingerprint, set.clone());
        Some(set)
    }

    /// Read a persisted entry; any failure is a miss
    fn load_persisted(&self, fingerprint: Fingerprint) -> Option<StrikeSet> {
        let path = self.entry_path(fingerprint)?;
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable cache entry, treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(set) => Some(set),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache entry, treating as miss");
                None
            }
        }
    }

    /// Mirror an entry to disk; failures degrade to memory-only
    fn persist(&self, fingerprint: Fingerprint, set: &StrikeSet) {
        let Some(path) = self.entry_path(fingerprint) else {
            return;
        };
        let result = serde_json::to_string(set)
            .map_err(CacheError::from)
            .and_then(|json| std::fs::write(&path, json).map_err(CacheError::from));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to persist cache entry");
        }
    }

    fn entry_path(&self, fingerprint: Fingerprint) -> Option<PathBuf> {
        self.config
            .persist_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", fingerprint)))
    }
}

impl fmt::Debug for StrikeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrikeCache")
            .field("config", &self.config)
            .field("entries", &self.entry_count())
            .finish()
    }
}

/// Default path for persisted entries under a data directory
pub fn default_cache_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("strike-cache")
}
