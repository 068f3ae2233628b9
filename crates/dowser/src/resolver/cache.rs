//! Bounded memo of resolved jobs.
//!
//! A job's archive location never changes once published, so entries are
//! long-lived; capacity and time-to-live only keep a long-running process
//! from accumulating every job it has ever seen.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::ResolvedJob;

/// Counters describing cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
    /// Entries dropped because they outlived the TTL.
    pub expirations: u64,
}

#[derive(Debug)]
struct CacheEntry {
    job: ResolvedJob,
    inserted_at: Instant,
    last_accessed: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

/// Job URL → resolved job, with LRU eviction and a TTL.
///
/// One lock guards the map and the counters. It is only ever held for a map
/// operation, never across a network call.
#[derive(Debug)]
pub struct ArchiveCache {
    state: Mutex<CacheState>,
    capacity: usize,
    ttl: Duration,
}

impl ArchiveCache {
    /// Creates a cache holding at most `capacity` jobs for at most `ttl` each.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Looks up a job URL, dropping the entry if it has expired.
    pub fn get(&self, job_url: &str) -> Option<ResolvedJob> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let now = Instant::now();

        let expired = match state.entries.get_mut(job_url) {
            Some(entry) if now.duration_since(entry.inserted_at) < self.ttl => {
                entry.last_accessed = now;
                let job = entry.job.clone();
                state.stats.hits += 1;
                return Some(job);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(job_url);
            state.stats.expirations += 1;
        }
        state.stats.misses += 1;
        None
    }

    /// Stores a resolved job, evicting the least recently used entry if full.
    pub fn insert(&self, job_url: &str, job: ResolvedJob) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let now = Instant::now();

        if !state.entries.contains_key(job_url) && state.entries.len() >= self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(url, _)| url.clone());
            if let Some(url) = oldest {
                state.entries.remove(&url);
                state.stats.evictions += 1;
            }
        }

        state.entries.insert(
            job_url.to_string(),
            CacheEntry {
                job,
                inserted_at: now,
                last_accessed: now,
            },
        );
    }

    /// Number of cached jobs, including ones not yet noticed as expired.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }
}
