//! Per-node in-memory payload store: holds the actual cached bytes behind
//! an entry, evicting least-recently-accessed entries under a byte budget
//! (C3).

use crate::error::{Error, Result};
use crate::model::{CacheCube, CacheEntry, CacheType, ProfilingData};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

struct StoredEntry {
    semantic_id: String,
    meta: CacheEntry,
    payload: std::sync::Arc<Vec<u8>>,
}

/// A single cache type's payload store: capacity-bounded, guarded by one
/// mutex per the concurrency model (shared across worker threads, locked
/// for the duration of a put/evict).
pub struct NodeCacheStore {
    cache_type: CacheType,
    capacity: u64,
    used: AtomicU64,
    next_entry_id: AtomicU64,
    entries: Mutex<Vec<StoredEntry>>,
}

impl NodeCacheStore {
    pub fn new(cache_type: CacheType, capacity: u64) -> Self {
        Self {
            cache_type,
            capacity,
            used: AtomicU64::new(0),
            next_entry_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// Insert a payload, evicting least-recently-accessed entries until
    /// there is room. Fails with [`Error::CacheOverflow`] if even evicting
    /// everything would not make room.
    pub fn put(
        &self,
        semantic_id: String,
        payload: Vec<u8>,
        bounds: CacheCube,
        profile: ProfilingData,
    ) -> Result<u64> {
        let entry_id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);
        self.put_with_id(entry_id, semantic_id, payload, bounds, profile)?;
        Ok(entry_id)
    }

    /// Admit a payload under a caller-chosen entry id rather than minting a
    /// fresh one, so a reorganization move can land on the destination node
    /// under the same id the source's shadow catalog entry already names.
    pub fn put_with_id(
        &self,
        entry_id: u64,
        semantic_id: String,
        payload: Vec<u8>,
        bounds: CacheCube,
        profile: ProfilingData,
    ) -> Result<()> {
        let size = payload.len() as u64;
        if size > self.capacity {
            return Err(Error::CacheOverflow {
                cache_type: self.cache_type,
                needed: size,
            });
        }

        let mut entries = self.entries.lock();
        let mut used = self.used.load(Ordering::Relaxed);
        // Evict oldest-first (entries are kept in last-access order) until
        // there's room for the incoming payload.
        let mut i = 0;
        while used + size > self.capacity && i < entries.len() {
            let evicted = &entries[i];
            used -= evicted.meta.size;
            i += 1;
        }
        if used + size > self.capacity {
            return Err(Error::CacheOverflow {
                cache_type: self.cache_type,
                needed: size,
            });
        }
        entries.drain(0..i);

        let meta = CacheEntry {
            entry_id,
            bounds,
            size,
            profile,
            last_access: now_millis(),
            access_count: 0,
        };
        entries.push(StoredEntry {
            semantic_id,
            meta,
            payload: std::sync::Arc::new(payload),
        });
        self.used.store(used + size, Ordering::Relaxed);

        Ok(())
    }

    /// Fetch a payload by entry id, bumping its access stats and moving it
    /// to the back of the LRU order (most recently used).
    pub fn get(&self, entry_id: u64) -> Result<(std::sync::Arc<Vec<u8>>, CacheEntry)> {
        let mut entries = self.entries.lock();
        let pos = entries
            .iter()
            .position(|e| e.meta.entry_id == entry_id)
            .ok_or_else(|| Error::NotFound(format!("entry {entry_id}")))?;

        let mut stored = entries.remove(pos);
        stored.meta.last_access = now_millis();
        stored.meta.access_count += 1;
        let result = (stored.payload.clone(), stored.meta.clone());
        entries.push(stored);
        Ok(result)
    }

    /// Evict a specific entry (used when the index directs a reorganization
    /// move after the entry has been copied to its destination).
    pub fn remove(&self, entry_id: u64) -> Result<()> {
        let mut entries = self.entries.lock();
        let pos = entries
            .iter()
            .position(|e| e.meta.entry_id == entry_id)
            .ok_or_else(|| Error::NotFound(format!("entry {entry_id}")))?;
        let removed = entries.remove(pos);
        self.used.fetch_sub(removed.meta.size, Ordering::Relaxed);
        Ok(())
    }

    /// Snapshot of every entry's `(semantic_id, metadata)`, in LRU order
    /// (oldest first), for handshake/`GET_STATS` replies.
    pub fn snapshot(&self) -> Vec<(String, CacheEntry)> {
        self.entries
            .lock()
            .iter()
            .map(|e| (e.semantic_id.clone(), e.meta.clone()))
            .collect()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Interval;
    use crate::model::{CacheCube, QueryCube, ResolutionInfo};

    fn bounds() -> CacheCube {
        CacheCube::new(
            QueryCube::new(
                Interval::new(0.0, 10.0),
                Interval::new(0.0, 10.0),
                Interval::new(0.0, 1.0),
                4326,
                0,
            ),
            ResolutionInfo::unconstrained(),
        )
    }

    fn profile() -> ProfilingData {
        ProfilingData {
            own_cpu: 0.0,
            own_gpu: 0.0,
            own_io: 0.0,
            subtree_cpu: 0.0,
            subtree_gpu: 0.0,
            subtree_io: 0.0,
            uncached_cpu: 0.0,
            uncached_gpu: 0.0,
            uncached_io: 0.0,
        }
    }

    #[test]
    fn put_then_get_round_trips_payload_and_bumps_access_count() {
        let store = NodeCacheStore::new(CacheType::Raster, 1024);
        let id = store
            .put("sem".into(), vec![1, 2, 3], bounds(), profile())
            .unwrap();
        let (payload, meta) = store.get(id).unwrap();
        assert_eq!(*payload, vec![1, 2, 3]);
        assert_eq!(meta.access_count, 1);
    }

    #[test]
    fn eviction_makes_room_for_a_new_entry_when_capacity_is_tight() {
        let store = NodeCacheStore::new(CacheType::Raster, 10);
        let first = store
            .put("a".into(), vec![0; 8], bounds(), profile())
            .unwrap();
        let second = store
            .put("b".into(), vec![0; 8], bounds(), profile())
            .unwrap();
        assert!(store.get(first).is_err());
        assert!(store.get(second).is_ok());
    }

    #[test]
    fn put_fails_with_cache_overflow_when_payload_exceeds_capacity() {
        let store = NodeCacheStore::new(CacheType::Raster, 4);
        let result = store.put("a".into(), vec![0; 8], bounds(), profile());
        assert!(matches!(result, Err(Error::CacheOverflow { .. })));
    }

    #[test]
    fn put_with_id_preserves_the_caller_chosen_entry_id() {
        let store = NodeCacheStore::new(CacheType::Raster, 1024);
        store
            .put_with_id(99, "sem".into(), vec![9, 9], bounds(), profile())
            .unwrap();
        let (payload, meta) = store.get(99).unwrap();
        assert_eq!(*payload, vec![9, 9]);
        assert_eq!(meta.entry_id, 99);
    }
}
