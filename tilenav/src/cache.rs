//! In-memory cache of prepared tiles.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use hashbrown::HashMap;
use slab::Slab;

use crate::agent::AgentShape;
use crate::builder::PreparedTile;
use crate::coords::TilePos;
use crate::geometry::Fingerprint;

/// Key of one cache entry.
///
/// Combines the agent shape, the tile coordinate, and the structural
/// fingerprint of the input geometry, so that geometrically identical
/// rebuilds of the same tile hit the same entry.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[expect(clippy::exhaustive_structs)]
pub struct CacheKey {
    #[allow(missing_docs)]
    pub agent: AgentShape,
    #[allow(missing_docs)]
    pub tile: TilePos,
    #[allow(missing_docs)]
    pub fingerprint: Fingerprint,
}

/// Byte-budgeted cache of [`PreparedTile`]s with pin-counted entries.
///
/// Entries handed out via [`CachedTile`] are pinned and cannot be evicted;
/// once every handle is released the entry joins the least-recently-released
/// eviction order. Eviction happens only inside [`TileCache::set()`].
///
/// Cloning shares the cache.
#[derive(Clone)]
pub struct TileCache {
    inner: Arc<Mutex<CacheInner>>,
}

impl fmt::Debug for TileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("TileCache")
            .field("budget", &inner.budget)
            .field("used", &inner.used)
            .field("entries", &inner.entries.len())
            .finish()
    }
}

struct CacheInner {
    budget: usize,
    /// Total bytes of all resident entries, pinned and free.
    used: usize,
    /// Bytes of entries with no pins (the evictable portion of `used`).
    free_bytes: usize,
    entries: Slab<Entry>,
    index: HashMap<CacheKey, usize>,
    /// Unpinned entries in release order; the first key is the
    /// least-recently-released and the first to be evicted.
    free: BTreeMap<u64, usize>,
    next_release: u64,
    hits: u64,
    misses: u64,
}

struct Entry {
    key: CacheKey,
    data: PreparedTile,
    pins: usize,
    free_token: Option<u64>,
}

/// Counters describing a [`TileCache`]'s current occupancy and history.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct CacheStats {
    /// Resident bytes, pinned and unpinned together.
    pub used_bytes: usize,
    /// Configured byte budget.
    pub budget_bytes: usize,
    /// Number of resident entries.
    pub entries: usize,
    #[allow(missing_docs)]
    pub hits: u64,
    #[allow(missing_docs)]
    pub misses: u64,
}

impl TileCache {
    /// Creates a cache bounded by the given byte budget.
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                budget,
                used: 0,
                free_bytes: 0,
                entries: Slab::new(),
                index: HashMap::new(),
                free: BTreeMap::new(),
                next_release: 0,
                hits: 0,
                misses: 0,
            })),
        }
    }

    /// Returns a pinned handle to the entry under `key`, if resident.
    pub fn get(&self, key: &CacheKey) -> Option<CachedTile> {
        let mut inner = self.inner.lock().unwrap();
        let slot = match inner.index.get(key) {
            Some(&slot) => slot,
            None => {
                inner.misses += 1;
                return None;
            }
        };
        inner.hits += 1;
        Some(self.pin(&mut inner, slot))
    }

    /// Inserts `data` under `key` and returns a pinned handle to it.
    ///
    /// Returns [`None`], leaving the cache unchanged, when the item cannot
    /// fit: either it alone exceeds the budget, or the budget minus
    /// currently pinned bytes cannot accommodate it even after evicting
    /// every unpinned entry. Eviction removes least-recently-released
    /// entries first and happens only here.
    ///
    /// If the key is already resident the existing entry is pinned and
    /// returned instead; the caller's `data` is discarded.
    pub fn set(&self, key: CacheKey, data: PreparedTile) -> Option<CachedTile> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&slot) = inner.index.get(&key) {
            return Some(self.pin(&mut inner, slot));
        }

        let size = data.size();
        let pinned_bytes = inner.used - inner.free_bytes;
        if size > inner.budget || size + pinned_bytes > inner.budget {
            return None;
        }
        while inner.used + size > inner.budget {
            let (_, slot) = inner.free.pop_first().expect("eviction accounting broken");
            let evicted = inner.entries.remove(slot);
            inner.index.remove(&evicted.key);
            inner.used -= evicted.data.size();
            inner.free_bytes -= evicted.data.size();
        }

        inner.used += size;
        let slot = inner.entries.insert(Entry {
            key,
            data,
            pins: 0,
            free_token: None,
        });
        inner.index.insert(key, slot);
        Some(self.pin(&mut inner, slot))
    }

    /// Current occupancy and hit counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            used_bytes: inner.used,
            budget_bytes: inner.budget,
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    fn pin(&self, inner: &mut CacheInner, slot: usize) -> CachedTile {
        if inner.entries[slot].pins == 0 {
            if let Some(token) = inner.entries[slot].free_token.take() {
                let size = inner.entries[slot].data.size();
                inner.free.remove(&token);
                inner.free_bytes -= size;
            }
        }
        let entry = &mut inner.entries[slot];
        entry.pins += 1;
        CachedTile {
            inner: Arc::clone(&self.inner),
            slot,
            data: entry.data.clone(),
        }
    }
}

/// Pinned handle to a cache entry.
///
/// The entry cannot be evicted while any handle to it is alive; dropping
/// the last handle moves the entry to the tail of the eviction order.
pub struct CachedTile {
    inner: Arc<Mutex<CacheInner>>,
    slot: usize,
    data: PreparedTile,
}

impl CachedTile {
    /// The cached prepared tile.
    pub fn data(&self) -> &PreparedTile {
        &self.data
    }

    /// Shorthand for the prepared mesh bytes.
    pub fn bytes(&self) -> &[u8] {
        self.data.bytes()
    }
}

impl Clone for CachedTile {
    fn clone(&self) -> Self {
        let mut inner = self.inner.lock().unwrap();
        inner.entries[self.slot].pins += 1;
        Self {
            inner: Arc::clone(&self.inner),
            slot: self.slot,
            data: self.data.clone(),
        }
    }
}

impl Drop for CachedTile {
    fn drop(&mut self) {
        // Poisoning is survivable here: pin bookkeeping stays consistent as
        // long as every drop runs, and the data itself is immutable.
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        inner.entries[self.slot].pins -= 1;
        if inner.entries[self.slot].pins == 0 {
            let token = inner.next_release;
            inner.next_release += 1;
            let size = inner.entries[self.slot].data.size();
            inner.entries[self.slot].free_token = Some(token);
            inner.free.insert(token, self.slot);
            inner.free_bytes += size;
        }
    }
}

impl fmt::Debug for CachedTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Deliberately does not take the cache lock.
        f.debug_struct("CachedTile")
            .field("slot", &self.slot)
            .field("size", &self.data.size())
            .finish()
    }
}

#[cfg(test)]
mod tests;
