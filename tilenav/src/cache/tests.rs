use pretty_assertions::assert_eq;

use super::*;
use crate::agent::{AgentKind, AgentShape};
use crate::coords::tile_pos;

fn agent(height: f32) -> AgentShape {
    AgentShape::new(AgentKind::Cylinder, [0.4, 0.4, height]).unwrap()
}

fn key(fingerprint: u64) -> CacheKey {
    CacheKey {
        agent: agent(1.0),
        tile: tile_pos(0, 0),
        fingerprint: Fingerprint(fingerprint),
    }
}

fn tile_of_size(size: usize) -> PreparedTile {
    PreparedTile::new(vec![0xab; size])
}

#[test]
fn get_for_empty_cache_returns_none() {
    let cache = TileCache::new(1024);
    assert!(cache.get(&key(1)).is_none());
    assert_eq!(cache.stats().misses, 1);
}

#[test]
fn set_for_item_larger_than_budget_returns_none() {
    let cache = TileCache::new(10);
    assert!(cache.set(key(1), tile_of_size(11)).is_none());
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn set_then_get_returns_cached_value() {
    let cache = TileCache::new(1024);
    let stored = cache.set(key(1), tile_of_size(16)).unwrap();
    let fetched = cache.get(&key(1)).unwrap();
    assert_eq!(fetched.bytes(), stored.bytes());
    assert_eq!(cache.stats().hits, 1);
}

#[test]
fn misses_are_independent_per_key_component() {
    let cache = TileCache::new(1024);
    let base = key(1);
    cache.set(base, tile_of_size(16)).unwrap();

    let by_agent = CacheKey {
        agent: agent(2.0),
        ..base
    };
    let by_tile = CacheKey {
        tile: tile_pos(1, 0),
        ..base
    };
    let by_fingerprint = CacheKey {
        fingerprint: Fingerprint(2),
        ..base
    };
    assert!(cache.get(&by_agent).is_none());
    assert!(cache.get(&by_tile).is_none());
    assert!(cache.get(&by_fingerprint).is_none());
    assert!(cache.get(&base).is_some());
}

#[test]
fn set_evicts_least_recently_released_first() {
    let cache = TileCache::new(20);
    let a = cache.set(key(1), tile_of_size(10)).unwrap();
    let b = cache.set(key(2), tile_of_size(10)).unwrap();
    // Release b before a: a is the more recently released.
    drop(b);
    drop(a);

    cache.set(key(3), tile_of_size(10)).unwrap();
    assert!(cache.get(&key(2)).is_none(), "b was released first");
    assert!(cache.get(&key(1)).is_some());
}

#[test]
fn set_does_not_evict_pinned_entries() {
    let cache = TileCache::new(10);
    let _pinned = cache.set(key(1), tile_of_size(10)).unwrap();
    assert!(cache.set(key(2), tile_of_size(10)).is_none());
    assert!(cache.get(&key(1)).is_some());
}

#[test]
fn get_repins_a_released_entry() {
    let cache = TileCache::new(10);
    let handle = cache.set(key(1), tile_of_size(10)).unwrap();
    drop(handle);
    let _repinned = cache.get(&key(1)).unwrap();
    // Entry is pinned again, so an insert that would need its bytes fails.
    assert!(cache.set(key(2), tile_of_size(10)).is_none());
}

#[test]
fn dropping_one_of_two_handles_keeps_the_pin() {
    let cache = TileCache::new(10);
    let first = cache.set(key(1), tile_of_size(10)).unwrap();
    let second = first.clone();
    drop(first);
    assert!(cache.set(key(2), tile_of_size(10)).is_none());
    drop(second);
    assert!(cache.set(key(2), tile_of_size(10)).is_some());
}

#[test]
fn set_for_resident_key_returns_existing_entry() {
    let cache = TileCache::new(1024);
    let original = cache.set(key(1), PreparedTile::new(vec![1, 2, 3])).unwrap();
    let replayed = cache.set(key(1), PreparedTile::new(vec![9, 9, 9])).unwrap();
    assert_eq!(replayed.bytes(), original.bytes());
    assert_eq!(cache.stats().entries, 1);
}

#[test]
fn resident_bytes_never_exceed_budget() {
    let cache = TileCache::new(64);
    let mut handles = Vec::new();
    for i in 0..40u64 {
        if let Some(handle) = cache.set(key(i), tile_of_size(7)) {
            // Hold on to every third handle to keep a mix of pinned and
            // unpinned entries.
            if i % 3 == 0 {
                handles.push(handle);
            }
        }
        let stats = cache.stats();
        assert!(
            stats.used_bytes <= stats.budget_bytes,
            "budget exceeded at step {i}: {stats:?}"
        );
    }
}
