//! The live, queryable navigation mesh and its tile merge rules.

use std::sync::{Arc, Mutex};

use hashbrown::HashMap;

use crate::builder::PreparedTile;
use crate::cache::CachedTile;
use crate::coords::{TilePos, Version, Worldspace};

/// Prepared tile bytes together with the owner of their backing memory.
///
/// Installing a `Cached` value keeps the cache entry pinned for as long as
/// the tile is resident, so a later rebuild of identical geometry is a
/// cache hit.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum TileData {
    /// Freshly built, owned outright.
    Built(PreparedTile),
    /// Shared with the in-memory cache.
    Cached(CachedTile),
}

impl TileData {
    /// The prepared mesh bytes.
    pub fn bytes(&self) -> &[u8] {
        match self {
            TileData::Built(tile) => tile.bytes(),
            TileData::Cached(handle) => handle.bytes(),
        }
    }
}

/// Result of one install attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[expect(clippy::exhaustive_enums)]
pub enum InstallOutcome {
    /// Candidate was byte-identical to the installed tile; nothing changed
    /// and the mesh revision did not move.
    Ignored,
    /// Tile installed where none was resident.
    Added,
    /// Previous tile removed and candidate installed.
    Replaced,
    /// Previous tile removed but the candidate could not be installed; the
    /// slot is now empty rather than stale.
    Lost,
}

impl InstallOutcome {
    /// Whether the attempt left the mesh in the intended state.
    pub fn is_success(self) -> bool {
        !matches!(self, InstallOutcome::Lost)
    }
}

#[derive(Debug)]
enum Slot {
    Present(TileData),
    /// Explicitly known to have no walkable surface.
    Empty,
}

/// The mutable, versioned navigation mesh callers query.
///
/// The update pipeline is the sole writer; see [`SharedLiveMesh`] for the
/// shared handle. Every successful mutation bumps the revision of
/// [`Self::version()`], which read-only path-query consumers use to detect
/// staleness.
#[derive(Debug)]
pub struct LiveNavMesh {
    worldspace: Worldspace,
    capacity: usize,
    tiles: HashMap<TilePos, Slot>,
    version: Version,
}

/// Shared handle to a [`LiveNavMesh`].
pub type SharedLiveMesh = Arc<Mutex<LiveNavMesh>>;

impl LiveNavMesh {
    /// Creates an empty mesh for `worldspace` holding at most `capacity`
    /// resident tiles. `generation` distinguishes this mesh from any
    /// predecessor that covered the same worldspace.
    pub fn new(worldspace: Worldspace, generation: u64, capacity: usize) -> Self {
        Self {
            worldspace,
            capacity,
            tiles: HashMap::new(),
            version: Version {
                generation,
                revision: 0,
            },
        }
    }

    /// Like [`Self::new`] but already wrapped for sharing with the pipeline.
    pub fn new_shared(worldspace: Worldspace, generation: u64, capacity: usize) -> SharedLiveMesh {
        Arc::new(Mutex::new(Self::new(worldspace, generation, capacity)))
    }

    #[allow(missing_docs)]
    pub fn worldspace(&self) -> &Worldspace {
        &self.worldspace
    }

    /// Current version; the revision increments on every successful
    /// mutation.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Bytes of the tile installed at `tile`, if any.
    pub fn tile_bytes(&self, tile: TilePos) -> Option<&[u8]> {
        match self.tiles.get(&tile) {
            Some(Slot::Present(data)) => Some(data.bytes()),
            Some(Slot::Empty) | None => None,
        }
    }

    /// Whether `tile` is explicitly recorded as having no walkable surface.
    pub fn is_marked_empty(&self, tile: TilePos) -> bool {
        matches!(self.tiles.get(&tile), Some(Slot::Empty))
    }

    /// Number of resident (non-empty) tiles.
    pub fn resident_tiles(&self) -> usize {
        self.tiles
            .values()
            .filter(|slot| matches!(slot, Slot::Present(_)))
            .count()
    }

    /// Installs `candidate` at `tile`.
    ///
    /// Always removes-then-adds so a failed add never leaves a stale tile
    /// resident. Byte-identical reinstallation is detected up front and
    /// reported as [`InstallOutcome::Ignored`] without touching the
    /// revision, to avoid needless staleness signaling downstream.
    pub fn install_tile(&mut self, tile: TilePos, candidate: TileData) -> InstallOutcome {
        if let Some(Slot::Present(installed)) = self.tiles.get(&tile) {
            if installed.bytes() == candidate.bytes() {
                return InstallOutcome::Ignored;
            }
        }

        let removed = matches!(self.tiles.remove(&tile), Some(Slot::Present(_)));
        if removed {
            self.version.revision += 1;
        }

        if self.resident_tiles() >= self.capacity {
            // The removal (if any) stands; better an absent tile than a
            // stale one.
            return InstallOutcome::Lost;
        }
        self.tiles.insert(tile, Slot::Present(candidate));
        self.version.revision += 1;
        if removed {
            InstallOutcome::Replaced
        } else {
            InstallOutcome::Added
        }
    }

    /// Records that `tile` has no walkable surface, removing any installed
    /// tile. Returns [`InstallOutcome::Ignored`] when it was already so
    /// marked.
    pub fn mark_empty(&mut self, tile: TilePos) -> InstallOutcome {
        match self.tiles.insert(tile, Slot::Empty) {
            Some(Slot::Empty) => InstallOutcome::Ignored,
            Some(Slot::Present(_)) => {
                self.version.revision += 1;
                InstallOutcome::Replaced
            }
            None => InstallOutcome::Added,
        }
    }

    /// Removes whatever is recorded at `tile`. Returns whether a resident
    /// tile was removed (removing an empty marker does not count and does
    /// not bump the revision).
    pub fn remove_tile(&mut self, tile: TilePos) -> bool {
        match self.tiles.remove(&tile) {
            Some(Slot::Present(_)) => {
                self.version.revision += 1;
                true
            }
            Some(Slot::Empty) | None => false,
        }
    }
}
