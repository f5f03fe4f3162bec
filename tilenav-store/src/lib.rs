//! Persistent storage access layer for navigation-mesh tiles.
//!
//! This crate defines the boundary between the tile update pipeline and the
//! on-disk database engine that stores previously computed tiles:
//!
//! * [`StoreEngine`] is the engine boundary. An implementation provides a
//!   fixed two-table shape: `tiles`, unique on (worldspace, x, y, input),
//!   and `shapes`, unique on (name, kind, hash). Blobs cross this boundary
//!   already compressed.
//! * [`TileStore`] wraps an engine and owns the parts that are not the
//!   engine's business: gzip compression of the `input` and `data` blobs,
//!   and decompression (with integrity checking) on read.
//! * [`MemoryEngine`](memory::MemoryEngine) is a reference engine used in
//!   tests and by embedders that do not want persistence on disk.

use std::io::{Read as _, Write as _};

mod engine;
pub use engine::{ShapeKind, StoreEngine, StoreError, StoreResult};

pub mod memory;
pub use memory::MemoryEngine;

// --- Identity and record types ---

/// Stable identity of a stored tile record.
///
/// Identities survive updates to the same (worldspace, position, input) key.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[expect(clippy::exhaustive_structs)]
pub struct TileId(pub u64);

/// Stable identity of a stored geometry shape.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[expect(clippy::exhaustive_structs)]
pub struct ShapeId(pub u64);

/// Version of the serialized tile data format.
///
/// A stored record whose version does not match the current format is
/// treated by readers as a cache miss, never as corrupt data.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[expect(clippy::exhaustive_structs)]
pub struct FormatVersion(pub u32);

/// Identity and format version of a stored tile, without its payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[expect(clippy::exhaustive_structs)]
pub struct TileHeader {
    #[allow(missing_docs)]
    pub tile_id: TileId,
    #[allow(missing_docs)]
    pub version: FormatVersion,
}

/// A stored tile together with its payload bytes.
///
/// When returned from [`TileStore::get_tile()`] the payload has already been
/// decompressed.
#[derive(Clone, Debug, Eq, PartialEq)]
#[expect(clippy::exhaustive_structs)]
pub struct TileRecord {
    #[allow(missing_docs)]
    pub tile_id: TileId,
    #[allow(missing_docs)]
    pub version: FormatVersion,
    /// Serialized prepared-tile bytes.
    pub data: Vec<u8>,
}

// --- Access layer ---

/// Access layer over a [`StoreEngine`].
///
/// All `input` and `data` blobs handed to this type are uncompressed; the
/// access layer compresses them before they reach the engine and
/// decompresses on the way out. Gzip integrity checking means that a
/// truncated or bit-rotted record surfaces as [`StoreError::Corrupt`]
/// rather than as garbage tile bytes.
pub struct TileStore {
    engine: Box<dyn StoreEngine>,
}

impl std::fmt::Debug for TileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStore").finish_non_exhaustive()
    }
}

impl TileStore {
    /// Wraps the given storage engine.
    pub fn new(engine: Box<dyn StoreEngine>) -> Self {
        Self { engine }
    }

    /// Returns the largest tile identity currently present, or `TileId(0)`
    /// for an empty store. Used to seed identity counters at startup.
    pub fn max_tile_id(&self) -> StoreResult<TileId> {
        self.engine.max_tile_id()
    }

    /// Returns the largest shape identity currently present, or
    /// `ShapeId(0)` for an empty store.
    pub fn max_shape_id(&self) -> StoreResult<ShapeId> {
        self.engine.max_shape_id()
    }

    /// Looks up the identity and version of the tile stored under the given
    /// key, without fetching its payload.
    pub fn find_tile(
        &self,
        worldspace: &str,
        x: i32,
        y: i32,
        input: &[u8],
    ) -> StoreResult<Option<TileHeader>> {
        self.engine.find_tile(worldspace, x, y, &compress(input))
    }

    /// Fetches the tile stored under the given key, decompressing its
    /// payload.
    pub fn get_tile(
        &self,
        worldspace: &str,
        x: i32,
        y: i32,
        input: &[u8],
    ) -> StoreResult<Option<TileRecord>> {
        let Some(mut record) = self
            .engine
            .get_tile_data(worldspace, x, y, &compress(input))?
        else {
            return Ok(None);
        };
        record.data = decompress(&record.data)?;
        Ok(Some(record))
    }

    /// Inserts a new tile record with an explicit identity.
    pub fn insert_tile(
        &mut self,
        tile_id: TileId,
        worldspace: &str,
        x: i32,
        y: i32,
        version: FormatVersion,
        input: &[u8],
        data: &[u8],
    ) -> StoreResult<()> {
        self.engine.insert_tile(
            tile_id,
            worldspace,
            x,
            y,
            version,
            &compress(input),
            &compress(data),
        )
    }

    /// Replaces the payload and version of an existing record, bumping its
    /// revision. The identity is stable across updates.
    pub fn update_tile(
        &mut self,
        tile_id: TileId,
        version: FormatVersion,
        data: &[u8],
    ) -> StoreResult<()> {
        self.engine.update_tile(tile_id, version, &compress(data))
    }

    /// Deletes every record at the given tile position.
    /// Returns the number of deleted records.
    pub fn delete_tiles_at(&mut self, worldspace: &str, x: i32, y: i32) -> StoreResult<usize> {
        self.engine.delete_tiles_at(worldspace, x, y)
    }

    /// Deletes every record at the given tile position except the one with
    /// the given identity. Used by pruning tools to keep the live variant.
    pub fn delete_tiles_at_except(
        &mut self,
        worldspace: &str,
        x: i32,
        y: i32,
        exclude: TileId,
    ) -> StoreResult<usize> {
        self.engine.delete_tiles_at_except(worldspace, x, y, exclude)
    }

    /// Deletes every record outside the half-open position range
    /// `begin..end`.
    pub fn delete_tiles_outside_range(
        &mut self,
        worldspace: &str,
        begin: [i32; 2],
        end: [i32; 2],
    ) -> StoreResult<usize> {
        self.engine.delete_tiles_outside_range(worldspace, begin, end)
    }

    /// Looks up a shape identity by its unique (name, kind, hash) key.
    pub fn find_shape_id(
        &self,
        name: &str,
        kind: ShapeKind,
        hash: &[u8],
    ) -> StoreResult<Option<ShapeId>> {
        self.engine.find_shape_id(name, kind, hash)
    }

    /// Inserts a new shape identity.
    pub fn insert_shape(
        &mut self,
        shape_id: ShapeId,
        name: &str,
        kind: ShapeKind,
        hash: &[u8],
    ) -> StoreResult<()> {
        self.engine.insert_shape(shape_id, name, kind, hash)
    }

    /// Asks the engine to reclaim space after bulk deletions.
    pub fn vacuum(&mut self) -> StoreResult<()> {
        self.engine.vacuum()
    }
}

fn compress(bytes: &[u8]) -> Vec<u8> {
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

fn decompress(bytes: &[u8]) -> StoreResult<Vec<u8>> {
    let mut decoder = flate2::bufread::GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn compression_round_trip() {
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(decompress(&compress(&payload)).unwrap(), payload);
    }

    #[test]
    fn decompress_rejects_garbage() {
        assert!(matches!(
            decompress(b"not gzip at all"),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn store_round_trips_through_engine() {
        let mut store = TileStore::new(Box::new(MemoryEngine::new(None)));
        let input = b"serialized input";
        let data = b"prepared tile bytes";
        store
            .insert_tile(TileId(1), "wsp", 2, -3, FormatVersion(7), input, data)
            .unwrap();

        let header = store.find_tile("wsp", 2, -3, input).unwrap().unwrap();
        assert_eq!(
            header,
            TileHeader {
                tile_id: TileId(1),
                version: FormatVersion(7)
            }
        );

        let record = store.get_tile("wsp", 2, -3, input).unwrap().unwrap();
        assert_eq!(record.data, data);

        // A different input is a different key entirely.
        assert_eq!(store.get_tile("wsp", 2, -3, b"other input").unwrap(), None);
    }

    #[test]
    fn update_preserves_identity_and_bumps_payload() {
        let mut store = TileStore::new(Box::new(MemoryEngine::new(None)));
        let input = b"input";
        store
            .insert_tile(TileId(5), "wsp", 0, 0, FormatVersion(1), input, b"old")
            .unwrap();
        store
            .update_tile(TileId(5), FormatVersion(2), b"new")
            .unwrap();

        let record = store.get_tile("wsp", 0, 0, input).unwrap().unwrap();
        assert_eq!(record.tile_id, TileId(5));
        assert_eq!(record.version, FormatVersion(2));
        assert_eq!(record.data, b"new");
    }
}
