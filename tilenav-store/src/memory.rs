//! In-memory [`StoreEngine`] implementation.

use arcstr::ArcStr;
use hashbrown::HashMap;

use crate::{
    FormatVersion, ShapeId, ShapeKind, StoreEngine, StoreError, StoreResult, TileHeader, TileId,
    TileRecord,
};

/// A [`StoreEngine`] backed by process memory.
///
/// Honors the same unique keys a database engine would and, when
/// constructed with a size limit, fails inserts and growth with
/// [`StoreError::Full`] once the limit is reached — which lets tests
/// exercise the pipeline's write-disabling behavior without a real disk.
#[derive(Debug)]
pub struct MemoryEngine {
    max_size: Option<usize>,
    used: usize,
    tiles: HashMap<TileId, TileRow>,
    tile_index: HashMap<TileKey, TileId>,
    shapes: HashMap<ShapeKey, ShapeId>,
    shape_ids: hashbrown::HashSet<ShapeId>,
}

#[derive(Debug)]
struct TileRow {
    worldspace: ArcStr,
    x: i32,
    y: i32,
    version: FormatVersion,
    revision: u64,
    input: Vec<u8>,
    data: Vec<u8>,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct TileKey {
    worldspace: ArcStr,
    x: i32,
    y: i32,
    input: Vec<u8>,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct ShapeKey {
    name: ArcStr,
    kind: ShapeKind,
    hash: Vec<u8>,
}

impl MemoryEngine {
    /// Creates an empty engine. `max_size` bounds the total byte size of
    /// stored blobs; `None` means unbounded.
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            max_size,
            used: 0,
            tiles: HashMap::new(),
            tile_index: HashMap::new(),
            shapes: HashMap::new(),
            shape_ids: hashbrown::HashSet::new(),
        }
    }

    /// Number of tile records currently stored.
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Number of shape identities currently stored.
    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    /// Revision of the record with the given identity, if present.
    pub fn tile_revision(&self, tile_id: TileId) -> Option<u64> {
        self.tiles.get(&tile_id).map(|row| row.revision)
    }

    /// Payload (still compressed) of the record with the given identity.
    pub fn tile_payload(&self, tile_id: TileId) -> Option<Vec<u8>> {
        self.tiles.get(&tile_id).map(|row| row.data.clone())
    }

    fn check_growth(&self, added: usize) -> StoreResult<()> {
        match self.max_size {
            Some(max) if self.used + added > max => Err(StoreError::Full),
            _ => Ok(()),
        }
    }

    fn remove_rows(&mut self, ids: Vec<TileId>) -> usize {
        for id in &ids {
            if let Some(row) = self.tiles.remove(id) {
                self.used -= row.input.len() + row.data.len();
                self.tile_index.remove(&TileKey {
                    worldspace: row.worldspace,
                    x: row.x,
                    y: row.y,
                    input: row.input,
                });
            }
        }
        ids.len()
    }
}

impl StoreEngine for MemoryEngine {
    fn max_tile_id(&self) -> StoreResult<TileId> {
        Ok(self.tiles.keys().max().copied().unwrap_or(TileId(0)))
    }

    fn find_tile(
        &self,
        worldspace: &str,
        x: i32,
        y: i32,
        input: &[u8],
    ) -> StoreResult<Option<TileHeader>> {
        let key = TileKey {
            worldspace: ArcStr::from(worldspace),
            x,
            y,
            input: input.to_vec(),
        };
        Ok(self.tile_index.get(&key).map(|&tile_id| TileHeader {
            tile_id,
            version: self.tiles[&tile_id].version,
        }))
    }

    fn get_tile_data(
        &self,
        worldspace: &str,
        x: i32,
        y: i32,
        input: &[u8],
    ) -> StoreResult<Option<TileRecord>> {
        Ok(self
            .find_tile(worldspace, x, y, input)?
            .map(|header| TileRecord {
                tile_id: header.tile_id,
                version: header.version,
                data: self.tiles[&header.tile_id].data.clone(),
            }))
    }

    fn insert_tile(
        &mut self,
        tile_id: TileId,
        worldspace: &str,
        x: i32,
        y: i32,
        version: FormatVersion,
        input: &[u8],
        data: &[u8],
    ) -> StoreResult<()> {
        if self.tiles.contains_key(&tile_id) {
            return Err(StoreError::DuplicateId(tile_id.0));
        }
        let key = TileKey {
            worldspace: ArcStr::from(worldspace),
            x,
            y,
            input: input.to_vec(),
        };
        if self.tile_index.contains_key(&key) {
            return Err(StoreError::Other(format!(
                "duplicate tile key at ({x}, {y}) in {worldspace:?}"
            )));
        }
        self.check_growth(input.len() + data.len())?;
        self.used += input.len() + data.len();
        self.tile_index.insert(key, tile_id);
        self.tiles.insert(
            tile_id,
            TileRow {
                worldspace: ArcStr::from(worldspace),
                x,
                y,
                version,
                revision: 1,
                input: input.to_vec(),
                data: data.to_vec(),
            },
        );
        Ok(())
    }

    fn update_tile(
        &mut self,
        tile_id: TileId,
        version: FormatVersion,
        data: &[u8],
    ) -> StoreResult<()> {
        let Some(row) = self.tiles.get_mut(&tile_id) else {
            return Err(StoreError::Other(format!("no tile with identity {}", tile_id.0)));
        };
        let old_len = row.data.len();
        if let Some(max) = self.max_size {
            if self.used + data.len().saturating_sub(old_len) > max {
                return Err(StoreError::Full);
            }
        }
        self.used = self.used - old_len + data.len();
        row.version = version;
        row.revision += 1;
        row.data = data.to_vec();
        Ok(())
    }

    fn delete_tiles_at(&mut self, worldspace: &str, x: i32, y: i32) -> StoreResult<usize> {
        let ids: Vec<TileId> = self
            .tiles
            .iter()
            .filter(|(_, row)| row.worldspace == worldspace && row.x == x && row.y == y)
            .map(|(&id, _)| id)
            .collect();
        Ok(self.remove_rows(ids))
    }

    fn delete_tiles_at_except(
        &mut self,
        worldspace: &str,
        x: i32,
        y: i32,
        exclude: TileId,
    ) -> StoreResult<usize> {
        let ids: Vec<TileId> = self
            .tiles
            .iter()
            .filter(|&(&id, row)| {
                id != exclude && row.worldspace == worldspace && row.x == x && row.y == y
            })
            .map(|(&id, _)| id)
            .collect();
        Ok(self.remove_rows(ids))
    }

    fn delete_tiles_outside_range(
        &mut self,
        worldspace: &str,
        begin: [i32; 2],
        end: [i32; 2],
    ) -> StoreResult<usize> {
        let ids: Vec<TileId> = self
            .tiles
            .iter()
            .filter(|(_, row)| {
                row.worldspace == worldspace
                    && (row.x < begin[0] || row.y < begin[1] || row.x >= end[0] || row.y >= end[1])
            })
            .map(|(&id, _)| id)
            .collect();
        Ok(self.remove_rows(ids))
    }

    fn max_shape_id(&self) -> StoreResult<ShapeId> {
        Ok(self.shapes.values().max().copied().unwrap_or(ShapeId(0)))
    }

    fn find_shape_id(
        &self,
        name: &str,
        kind: ShapeKind,
        hash: &[u8],
    ) -> StoreResult<Option<ShapeId>> {
        Ok(self
            .shapes
            .get(&ShapeKey {
                name: ArcStr::from(name),
                kind,
                hash: hash.to_vec(),
            })
            .copied())
    }

    fn insert_shape(
        &mut self,
        shape_id: ShapeId,
        name: &str,
        kind: ShapeKind,
        hash: &[u8],
    ) -> StoreResult<()> {
        if !self.shape_ids.insert(shape_id) {
            return Err(StoreError::DuplicateId(shape_id.0));
        }
        self.check_growth(hash.len())?;
        self.used += hash.len();
        self.shapes.insert(
            ShapeKey {
                name: ArcStr::from(name),
                kind,
                hash: hash.to_vec(),
            },
            shape_id,
        );
        Ok(())
    }

    fn vacuum(&mut self) -> StoreResult<()> {
        // Nothing fragments in a HashMap-backed engine.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine_with_one_tile() -> MemoryEngine {
        let mut engine = MemoryEngine::new(None);
        engine
            .insert_tile(TileId(1), "wsp", 0, 0, FormatVersion(1), b"in", b"data")
            .unwrap();
        engine
    }

    #[test]
    fn max_ids_for_empty_engine_are_zero() {
        let engine = MemoryEngine::new(None);
        assert_eq!(engine.max_tile_id().unwrap(), TileId(0));
        assert_eq!(engine.max_shape_id().unwrap(), ShapeId(0));
    }

    #[test]
    fn duplicate_tile_identity_is_reported() {
        let mut engine = engine_with_one_tile();
        assert_eq!(
            engine.insert_tile(TileId(1), "wsp", 1, 1, FormatVersion(1), b"in2", b"d"),
            Err(StoreError::DuplicateId(1))
        );
    }

    #[test]
    fn size_limit_reports_full() {
        let mut engine = MemoryEngine::new(Some(8));
        assert_eq!(
            engine.insert_tile(
                TileId(1),
                "wsp",
                0,
                0,
                FormatVersion(1),
                b"12345",
                b"12345"
            ),
            Err(StoreError::Full)
        );
        assert_eq!(engine.tile_count(), 0);
    }

    #[test]
    fn update_bumps_revision_in_place() {
        let mut engine = engine_with_one_tile();
        engine.update_tile(TileId(1), FormatVersion(2), b"data2").unwrap();
        assert_eq!(engine.tile_revision(TileId(1)), Some(2));
        let record = engine.get_tile_data("wsp", 0, 0, b"in").unwrap().unwrap();
        assert_eq!(record.version, FormatVersion(2));
        assert_eq!(record.data, b"data2");
    }

    #[test]
    fn delete_tiles_outside_range_keeps_interior() {
        let mut engine = MemoryEngine::new(None);
        for (id, x, y) in [(1, 0, 0), (2, 5, 5), (3, -1, 0), (4, 0, 10)] {
            engine
                .insert_tile(
                    TileId(id),
                    "wsp",
                    x,
                    y,
                    FormatVersion(1),
                    format!("in{id}").as_bytes(),
                    b"d",
                )
                .unwrap();
        }
        let deleted = engine
            .delete_tiles_outside_range("wsp", [0, 0], [10, 10])
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(engine.tile_count(), 2);
    }

    #[test]
    fn shape_identities_are_unique_per_key() {
        let mut engine = MemoryEngine::new(None);
        engine
            .insert_shape(ShapeId(1), "door", ShapeKind::Collision, b"hash")
            .unwrap();
        assert_eq!(
            engine
                .find_shape_id("door", ShapeKind::Collision, b"hash")
                .unwrap(),
            Some(ShapeId(1))
        );
        // Same name, different kind: distinct key.
        assert_eq!(
            engine.find_shape_id("door", ShapeKind::Avoid, b"hash").unwrap(),
            None
        );
        assert_eq!(
            engine.insert_shape(ShapeId(1), "window", ShapeKind::Avoid, b"h2"),
            Err(StoreError::DuplicateId(1))
        );
    }
}
