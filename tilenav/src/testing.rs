//! Fakes for the pipeline's external collaborators, used across the test
//! modules.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hashbrown::{HashMap, HashSet};

use tilenav_store::{
    FormatVersion, ShapeId, ShapeKind, StoreEngine, StoreResult, TileHeader, TileId, TileRecord,
    memory::MemoryEngine,
};

use crate::agent::AgentShape;
use crate::builder::{MeshBuilder, PreparedTile};
use crate::coords::{TilePos, Version, Worldspace};
use crate::geometry::{
    GeometrySource, MeshSource, OffMeshConnection, TileGeometry, WaterCell,
};
use crate::settings::BuildParams;

/// Small but fully populated geometry whose buffers vary with `seed`.
pub(crate) fn geometry_with_seed(seed: u32) -> TileGeometry {
    let s = seed as f32;
    TileGeometry {
        vertices: Box::new([0.0, 0.0, 0.0, s + 1.0, 0.0, 0.0, 0.0, s + 1.0, 0.0]),
        indices: Box::new([0, 1, 2]),
        areas: Box::new([seed as u8]),
        water: Box::new([WaterCell {
            cell_size: 64,
            level: s * 0.5,
        }]),
        off_mesh_connections: Box::new([OffMeshConnection {
            start: [0.0; 3],
            end: [s, 0.0, 0.0],
            area: 1,
        }]),
        sources: Box::new([MeshSource {
            name: arcstr::format!("shape-{seed}"),
            kind: ShapeKind::Collision,
            hash: [seed as u8; 16],
        }]),
        version: Version {
            generation: 1,
            revision: u64::from(seed),
        },
    }
}

/// Geometry source backed by a map, recording `report_change` calls.
#[derive(Default)]
pub(crate) struct FakeGeometrySource {
    tiles: Mutex<HashMap<(Worldspace, TilePos), Arc<TileGeometry>>>,
    reports: Mutex<Vec<(TilePos, Version, Version)>>,
}

impl FakeGeometrySource {
    pub fn insert(&self, worldspace: &Worldspace, tile: TilePos, geometry: TileGeometry) {
        self.tiles
            .lock()
            .unwrap()
            .insert((worldspace.clone(), tile), Arc::new(geometry));
    }

    pub fn reports(&self) -> Vec<(TilePos, Version, Version)> {
        self.reports.lock().unwrap().clone()
    }
}

impl GeometrySource for FakeGeometrySource {
    fn get(&self, worldspace: &Worldspace, tile: TilePos) -> Option<Arc<TileGeometry>> {
        self.tiles
            .lock()
            .unwrap()
            .get(&(worldspace.clone(), tile))
            .cloned()
    }

    fn report_change(&self, tile: TilePos, geometry_version: Version, mesh_version: Version) {
        self.reports
            .lock()
            .unwrap()
            .push((tile, geometry_version, mesh_version));
    }
}

/// Deterministic builder: output bytes derive from the geometry
/// fingerprint, the tile, and the agent, so identical inputs produce
/// identical tiles.
///
/// Also checks the pipeline's central promise from the outside: it counts
/// a violation whenever two builds for the same (agent, tile) pair overlap
/// in time.
#[derive(Default)]
pub(crate) struct StubMeshBuilder {
    pub builds: AtomicUsize,
    /// When set, every build reports "no walkable surface".
    pub fail: AtomicBool,
    /// When set, every build panics, imitating a crashing external
    /// library.
    pub panic: AtomicBool,
    /// Sleep this long inside each build, to let tests hold a worker busy.
    pub delay_ms: AtomicU64,
    active: Mutex<HashSet<(AgentShape, TilePos)>>,
    pub overlap_violations: AtomicUsize,
}

impl MeshBuilder for StubMeshBuilder {
    fn build(
        &self,
        geometry: &TileGeometry,
        tile: TilePos,
        agent: &AgentShape,
        _params: &BuildParams,
    ) -> Option<PreparedTile> {
        if !self.active.lock().unwrap().insert((*agent, tile)) {
            self.overlap_violations.fetch_add(1, Relaxed);
        }
        self.builds.fetch_add(1, Relaxed);

        let delay = self.delay_ms.load(Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.panic.load(Relaxed) {
            self.active.lock().unwrap().remove(&(*agent, tile));
            panic!("synthetic mesh builder crash");
        }

        let result = if self.fail.load(Relaxed) {
            None
        } else {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&geometry.fingerprint().0.to_le_bytes());
            bytes.extend_from_slice(&tile.x.to_le_bytes());
            bytes.extend_from_slice(&tile.y.to_le_bytes());
            bytes.extend_from_slice(&agent.half_extents()[2].to_le_bytes());
            Some(PreparedTile::new(bytes))
        };
        self.active.lock().unwrap().remove(&(*agent, tile));
        result
    }
}

/// [`StoreEngine`] sharing one [`MemoryEngine`] between a test and the
/// store worker that owns the `TileStore`.
#[derive(Clone, Debug)]
pub(crate) struct SharedEngine(pub Arc<Mutex<MemoryEngine>>);

impl SharedEngine {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(MemoryEngine::new(None))))
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self(Arc::new(Mutex::new(MemoryEngine::new(Some(max_size)))))
    }
}

impl StoreEngine for SharedEngine {
    fn max_tile_id(&self) -> StoreResult<TileId> {
        self.0.lock().unwrap().max_tile_id()
    }
    fn find_tile(
        &self,
        worldspace: &str,
        x: i32,
        y: i32,
        input: &[u8],
    ) -> StoreResult<Option<TileHeader>> {
        self.0.lock().unwrap().find_tile(worldspace, x, y, input)
    }
    fn get_tile_data(
        &self,
        worldspace: &str,
        x: i32,
        y: i32,
        input: &[u8],
    ) -> StoreResult<Option<TileRecord>> {
        self.0.lock().unwrap().get_tile_data(worldspace, x, y, input)
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
        self.0
            .lock()
            .unwrap()
            .insert_tile(tile_id, worldspace, x, y, version, input, data)
    }
    fn update_tile(
        &mut self,
        tile_id: TileId,
        version: FormatVersion,
        data: &[u8],
    ) -> StoreResult<()> {
        self.0.lock().unwrap().update_tile(tile_id, version, data)
    }
    fn delete_tiles_at(&mut self, worldspace: &str, x: i32, y: i32) -> StoreResult<usize> {
        self.0.lock().unwrap().delete_tiles_at(worldspace, x, y)
    }
    fn delete_tiles_at_except(
        &mut self,
        worldspace: &str,
        x: i32,
        y: i32,
        exclude: TileId,
    ) -> StoreResult<usize> {
        self.0
            .lock()
            .unwrap()
            .delete_tiles_at_except(worldspace, x, y, exclude)
    }
    fn delete_tiles_outside_range(
        &mut self,
        worldspace: &str,
        begin: [i32; 2],
        end: [i32; 2],
    ) -> StoreResult<usize> {
        self.0
            .lock()
            .unwrap()
            .delete_tiles_outside_range(worldspace, begin, end)
    }
    fn max_shape_id(&self) -> StoreResult<ShapeId> {
        self.0.lock().unwrap().max_shape_id()
    }
    fn find_shape_id(
        &self,
        name: &str,
        kind: ShapeKind,
        hash: &[u8],
    ) -> StoreResult<Option<ShapeId>> {
        self.0.lock().unwrap().find_shape_id(name, kind, hash)
    }
    fn insert_shape(
        &mut self,
        shape_id: ShapeId,
        name: &str,
        kind: ShapeKind,
        hash: &[u8],
    ) -> StoreResult<()> {
        self.0
            .lock()
            .unwrap()
            .insert_shape(shape_id, name, kind, hash)
    }
    fn vacuum(&mut self) -> StoreResult<()> {
        self.0.lock().unwrap().vacuum()
    }
}
