//! The mesh-builder boundary and its output type.

use std::sync::Arc;

use crate::agent::AgentShape;
use crate::coords::TilePos;
use crate::geometry::TileGeometry;
use crate::settings::BuildParams;

use tilenav_store::FormatVersion;

/// Version of the prepared-tile byte format.
///
/// Bump whenever [`PreparedTile`] bytes change meaning; stored records with
/// any other version are rebuilt instead of installed.
pub const NAVMESH_FORMAT_VERSION: FormatVersion = FormatVersion(1);

/// An immutable, prepared polygon-mesh tile, ready to be installed into a
/// live mesh or persisted.
///
/// The byte contents are opaque to the pipeline; only the builder and the
/// path-query consumer interpret them. Cloning is cheap (shared buffer).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PreparedTile {
    data: Arc<[u8]>,
}

impl PreparedTile {
    #[allow(missing_docs)]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { data: bytes.into() }
    }

    /// The prepared mesh bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Resident size used for cache accounting.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// The external library that turns raw geometry into a walkable polygon
/// mesh.
///
/// Returning [`None`] means "no walkable surface here" and results in an
/// empty tile; it is not an error and is never retried. Implementations
/// are called concurrently from worker threads; any per-thread scratch
/// state (e.g. an allocator arena) belongs inside the implementation.
pub trait MeshBuilder: Send + Sync {
    /// Builds the prepared mesh for one tile.
    fn build(
        &self,
        geometry: &TileGeometry,
        tile: TilePos,
        agent: &AgentShape,
        params: &BuildParams,
    ) -> Option<PreparedTile>;
}
