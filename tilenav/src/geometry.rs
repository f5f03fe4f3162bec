//! Input geometry for tile builds and the source it comes from.

use std::hash::{Hash, Hasher as _};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tilenav_store::ShapeKind;

use crate::coords::{TilePos, Version, Worldspace};

/// Per-triangle area classification, passed through to the mesh builder.
pub type AreaId = u8;

/// A water surface covering (part of) a tile.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[expect(clippy::exhaustive_structs)]
pub struct WaterCell {
    /// Edge length of the covered square, in world units.
    pub cell_size: i32,
    /// Water level height.
    pub level: f32,
}

/// A non-geometric traversal edge (e.g. a door link) injected into a
/// tile's mesh.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[expect(clippy::exhaustive_structs)]
pub struct OffMeshConnection {
    #[allow(missing_docs)]
    pub start: [f32; 3],
    #[allow(missing_docs)]
    pub end: [f32; 3],
    #[allow(missing_docs)]
    pub area: AreaId,
}

/// Identity of one collision shape contributing to a tile's geometry,
/// used to key shapes in the persistent store.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[expect(clippy::exhaustive_structs)]
pub struct MeshSource {
    /// Name of the asset the shape came from.
    pub name: Worldspace,
    /// Classification stored alongside the shape.
    pub kind: ShapeKind,
    /// Content hash of the shape data.
    pub hash: [u8; 16],
}

/// Raw geometry relevant to one tile: a triangle soup plus water, special
/// traversal edges, and the identities of the shapes it was assembled from.
///
/// Immutable once produced; the pipeline shares snapshots of it across
/// threads behind [`Arc`].
#[derive(Clone, Debug, PartialEq)]
#[expect(clippy::exhaustive_structs)]
pub struct TileGeometry {
    /// Vertex positions, xyz triples.
    pub vertices: Box<[f32]>,
    /// Triangle vertex indices.
    pub indices: Box<[u32]>,
    /// Per-triangle area ids; same length as `indices.len() / 3`.
    pub areas: Box<[AreaId]>,
    #[allow(missing_docs)]
    pub water: Box<[WaterCell]>,
    #[allow(missing_docs)]
    pub off_mesh_connections: Box<[OffMeshConnection]>,
    /// Shapes this geometry was assembled from, for store keying.
    pub sources: Box<[MeshSource]>,
    /// Version of the source data this snapshot was taken at.
    pub version: Version,
}

/// Structural hash of a tile's input geometry, used as a cache key
/// component so that geometrically identical tiles share one cache entry
/// even if discovered independently.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[expect(clippy::exhaustive_structs)]
pub struct Fingerprint(pub u64);

impl TileGeometry {
    /// True when there is nothing to build a mesh from.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty() && self.water.is_empty()
    }

    /// Computes the structural fingerprint over the vertex, index, area,
    /// water, and off-mesh-connection buffers.
    ///
    /// Deliberately excludes `sources` and `version`: two snapshots with
    /// identical buffers are interchangeable as build input no matter where
    /// they came from or when.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = std::hash::DefaultHasher::new();
        for &v in &self.vertices {
            hasher.write_u32(v.to_bits());
        }
        for &i in &self.indices {
            hasher.write_u32(i);
        }
        hasher.write(&self.areas);
        for cell in &self.water {
            hasher.write_i32(cell.cell_size);
            hasher.write_u32(cell.level.to_bits());
        }
        for connection in &self.off_mesh_connections {
            for &c in connection.start.iter().chain(&connection.end) {
                hasher.write_u32(c.to_bits());
            }
            connection.area.hash(&mut hasher);
        }
        Fingerprint(hasher.finish())
    }
}

/// Supplier of raw tile geometry; the pipeline's upstream collaborator.
///
/// Implementations are queried from worker threads and must be prepared
/// for concurrent calls.
pub trait GeometrySource: Send + Sync {
    /// Returns a snapshot of the geometry relevant to `tile`, or [`None`]
    /// when the tile has no known geometry at all.
    fn get(&self, worldspace: &Worldspace, tile: TilePos) -> Option<Arc<TileGeometry>>;

    /// Called after every install attempt with the geometry version that
    /// was built and the resulting mesh version, so the source can track
    /// which of its changes have been consumed.
    fn report_change(&self, tile: TilePos, geometry_version: Version, mesh_version: Version) {
        let _ = (tile, geometry_version, mesh_version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::geometry_with_seed;
    use pretty_assertions::assert_eq;

    #[test]
    fn identical_buffers_share_a_fingerprint() {
        let a = geometry_with_seed(7);
        let mut b = geometry_with_seed(7);
        // Discovery metadata must not affect the fingerprint.
        b.version = Version {
            generation: 9,
            revision: 9,
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn each_buffer_contributes_to_the_fingerprint() {
        let base = geometry_with_seed(7);

        let mut changed = base.clone();
        changed.vertices[0] += 1.0;
        assert_ne!(base.fingerprint(), changed.fingerprint());

        let mut changed = base.clone();
        changed.areas[0] ^= 1;
        assert_ne!(base.fingerprint(), changed.fingerprint());

        let mut changed = base.clone();
        changed.off_mesh_connections = Box::new([]);
        assert_ne!(base.fingerprint(), changed.fingerprint());
    }

    #[test]
    fn emptiness_requires_no_triangles_and_no_water() {
        let mut geometry = geometry_with_seed(1);
        assert!(!geometry.is_empty());
        geometry.indices = Box::new([]);
        assert!(!geometry.is_empty()); // water remains
        geometry.water = Box::new([]);
        assert!(geometry.is_empty());
    }
}
