//! Numeric types for tile coordinates and version counters.

use euclid::Point2D;

/// Unit tag for coordinates measured in whole tiles.
///
/// A tile is a fixed-size rectangular region of world space for which a
/// navigation-mesh fragment is computed independently.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[expect(clippy::exhaustive_structs)]
pub struct TileSpace;

/// Coordinates locked to the tile grid.
pub type TileCoord = i32;

/// Position of a tile on the grid.
pub type TilePos = Point2D<TileCoord, TileSpace>;

/// Convenience constructor for [`TilePos`].
#[inline]
pub fn tile_pos(x: TileCoord, y: TileCoord) -> TilePos {
    Point2D::new(x, y)
}

/// Identifier of an independent world space (interior, exterior, ...).
/// Distinct worldspaces have entirely separate tile grids.
pub type Worldspace = arcstr::ArcStr;

/// Monotonically increasing version pair.
///
/// `generation` changes when the subject is rebuilt from scratch;
/// `revision` increments on every incremental mutation within a
/// generation. Used both for input geometry and for the live mesh.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[expect(clippy::exhaustive_structs)]
pub struct Version {
    #[allow(missing_docs)]
    pub generation: u64,
    #[allow(missing_docs)]
    pub revision: u64,
}

/// Manhattan distance between two tiles, the metric used for
/// player-proximity priorities and wait thresholds.
#[inline]
pub fn manhattan_distance(a: TilePos, b: TilePos) -> i32 {
    (a.x - b.x).abs() + (a.y - b.y).abs()
}

/// Whether `tile` lies within the square radius of tiles kept resident
/// around `center`.
#[inline]
pub fn within_radius(tile: TilePos, center: TilePos, radius: i32) -> bool {
    (tile.x - center.x).abs().max((tile.y - center.y).abs()) <= radius
}
