//! Pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration of the update pipeline.
///
/// Plain data with [`Default`] values usable as-is; embedders typically
/// deserialize this from their own configuration file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Settings {
    /// Number of worker threads draining the job queue.
    pub worker_threads: usize,

    /// Square radius, in tiles, kept resident around the player. Jobs for
    /// tiles outside this radius are demoted to removals.
    pub max_tile_radius: i32,

    /// Minimum interval between two builds of the same tile triggered by
    /// `update`-type changes. Throttles cosmetic churn.
    pub min_update_interval: Duration,

    /// How many times a failing job is retried before being dropped.
    pub max_tries: u32,

    /// `wait(RequiredTilesPresent)` returns once every absent tile is at
    /// least this many tiles (Manhattan) from the player. Zero disables
    /// that wait mode entirely.
    pub wait_until_min_distance_to_player: i32,

    /// Byte budget of the in-memory prepared-tile cache.
    pub max_tiles_cache_size: usize,

    /// Whether generated tiles are written back to the persistent store
    /// (when one is configured).
    pub write_to_store: bool,

    /// Maximum number of tiles resident in one live mesh.
    pub max_resident_tiles: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            max_tile_radius: 8,
            min_update_interval: Duration::from_millis(250),
            max_tries: 3,
            wait_until_min_distance_to_player: 5,
            max_tiles_cache_size: 32 * 1024 * 1024,
            write_to_store: true,
            max_resident_tiles: 512,
        }
    }
}

/// Parameters of the mesh-building math, passed through to the
/// [`MeshBuilder`](crate::MeshBuilder) and serialized into the persistent
/// store key (tiles built with different parameters must not alias).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct BuildParams {
    #[allow(missing_docs)]
    pub cell_size: f32,
    #[allow(missing_docs)]
    pub cell_height: f32,
    #[allow(missing_docs)]
    pub detail_sample_dist: f32,
    #[allow(missing_docs)]
    pub detail_sample_max_error: f32,
    #[allow(missing_docs)]
    pub max_climb: f32,
    #[allow(missing_docs)]
    pub max_simplification_error: f32,
    #[allow(missing_docs)]
    pub max_slope: f32,
    #[allow(missing_docs)]
    pub border_size: i32,
    #[allow(missing_docs)]
    pub max_edge_len: i32,
    #[allow(missing_docs)]
    pub max_verts_per_poly: i32,
    #[allow(missing_docs)]
    pub region_merge_area: i32,
    #[allow(missing_docs)]
    pub region_min_area: i32,
    /// Tile edge length in cells.
    pub tile_size: i32,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            cell_size: 0.2,
            cell_height: 0.2,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            max_climb: 0.5,
            max_simplification_error: 1.3,
            max_slope: 60.0,
            border_size: 16,
            max_edge_len: 12,
            max_verts_per_poly: 6,
            region_merge_area: 400,
            region_min_area: 64,
            tile_size: 128,
        }
    }
}
