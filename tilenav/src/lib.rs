//! Asynchronous navigation-mesh tile update pipeline.
//!
//! This crate decides, schedules, deduplicates, caches, and persists the
//! (re)computation of pathfinding-mesh tiles for one or more agent shapes
//! as the surrounding world geometry changes:
//!
//! * [`TileUpdater`] owns the job queue, its priority ordering, and the
//!   worker threads; at most one build is ever in flight per
//!   (agent shape, tile) pair.
//! * [`TileCache`] is the in-memory, byte-budgeted cache of prepared
//!   tiles, shared by reference counting with installed tiles.
//! * [`LiveNavMesh`] is the versioned mesh structure callers query; the
//!   updater is its sole writer.
//! * The persistent tier lives in the companion `tilenav-store` crate and
//!   is driven by a dedicated background worker.
//!
//! The geometry math itself is external: implement [`GeometrySource`] to
//! supply raw tile geometry and [`MeshBuilder`] to turn it into prepared
//! mesh tiles.
//!
//! All work is best-effort background computation. Callers observe
//! outcomes through [`TileUpdater::wait`], [`TileUpdater::stats`], and the
//! state of their live meshes; nothing is reported synchronously from
//! [`TileUpdater::post`].

// --- Modules ---

mod agent;
pub use agent::{AgentKind, AgentShape, InvalidAgentShape};

mod builder;
pub use builder::{MeshBuilder, NAVMESH_FORMAT_VERSION, PreparedTile};

mod cache;
pub use cache::{CacheKey, CacheStats, CachedTile, TileCache};

pub mod coords;

mod geometry;
pub use geometry::{
    AreaId, Fingerprint, GeometrySource, MeshSource, OffMeshConnection, TileGeometry, WaterCell,
};

mod jobs;
pub use jobs::ChangeType;

mod live_mesh;
pub use live_mesh::{InstallOutcome, LiveNavMesh, SharedLiveMesh, TileData};

mod queue;

mod scheduler;
pub use scheduler::{ProgressListener, TileUpdater, UpdaterStats, WaitMode};

mod settings;
pub use settings::{BuildParams, Settings};

mod store_worker;
pub use store_worker::StoreWorkerStats;

#[cfg(test)]
pub(crate) mod testing;
