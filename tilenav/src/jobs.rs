//! Scheduled units of work.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use tilenav_store::TileRecord;

use crate::agent::AgentShape;
use crate::builder::PreparedTile;
use crate::coords::{TilePos, Worldspace, manhattan_distance, tile_pos};
use crate::geometry::TileGeometry;
use crate::live_mesh::LiveNavMesh;

/// Stable handle of a job within the scheduler's arena.
///
/// The arena is a slab: handles stay valid for exactly the lifetime of
/// their job, and every queue and set stores handles, never references.
pub(crate) type JobHandle = usize;

/// Process-monotonic job identity, for logging only.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of geometry change scheduled a job.
///
/// The variant order is the processing priority: removals first, cosmetic
/// updates last.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[expect(clippy::exhaustive_enums)]
pub enum ChangeType {
    /// Geometry disappeared from the tile.
    Remove,
    /// Several kinds of change coincided.
    Mixed,
    /// Geometry appeared in the tile.
    Add,
    /// Cosmetic change; throttled and never cached or persisted.
    Update,
}

/// Which leg of processing a job is on.
///
/// The only transition is `Initial` → `HasStoreResult`, made by
/// [`Job::complete_store_read`] when the store worker hands the job back.
#[derive(Debug)]
pub(crate) enum JobState {
    Initial,
    HasStoreResult { found: Option<TileRecord> },
}

impl JobState {
    /// Priority rank: jobs already carrying a store result go first.
    fn rank(&self) -> u8 {
        match self {
            JobState::HasStoreResult { .. } => 0,
            JobState::Initial => 1,
        }
    }
}

/// Typed result of processing a job; replaces control-flow exceptions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum JobOutcome {
    /// Concluded; the job leaves the system (possibly via a follow-up
    /// store write).
    Done,
    /// Could not complete; retried until the configured ceiling.
    Fail,
    /// Not in the memory cache; hand off to the store worker.
    MemoryCacheMiss,
}

/// A unit of scheduled work: (re)compute one tile for one agent shape.
#[derive(Debug)]
pub(crate) struct Job {
    pub id: JobId,
    pub agent: AgentShape,
    /// Weak so that dropping a live mesh concludes its outstanding jobs.
    pub mesh: Weak<Mutex<LiveNavMesh>>,
    pub worldspace: Worldspace,
    pub tile: TilePos,
    pub change: ChangeType,
    /// Earliest time this job may be processed; used to throttle
    /// `update`-type churn and to back off after lock contention.
    pub process_time: Instant,
    pub tries: u32,
    pub state: JobState,
    /// Whether this job currently holds its processing-set entry.
    pub locked: bool,
    /// Geometry snapshot, stashed when the job is handed to the store
    /// worker.
    pub geometry: Option<Arc<TileGeometry>>,
    /// Serialized store input; filled lazily by the store worker.
    pub input: Vec<u8>,
    /// Freshly generated result worth persisting, set when the job
    /// concludes with data the store has not seen.
    pub generated: Option<PreparedTile>,
}

impl Job {
    pub fn new(
        id: JobId,
        agent: AgentShape,
        mesh: &Arc<Mutex<LiveNavMesh>>,
        worldspace: Worldspace,
        tile: TilePos,
        change: ChangeType,
        process_time: Instant,
    ) -> Self {
        Self {
            id,
            agent,
            mesh: Arc::downgrade(mesh),
            worldspace,
            tile,
            change,
            process_time,
            tries: 0,
            state: JobState::Initial,
            locked: false,
            geometry: None,
            input: Vec::new(),
            generated: None,
        }
    }

    /// The deduplication key: one pending and one in-flight job per pair.
    pub fn key(&self) -> (AgentShape, TilePos) {
        (self.agent, self.tile)
    }

    /// Transition `Initial` → `HasStoreResult`.
    pub fn complete_store_read(&mut self, found: Option<TileRecord>) {
        match self.state {
            JobState::Initial => self.state = JobState::HasStoreResult { found },
            JobState::HasStoreResult { .. } => {
                panic!("can’t happen: store read completed twice for job {}", self.id)
            }
        }
    }

    /// Computes this job's place in the waiting queue relative to the
    /// given player tile.
    pub fn priority(&self, player: TilePos) -> JobPriority {
        JobPriority {
            state_rank: self.state.rank(),
            process_time: self.process_time,
            change: self.change,
            tries: self.tries,
            distance_to_player: manhattan_distance(self.tile, player),
            distance_to_origin: manhattan_distance(self.tile, tile_pos(0, 0)),
        }
    }
}

/// Sort key of a waiting job. Smaller compares first and is processed
/// first; field order is the comparison order.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) struct JobPriority {
    /// In-flight jobs carrying a store result outrank fresh ones.
    state_rank: u8,
    pub process_time: Instant,
    change: ChangeType,
    tries: u32,
    distance_to_player: i32,
    distance_to_origin: i32,
}
