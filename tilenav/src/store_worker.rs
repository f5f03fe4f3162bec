//! The persistent-store worker: one background thread that serializes
//! geometry, queries and writes the tile store, and hands jobs back to the
//! scheduler.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use serde::Serialize;

use tilenav_store::{ShapeId, StoreError, TileId, TileStore};

use crate::agent::AgentShape;
use crate::builder::NAVMESH_FORMAT_VERSION;
use crate::coords::{TilePos, manhattan_distance, tile_pos};
use crate::geometry::{MeshSource, OffMeshConnection, TileGeometry, WaterCell};
use crate::jobs::{ChangeType, JobHandle};
use crate::scheduler::{Shared, StoreJobSnapshot};
use crate::settings::BuildParams;

/// Version prefix of the serialized store-input blob.
const STORE_INPUT_VERSION: u32 = 1;

/// A job handed to the store worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum StoreTask {
    /// Look the tile up and return the job to the scheduler.
    Read(JobHandle),
    /// Persist freshly generated data; the job concludes here.
    Write(JobHandle),
}

#[derive(Clone, Copy, Debug)]
struct ReadEntry {
    change: ChangeType,
    tile: TilePos,
    handle: JobHandle,
}

#[derive(Debug)]
struct QueueState {
    reading: Vec<ReadEntry>,
    writing: VecDeque<JobHandle>,
    player: TilePos,
    stop: bool,
}

/// The store worker's own queue.
///
/// Reads are served before writes and ordered by (change type, distance to
/// player, distance to origin) — simpler than the scheduler's queue since
/// retries are handled upstream. Writes are first-in-first-out.
#[derive(Debug)]
pub(crate) struct StoreQueue {
    state: Mutex<QueueState>,
    has_job: Condvar,
}

impl StoreQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                reading: Vec::new(),
                writing: VecDeque::new(),
                player: tile_pos(0, 0),
                stop: false,
            }),
            has_job: Condvar::new(),
        }
    }

    pub fn push_read(&self, handle: JobHandle, change: ChangeType, tile: TilePos) {
        let mut state = self.state.lock().unwrap();
        state.reading.push(ReadEntry {
            change,
            tile,
            handle,
        });
        self.has_job.notify_all();
    }

    pub fn push_write(&self, handle: JobHandle) {
        let mut state = self.state.lock().unwrap();
        state.writing.push_back(handle);
        self.has_job.notify_all();
    }

    /// Adopts a new player tile for read ordering.
    pub fn update_player(&self, player: TilePos) {
        self.state.lock().unwrap().player = player;
    }

    /// Blocks until a task is available; [`None`] means the queue was
    /// stopped and the worker should exit.
    pub fn pop(&self) -> Option<StoreTask> {
        let state = self.state.lock().unwrap();
        let mut state = self
            .has_job
            .wait_while(state, |s| {
                !s.stop && s.reading.is_empty() && s.writing.is_empty()
            })
            .unwrap();
        if state.stop {
            return None;
        }
        if !state.reading.is_empty() {
            let player = state.player;
            let best = state
                .reading
                .iter()
                .enumerate()
                .min_by_key(|(_, entry)| {
                    (
                        entry.change,
                        manhattan_distance(entry.tile, player),
                        manhattan_distance(entry.tile, tile_pos(0, 0)),
                    )
                })
                .map(|(index, _)| index)
                .expect("reading queue is non-empty");
            let entry = state.reading.swap_remove(best);
            return Some(StoreTask::Read(entry.handle));
        }
        state.writing.pop_front().map(StoreTask::Write)
    }

    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.reading.clear();
        state.writing.clear();
        state.stop = true;
        self.has_job.notify_all();
    }

    fn depths(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.reading.len(), state.writing.len())
    }
}

/// Counters describing the store worker, surfaced through
/// [`UpdaterStats`](crate::UpdaterStats).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct StoreWorkerStats {
    /// Read jobs queued for the store worker.
    pub read_jobs: usize,
    /// Write jobs queued for the store worker.
    pub write_jobs: usize,
    /// Total store lookups performed.
    pub read_requests: u64,
}

/// Handle to the store worker thread.
#[derive(Debug)]
pub(crate) struct StoreWorker {
    queue: Arc<StoreQueue>,
    thread: Option<thread::JoinHandle<()>>,
    read_requests: Arc<AtomicU64>,
}

impl StoreWorker {
    pub fn spawn(store: TileStore, queue: Arc<StoreQueue>, shared: Arc<Shared>) -> Self {
        let read_requests = Arc::new(AtomicU64::new(0));
        let write_enabled = shared.settings.write_to_store;
        let thread = thread::Builder::new()
            .name("tilenav-store".into())
            .spawn({
                let queue = Arc::clone(&queue);
                let read_requests = Arc::clone(&read_requests);
                move || {
                    StoreThread {
                        store,
                        queue,
                        shared,
                        write_enabled,
                        next_tile_id: TileId(1),
                        next_shape_id: ShapeId(1),
                        read_requests,
                    }
                    .run()
                }
            })
            .expect("failed to spawn store worker");
        Self {
            queue,
            thread: Some(thread),
            read_requests,
        }
    }

    /// Clears the queue, stops and joins the thread. Idempotent.
    pub fn stop(&mut self) {
        self.queue.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn stats(&self) -> StoreWorkerStats {
        let (read_jobs, write_jobs) = self.queue.depths();
        StoreWorkerStats {
            read_jobs,
            write_jobs,
            read_requests: self.read_requests.load(Relaxed),
        }
    }
}

impl Drop for StoreWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

// --- The thread itself ---

struct StoreThread {
    store: TileStore,
    queue: Arc<StoreQueue>,
    shared: Arc<Shared>,
    write_enabled: bool,
    next_tile_id: TileId,
    next_shape_id: ShapeId,
    read_requests: Arc<AtomicU64>,
}

impl StoreThread {
    fn run(mut self) {
        log::debug!("store worker started");
        self.seed_identities();
        loop {
            let Some(task) = self.queue.pop() else { break };
            match task {
                StoreTask::Read(handle) => self.process_read(handle),
                StoreTask::Write(handle) => self.process_write(handle),
            }
        }
        log::debug!("store worker stopped");
    }

    /// Seeds the identity counters from the store's current maxima, so a
    /// fresh insert can never collide with a record that predates this
    /// process.
    fn seed_identities(&mut self) {
        let seeded = self
            .store
            .max_tile_id()
            .and_then(|tile| self.store.max_shape_id().map(|shape| (tile, shape)));
        match seeded {
            Ok((tile, shape)) => {
                self.next_tile_id = TileId(tile.0 + 1);
                self.next_shape_id = ShapeId(shape.0 + 1);
            }
            Err(error) => {
                log::error!("failed to read store identity counters, disabling writes: {error}");
                self.write_enabled = false;
            }
        }
    }

    fn process_read(&mut self, handle: JobHandle) {
        self.read_requests.fetch_add(1, Relaxed);
        let snapshot = self.shared.store_job_snapshot(handle);
        log::debug!("processing store read for job {}", snapshot.id);

        let input = if snapshot.input.is_empty() {
            match self.serialize_input(&snapshot) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    // Some shape has no stored identity and writes are
                    // disabled; this tile cannot be keyed, so force the
                    // synchronous build path.
                    self.shared.requeue_from_store(handle, None, Vec::new());
                    return;
                }
                Err(error) => {
                    log::error!("serializing input for job {} failed: {error}", snapshot.id);
                    self.note_write_error(&error);
                    self.shared.requeue_from_store(handle, None, Vec::new());
                    return;
                }
            }
        } else {
            snapshot.input.clone()
        };

        let found = match self.store.get_tile(
            &snapshot.worldspace,
            snapshot.tile.x,
            snapshot.tile.y,
            &input,
        ) {
            Ok(found) => found,
            Err(error) => {
                // Including corruption: a record that cannot be read is a
                // cache miss, and the scheduler rebuilds.
                log::error!("store lookup for job {} failed: {error}", snapshot.id);
                self.note_write_error(&error);
                None
            }
        };
        self.shared.requeue_from_store(handle, found, input);
    }

    fn process_write(&mut self, handle: JobHandle) {
        if !self.write_enabled {
            log::debug!("ignored store write (writes disabled)");
            self.shared.remove_job(handle);
            return;
        }
        let snapshot = self.shared.store_job_snapshot(handle);
        log::debug!("processing store write for job {}", snapshot.id);
        if let Err(error) = self.write_tile(&snapshot) {
            log::error!("store write for job {} failed: {error}", snapshot.id);
            self.note_write_error(&error);
        }
        self.shared.remove_job(handle);
    }

    fn write_tile(&mut self, snapshot: &StoreJobSnapshot) -> Result<(), StoreError> {
        let generated = snapshot
            .generated
            .as_ref()
            .expect("can’t happen: write job without generated data");

        let input = if snapshot.input.is_empty() {
            match self.serialize_input(snapshot)? {
                Some(bytes) => bytes,
                // Unresolvable shape; the tile cannot be keyed.
                None => return Ok(()),
            }
        } else {
            snapshot.input.clone()
        };

        if let Some(tile_id) = snapshot.matched_tile_id {
            // This exact input was already matched during the read leg.
            log::debug!("updating stored tile {} for job {}", tile_id.0, snapshot.id);
            return self
                .store
                .update_tile(tile_id, NAVMESH_FORMAT_VERSION, generated.bytes());
        }

        match self.store.find_tile(
            &snapshot.worldspace,
            snapshot.tile.x,
            snapshot.tile.y,
            &input,
        )? {
            Some(header) if header.version == NAVMESH_FORMAT_VERSION => {
                log::debug!("stored tile already current for job {}", snapshot.id);
                Ok(())
            }
            Some(header) => {
                // Same input under a stale format: refresh in place.
                self.store
                    .update_tile(header.tile_id, NAVMESH_FORMAT_VERSION, generated.bytes())
            }
            None => {
                let tile_id = self.next_tile_id;
                log::debug!("inserting stored tile {} for job {}", tile_id.0, snapshot.id);
                self.store.insert_tile(
                    tile_id,
                    &snapshot.worldspace,
                    snapshot.tile.x,
                    snapshot.tile.y,
                    NAVMESH_FORMAT_VERSION,
                    &input,
                    generated.bytes(),
                )?;
                self.next_tile_id = TileId(tile_id.0 + 1);
                Ok(())
            }
        }
    }

    /// Builds the canonical input blob: every mesh source resolved to its
    /// stable shape identity (inserting new identities when writes are
    /// enabled), then the parameters, agent, and geometry buffers encoded
    /// in one versioned binary value.
    ///
    /// `Ok(None)` means a shape could not be resolved and writes are
    /// disabled, which forces the caller onto the synchronous build path.
    fn serialize_input(&mut self, snapshot: &StoreJobSnapshot) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(shape_ids) = self.resolve_sources(&snapshot.geometry.sources)? else {
            return Ok(None);
        };
        encode_input(
            &self.shared.build_params,
            &snapshot.agent,
            &shape_ids,
            &snapshot.geometry,
        )
        .map(Some)
        .map_err(|error| StoreError::Other(format!("failed to encode store input: {error}")))
    }

    fn resolve_sources(&mut self, sources: &[MeshSource]) -> Result<Option<Vec<u64>>, StoreError> {
        let mut ids = Vec::with_capacity(sources.len());
        for source in sources {
            match self
                .store
                .find_shape_id(&source.name, source.kind, &source.hash)?
            {
                Some(id) => ids.push(id.0),
                None if self.write_enabled => {
                    let id = self.next_shape_id;
                    self.store
                        .insert_shape(id, &source.name, source.kind, &source.hash)?;
                    self.next_shape_id = ShapeId(id.0 + 1);
                    ids.push(id.0);
                }
                None => {
                    log::debug!("no stored identity for shape {:?}", source.name);
                    return Ok(None);
                }
            }
        }
        Ok(Some(ids))
    }

    fn note_write_error(&mut self, error: &StoreError) {
        if !self.write_enabled {
            return;
        }
        match error {
            StoreError::Full => {
                self.write_enabled = false;
                log::warn!("store is full; writes disabled for the rest of this session");
            }
            StoreError::Locked => {
                self.write_enabled = false;
                log::warn!(
                    "store is locked by another process; writes disabled for the rest of this session"
                );
            }
            StoreError::DuplicateId(id) => {
                log::warn!("stored tile identity {id} collided; reseeding the counter");
                match self.store.max_tile_id() {
                    Ok(max) => self.next_tile_id = TileId(max.0 + 1),
                    Err(error) => {
                        self.write_enabled = false;
                        log::warn!("failed to reseed tile identity, disabling writes: {error}");
                    }
                }
            }
            _ => {}
        }
    }
}

#[derive(Serialize)]
struct StoreInput<'a> {
    version: u32,
    params: &'a BuildParams,
    agent: &'a AgentShape,
    shape_ids: &'a [u64],
    vertices: &'a [f32],
    indices: &'a [u32],
    areas: &'a [u8],
    water: &'a [WaterCell],
    off_mesh_connections: &'a [OffMeshConnection],
}

fn encode_input(
    params: &BuildParams,
    agent: &AgentShape,
    shape_ids: &[u64],
    geometry: &TileGeometry,
) -> Result<Vec<u8>, postcard::Error> {
    postcard::to_stdvec(&StoreInput {
        version: STORE_INPUT_VERSION,
        params,
        agent,
        shape_ids,
        vertices: &geometry.vertices,
        indices: &geometry.indices,
        areas: &geometry.areas,
        water: &geometry.water,
        off_mesh_connections: &geometry.off_mesh_connections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_pop_nearest_to_player_first() {
        let queue = StoreQueue::new();
        queue.update_player(tile_pos(10, 0));
        queue.push_read(1, ChangeType::Add, tile_pos(0, 0));
        queue.push_read(2, ChangeType::Add, tile_pos(9, 0));
        queue.push_read(3, ChangeType::Add, tile_pos(20, 0));
        assert_eq!(queue.pop(), Some(StoreTask::Read(2)));
        // 1 and 3 are equally far from the player; distance to the origin
        // breaks the tie.
        assert_eq!(queue.pop(), Some(StoreTask::Read(1)));
        assert_eq!(queue.pop(), Some(StoreTask::Read(3)));
    }

    #[test]
    fn reads_are_served_before_writes() {
        let queue = StoreQueue::new();
        queue.push_write(7);
        queue.push_read(1, ChangeType::Add, tile_pos(0, 0));
        assert_eq!(queue.pop(), Some(StoreTask::Read(1)));
        assert_eq!(queue.pop(), Some(StoreTask::Write(7)));
    }

    #[test]
    fn stop_clears_and_unblocks() {
        let queue = StoreQueue::new();
        queue.push_write(7);
        queue.stop();
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn input_encoding_is_deterministic_and_version_prefixed() {
        use crate::agent::{AgentKind, AgentShape};
        use crate::testing::geometry_with_seed;

        let params = BuildParams::default();
        let agent = AgentShape::new(AgentKind::Cylinder, [0.4, 0.4, 1.0]).unwrap();
        let geometry = geometry_with_seed(3);
        let a = encode_input(&params, &agent, &[1, 2], &geometry).unwrap();
        let b = encode_input(&params, &agent, &[1, 2], &geometry).unwrap();
        assert_eq!(a, b);
        let c = encode_input(&params, &agent, &[1, 3], &geometry).unwrap();
        assert_ne!(a, c);
    }
}
