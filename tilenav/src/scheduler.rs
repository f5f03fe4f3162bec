//! The job scheduler: turns tile-change notifications into prioritized
//! background work and merges results into live meshes.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hashbrown::{HashMap, HashSet};
use slab::Slab;

use tilenav_store::{TileRecord, TileStore};

use crate::agent::AgentShape;
use crate::builder::{MeshBuilder, NAVMESH_FORMAT_VERSION, PreparedTile};
use crate::cache::{CacheKey, CacheStats, TileCache};
use crate::coords::{TilePos, Version, Worldspace, manhattan_distance, tile_pos, within_radius};
use crate::geometry::GeometrySource;
use crate::jobs::{ChangeType, Job, JobHandle, JobId, JobOutcome, JobState};
use crate::live_mesh::{InstallOutcome, SharedLiveMesh, TileData};
use crate::queue::WaitingQueue;
use crate::settings::{BuildParams, Settings};
use crate::store_worker::{StoreQueue, StoreWorker, StoreWorkerStats};


/// How long an idle worker sleeps before re-checking for ready jobs and
/// shutdown.
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polling interval of [`WaitMode::RequiredTilesPresent`], which doubles as
/// its progress-reporting cadence.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Which condition [`TileUpdater::wait`] blocks on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[expect(clippy::exhaustive_enums)]
pub enum WaitMode {
    /// Until the job set and the processing set are both empty, including
    /// work discovered during the wait.
    AllJobsDone,
    /// Until every tile still absent is at least the configured distance
    /// from the player, or all jobs are done.
    RequiredTilesPresent,
}

/// Receives progress updates during
/// [`WaitMode::RequiredTilesPresent`] waits.
///
/// The total may grow while waiting, as new jobs are discovered.
pub trait ProgressListener {
    /// The denominator changed (only ever grows).
    fn set_range(&mut self, total: usize) {
        let _ = total;
    }
    /// Absolute progress after a range change.
    fn set_progress(&mut self, done: usize) {
        let _ = done;
    }
    /// `amount` more jobs completed.
    fn increase(&mut self, amount: usize) {
        let _ = amount;
    }
}

/// The no-op listener.
impl ProgressListener for () {}

/// Point-in-time counters over the whole pipeline, for telemetry.
/// Reported on demand by [`TileUpdater::stats()`].
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct UpdaterStats {
    /// Live jobs, in any stage.
    pub jobs: usize,
    /// Jobs in the waiting queue.
    pub waiting: usize,
    /// (agent, tile) pairs with a pending job.
    pub pushed: usize,
    /// (agent, tile) pairs currently being computed.
    pub processing: usize,
    #[allow(missing_docs)]
    pub cache: CacheStats,
    /// Persistent-store worker counters, when a store is configured.
    pub store: Option<StoreWorkerStats>,
    /// Tiles installed from store-loaded bytes instead of a rebuild.
    pub store_hits: u64,
}

/// Asynchronous tile update scheduler.
///
/// Owns the job arena, the waiting queue, N worker threads, and (when a
/// persistent store is configured) the store worker thread. Dropping the
/// updater stops and joins all of them; in-flight jobs finish, waiting
/// ones are discarded.
#[derive(Debug)]
pub struct TileUpdater {
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
    store_worker: Option<StoreWorker>,
}

/// State shared between the caller-facing surface, the worker threads, and
/// the store worker.
pub(crate) struct Shared {
    pub(crate) settings: Settings,
    pub(crate) build_params: BuildParams,
    pub(crate) geometry_source: Arc<dyn GeometrySource>,
    pub(crate) builder: Arc<dyn MeshBuilder>,
    pub(crate) cache: TileCache,

    /// The scheduler-wide mutex: job arena, queue, and bookkeeping sets.
    /// Held only for pointer/metadata manipulation, never across a build
    /// or store I/O.
    state: Mutex<State>,
    /// Signaled when the waiting queue may have become non-empty.
    has_job: Condvar,
    /// Signaled when the job arena may have become empty.
    all_done: Condvar,

    /// The at-most-one-concurrent-build guarantee. Separate mutex because
    /// it is consulted while `state` is released. Lock order: `state`
    /// before `processing`, never the reverse.
    processing: Mutex<HashSet<(AgentShape, TilePos)>>,
    /// Signaled when the processing set may have become empty.
    processed: Condvar,

    player_tile: Mutex<TilePos>,
    should_stop: AtomicBool,
    pub(crate) store_queue: Option<Arc<StoreQueue>>,
    store_hits: AtomicU64,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

struct State {
    jobs: Slab<Job>,
    waiting: WaitingQueue,
    /// Pairs with a pending job, from creation until first dequeue;
    /// deduplicates repeated change notifications.
    pushed: HashSet<(AgentShape, TilePos)>,
    /// Pairs whose tile is currently installed in a live mesh.
    present: HashSet<(AgentShape, TilePos)>,
    /// When each pair last started an `update`-type build, for throttling.
    last_updates: HashMap<(AgentShape, TilePos), Instant>,
    next_job_id: u64,
}

impl TileUpdater {
    /// Starts the pipeline: spawns the configured number of worker threads
    /// and, if `store` is given, the store worker.
    pub fn new(
        settings: Settings,
        build_params: BuildParams,
        geometry_source: Arc<dyn GeometrySource>,
        builder: Arc<dyn MeshBuilder>,
        store: Option<TileStore>,
    ) -> Self {
        let worker_count = settings.worker_threads.max(1);
        let cache = TileCache::new(settings.max_tiles_cache_size);
        let store_queue = store.as_ref().map(|_| Arc::new(StoreQueue::new()));
        let shared = Arc::new(Shared {
            settings,
            build_params,
            geometry_source,
            builder,
            cache,
            state: Mutex::new(State {
                jobs: Slab::new(),
                waiting: WaitingQueue::default(),
                pushed: HashSet::new(),
                present: HashSet::new(),
                last_updates: HashMap::new(),
                next_job_id: 1,
            }),
            has_job: Condvar::new(),
            all_done: Condvar::new(),
            processing: Mutex::new(HashSet::new()),
            processed: Condvar::new(),
            player_tile: Mutex::new(tile_pos(0, 0)),
            should_stop: AtomicBool::new(false),
            store_queue: store_queue.clone(),
            store_hits: AtomicU64::new(0),
        });

        let workers = (0..worker_count)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("tilenav-worker-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn tile update worker")
            })
            .collect();

        let store_worker = match (store, store_queue) {
            (Some(store), Some(queue)) => {
                Some(StoreWorker::spawn(store, queue, Arc::clone(&shared)))
            }
            _ => None,
        };

        Self {
            shared,
            workers,
            store_worker,
        }
    }

    /// Schedules (re)computation of the given changed tiles for one agent
    /// shape and live mesh.
    ///
    /// Tiles already represented by a pending job for this agent are
    /// skipped. A changed player tile re-prioritizes the entire waiting
    /// queue first: distances are recomputed and jobs for tiles now outside
    /// the kept radius are demoted to removals. Never blocks on build work
    /// and reports no errors; outcomes are observed through [`Self::wait`]
    /// and the meshes themselves.
    pub fn post(
        &self,
        agent: AgentShape,
        mesh: &SharedLiveMesh,
        player_tile: TilePos,
        worldspace: &Worldspace,
        changed_tiles: &[(TilePos, ChangeType)],
    ) {
        let player_tile_changed = {
            let mut stored = self.shared.player_tile.lock().unwrap();
            let changed = *stored != player_tile;
            *stored = player_tile;
            changed
        };

        if !player_tile_changed && changed_tiles.is_empty() {
            return;
        }

        let mut state = self.shared.state.lock().unwrap();

        if player_tile_changed {
            log::debug!(
                "player tile changed to ({}, {})",
                player_tile.x,
                player_tile.y
            );
            let radius = self.shared.settings.max_tile_radius;
            let State { waiting, jobs, .. } = &mut *state;
            waiting.rebuild(|handle| {
                let job = &mut jobs[handle];
                if job.change != ChangeType::Remove && !within_radius(job.tile, player_tile, radius)
                {
                    job.change = ChangeType::Remove;
                }
                job.priority(player_tile)
            });
        }

        let now = Instant::now();
        for &(tile, change) in changed_tiles {
            if !state.pushed.insert((agent, tile)) {
                continue;
            }
            let process_time = match (change, state.last_updates.get(&(agent, tile))) {
                (ChangeType::Update, Some(&last)) => {
                    last + self.shared.settings.min_update_interval
                }
                _ => now,
            };
            let id = JobId(state.next_job_id);
            state.next_job_id += 1;
            let handle = state.jobs.insert(Job::new(
                id,
                agent,
                mesh,
                worldspace.clone(),
                tile,
                change,
                process_time,
            ));
            log::debug!(
                "posted job {id} for tile ({}, {}) changed as {change:?}",
                tile.x,
                tile.y
            );
            let priority = state.jobs[handle].priority(player_tile);
            state.waiting.push(priority, handle);
        }

        log::debug!("{} live jobs after post", state.jobs.len());

        if !state.waiting.is_empty() {
            self.shared.has_job.notify_all();
        }
        drop(state);

        if player_tile_changed {
            if let Some(queue) = &self.shared.store_queue {
                queue.update_player(player_tile);
            }
        }
    }

    /// Blocks until the condition selected by `mode` holds.
    pub fn wait(&self, mode: WaitMode) {
        self.wait_with_progress(mode, &mut ());
    }

    /// Like [`Self::wait`], reporting progress as jobs complete.
    pub fn wait_with_progress(&self, mode: WaitMode, listener: &mut dyn ProgressListener) {
        match mode {
            WaitMode::AllJobsDone => self.wait_until_all_jobs_done(),
            WaitMode::RequiredTilesPresent => self.wait_until_required_tiles_present(listener),
        }
    }

    fn wait_until_all_jobs_done(&self) {
        {
            let state = self.shared.state.lock().unwrap();
            let _state = self
                .shared
                .all_done
                .wait_while(state, |s| !s.jobs.is_empty())
                .unwrap();
        }
        let processing = self.shared.processing.lock().unwrap();
        let _processing = self
            .shared
            .processed
            .wait_while(processing, |p| !p.is_empty())
            .unwrap();
    }

    fn wait_until_required_tiles_present(&self, listener: &mut dyn ProgressListener) {
        let min_distance = self.shared.settings.wait_until_min_distance_to_player;
        if min_distance <= 0 {
            return;
        }
        let player = *self.shared.player_tile.lock().unwrap();

        let mut state = self.shared.state.lock().unwrap();
        if state.jobs.is_empty() || !self.absent_tile_too_close(&state, player, min_distance) {
            return;
        }

        let mut max_progress = state.jobs.len();
        let mut prev_jobs_left = max_progress;
        let mut jobs_done = 0;
        listener.set_range(max_progress);

        loop {
            let (next, _timeout) = self
                .shared
                .all_done
                .wait_timeout(state, WAIT_POLL_INTERVAL)
                .unwrap();
            state = next;
            let jobs_left = state.jobs.len();
            if jobs_left == 0 || !self.absent_tile_too_close(&state, player, min_distance) {
                return;
            }
            if max_progress < jobs_left {
                // New jobs appeared mid-wait; grow the denominator.
                max_progress = jobs_left;
                listener.set_range(max_progress);
                listener.set_progress(jobs_done);
            } else if jobs_left < prev_jobs_left {
                let newly_done = prev_jobs_left - jobs_left;
                jobs_done += newly_done;
                prev_jobs_left = jobs_left;
                listener.increase(newly_done);
            }
        }
    }

    /// Whether any not-yet-present tile with a pending or in-flight job is
    /// closer to the player than `distance`.
    fn absent_tile_too_close(&self, state: &State, player: TilePos, distance: i32) -> bool {
        let is_absent_and_close = |pair: &(AgentShape, TilePos)| {
            !state.present.contains(pair) && manhattan_distance(player, pair.1) < distance
        };
        if state.pushed.iter().any(is_absent_and_close) {
            return true;
        }
        let processing = self.shared.processing.lock().unwrap();
        processing.iter().any(is_absent_and_close)
    }

    /// Current pipeline counters.
    pub fn stats(&self) -> UpdaterStats {
        let (jobs, waiting, pushed) = {
            let state = self.shared.state.lock().unwrap();
            (state.jobs.len(), state.waiting.len(), state.pushed.len())
        };
        UpdaterStats {
            jobs,
            waiting,
            pushed,
            processing: self.shared.processing.lock().unwrap().len(),
            cache: self.shared.cache.stats(),
            store: self.store_worker.as_ref().map(|worker| worker.stats()),
            store_hits: self.shared.store_hits.load(Relaxed),
        }
    }

    /// Stops and joins every thread. Waiting jobs are discarded; jobs
    /// already being processed finish first. Idempotent; also runs on drop.
    pub fn stop(&mut self) {
        self.shared.should_stop.store(true, Relaxed);
        if let Some(worker) = &mut self.store_worker {
            worker.stop();
        }
        {
            let mut state = self.shared.state.lock().unwrap();
            for handle in state.waiting.clear() {
                let job = state.jobs.remove(handle);
                state.pushed.remove(&job.key());
                if job.locked {
                    // Jobs that had been through the store worker still
                    // hold their processing entry; release it so
                    // drain-waiters cannot hang.
                    let mut processing = self.shared.processing.lock().unwrap();
                    processing.remove(&job.key());
                    if processing.is_empty() {
                        self.shared.processed.notify_all();
                    }
                }
            }
            if state.jobs.is_empty() {
                self.shared.all_done.notify_all();
            }
            self.shared.has_job.notify_all();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for TileUpdater {
    fn drop(&mut self) {
        self.stop();
    }
}

// --- Worker internals ---

fn worker_loop(shared: &Shared) {
    log::debug!("tile update worker started");
    while !shared.should_stop.load(Relaxed) {
        match next_job(shared) {
            Some(handle) => run_job(shared, handle),
            None => cleanup_last_updates(shared),
        }
    }
    log::debug!("tile update worker stopped");
}

/// Waits (bounded) for a ready job, pops it, and acquires its processing
/// lock. Returns [`None`] when there is no job this round, including when
/// the popped job's tile was locked by another worker (the job is
/// re-queued at a new priority).
fn next_job(shared: &Shared) -> Option<JobHandle> {
    let state = shared.state.lock().unwrap();
    let (mut state, _timeout) = shared
        .has_job
        .wait_timeout_while(state, WORKER_POLL_INTERVAL, |s| {
            !shared.should_stop.load(Relaxed) && !s.waiting.has_ready(Instant::now())
        })
        .unwrap();

    if shared.should_stop.load(Relaxed) {
        return None;
    }

    let now = Instant::now();
    let Some(handle) = state.waiting.pop_ready(now) else {
        if state.jobs.is_empty() {
            shared.all_done.notify_all();
        }
        return None;
    };

    let job = &state.jobs[handle];
    log::debug!("popped job {}", job.id);
    if job.locked {
        // Returning from the store worker; its processing entry was never
        // released.
        return Some(handle);
    }

    let pair = job.key();
    let id = job.id;
    if !shared.processing.lock().unwrap().insert(pair) {
        log::debug!("tile ({}, {}) is locked; requeueing job {id}", pair.1.x, pair.1.y);
        let player = *shared.player_tile.lock().unwrap();
        let job = &mut state.jobs[handle];
        job.tries += 1;
        job.process_time = now + shared.settings.min_update_interval;
        let priority = job.priority(player);
        state.waiting.push(priority, handle);
        return None;
    }

    let job = &mut state.jobs[handle];
    job.locked = true;
    if job.change == ChangeType::Update {
        state.last_updates.insert(pair, now);
    }
    state.pushed.remove(&pair);
    Some(handle)
}

fn run_job(shared: &Shared, handle: JobHandle) {
    let (id, change) = {
        let state = shared.state.lock().unwrap();
        let job = &state.jobs[handle];
        (job.id, job.change)
    };

    // The mesh builder is an external library; a panic in it must cost one
    // job, not the worker thread.
    match catch_unwind(AssertUnwindSafe(|| process_job(shared, handle))) {
        Ok(outcome) => {
            log::debug!("processed job {id} with outcome {outcome:?} change {change:?}");
            match outcome {
                JobOutcome::Done => {
                    unlock_tile(shared, handle);
                    let wants_write = {
                        let state = shared.state.lock().unwrap();
                        state.jobs[handle].generated.is_some()
                    };
                    match (&shared.store_queue, wants_write) {
                        (Some(queue), true) => queue.push_write(handle),
                        _ => shared.remove_job(handle),
                    }
                }
                JobOutcome::Fail => {
                    unlock_tile(shared, handle);
                    retry_or_discard(shared, handle);
                }
                JobOutcome::MemoryCacheMiss => {
                    // Keep the processing lock; it is released when the
                    // store worker hands the job back and it concludes.
                    let (change, tile) = {
                        let state = shared.state.lock().unwrap();
                        let job = &state.jobs[handle];
                        (job.change, job.tile)
                    };
                    shared
                        .store_queue
                        .as_ref()
                        .expect("cache-miss outcome requires a store")
                        .push_read(handle, change, tile);
                }
            }
        }
        Err(_) => {
            log::warn!("job {id} panicked while processing; dropping it");
            unlock_tile(shared, handle);
            shared.remove_job(handle);
        }
    }
}

fn process_job(shared: &Shared, handle: JobHandle) -> JobOutcome {
    let (id, agent, tile, worldspace, change, mesh) = {
        let state = shared.state.lock().unwrap();
        let job = &state.jobs[handle];
        (
            job.id,
            job.agent,
            job.tile,
            job.worldspace.clone(),
            job.change,
            job.mesh.clone(),
        )
    };

    let Some(mesh) = mesh.upgrade() else {
        // The live mesh is gone; there is nothing left to update.
        log::debug!("job {id}: mesh dropped, concluding");
        return JobOutcome::Done;
    };

    let player = *shared.player_tile.lock().unwrap();
    if !within_radius(tile, player, shared.settings.max_tile_radius) {
        log::debug!("job {id}: tile too far from player, removing instead");
        {
            let mut state = shared.state.lock().unwrap();
            state.jobs[handle].change = ChangeType::Remove;
            state.present.remove(&(agent, tile));
        }
        mesh.lock().unwrap().remove_tile(tile);
        return JobOutcome::Done;
    }

    let has_store_result = {
        let state = shared.state.lock().unwrap();
        matches!(state.jobs[handle].state, JobState::HasStoreResult { .. })
    };
    if has_store_result {
        process_with_store_result(shared, handle, id, agent, tile, change, &mesh)
    } else {
        process_initial(shared, handle, id, agent, tile, &worldspace, change, &mesh)
    }
}

#[allow(clippy::too_many_arguments)]
fn process_initial(
    shared: &Shared,
    handle: JobHandle,
    id: JobId,
    agent: AgentShape,
    tile: TilePos,
    worldspace: &Worldspace,
    change: ChangeType,
    mesh: &SharedLiveMesh,
) -> JobOutcome {
    let Some(geometry) = shared.geometry_source.get(worldspace, tile) else {
        log::debug!("job {id}: no geometry for tile");
        mark_empty(shared, mesh, tile, agent);
        return JobOutcome::Done;
    };
    if geometry.is_empty() {
        log::debug!("job {id}: empty geometry for tile");
        mark_empty(shared, mesh, tile, agent);
        return JobOutcome::Done;
    }

    let key = CacheKey {
        agent,
        tile,
        fingerprint: geometry.fingerprint(),
    };

    if let Some(cached) = shared.cache.get(&key) {
        return install(shared, mesh, tile, agent, TileData::Cached(cached), geometry.version);
    }

    if shared.store_queue.is_some() && change != ChangeType::Update {
        let mut state = shared.state.lock().unwrap();
        state.jobs[handle].geometry = Some(geometry);
        return JobOutcome::MemoryCacheMiss;
    }

    let Some(prepared) = shared
        .builder
        .build(&geometry, tile, &agent, &shared.build_params)
    else {
        log::debug!("job {id}: builder produced no walkable mesh");
        mark_empty(shared, mesh, tile, agent);
        return JobOutcome::Done;
    };

    // `update`-triggered tiles are expected to be transient; do not let
    // them churn the cache.
    let data = if change == ChangeType::Update {
        TileData::Built(prepared)
    } else {
        match shared.cache.set(key, prepared.clone()) {
            Some(cached) => TileData::Cached(cached),
            None => TileData::Built(prepared),
        }
    };
    install(shared, mesh, tile, agent, data, geometry.version)
}

fn process_with_store_result(
    shared: &Shared,
    handle: JobHandle,
    id: JobId,
    agent: AgentShape,
    tile: TilePos,
    change: ChangeType,
    mesh: &SharedLiveMesh,
) -> JobOutcome {
    let (found_version, found_data, geometry) = {
        let mut state = shared.state.lock().unwrap();
        let job = &mut state.jobs[handle];
        let geometry = job
            .geometry
            .clone()
            .expect("can’t happen: store-result job without geometry snapshot");
        match &mut job.state {
            JobState::HasStoreResult { found: Some(record) } => {
                // Leave the record behind for the follow-up write; only the
                // payload moves out.
                (Some(record.version), std::mem::take(&mut record.data), geometry)
            }
            JobState::HasStoreResult { found: None } => (None, Vec::new(), geometry),
            JobState::Initial => unreachable!("dispatched store-result path for an initial job"),
        }
    };

    let mut fresh = false;
    let prepared = if found_version == Some(NAVMESH_FORMAT_VERSION) && !found_data.is_empty() {
        log::debug!("job {id}: installing store-loaded tile");
        shared.store_hits.fetch_add(1, Relaxed);
        Some(PreparedTile::new(found_data))
    } else {
        // Version-mismatched or absent record: rebuild from the stashed
        // geometry snapshot.
        fresh = true;
        shared
            .builder
            .build(&geometry, tile, &agent, &shared.build_params)
    };
    let Some(prepared) = prepared else {
        log::debug!("job {id}: builder produced no walkable mesh");
        mark_empty(shared, mesh, tile, agent);
        return JobOutcome::Done;
    };

    let key = CacheKey {
        agent,
        tile,
        fingerprint: geometry.fingerprint(),
    };
    let data = match shared.cache.set(key, prepared.clone()) {
        Some(cached) => TileData::Cached(cached),
        None => TileData::Built(prepared.clone()),
    };
    let outcome = install(shared, mesh, tile, agent, data, geometry.version);

    if outcome == JobOutcome::Done
        && fresh
        && change != ChangeType::Update
        && shared.settings.write_to_store
        && shared.store_queue.is_some()
    {
        let mut state = shared.state.lock().unwrap();
        state.jobs[handle].generated = Some(prepared);
    }
    outcome
}

/// The shared install step: merge a candidate tile into the live mesh,
/// report versions back to the geometry source, and track presence.
fn install(
    shared: &Shared,
    mesh: &SharedLiveMesh,
    tile: TilePos,
    agent: AgentShape,
    data: TileData,
    geometry_version: Version,
) -> JobOutcome {
    let (outcome, mesh_version) = {
        let mut mesh = mesh.lock().unwrap();
        (mesh.install_tile(tile, data), mesh.version())
    };
    shared
        .geometry_source
        .report_change(tile, geometry_version, mesh_version);

    {
        let mut state = shared.state.lock().unwrap();
        if outcome.is_success() {
            if outcome != InstallOutcome::Ignored {
                state.present.insert((agent, tile));
            }
        } else {
            state.present.remove(&(agent, tile));
        }
    }

    log::debug!(
        "installed tile ({}, {}) with outcome {outcome:?}",
        tile.x,
        tile.y
    );
    if outcome.is_success() {
        JobOutcome::Done
    } else {
        JobOutcome::Fail
    }
}

fn mark_empty(shared: &Shared, mesh: &SharedLiveMesh, tile: TilePos, agent: AgentShape) {
    mesh.lock().unwrap().mark_empty(tile);
    let mut state = shared.state.lock().unwrap();
    state.present.remove(&(agent, tile));
}

fn unlock_tile(shared: &Shared, handle: JobHandle) {
    let pair = {
        let mut state = shared.state.lock().unwrap();
        let job = &mut state.jobs[handle];
        job.locked = false;
        job.key()
    };
    let mut processing = shared.processing.lock().unwrap();
    processing.remove(&pair);
    if processing.is_empty() {
        shared.processed.notify_all();
    }
}

fn retry_or_discard(shared: &Shared, handle: JobHandle) {
    let mut state = shared.state.lock().unwrap();
    let player = *shared.player_tile.lock().unwrap();
    let job = &mut state.jobs[handle];
    job.tries += 1;
    if job.tries < shared.settings.max_tries {
        log::debug!("requeueing failed job {} (try {})", job.id, job.tries);
        let priority = job.priority(player);
        state.waiting.push(priority, handle);
        drop(state);
        shared.has_job.notify_all();
    } else {
        let job = state.jobs.remove(handle);
        log::debug!("dropping job {} after {} tries", job.id, job.tries);
        if state.jobs.is_empty() {
            shared.all_done.notify_all();
        }
    }
}

fn cleanup_last_updates(shared: &Shared) {
    let now = Instant::now();
    let interval = shared.settings.min_update_interval;
    let mut state = shared.state.lock().unwrap();
    // Prune only entries strictly older than the throttle interval: an
    // entry at least that old no longer influences any computed process
    // time, so a live throttle can never be cancelled early.
    state
        .last_updates
        .retain(|_, &mut stamp| now.duration_since(stamp) <= interval);
}

// --- Callbacks used by the store worker ---

impl Shared {
    /// Removes a concluded job from the arena.
    pub(crate) fn remove_job(&self, handle: JobHandle) {
        let mut state = self.state.lock().unwrap();
        let job = state.jobs.remove(handle);
        log::debug!("removed job {}", job.id);
        if state.jobs.is_empty() {
            self.all_done.notify_all();
        }
    }

    /// Re-queues a job returned by the store worker, now carrying its
    /// lookup result.
    pub(crate) fn requeue_from_store(
        &self,
        handle: JobHandle,
        found: Option<TileRecord>,
        input: Vec<u8>,
    ) {
        let mut state = self.state.lock().unwrap();
        let player = *self.player_tile.lock().unwrap();
        let job = &mut state.jobs[handle];
        log::debug!("job {} returned from store lookup (hit: {})", job.id, found.is_some());
        job.input = input;
        job.complete_store_read(found);
        let priority = state.jobs[handle].priority(player);
        state.waiting.push(priority, handle);
        drop(state);
        self.has_job.notify_all();
    }

    /// Snapshot of the fields the store worker needs, taken under the
    /// scheduler lock so it never holds that lock across I/O.
    pub(crate) fn store_job_snapshot(&self, handle: JobHandle) -> StoreJobSnapshot {
        let state = self.state.lock().unwrap();
        let job = &state.jobs[handle];
        StoreJobSnapshot {
            id: job.id,
            agent: job.agent,
            worldspace: job.worldspace.clone(),
            tile: job.tile,
            geometry: job
                .geometry
                .clone()
                .expect("can’t happen: store job without geometry snapshot"),
            input: job.input.clone(),
            generated: job.generated.clone(),
            matched_tile_id: match &job.state {
                JobState::HasStoreResult {
                    found: Some(record),
                } => Some(record.tile_id),
                _ => None,
            },
        }
    }
}

/// Copy of the job fields the store worker operates on.
pub(crate) struct StoreJobSnapshot {
    pub id: JobId,
    pub agent: AgentShape,
    pub worldspace: Worldspace,
    pub tile: TilePos,
    pub geometry: Arc<crate::geometry::TileGeometry>,
    pub input: Vec<u8>,
    pub generated: Option<PreparedTile>,
    /// Identity of the record whose exact input this job already matched.
    pub matched_tile_id: Option<tilenav_store::TileId>,
}
