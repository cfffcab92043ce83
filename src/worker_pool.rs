//! # Worker Pool Module
//!
//! Elastic pool of worker coroutines. Each worker resolves its handler once
//! at startup and then serves handed-off connections strictly one at a time.
//!
//! ## Handoff
//!
//! 1. The most recently parked idle worker gets the connection
//! 2. With no idle worker and fewer than `max_workers` live, a new worker is
//!    spawned and the connection becomes its first request
//! 3. At `max_workers` the handoff blocks until a worker parks again
//!
//! Every worker owns the receiving end of its own `may` channel. The pool
//! keeps the sending ends; dropping one is how a worker is told to exit.
//! A worker only joins the idle list once its initializer has succeeded.
//!
//! Workers signal a freed slot only while a handoff is registered as
//! waiting, so at most one wakeup token is ever queued.
//!
//! ## Eviction
//!
//! A reaper coroutine wakes a few times per idle timeout and drops the
//! senders of workers that have been idle longer than the timeout, oldest
//! first, while more than `min_workers` are live. The same pass respawns
//! workers when failed initializers left the pool below `min_workers`.

use crate::codec::FrameLimits;
use crate::config::{DebugCriteria, ServerConfig};
use crate::dispatcher::{Dispatcher, Handler};
use crate::request::{Connection, RequestState};
use may::sync::mpsc;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What a worker knows about itself while resolving its handler
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub id: usize,
    pub config: Arc<ServerConfig>,
}

/// Per-worker initializer, run once inside the worker before it serves
/// anything. Returns the handler that worker will use for its lifetime.
pub type Initializer =
    Arc<dyn Fn(&WorkerContext) -> anyhow::Result<Box<dyn Handler>> + Send + Sync>;

/// Sizing and eviction settings for a [`WorkerPool`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub idle_timeout: Duration,
    /// Stack size for worker coroutines
    pub stack_size: usize,
}

impl From<&ServerConfig> for WorkerPoolConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            idle_timeout: config.idle_timeout(),
            stack_size: config.stack_size,
        }
    }
}

impl WorkerPoolConfig {
    /// How often the reaper looks for expired idle workers
    fn reap_interval(&self) -> Duration {
        (self.idle_timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(1))
    }
}

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Workers holding a live channel
    pub live_workers: AtomicUsize,
    /// Workers parked waiting for a connection
    pub idle_workers: AtomicUsize,
    /// Connections currently being served
    pub busy_workers: AtomicUsize,
    pub spawned_count: AtomicU64,
    pub evicted_count: AtomicU64,
    /// Workers whose initializer failed or panicked
    pub init_failures: AtomicU64,
    /// Connections handed to a worker
    pub dispatched_count: AtomicU64,
    /// Connections fully served and closed
    pub completed_count: AtomicU64,
    /// Handoffs that had to wait for a worker to free up
    pub saturated_count: AtomicU64,
}

impl WorkerPoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatch(&self) {
        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
        self.busy_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.busy_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_saturated(&self) {
        self.saturated_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            live: self.live_workers.load(Ordering::Relaxed),
            idle: self.idle_workers.load(Ordering::Relaxed),
            busy: self.busy_workers.load(Ordering::Relaxed),
            spawned: self.spawned_count.load(Ordering::Relaxed),
            evicted: self.evicted_count.load(Ordering::Relaxed),
            init_failures: self.init_failures.load(Ordering::Relaxed),
            dispatched: self.dispatched_count.load(Ordering::Relaxed),
            completed: self.completed_count.load(Ordering::Relaxed),
            saturated: self.saturated_count.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`WorkerPoolMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub live: usize,
    pub idle: usize,
    pub busy: usize,
    pub spawned: u64,
    pub evicted: u64,
    pub init_failures: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub saturated: u64,
}

struct IdleWorker {
    id: usize,
    since: Instant,
}

struct PoolState<C> {
    /// Oldest at the front, most recently parked at the back
    idle: VecDeque<IdleWorker>,
    senders: HashMap<usize, mpsc::Sender<C>>,
    next_id: usize,
}

impl<C> PoolState<C> {
    fn register(&mut self) -> (usize, mpsc::Receiver<C>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = mpsc::channel();
        self.senders.insert(id, tx);
        (id, rx)
    }
}

struct Shared<C> {
    state: Mutex<PoolState<C>>,
    server: Arc<ServerConfig>,
    config: WorkerPoolConfig,
    init: Initializer,
    metrics: Arc<WorkerPoolMetrics>,
    shutdown: AtomicBool,
    /// Handoffs blocked on a full pool; only changed under the state lock
    waiters: AtomicUsize,
    /// A wakeup token is queued and not yet consumed
    signal_pending: AtomicBool,
}

impl<C> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_counts(&self, state: &PoolState<C>) {
        self.metrics
            .live_workers
            .store(state.senders.len(), Ordering::Relaxed);
        self.metrics
            .idle_workers
            .store(state.idle.len(), Ordering::Relaxed);
    }

    /// Put a worker back on the idle list. Returns `false` when the worker
    /// no longer has a channel and should exit.
    fn park(&self, id: usize) -> bool {
        let mut state = self.lock();
        if self.shutdown.load(Ordering::Acquire) || !state.senders.contains_key(&id) {
            return false;
        }
        state.idle.push_back(IdleWorker {
            id,
            since: Instant::now(),
        });
        self.publish_counts(&state);
        true
    }

    /// Wake a blocked handoff, if any. Call after the slot is visible
    /// under the state lock (parked or retired).
    fn notify_freed(&self, freed: &mpsc::Sender<()>) {
        if self.waiters.load(Ordering::Acquire) > 0
            && !self.signal_pending.swap(true, Ordering::AcqRel)
        {
            let _ = freed.send(());
        }
    }

    fn retire(&self, id: usize) {
        let mut state = self.lock();
        state.senders.remove(&id);
        state.idle.retain(|w| w.id != id);
        self.publish_counts(&state);
    }

    /// Drop expired idle workers while above the minimum
    fn evict_expired(&self) -> usize {
        let mut state = self.lock();
        let mut evicted = 0;
        while state.senders.len() > self.config.min_workers {
            match state.idle.front() {
                Some(w) if w.since.elapsed() >= self.config.idle_timeout => {
                    if let Some(w) = state.idle.pop_front() {
                        state.senders.remove(&w.id);
                        evicted += 1;
                    }
                }
                _ => break,
            }
        }
        if evicted > 0 {
            self.metrics
                .evicted_count
                .fetch_add(evicted as u64, Ordering::Relaxed);
            self.publish_counts(&state);
        }
        evicted
    }
}

/// Removes the worker's channel when its coroutine ends, however it ends,
/// and wakes a handoff that may be waiting for capacity.
struct RetireGuard<C> {
    id: usize,
    shared: Arc<Shared<C>>,
    freed: mpsc::Sender<()>,
}

impl<C> Drop for RetireGuard<C> {
    fn drop(&mut self) {
        self.shared.retire(self.id);
        self.shared.notify_freed(&self.freed);
        debug!(worker_id = self.id, "Worker coroutine exiting");
    }
}

/// Decode, dispatch and answer one connection
pub fn serve_connection<C: Connection + 'static>(
    dispatcher: &Dispatcher,
    conn: C,
    limits: &FrameLimits,
) {
    let mut state = RequestState::with_connection(Box::new(conn), dispatcher.debug().clone());
    if let Err(e) = state.read_frame(limits) {
        warn!(error = %e, "Dropping connection after protocol error");
        state.abort();
        return;
    }
    dispatcher.dispatch(&mut state);
    if let Err(e) = state.finalize() {
        debug!(request_id = %state.request_id(), error = %e, "Connection finalize reported an error");
    }
}

fn run_worker<C: Connection + 'static>(
    id: usize,
    shared: Arc<Shared<C>>,
    rx: mpsc::Receiver<C>,
    first: Option<C>,
    freed: mpsc::Sender<()>,
) {
    let _guard = RetireGuard {
        id,
        shared: Arc::clone(&shared),
        freed: freed.clone(),
    };

    let ctx = WorkerContext {
        id,
        config: Arc::clone(&shared.server),
    };
    let handler = match catch_unwind(AssertUnwindSafe(|| (shared.init)(&ctx))) {
        Ok(Ok(handler)) => handler,
        Ok(Err(e)) => {
            shared.metrics.init_failures.fetch_add(1, Ordering::Relaxed);
            error!(worker_id = id, error = ?e, "Worker initializer failed");
            return;
        }
        Err(_) => {
            shared.metrics.init_failures.fetch_add(1, Ordering::Relaxed);
            error!(worker_id = id, "Worker initializer panicked");
            return;
        }
    };
    let debug: DebugCriteria = shared.server.debug.clone();
    let dispatcher = Dispatcher::new(handler, debug);
    let limits = shared.server.frame_limits();
    debug!(worker_id = id, "Worker coroutine started");

    if first.is_none() {
        if !shared.park(id) {
            return;
        }
        shared.notify_freed(&freed);
    }

    let mut next = first;
    loop {
        let conn = match next.take() {
            Some(conn) => conn,
            None => match rx.recv() {
                Ok(conn) => conn,
                // Channel dropped: evicted or shutting down
                Err(_) => break,
            },
        };
        shared.metrics.record_dispatch();
        serve_connection(&dispatcher, conn, &limits);
        shared.metrics.record_completion();

        if !shared.park(id) {
            break;
        }
        shared.notify_freed(&freed);
    }
}

/// Start a worker coroutine for a registered id. Returns `false` (and
/// retires the id) when the runtime refuses the spawn.
fn spawn_worker<C: Connection + 'static>(
    shared: &Arc<Shared<C>>,
    freed: &mpsc::Sender<()>,
    id: usize,
    rx: mpsc::Receiver<C>,
    first: Option<C>,
) -> bool {
    let worker_shared = Arc::clone(shared);
    let worker_freed = freed.clone();
    shared.metrics.spawned_count.fetch_add(1, Ordering::Relaxed);

    // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
    // The closure owns everything it touches (Arc, channels, connection),
    // so no reference outlives its owner.
    let spawn_result = unsafe {
        may::coroutine::Builder::new()
            .name(format!("scgi-worker-{id}"))
            .stack_size(shared.config.stack_size)
            .spawn(move || run_worker(id, worker_shared, rx, first, worker_freed))
    };
    match spawn_result {
        Ok(_) => true,
        Err(e) => {
            error!(worker_id = id, error = %e, "Failed to spawn worker coroutine");
            shared.retire(id);
            false
        }
    }
}

/// Spawn workers until `min_workers` are live. Returns how many started.
fn replenish<C: Connection + 'static>(shared: &Arc<Shared<C>>, freed: &mpsc::Sender<()>) -> usize {
    let mut started = 0;
    loop {
        let (id, rx) = {
            let mut state = shared.lock();
            if shared.shutdown.load(Ordering::Acquire)
                || state.senders.len() >= shared.config.min_workers
            {
                break;
            }
            let registered = state.register();
            shared.publish_counts(&state);
            registered
        };
        if !spawn_worker(shared, freed, id, rx, None) {
            break;
        }
        started += 1;
    }
    started
}

/// Elastic pool of request workers for connections of type `C`.
///
/// Owned by the acceptor; [`WorkerPool::handoff`] is the only way in.
pub struct WorkerPool<C: Connection + 'static> {
    shared: Arc<Shared<C>>,
    freed_tx: mpsc::Sender<()>,
    freed_rx: mpsc::Receiver<()>,
}

impl<C: Connection + 'static> WorkerPool<C> {
    /// Build a pool sized from `server` and pre-spawn `min_workers`
    pub fn new(server: Arc<ServerConfig>, init: Initializer) -> Self {
        let config = WorkerPoolConfig::from(server.as_ref());
        Self::with_config(server, config, init)
    }

    /// Build a pool with explicit sizing
    pub fn with_config(server: Arc<ServerConfig>, config: WorkerPoolConfig, init: Initializer) -> Self {
        let (freed_tx, freed_rx) = mpsc::channel();
        info!(
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            idle_timeout_ms = config.idle_timeout.as_millis() as u64,
            stack_size = config.stack_size,
            "Creating worker pool"
        );
        let pool = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    senders: HashMap::new(),
                    next_id: 0,
                }),
                server,
                config,
                init,
                metrics: Arc::new(WorkerPoolMetrics::new()),
                shutdown: AtomicBool::new(false),
                waiters: AtomicUsize::new(0),
                signal_pending: AtomicBool::new(false),
            }),
            freed_tx,
            freed_rx,
        };

        replenish(&pool.shared, &pool.freed_tx);
        pool.spawn_reaper();
        pool
    }

    fn spawn_reaper(&self) {
        let shared = Arc::clone(&self.shared);
        let freed = self.freed_tx.clone();
        let interval = self.shared.config.reap_interval();
        // SAFETY: see spawn_worker; the reaper only holds an Arc to pool state
        // and a wakeup sender.
        let spawn_result = unsafe {
            may::coroutine::Builder::new()
                .name("scgi-reaper".to_string())
                .stack_size(self.shared.config.stack_size)
                .spawn(move || {
                    while !shared.shutdown.load(Ordering::Acquire) {
                        may::coroutine::sleep(interval);
                        let evicted = shared.evict_expired();
                        if evicted > 0 {
                            debug!(evicted, "Evicted idle workers");
                        }
                        let restored = replenish(&shared, &freed);
                        if restored > 0 {
                            warn!(restored, "Respawned workers to reach min_workers");
                        }
                    }
                })
        };
        if let Err(e) = spawn_result {
            error!(error = %e, "Failed to spawn idle reaper, workers will not be evicted");
        }
    }

    /// Transfer ownership of `conn` to exactly one worker.
    ///
    /// Blocks the calling coroutine while the pool is saturated. Returns the
    /// connection untouched if the pool is shutting down.
    ///
    /// # Errors
    ///
    /// The pool was shut down.
    pub fn handoff(&self, mut conn: C) -> Result<(), C> {
        loop {
            if self.shared.shutdown.load(Ordering::Acquire) {
                return Err(conn);
            }
            let mut state = self.shared.lock();
            while let Some(worker) = state.idle.pop_back() {
                let Some(tx) = state.senders.get(&worker.id) else {
                    continue;
                };
                match tx.send(conn) {
                    Ok(()) => {
                        self.shared.publish_counts(&state);
                        // Another handoff may be waiting on a worker that is already idle
                        if !state.idle.is_empty() {
                            drop(state);
                            self.shared.notify_freed(&self.freed_tx);
                        }
                        return Ok(());
                    }
                    Err(err) => {
                        // Worker died without retiring yet
                        conn = err.0;
                        state.senders.remove(&worker.id);
                    }
                }
            }

            if state.senders.len() < self.shared.config.max_workers {
                let (id, rx) = state.register();
                self.shared.publish_counts(&state);
                drop(state);
                debug!(worker_id = id, "Spawning worker for new connection");
                spawn_worker(&self.shared, &self.freed_tx, id, rx, Some(conn));
                return Ok(());
            }
            // Registered under the lock, so any park that follows sees it
            self.shared.waiters.fetch_add(1, Ordering::AcqRel);
            drop(state);

            self.shared.metrics.record_saturated();
            debug!("Worker pool saturated, waiting for a free worker");
            let woke = self.freed_rx.recv();
            self.shared.waiters.fetch_sub(1, Ordering::AcqRel);
            self.shared.signal_pending.store(false, Ordering::Release);
            // The pool holds a sender itself, so this only fails on teardown
            if woke.is_err() {
                return Err(conn);
            }
        }
    }

    /// Run one eviction pass immediately
    pub fn evict_idle(&self) -> usize {
        self.shared.evict_expired()
    }

    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.shared.metrics
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.metrics.snapshot()
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.shared.config
    }

    /// Stop accepting work and tell every worker to exit.
    ///
    /// Busy workers finish their current connection first.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.shared.lock();
        state.idle.clear();
        state.senders.clear();
        self.shared.publish_counts(&state);
        info!("Worker pool shut down");
    }
}

impl<C: Connection + 'static> Drop for WorkerPool<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
