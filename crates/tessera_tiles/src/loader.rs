//! # Tile Loader Pool
//!
//! Worker threads that turn load tickets into published payloads.
//!
//! ## Flow
//!
//! ```text
//!   TileManager ──push──> JobQueue ──recv──> worker N ──complete_load──> TileCache
//!                                              │
//!                                   read lock on LoaderConfig
//!                                   (source + theme, per load)
//! ```
//!
//! Workers hold the config read lock for the whole load, so [`pause`]
//! returns only once every in-flight load has been published, and no new
//! load starts until the [`LoaderPause`] guard is dropped.
//!
//! [`pause`]: TileLoaderPool::pause

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::cache::{LoadOutcome, LoadTicket, TileCache};
use crate::error::{SourceError, TileError, TileResult};
use crate::payload::PayloadBuilder;
use crate::source::{RenderTheme, TileDataSource, TileSource};

/// How often idle workers check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Queue of pending load tickets.
#[derive(Clone)]
pub struct JobQueue {
    tx: Sender<LoadTicket>,
    rx: Receiver<LoadTicket>,
}

impl JobQueue {
    /// Creates an empty, unbounded queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Queues a load.
    pub fn push(&self, ticket: LoadTicket) {
        // Both ends live in self, the channel cannot be disconnected
        if self.tx.send(ticket).is_err() {
            tracing::warn!(tile = %ticket.id, "job queue disconnected");
        }
    }

    /// Removes every queued ticket.
    #[must_use]
    pub fn drain(&self) -> Vec<LoadTicket> {
        self.rx.try_iter().collect()
    }

    /// Queued tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Nothing queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Load counters across all workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Payloads published.
    pub published: u64,
    /// Loads that failed.
    pub failed: u64,
    /// Results dropped because the tile moved on.
    pub stale: u64,
}

struct LoaderConfig {
    source: Option<Arc<dyn TileSource>>,
    theme: Arc<dyn RenderTheme>,
    /// Bumped on every source swap; workers rebuild their data source.
    generation: u64,
}

struct LoaderShared {
    config: RwLock<LoaderConfig>,
    running: AtomicBool,
    published: AtomicU64,
    failed: AtomicU64,
    stale: AtomicU64,
}

impl LoaderShared {
    fn record(&self, outcome: LoadOutcome) {
        let counter = match outcome {
            LoadOutcome::Published => &self.published,
            LoadOutcome::Failed => &self.failed,
            LoadOutcome::Stale => &self.stale,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Loader configuration held exclusively; workers wait until it is dropped.
pub struct LoaderPause<'a> {
    config: RwLockWriteGuard<'a, LoaderConfig>,
}

impl LoaderPause<'_> {
    /// Installs a new tile source (or none).
    pub fn set_tile_source(&mut self, source: Option<Arc<dyn TileSource>>) {
        self.config.source = source;
        self.config.generation += 1;
    }

    /// Installs a new theme.
    pub fn set_theme(&mut self, theme: Arc<dyn RenderTheme>) {
        self.config.theme = theme;
    }

    /// The installed tile source.
    #[must_use]
    pub fn tile_source(&self) -> Option<&Arc<dyn TileSource>> {
        self.config.source.as_ref()
    }

    /// Lets the workers continue.
    pub fn resume(self) {}
}

/// Worker threads loading tiles for one cache.
pub struct TileLoaderPool {
    shared: Arc<LoaderShared>,
    workers: Vec<JoinHandle<()>>,
}

impl TileLoaderPool {
    /// Starts `threads` workers consuming `jobs`.
    ///
    /// # Errors
    ///
    /// [`TileError::NoWorkers`] for zero threads, [`TileError::Spawn`] if a
    /// thread cannot be started.
    pub fn new(
        cache: &Arc<TileCache>,
        jobs: &JobQueue,
        threads: usize,
        theme: Arc<dyn RenderTheme>,
    ) -> TileResult<Self> {
        if threads == 0 {
            return Err(TileError::NoWorkers);
        }

        let mut pool = Self {
            shared: Arc::new(LoaderShared {
                config: RwLock::new(LoaderConfig {
                    source: None,
                    theme,
                    generation: 0,
                }),
                running: AtomicBool::new(true),
                published: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                stale: AtomicU64::new(0),
            }),
            workers: Vec::with_capacity(threads),
        };

        for index in 0..threads {
            let cache = Arc::clone(cache);
            let jobs = jobs.rx.clone();
            let shared = Arc::clone(&pool.shared);
            let handle = std::thread::Builder::new()
                .name(format!("tessera-loader-{index}"))
                .spawn(move || worker_loop(index, &cache, &jobs, &shared))
                .map_err(|e| TileError::Spawn(e.to_string()))?;
            pool.workers.push(handle);
        }

        tracing::debug!(threads, "loader pool started");
        Ok(pool)
    }

    /// Blocks until in-flight loads are published and holds the workers.
    pub fn pause(&self) -> LoaderPause<'_> {
        LoaderPause {
            config: self.shared.config.write(),
        }
    }

    /// Swaps the tile source while paused.
    pub fn set_tile_source(&self, source: Option<Arc<dyn TileSource>>) {
        self.pause().set_tile_source(source);
    }

    /// Swaps the theme while paused.
    pub fn set_theme(&self, theme: Arc<dyn RenderTheme>) {
        self.pause().set_theme(theme);
    }

    /// The current theme.
    #[must_use]
    pub fn theme(&self) -> Arc<dyn RenderTheme> {
        Arc::clone(&self.shared.config.read().theme)
    }

    /// Live worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Load counters.
    #[must_use]
    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            published: self.shared.published.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            stale: self.shared.stale.load(Ordering::Relaxed),
        }
    }

    /// Stops and joins every worker. Queued tickets stay queued.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.shared.running.store(false, Ordering::Release);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("loader worker panicked");
            }
        }
        tracing::debug!(stats = ?self.stats(), "loader pool stopped");
    }
}

impl Drop for TileLoaderPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    index: usize,
    cache: &TileCache,
    jobs: &Receiver<LoadTicket>,
    shared: &LoaderShared,
) {
    let mut data_source: Option<Box<dyn TileDataSource>> = None;
    let mut generation = 0;

    while shared.running.load(Ordering::Acquire) {
        let ticket = match jobs.recv_timeout(POLL_INTERVAL) {
            Ok(ticket) => ticket,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let config = shared.config.read();
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        // Cancelled while queued
        if !cache.table().is_current(&ticket) {
            shared.record(LoadOutcome::Stale);
            continue;
        }

        if generation != config.generation {
            data_source = config.source.as_ref().map(|source| source.data_source());
            generation = config.generation;
        }

        let result = match data_source.as_mut() {
            Some(source) => {
                let mut builder = PayloadBuilder::new(cache.pools().clone());
                source
                    .load(ticket.id, &*config.theme, &mut builder)
                    .map(|()| builder.finish())
            }
            None => Err(SourceError::NoSource),
        };

        let outcome = cache.complete_load(&ticket, result);
        shared.record(outcome);
        drop(config);
    }

    tracing::debug!(worker = index, "loader worker stopped");
}
