//! # Map
//!
//! The facade the application talks to. It lives on the logic thread and
//! hands a [`FrameCoordinator`] to the render thread:
//!
//! ```text
//!   app ──set_map_position / animate_to──> FrameShared <──copy── render thread
//!    │
//!    └──update_map──> TileManager ──JobQueue──> TileLoaderPool
//! ```
//!
//! Source and theme swaps pause the loaders, empty the cache and raise
//! invalidate-all so every layer drops what it built from the old data.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tessera_core::{MapPosition, ScratchBufferPool};
use tessera_render::{
    FrameCoordinator, FrameShared, GpuContext, LayerHandle, LayerRegistry, RenderContext,
    SharedFrame, TileRenderer, Viewport,
};
use tessera_tiles::{
    DefaultTheme, JobQueue, LoaderStats, RenderTheme, TileCache, TileLoaderPool, TileManager,
    TileSource, UpdateStats,
};

use crate::config::MapConfig;
use crate::error::MapResult;

/// A tile map: cache, loaders, view state and layers.
pub struct Map {
    config: MapConfig,
    shared: SharedFrame,
    layers: Arc<LayerRegistry>,
    tile_layer: LayerHandle,
    manager: TileManager,
    loaders: TileLoaderPool,
}

impl Map {
    /// Creates a map with the default theme and no tile source.
    ///
    /// # Errors
    ///
    /// Invalid configuration or loader threads that fail to start.
    pub fn new(config: MapConfig) -> MapResult<Self> {
        config.validate()?;

        let cache = TileCache::new();
        let jobs = JobQueue::new();
        let loaders = TileLoaderPool::new(
            &cache,
            &jobs,
            config.loader_threads,
            Arc::new(DefaultTheme),
        )?;
        let manager = TileManager::new(Arc::clone(&cache), jobs, config.manager_settings());

        let mut viewport = Viewport::new(config.view_width, config.view_height, config.tile_size);
        viewport.set_zoom_limits(config.min_zoom, config.max_zoom);
        let mut frame = FrameShared::new(viewport);
        frame.background = Some(DefaultTheme.map_background());

        let layers = Arc::new(LayerRegistry::new());
        let tile_layer = LayerHandle::new(
            TileRenderer::new(cache).with_max_uploads(config.max_uploads_per_frame),
        );
        layers.add(tile_layer.clone())?;

        tracing::info!(
            loader_threads = config.loader_threads,
            cache_limit = config.cache_limit,
            "map created"
        );
        Ok(Self {
            config,
            shared: Arc::new(Mutex::new(frame)),
            layers,
            tile_layer,
            manager,
            loaders,
        })
    }

    /// The configuration the map was built with.
    #[must_use]
    pub const fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Swaps the tile source (`None` unloads it).
    ///
    /// The new source is opened first; on failure the old one stays.
    ///
    /// # Errors
    ///
    /// [`MapError::Source`](crate::MapError::Source) when the new source
    /// cannot be opened.
    pub fn set_tile_source(&mut self, source: Option<Arc<dyn TileSource>>) -> MapResult<()> {
        if let Some(source) = &source {
            source.open()?;
        }

        let mut paused = self.loaders.pause();
        if let Some(old) = paused.tile_source() {
            old.close();
        }
        let name = source.as_ref().map(|s| s.name().to_owned());
        paused.set_tile_source(source);
        // Nothing is loading while paused
        self.manager.clear_all();
        paused.resume();

        self.invalidate();
        tracing::info!(source = ?name, "tile source set");
        Ok(())
    }

    /// Swaps the theme; tiles are rebuilt with it.
    pub fn set_theme(&mut self, theme: Arc<dyn RenderTheme>) {
        let background = theme.map_background();

        let mut paused = self.loaders.pause();
        paused.set_theme(theme);
        self.manager.clear_all();
        paused.resume();

        let mut shared = self.shared.lock();
        shared.background = Some(background);
        shared.invalidate_all = true;
    }

    /// Jumps to `position`, cancelling any animation.
    pub fn set_map_position(&self, position: MapPosition) {
        let mut shared = self.shared.lock();
        shared.animator.cancel();
        shared.viewport.set_map_position(position);
    }

    /// Current view position.
    #[must_use]
    pub fn map_position(&self) -> MapPosition {
        self.shared.lock().viewport.map_position()
    }

    /// Animates from the current position to `target`.
    pub fn animate_to(&self, target: MapPosition, duration: Duration) {
        let mut shared = self.shared.lock();
        let from = shared.viewport.map_position();
        shared.animator.animate_to(from, target, duration);
    }

    /// Resizes the view.
    pub fn set_view_size(&mut self, width: u32, height: u32) {
        self.shared.lock().viewport.set_size(width, height);
        self.manager.set_view_size(width, height);
    }

    /// One logic tick: brings the cache in line with the current position.
    pub fn update_map(&mut self) -> UpdateStats {
        let position = self.map_position();
        self.manager.update(&position)
    }

    /// Empties the cache and redraws from scratch.
    pub fn clear_map(&mut self) {
        self.manager.clear_all();
        self.invalidate();
    }

    /// The layer stack; the tile layer is at index 0.
    #[must_use]
    pub const fn layers(&self) -> &Arc<LayerRegistry> {
        &self.layers
    }

    /// The tile layer.
    #[must_use]
    pub const fn tile_layer(&self) -> &LayerHandle {
        &self.tile_layer
    }

    /// The tile cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<TileCache> {
        self.manager.cache()
    }

    /// Loader counters.
    #[must_use]
    pub fn loader_stats(&self) -> LoaderStats {
        self.loaders.stats()
    }

    /// Builds the render-thread side around `gpu`.
    ///
    /// # Errors
    ///
    /// [`MapError::Core`](crate::MapError::Core) for an invalid scratch floor.
    pub fn frame_coordinator(&self, gpu: Box<dyn GpuContext>) -> MapResult<FrameCoordinator> {
        let scratch = ScratchBufferPool::with_floor(self.config.scratch_floor_bytes)?;
        Ok(FrameCoordinator::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.layers),
            RenderContext::new(gpu, scratch),
            self.config.frame_budget(),
        ))
    }

    /// Stops the loaders and closes the source.
    pub fn shutdown(&mut self) {
        if self.loaders.worker_count() == 0 {
            return;
        }
        let paused = self.loaders.pause();
        if let Some(source) = paused.tile_source() {
            source.close();
        }
        paused.resume();
        self.loaders.shutdown();
    }

    fn invalidate(&self) {
        self.shared.lock().invalidate_all = true;
    }
}

impl Drop for Map {
    fn drop(&mut self) {
        self.shutdown();
    }
}
