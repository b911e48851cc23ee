//! # Frame Coordinator
//!
//! Drives one frame on the render thread:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        FRAME TIMELINE                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ├── Critical section (shared frame lock)                    │
//! │  │   ├── Step the animator                                   │
//! │  │   ├── Copy position + matrices, detect change             │
//! │  │   └── Take invalidate flag, background, layer snapshot    │
//! │  ├── Clear                                                   │
//! │  ├── Per layer: invalidate? ─> setup once ─> update ─> render│
//! │  ├── Recycle scratch buffers                                 │
//! │  └── Out-of-memory? ─> shrink pools, notify layers           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The shared lock is held only while copying, never while drawing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tessera_core::MapPosition;

use crate::context::RenderContext;
use crate::registry::LayerRegistry;
use crate::viewport::{MapAnimator, Viewport};

/// View state edited by the logic thread and read once per frame.
pub struct FrameShared {
    /// Position, size and matrices.
    pub viewport: Viewport,
    /// Running animation, stepped by the render thread.
    pub animator: MapAnimator,
    /// Set to make every layer drop its cached state next frame.
    pub invalidate_all: bool,
    /// Pending clear colour from a theme change.
    pub background: Option<[f32; 4]>,
}

impl FrameShared {
    /// Creates the shared state around `viewport`.
    #[must_use]
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            animator: MapAnimator::new(),
            invalidate_all: false,
            background: None,
        }
    }
}

/// Handle to the shared frame state.
pub type SharedFrame = Arc<Mutex<FrameShared>>;

/// Result of a single frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameResult {
    /// Frame number
    pub frame_number: u64,
    /// Total frame time (microseconds)
    pub frame_time_us: u32,
    /// Layers whose update ran
    pub layers_updated: u32,
    /// Layers that rendered
    pub layers_drawn: u32,
    /// Draw calls issued
    pub draw_calls: u32,
    /// The map position changed since the previous frame
    pub view_changed: bool,
    /// Layers were invalidated this frame
    pub invalidated: bool,
    /// The GPU ran out of memory and pools were shrunk
    pub degraded: bool,
    /// Over budget warning
    pub over_budget: bool,
    /// Scratch buffers recycled at frame end
    pub scratch_recycled: u32,
}

/// Statistics across frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    /// Total frames rendered
    pub total_frames: u64,
    /// Average frame time (microseconds)
    pub avg_frame_time_us: u32,
    /// Worst frame time (microseconds)
    pub worst_frame_time_us: u32,
    /// Frames over budget
    pub frames_over_budget: u32,
    /// Frames that hit out-of-memory
    pub oom_frames: u32,
}

/// Runs frames on the render thread.
pub struct FrameCoordinator {
    shared: SharedFrame,
    registry: Arc<LayerRegistry>,
    context: RenderContext,
    position: MapPosition,
    background: [f32; 4],
    budget: Duration,
    frame_count: u64,
    total_time_us: u64,
    stats: FrameStats,
}

impl FrameCoordinator {
    /// Creates a coordinator; `budget` is the frame time that triggers a warning.
    #[must_use]
    pub fn new(
        shared: SharedFrame,
        registry: Arc<LayerRegistry>,
        context: RenderContext,
        budget: Duration,
    ) -> Self {
        Self {
            shared,
            registry,
            context,
            // Never equal to a real position, the first frame counts as a change
            position: MapPosition::new(f64::NAN, f64::NAN, 1.0),
            background: [0.0, 0.0, 0.0, 1.0],
            budget,
            frame_count: 0,
            total_time_us: 0,
            stats: FrameStats::default(),
        }
    }

    /// Render-thread resources.
    #[must_use]
    pub const fn context(&self) -> &RenderContext {
        &self.context
    }

    /// Mutable render-thread resources.
    pub fn context_mut(&mut self) -> &mut RenderContext {
        &mut self.context
    }

    /// Position drawn by the last frame.
    #[must_use]
    pub const fn position(&self) -> &MapPosition {
        &self.position
    }

    /// Accumulated statistics.
    #[must_use]
    pub const fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Draws one frame.
    pub fn draw_frame(&mut self) -> FrameResult {
        let frame_start = Instant::now();
        self.frame_count += 1;
        self.context.begin_frame(self.frame_count);

        // === Critical section: copy shared state ===
        let (view_changed, matrices, invalidated, layers) = {
            let mut shared = self.shared.lock();
            if let Some(position) = shared.animator.update(frame_start) {
                shared.viewport.set_map_position(position);
            }
            let changed = shared.viewport.get_map_position(&mut self.position);
            let matrices = *shared.viewport.matrices();
            let invalidated = std::mem::take(&mut shared.invalidate_all);
            if let Some(background) = shared.background.take() {
                self.background = background;
            }
            (changed, matrices, invalidated, self.registry.snapshot())
        };

        self.context.gpu.clear(self.background);

        // === Layers ===
        let mut result = FrameResult {
            frame_number: self.frame_count,
            view_changed,
            invalidated,
            ..FrameResult::default()
        };
        for layer in layers.iter() {
            let mut slot = layer.lock();
            if invalidated {
                slot.renderer.invalidate();
            }
            if !slot.enabled {
                continue;
            }
            if !slot.initialized {
                match slot.renderer.setup(&mut self.context) {
                    Ok(()) => slot.initialized = true,
                    Err(error) => {
                        tracing::warn!(layer = layer.name(), %error, "layer setup failed");
                        continue;
                    }
                }
            }

            result.layers_updated += 1;
            let ready = slot.renderer.update(
                &mut self.context,
                &self.position,
                view_changed || invalidated,
                &matrices,
            );
            if !ready {
                continue;
            }
            match slot.renderer.render(&mut self.context, &self.position, &matrices) {
                Ok(draws) => {
                    result.layers_drawn += 1;
                    result.draw_calls += u32::try_from(draws).unwrap_or(u32::MAX);
                }
                Err(error) => tracing::warn!(layer = layer.name(), %error, "layer render failed"),
            }
        }

        // === Finalize ===
        let recycled = self.context.scratch.end_frame();
        result.scratch_recycled = u32::try_from(recycled).unwrap_or(u32::MAX);

        if self.context.gpu.check_out_of_memory() {
            let freed = self.context.shrink();
            for layer in layers.iter() {
                layer.lock().renderer.on_low_memory(&mut self.context);
            }
            result.degraded = true;
            self.stats.oom_frames += 1;
            tracing::warn!(frame = self.frame_count, freed, "GPU out of memory, pools shrunk");
        }

        let elapsed = frame_start.elapsed();
        let total_us = u32::try_from(elapsed.as_micros()).unwrap_or(u32::MAX);
        result.frame_time_us = total_us;
        result.over_budget = elapsed > self.budget;

        self.stats.total_frames += 1;
        self.total_time_us += u64::from(total_us);
        let average = self.total_time_us / self.stats.total_frames;
        self.stats.avg_frame_time_us = u32::try_from(average).unwrap_or(u32::MAX);
        if total_us > self.stats.worst_frame_time_us {
            self.stats.worst_frame_time_us = total_us;
        }
        if result.over_budget {
            self.stats.frames_over_budget += 1;
            tracing::warn!(frame = self.frame_count, frame_time_us = total_us, "frame over budget");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RenderError, RenderResult};
    use crate::gpu::HeadlessGpu;
    use crate::layer::LayerRenderer;
    use crate::registry::LayerHandle;
    use crate::viewport::Matrices;
    use tessera_core::ScratchBufferPool;

    #[derive(Default)]
    struct Counts {
        setups: u32,
        updates: u32,
        changed: u32,
        renders: u32,
        invalidations: u32,
        low_memory: u32,
    }

    struct Probe {
        counts: Arc<Mutex<Counts>>,
        ready: bool,
        fail_setup_once: bool,
    }

    impl LayerRenderer for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn setup(&mut self, _: &mut RenderContext) -> RenderResult<()> {
            if std::mem::take(&mut self.fail_setup_once) {
                return Err(RenderError::ShaderCompile {
                    name: "probe".to_owned(),
                    reason: "test".to_owned(),
                });
            }
            self.counts.lock().setups += 1;
            Ok(())
        }

        fn update(&mut self, ctx: &mut RenderContext, _: &MapPosition, changed: bool, _: &Matrices) -> bool {
            let mut counts = self.counts.lock();
            counts.updates += 1;
            counts.changed += u32::from(changed);
            let _staging = ctx.scratch.get(64);
            self.ready
        }

        fn render(&mut self, _: &mut RenderContext, _: &MapPosition, _: &Matrices) -> RenderResult<usize> {
            self.counts.lock().renders += 1;
            Ok(2)
        }

        fn invalidate(&mut self) {
            self.counts.lock().invalidations += 1;
        }

        fn on_low_memory(&mut self, _: &mut RenderContext) {
            self.counts.lock().low_memory += 1;
        }
    }

    fn coordinator(budget: usize) -> (FrameCoordinator, SharedFrame, Arc<LayerRegistry>) {
        let shared = Arc::new(Mutex::new(FrameShared::new(Viewport::new(640, 480, 256))));
        let registry = Arc::new(LayerRegistry::new());
        let context = RenderContext::new(Box::new(HeadlessGpu::new(budget)), ScratchBufferPool::new());
        let coordinator = FrameCoordinator::new(
            Arc::clone(&shared),
            Arc::clone(&registry),
            context,
            Duration::from_secs(1),
        );
        (coordinator, shared, registry)
    }

    fn probe(ready: bool) -> (LayerHandle, Arc<Mutex<Counts>>) {
        let counts = Arc::new(Mutex::new(Counts::default()));
        let layer = LayerHandle::new(Probe {
            counts: Arc::clone(&counts),
            ready,
            fail_setup_once: false,
        });
        (layer, counts)
    }

    #[test]
    fn test_setup_once_and_change_detection() {
        let (mut frames, shared, registry) = coordinator(1 << 20);
        let (layer, counts) = probe(true);
        registry.add(layer).unwrap();

        let first = frames.draw_frame();
        assert!(first.view_changed);
        assert_eq!(first.draw_calls, 2);
        assert_eq!(first.scratch_recycled, 1);

        let second = frames.draw_frame();
        assert!(!second.view_changed);

        shared.lock().viewport.set_map_position(MapPosition::new(0.4, 0.4, 4.0));
        assert!(frames.draw_frame().view_changed);

        let counts = counts.lock();
        assert_eq!(counts.setups, 1);
        assert_eq!(counts.updates, 3);
        assert_eq!(counts.changed, 2);
        assert_eq!(counts.renders, 3);
        assert_eq!(frames.stats().total_frames, 3);
    }

    #[test]
    fn test_not_ready_layer_is_not_rendered() {
        let (mut frames, _shared, registry) = coordinator(1 << 20);
        let (layer, counts) = probe(false);
        registry.add(layer.clone()).unwrap();

        let result = frames.draw_frame();
        assert_eq!(result.layers_updated, 1);
        assert_eq!(result.layers_drawn, 0);
        assert_eq!(counts.lock().renders, 0);

        layer.set_enabled(false);
        assert_eq!(frames.draw_frame().layers_updated, 0);
    }

    #[test]
    fn test_failed_setup_retried() {
        let (mut frames, _shared, registry) = coordinator(1 << 20);
        let counts = Arc::new(Mutex::new(Counts::default()));
        let layer = LayerHandle::new(Probe {
            counts: Arc::clone(&counts),
            ready: true,
            fail_setup_once: true,
        });
        registry.add(layer.clone()).unwrap();

        assert_eq!(frames.draw_frame().layers_updated, 0);
        assert!(!layer.is_initialized());
        assert_eq!(frames.draw_frame().layers_updated, 1);
        assert!(layer.is_initialized());
    }

    #[test]
    fn test_invalidate_all_reaches_every_layer_once() {
        let (mut frames, shared, registry) = coordinator(1 << 20);
        let (a, counts_a) = probe(true);
        let (b, counts_b) = probe(true);
        registry.add(a).unwrap();
        registry.add(b.clone()).unwrap();
        b.set_enabled(false);

        frames.draw_frame();
        shared.lock().invalidate_all = true;
        shared.lock().background = Some([1.0, 0.0, 0.0, 1.0]);
        let result = frames.draw_frame();
        frames.draw_frame();

        assert!(result.invalidated);
        assert_eq!(counts_a.lock().invalidations, 1);
        // Disabled layers still drop their cache
        assert_eq!(counts_b.lock().invalidations, 1);
    }

    #[test]
    fn test_out_of_memory_shrinks_pools() {
        let (mut frames, _shared, registry) = coordinator(4096);
        let (layer, counts) = probe(true);
        registry.add(layer).unwrap();
        frames.draw_frame();

        let ctx = frames.context_mut();
        let buffer = ctx.acquire_buffer(1024).unwrap();
        ctx.release_buffer(buffer);
        assert!(ctx.acquire_buffer(1 << 20).is_err());

        let result = frames.draw_frame();
        assert!(result.degraded);
        assert_eq!(counts.lock().low_memory, 1);
        assert_eq!(frames.context().buffers.free_count(), 0);
        assert_eq!(frames.context().scratch.free_count(), 0);
        assert_eq!(frames.context().gpu.memory_in_use(), 0);
        assert_eq!(frames.stats().oom_frames, 1);

        assert!(!frames.draw_frame().degraded);
    }

    #[test]
    fn test_animation_stepped_in_frame() {
        let (mut frames, shared, _registry) = coordinator(1 << 20);
        let target = MapPosition::new(0.25, 0.25, 4.0);
        {
            let mut shared = shared.lock();
            let from = shared.viewport.map_position();
            shared.animator.animate_to(from, target, Duration::ZERO);
        }
        frames.draw_frame();
        assert_eq!(*frames.position(), target);
        assert!(!shared.lock().animator.is_active());
    }
}
