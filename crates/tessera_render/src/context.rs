//! # Render Context
//!
//! Everything the render thread owns: the GPU context, the GPU buffer pool
//! and the scratch buffers. Layers receive it by `&mut` every frame.

use tessera_core::ScratchBufferPool;
use tessera_tiles::GpuBufferId;

use crate::error::RenderResult;
use crate::gpu::{GpuBufferPool, GpuContext};

/// Render-thread resources.
pub struct RenderContext {
    /// The GPU backend.
    pub gpu: Box<dyn GpuContext>,
    /// Recycled GPU buffers.
    pub buffers: GpuBufferPool,
    /// Per-frame staging memory.
    pub scratch: ScratchBufferPool,
    frame: u64,
}

impl RenderContext {
    /// Idle GPU buffers kept for reuse.
    pub const DEFAULT_FREE_BUFFERS: usize = 64;

    /// Creates a context around `gpu`.
    #[must_use]
    pub fn new(gpu: Box<dyn GpuContext>, scratch: ScratchBufferPool) -> Self {
        Self {
            gpu,
            buffers: GpuBufferPool::new(Self::DEFAULT_FREE_BUFFERS),
            scratch,
            frame: 0,
        }
    }

    /// Number of the frame being drawn.
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Starts frame `frame`; numbers start at 1 and increase.
    pub fn begin_frame(&mut self, frame: u64) {
        self.frame = frame;
    }

    /// A GPU buffer of at least `min_size` bytes.
    ///
    /// # Errors
    ///
    /// Propagates allocation failures.
    pub fn acquire_buffer(&mut self, min_size: usize) -> RenderResult<GpuBufferId> {
        self.buffers.acquire(self.gpu.as_mut(), min_size)
    }

    /// Returns a GPU buffer for reuse.
    pub fn release_buffer(&mut self, buffer: GpuBufferId) {
        self.buffers.release(self.gpu.as_mut(), buffer);
    }

    /// Degraded mode: frees idle GPU buffers and scratch memory.
    pub fn shrink(&mut self) -> usize {
        let freed = self.buffers.shrink(self.gpu.as_mut());
        self.scratch.shrink();
        freed
    }
}
