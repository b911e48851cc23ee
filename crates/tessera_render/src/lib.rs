//! # TESSERA Render
//!
//! The render-thread half of the map.
//!
//! ## Frame flow
//!
//! ```text
//!   logic thread ──set_map_position──> FrameShared ──copy (locked)──> FrameCoordinator
//!                                                                        │
//!                    LayerRegistry snapshot ──> setup / update / render ─┘
//!                                                      │
//!                                   TileRenderer ──lock_visible──> TileCache
//! ```
//!
//! ## Rules
//!
//! 1. Only the render thread holds the [`RenderContext`] (and so the GPU)
//! 2. The shared frame lock is held only while copying view state
//! 3. GPU buffers of cleared tiles are freed here, never on other threads

pub mod context;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod layer;
pub mod registry;
pub mod tile_renderer;
pub mod viewport;

pub use context::RenderContext;
pub use error::{RenderError, RenderResult};
pub use frame::{FrameCoordinator, FrameResult, FrameShared, FrameStats, SharedFrame};
pub use gpu::{
    BufferPoolStats, DrawCall, GpuBufferPool, GpuContext, HeadlessGpu, HeadlessStats, ProgramId,
};
pub use layer::LayerRenderer;
pub use registry::{LayerHandle, LayerRegistry};
pub use tile_renderer::{TileRenderer, TileRendererStats, DEFAULT_MAX_UPLOADS};
pub use viewport::{mat4, Mat4, MapAnimator, Matrices, Viewport};
