//! # Layer Renderers
//!
//! A map is drawn as an ordered stack of layers (tiles, labels, markers).
//! Each layer is driven by the frame coordinator in three steps per frame:
//!
//! ```text
//!   setup (once) ──> update(position, changed, matrices) ──ready?──> render
//! ```

use tessera_core::MapPosition;

use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::viewport::Matrices;

/// Per-layer rendering on the render thread.
pub trait LayerRenderer: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// One-time GPU setup before the first update.
    ///
    /// # Errors
    ///
    /// A failed setup is retried next frame.
    fn setup(&mut self, _ctx: &mut RenderContext) -> RenderResult<()> {
        Ok(())
    }

    /// Prepares the frame (uploads, draw lists). Returns whether the layer
    /// has anything to render.
    fn update(
        &mut self,
        ctx: &mut RenderContext,
        position: &MapPosition,
        changed: bool,
        matrices: &Matrices,
    ) -> bool;

    /// Issues the draws prepared by `update`. Returns the number of draws.
    ///
    /// # Errors
    ///
    /// Draw failures are logged and the frame continues.
    fn render(
        &mut self,
        ctx: &mut RenderContext,
        position: &MapPosition,
        matrices: &Matrices,
    ) -> RenderResult<usize>;

    /// Drops cached per-frame state; called when the map invalidates all
    /// layers (theme or source swap).
    fn invalidate(&mut self) {}

    /// The GPU reported out-of-memory; release what can be rebuilt.
    fn on_low_memory(&mut self, _ctx: &mut RenderContext) {}
}
