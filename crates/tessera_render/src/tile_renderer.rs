//! # Tile Layer
//!
//! Draws the visible tile set. Per frame:
//!
//! 1. Retired GPU buffers from cleared tiles go back to the buffer pool
//! 2. The published visible set is locked (last frame's holds released)
//! 3. Up to `max_uploads_per_frame` `NewData` tiles are uploaded and
//!    committed `Ready`
//! 4. The draw list is built: a ready tile draws itself, otherwise its
//!    ready children, else its parent, else its grandparent
//!
//! A tile shared by several visible tiles as a proxy is drawn once per
//! frame. Lower zoom levels are drawn first so finer tiles cover them.

use std::sync::Arc;

use tessera_core::MapPosition;
use tessera_tiles::{
    GeometryLayers, GpuBufferId, LockedTile, ProxySet, TileCache, TileHandle, TileId, TileSet,
    TileState,
};

use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::gpu::{DrawCall, ProgramId};
use crate::layer::LayerRenderer;
use crate::viewport::Matrices;

const TILE_VERTEX_SHADER: &str = "\
uniform mat4 u_mvp;
attribute vec2 a_pos;
void main() {
    gl_Position = u_mvp * vec4(a_pos, 0.0, 1.0);
}
";

const TILE_FRAGMENT_SHADER: &str = "\
uniform vec4 u_color;
void main() {
    gl_FragColor = u_color;
}
";

/// Uploads per frame unless configured otherwise.
pub const DEFAULT_MAX_UPLOADS: usize = 16;

/// One tile draw.
#[derive(Clone)]
struct DrawEntry {
    tile: TileId,
    /// Keeps the payload alive while the entry exists.
    _data: TileHandle,
    /// Set when drawn in place of a visible tile.
    proxy: Option<ProxySet>,
    buffer: GpuBufferId,
    index_offset: usize,
    index_count: u32,
}

/// Counters of the last frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileRendererStats {
    /// Tiles locked for the frame.
    pub locked: usize,
    /// Tiles uploaded and committed `Ready`.
    pub uploaded: usize,
    /// Uploads that failed.
    pub upload_failures: usize,
    /// `NewData` tiles left for a later frame.
    pub deferred: usize,
    /// Buffers of cleared tiles returned to the pool.
    pub retired: usize,
    /// Tiles drawn as themselves.
    pub tiles_drawn: usize,
    /// Relatives drawn as stand-ins.
    pub proxies_drawn: usize,
}

/// The tile layer.
pub struct TileRenderer {
    cache: Arc<TileCache>,
    set: TileSet,
    draw_list: Vec<DrawEntry>,
    program: Option<ProgramId>,
    max_uploads_per_frame: usize,
    stats: TileRendererStats,
}

impl TileRenderer {
    /// Creates the layer for `cache`.
    #[must_use]
    pub fn new(cache: Arc<TileCache>) -> Self {
        Self {
            cache,
            set: TileSet::new(),
            draw_list: Vec::new(),
            program: None,
            max_uploads_per_frame: DEFAULT_MAX_UPLOADS,
            stats: TileRendererStats::default(),
        }
    }

    /// Limits uploads per frame (at least one).
    #[must_use]
    pub fn with_max_uploads(mut self, max: usize) -> Self {
        self.max_uploads_per_frame = max.max(1);
        self
    }

    /// Counters of the last frame.
    #[must_use]
    pub const fn stats(&self) -> TileRendererStats {
        self.stats
    }

    /// Tiles locked for the current frame.
    #[must_use]
    pub fn locked_tiles(&self) -> &[LockedTile] {
        self.set.tiles()
    }

    /// Tiles in the current draw list with the proxy slot they stand in for.
    pub fn draw_list(&self) -> impl Iterator<Item = (TileId, Option<ProxySet>)> + '_ {
        self.draw_list.iter().map(|entry| (entry.tile, entry.proxy))
    }

    fn drain_retired(&mut self, ctx: &mut RenderContext) {
        while let Ok(buffer) = self.cache.retired_buffers().try_recv() {
            ctx.release_buffer(buffer);
            self.stats.retired += 1;
        }
    }

    fn upload_new_data(&mut self, ctx: &mut RenderContext) {
        let mut budget = self.max_uploads_per_frame;
        for tile in self.set.tiles_mut() {
            if tile.state != TileState::NewData {
                continue;
            }
            if budget == 0 {
                self.stats.deferred += 1;
                continue;
            }
            budget -= 1;

            let uploaded = {
                let mut payload = tile.data.payload();
                upload_geometry(ctx, &mut payload.geometry)
            };
            if let Err(error) = uploaded {
                self.stats.upload_failures += 1;
                tracing::warn!(tile = %tile.data.id(), %error, "tile upload failed");
                // Out of memory: no point trying the rest this frame
                budget = 0;
                continue;
            }

            // Payload lock released before the table lock
            if let Err(error) = self.cache.mark_ready(tile.key) {
                tracing::warn!(tile = %tile.data.id(), %error, "ready commit refused");
                continue;
            }
            tile.state = TileState::Ready;
            self.stats.uploaded += 1;
        }
    }

    fn build_draw_list(&mut self, frame: u64) {
        self.draw_list.clear();
        for tile in self.set.tiles() {
            if tile.state == TileState::Ready {
                if push_entry(&mut self.draw_list, &tile.data, None, frame) {
                    self.stats.tiles_drawn += 1;
                }
                continue;
            }

            let has_children = tile.proxies.iter().any(|p| ProxySet::CHILDREN.contains(p.slot));
            let fallback = if has_children {
                ProxySet::CHILDREN
            } else if tile.proxies.iter().any(|p| p.slot == ProxySet::PARENT) {
                ProxySet::PARENT
            } else {
                ProxySet::GRANDPARENT
            };
            for proxy in tile.proxies.iter().filter(|p| fallback.contains(p.slot)) {
                if push_entry(&mut self.draw_list, &proxy.data, Some(proxy.slot), frame) {
                    self.stats.proxies_drawn += 1;
                }
            }
        }
        self.draw_list.sort_by_key(|entry| entry.tile.zoom);
    }
}

/// Stages vertices then indices (4-byte aligned) and uploads them into one
/// buffer.
fn upload_geometry(ctx: &mut RenderContext, geometry: &mut GeometryLayers) -> RenderResult<()> {
    if geometry.is_empty() {
        return Ok(());
    }
    let vertex_bytes = geometry.vertices.len() * 2;
    let index_offset = vertex_bytes.next_multiple_of(4);
    let total = index_offset + geometry.indices.len() * 4;

    let buffer = ctx.acquire_buffer(total)?;
    let result = {
        let mut staging = ctx.scratch.get(total);
        let bytes = staging.bytes_mut(total);
        bytes[..vertex_bytes].copy_from_slice(bytemuck::cast_slice(geometry.vertices.as_slice()));
        bytes[vertex_bytes..index_offset].fill(0);
        bytes[index_offset..].copy_from_slice(bytemuck::cast_slice(geometry.indices.as_slice()));
        ctx.gpu.upload(buffer, 0, staging.bytes(total))
    };
    match result {
        Ok(()) => {
            if let Some(old) = geometry.buffer.replace(buffer) {
                ctx.release_buffer(old);
            }
            Ok(())
        }
        Err(error) => {
            ctx.release_buffer(buffer);
            Err(error)
        }
    }
}

/// Adds `data` to the draw list unless it was drawn this frame or has
/// nothing uploaded. Returns whether it was added.
fn push_entry(list: &mut Vec<DrawEntry>, data: &TileHandle, proxy: Option<ProxySet>, frame: u64) -> bool {
    let entry = {
        let payload = data.payload();
        let geometry = &payload.geometry;
        let Some(buffer) = geometry.buffer else {
            return false;
        };
        #[allow(clippy::cast_possible_truncation)]
        let index_count = geometry.indices.len() as u32;
        DrawEntry {
            tile: data.id(),
            _data: Arc::clone(data),
            proxy,
            buffer,
            index_offset: (geometry.vertices.len() * 2).next_multiple_of(4),
            index_count,
        }
    };
    if !data.mark_drawn(frame) {
        return false;
    }
    list.push(entry);
    true
}

impl LayerRenderer for TileRenderer {
    fn name(&self) -> &str {
        "tiles"
    }

    fn setup(&mut self, ctx: &mut RenderContext) -> RenderResult<()> {
        let program = ctx
            .gpu
            .compile_program("tile", TILE_VERTEX_SHADER, TILE_FRAGMENT_SHADER)?;
        self.program = Some(program);
        Ok(())
    }

    /// Runs every frame regardless of `changed`: loaders publish new data
    /// without moving the map.
    fn update(
        &mut self,
        ctx: &mut RenderContext,
        _position: &MapPosition,
        _changed: bool,
        _matrices: &Matrices,
    ) -> bool {
        self.stats = TileRendererStats::default();
        self.drain_retired(ctx);

        self.cache.lock_visible(&mut self.set);
        self.stats.locked = self.set.len();

        self.upload_new_data(ctx);
        self.build_draw_list(ctx.frame());
        !self.draw_list.is_empty()
    }

    fn render(
        &mut self,
        ctx: &mut RenderContext,
        position: &MapPosition,
        matrices: &Matrices,
    ) -> RenderResult<usize> {
        let Some(program) = self.program else {
            return Ok(0);
        };
        for entry in &self.draw_list {
            ctx.gpu.draw(&DrawCall {
                program,
                buffer: entry.buffer,
                index_offset: entry.index_offset,
                index_count: entry.index_count,
                mvp: matrices.tile_mvp(&entry.tile, position),
            })?;
        }
        Ok(self.draw_list.len())
    }

    fn invalidate(&mut self) {
        self.draw_list.clear();
    }

    fn on_low_memory(&mut self, _ctx: &mut RenderContext) {
        self.draw_list.shrink_to_fit();
    }
}

impl Drop for TileRenderer {
    fn drop(&mut self) {
        self.cache.release_tiles(&mut self.set);
    }
}
