//! # Tile Payloads
//!
//! What a loader produces for one tile: a label chain, a symbol chain and
//! geometry. Chain nodes come from shared pools and go back to them when the
//! tile is cleared, so a warmed-up cache stops allocating nodes.

use tessera_core::{chain, Link, Pooled, SharedPool};

/// Tile-local coordinates run from 0 to this extent on both axes.
pub const TILE_EXTENT: i16 = 4096;

/// Handle of a buffer owned by the GPU context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuBufferId(pub u32);

/// A text label placed on the tile.
pub struct LabelItem {
    /// Label text.
    pub text: String,
    /// Tile-local x.
    pub x: f32,
    /// Tile-local y.
    pub y: f32,
    /// Placement priority, higher first.
    pub priority: i32,
    next: Link<LabelItem>,
}

impl Pooled for LabelItem {
    fn create() -> Self {
        Self {
            text: String::new(),
            x: 0.0,
            y: 0.0,
            priority: 0,
            next: None,
        }
    }

    fn next_link(&self) -> &Link<Self> {
        &self.next
    }

    fn next_link_mut(&mut self) -> &mut Link<Self> {
        &mut self.next
    }

    fn recycle(&mut self) -> bool {
        // Keep the string allocation, drop oversized ones
        self.text.clear();
        self.text.capacity() <= 256
    }
}

/// A map symbol (icon) placed on the tile.
pub struct SymbolItem {
    /// Symbol atlas id.
    pub symbol_id: u32,
    /// Tile-local x.
    pub x: f32,
    /// Tile-local y.
    pub y: f32,
    next: Link<SymbolItem>,
}

impl Pooled for SymbolItem {
    fn create() -> Self {
        Self {
            symbol_id: 0,
            x: 0.0,
            y: 0.0,
            next: None,
        }
    }

    fn next_link(&self) -> &Link<Self> {
        &self.next
    }

    fn next_link_mut(&mut self) -> &mut Link<Self> {
        &mut self.next
    }
}

/// Vertex data of a tile and its GPU binding once uploaded.
#[derive(Debug, Default)]
pub struct GeometryLayers {
    /// Interleaved `(x, y)` tile coordinates in `0..=TILE_EXTENT`.
    pub vertices: Vec<i16>,
    /// Triangle indices into `vertices` pairs.
    pub indices: Vec<u32>,
    /// Set by the render thread after upload.
    pub buffer: Option<GpuBufferId>,
}

impl GeometryLayers {
    /// Upload size in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.vertices.len() * 2 + self.indices.len() * 4
    }

    /// Nothing to draw.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Everything loaded for one tile.
#[derive(Default)]
pub struct TilePayload {
    /// Label chain.
    pub labels: Link<LabelItem>,
    /// Symbol chain.
    pub symbols: Link<SymbolItem>,
    /// Geometry and GPU binding.
    pub geometry: GeometryLayers,
}

impl TilePayload {
    /// Labels in the chain.
    #[must_use]
    pub fn label_count(&self) -> usize {
        chain::len(&self.labels)
    }

    /// Symbols in the chain.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        chain::len(&self.symbols)
    }
}

impl Drop for TilePayload {
    fn drop(&mut self) {
        chain::drop_all(self.labels.take());
        chain::drop_all(self.symbols.take());
    }
}

/// The node pools shared by loaders (taking) and the cache owner (releasing).
#[derive(Clone, Default)]
pub struct PayloadPools {
    /// Label nodes.
    pub labels: SharedPool<LabelItem>,
    /// Symbol nodes.
    pub symbols: SharedPool<SymbolItem>,
}

impl PayloadPools {
    /// Empties `payload`: chains back to the pools, geometry cleared.
    ///
    /// Returns the detached GPU buffer, which the caller must retire.
    #[must_use = "a detached GPU buffer must be retired"]
    pub fn release(&self, payload: &mut TilePayload) -> Option<GpuBufferId> {
        payload.labels = self.labels.release_all(payload.labels.take());
        payload.symbols = self.symbols.release_all(payload.symbols.take());
        payload.geometry.vertices.clear();
        payload.geometry.indices.clear();
        payload.geometry.buffer.take()
    }
}

/// Builds a payload off-tile on a loader thread.
///
/// Nothing is visible to other threads until the finished payload is
/// published. Dropping an unfinished builder returns its nodes to the pools.
pub struct PayloadBuilder {
    pools: PayloadPools,
    payload: TilePayload,
}

impl PayloadBuilder {
    /// Creates an empty builder drawing from `pools`.
    #[must_use]
    pub fn new(pools: PayloadPools) -> Self {
        Self {
            pools,
            payload: TilePayload::default(),
        }
    }

    /// Adds a label.
    pub fn add_label(&mut self, text: &str, x: f32, y: f32, priority: i32) {
        let mut item = self.pools.labels.get();
        item.text.push_str(text);
        item.x = x;
        item.y = y;
        item.priority = priority;
        self.payload.labels = chain::push(self.payload.labels.take(), item);
    }

    /// Adds a symbol.
    pub fn add_symbol(&mut self, symbol_id: u32, x: f32, y: f32) {
        let mut item = self.pools.symbols.get();
        item.symbol_id = symbol_id;
        item.x = x;
        item.y = y;
        self.payload.symbols = chain::push(self.payload.symbols.take(), item);
    }

    /// Appends a mesh; `indices` are relative to `vertices`.
    pub fn add_mesh(&mut self, vertices: &[i16], indices: &[u32]) {
        let geometry = &mut self.payload.geometry;
        #[allow(clippy::cast_possible_truncation)]
        let base = (geometry.vertices.len() / 2) as u32;
        geometry.vertices.extend_from_slice(vertices);
        geometry.indices.extend(indices.iter().map(|i| i + base));
    }

    /// Labels added so far.
    #[must_use]
    pub fn label_count(&self) -> usize {
        self.payload.label_count()
    }

    /// Hands the complete payload over for publishing.
    #[must_use]
    pub fn finish(mut self) -> TilePayload {
        std::mem::take(&mut self.payload)
    }
}

impl Drop for PayloadBuilder {
    fn drop(&mut self) {
        let detached = self.pools.release(&mut self.payload);
        debug_assert!(detached.is_none());
    }
}
