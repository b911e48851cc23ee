//! # TESSERA Tiles
//!
//! The tile cache shared by the three map roles.
//!
//! ## Roles
//!
//! ```text
//!   loader workers ──complete_load──> ┌───────────┐ <──update── logic thread
//!                                     │ TileCache │              (TileManager)
//!   render thread ──lock_visible────> └───────────┘
//! ```
//!
//! - Loader workers build payloads off-tile and publish them in one step
//! - The logic thread owns membership, eviction and load dispatch
//! - The render thread locks the visible set, uploads and draws
//!
//! ## Lock order
//!
//! The cache table lock is always taken before a tile's payload lock.
//! Code holding a payload lock never takes the table lock.

pub mod cache;
pub mod error;
pub mod loader;
pub mod manager;
pub mod payload;
pub mod proxy;
pub mod source;
pub mod tile;

pub use cache::{
    LoadOutcome, LoadTicket, LockedTile, ProxyTile, TileCache, TileCacheEntry, TileData,
    TileHandle, TileKey, TileSet, TileTable,
};
pub use error::{SourceError, TileError, TileResult};
pub use loader::{JobQueue, LoaderPause, LoaderStats, TileLoaderPool};
pub use manager::{ManagerSettings, TileManager, UpdateStats};
pub use payload::{
    GeometryLayers, GpuBufferId, LabelItem, PayloadBuilder, PayloadPools, SymbolItem, TilePayload,
    TILE_EXTENT,
};
pub use proxy::{ProxyLinks, ProxySet};
pub use source::{
    DefaultTheme, LayerStyle, RenderTheme, SyntheticSource, TileDataSource, TileSource,
};
pub use tile::{TileId, TileState, MAX_ZOOM};
