//! # TESSERA
//!
//! A concurrent tile map core. Three roles share one tile cache:
//!
//! - **Loader workers** build tile payloads off-tile and publish them
//! - **Logic thread** owns the view position, cache membership and eviction
//! - **Render thread** uploads payloads, commits them ready and draws
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera::{Map, MapConfig};
//! use tessera_render::HeadlessGpu;
//!
//! let mut map = Map::new(MapConfig::default())?;
//! map.set_tile_source(Some(Arc::new(SyntheticSource::new())))?;
//! let mut frames = map.frame_coordinator(Box::new(HeadlessGpu::new(1 << 28)))?;
//!
//! // logic thread           // render thread
//! map.update_map();         frames.draw_frame();
//! ```

pub mod config;
pub mod error;
pub mod map;

pub use config::MapConfig;
pub use error::{MapError, MapResult};
pub use map::Map;

pub use tessera_core::MapPosition;
pub use tessera_render::{FrameCoordinator, FrameResult, FrameStats, HeadlessGpu};
pub use tessera_tiles::{LayerStyle, RenderTheme, SyntheticSource, TileSource, UpdateStats};
