//! # Map Error Types

use thiserror::Error;

use tessera_core::CoreError;
use tessera_render::RenderError;
use tessera_tiles::{SourceError, TileError};

/// Errors raised by the map facade.
#[derive(Error, Debug)]
pub enum MapError {
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The configuration file is not valid TOML for [`MapConfig`](crate::MapConfig).
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The configuration file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Tile cache or loader failure.
    #[error(transparent)]
    Tile(#[from] TileError),

    /// Render-side failure.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// A tile source could not be opened.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Core primitive failure.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for map operations.
pub type MapResult<T> = Result<T, MapError>;
