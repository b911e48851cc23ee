//! # Tile Error Types

use thiserror::Error;

use crate::tile::{TileId, TileState};

/// Errors raised by the tile cache and its workers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TileError {
    /// The requested state change is not an edge of the tile state machine.
    #[error("tile {tile}: invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Tile the transition was attempted on.
        tile: TileId,
        /// Current state.
        from: TileState,
        /// Requested state.
        to: TileState,
    },

    /// More than 255 simultaneous direct holders.
    #[error("tile {0}: lock count overflow")]
    LockOverflow(TileId),

    /// Unlock of a tile nobody holds.
    #[error("tile {0}: unlock without matching lock")]
    NotLocked(TileId),

    /// Clear refused because the tile is locked or used as a proxy.
    #[error("tile {0} is locked and cannot be cleared")]
    TileLocked(TileId),

    /// The key no longer names a live cache entry.
    #[error("stale or unknown tile key")]
    UnknownTile,

    /// A loader pool needs at least one worker.
    #[error("loader pool needs at least one worker thread")]
    NoWorkers,

    /// A worker thread could not be started.
    #[error("failed to spawn loader thread: {0}")]
    Spawn(String),
}

/// Errors reported by tile data sources.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// No tile source is installed.
    #[error("no tile source installed")]
    NoSource,

    /// The source could not be opened.
    #[error("failed to open tile source: {0}")]
    Open(String),

    /// The source has no data for this tile.
    #[error("tile {0} not found")]
    NotFound(TileId),

    /// The tile data could not be decoded.
    #[error("tile {tile}: {reason}")]
    Decode {
        /// Tile being decoded.
        tile: TileId,
        /// What went wrong.
        reason: String,
    },
}

/// Result type for tile operations.
pub type TileResult<T> = Result<T, TileError>;
