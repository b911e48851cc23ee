//! # Render Error Types

use thiserror::Error;

use tessera_tiles::{GpuBufferId, TileError};

/// Errors raised on the render side.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The same layer instance was added to the registry twice.
    #[error("layer '{0}' is already in the registry")]
    LayerAddedTwice(String),

    /// Registry index past the end.
    #[error("layer index {index} out of range (len {len})")]
    LayerIndex {
        /// Requested index.
        index: usize,
        /// Registry length.
        len: usize,
    },

    /// The GPU context ran out of memory.
    #[error("GPU out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes requested.
        requested: usize,
        /// Bytes left in the budget.
        available: usize,
    },

    /// The buffer does not exist (deleted or never allocated).
    #[error("unknown GPU buffer {0:?}")]
    UnknownBuffer(GpuBufferId),

    /// Upload past the end of a buffer.
    #[error("upload of {len} bytes at {offset} overflows buffer {buffer:?}")]
    UploadOverflow {
        /// Target buffer.
        buffer: GpuBufferId,
        /// Byte offset.
        offset: usize,
        /// Bytes uploaded.
        len: usize,
    },

    /// A shader program failed to compile.
    #[error("program '{name}' failed to compile: {reason}")]
    ShaderCompile {
        /// Program name.
        name: String,
        /// Compiler output.
        reason: String,
    },

    /// A tile cache operation failed.
    #[error(transparent)]
    Tile(#[from] TileError),
}

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;
