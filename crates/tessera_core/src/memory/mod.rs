//! # Memory Management
//!
//! Free-lists and scratch buffers for allocation-free steady state.
//!
//! ## Design Philosophy
//!
//! Objects are allocated on first demand and then recycled forever:
//! - Payload nodes go back to their [`ObjectPool`] when a tile is cleared
//! - Scratch buffers go back to the [`ScratchBufferPool`] at end of frame
//! - Capacity only ever grows, so a warmed-up map stops allocating

mod pool;
mod scratch;

pub use pool::{chain, Link, ObjectPool, PoolStats, Pooled, SharedPool};
pub use scratch::{ScratchBuffer, ScratchBufferPool, ScratchGuard, ScratchStats, SCRATCH_FLOOR_BYTES};
