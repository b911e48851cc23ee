//! # TESSERA Core
//!
//! Memory primitives shared by the three map threads:
//! - Loader workers draw label/symbol nodes from [`ObjectPool`]s
//! - The logic thread releases whole payload chains back on eviction
//! - The render thread stages uploads in a [`ScratchBufferPool`]
//!
//! ## Architecture Rules
//!
//! 1. **No allocation churn in the frame loop** - everything is recycled
//! 2. **Single owner** - a pooled item lives in one chain or one free-list
//! 3. **Scratch memory never outlives its frame** - enforced by borrows
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::{ObjectPool, ScratchBufferPool};
//!
//! let mut labels: ObjectPool<Label> = ObjectPool::new();
//! let mut chain = None;
//! chain = chain::push(chain, labels.get());
//! chain = labels.release_all(chain);
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod geo;
pub mod memory;

pub use error::{CoreError, CoreResult};
pub use geo::MapPosition;
pub use memory::{
    chain, Link, ObjectPool, PoolStats, Pooled, ScratchBuffer, ScratchBufferPool, ScratchGuard,
    ScratchStats, SharedPool, SCRATCH_FLOOR_BYTES,
};
