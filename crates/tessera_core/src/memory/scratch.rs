//! # Scratch Buffer Pool
//!
//! Reusable staging memory for the render thread.
//!
//! Buffers handed out during a frame are never reissued within the same frame
//! (an upload may still be reading them); they are collected on a used chain
//! and returned to the free-list in bulk by [`ScratchBufferPool::end_frame`].

use std::cell::{Cell, RefCell};
use std::ops::{Deref, DerefMut};

use super::pool::{chain, Link, ObjectPool, Pooled};
use crate::error::{CoreError, CoreResult};

/// Smallest allocation made for a scratch buffer (32 KiB).
///
/// Many tiny requests would otherwise each allocate their own buffer.
pub const SCRATCH_FLOOR_BYTES: usize = 1 << 15;

/// A growable numeric buffer with typed views.
///
/// Backed by 32-bit words so every view (`u8`, `i16`, `i32`, `f32`) is
/// correctly aligned. Capacity never shrinks.
pub struct ScratchBuffer {
    words: Vec<u32>,
    next: Link<ScratchBuffer>,
}

impl ScratchBuffer {
    /// Capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.words.len() * 4
    }

    /// Mutable byte view of the first `len` bytes, growing if needed.
    pub fn bytes_mut(&mut self, len: usize) -> &mut [u8] {
        self.reserve(len);
        &mut bytemuck::cast_slice_mut::<u32, u8>(&mut self.words)[..len]
    }

    /// Mutable view of `count` shorts, growing if needed.
    pub fn i16_mut(&mut self, count: usize) -> &mut [i16] {
        self.reserve(count * 2);
        &mut bytemuck::cast_slice_mut::<u32, i16>(&mut self.words)[..count]
    }

    /// Mutable view of `count` ints, growing if needed.
    pub fn i32_mut(&mut self, count: usize) -> &mut [i32] {
        self.reserve(count * 4);
        &mut bytemuck::cast_slice_mut::<u32, i32>(&mut self.words)[..count]
    }

    /// Mutable view of `count` floats, growing if needed.
    pub fn f32_mut(&mut self, count: usize) -> &mut [f32] {
        self.reserve(count * 4);
        &mut bytemuck::cast_slice_mut::<u32, f32>(&mut self.words)[..count]
    }

    /// Byte view of the first `len` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the capacity.
    #[must_use]
    pub fn bytes(&self, len: usize) -> &[u8] {
        &bytemuck::cast_slice::<u32, u8>(&self.words)[..len]
    }

    fn reserve(&mut self, bytes: usize) {
        if self.capacity() < bytes {
            self.words.resize(bytes.div_ceil(4), 0);
        }
    }

    /// Grows to at least `min_bytes`, never below `floor`. Returns whether it grew.
    fn grow(&mut self, min_bytes: usize, floor: usize) -> bool {
        if self.capacity() >= min_bytes && self.capacity() > 0 {
            return false;
        }
        self.reserve(min_bytes.max(floor));
        true
    }
}

impl Pooled for ScratchBuffer {
    fn create() -> Self {
        Self {
            words: Vec::new(),
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

/// Scratch pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScratchStats {
    /// Buffers allocated because the free-list was empty.
    pub allocations: u64,
    /// Requests served from the free-list.
    pub hits: u64,
    /// Free-list hits that had to grow the buffer.
    pub regrows: u64,
    /// Completed frames.
    pub frames: u64,
    /// Most buffers checked out within one frame.
    pub peak_per_frame: usize,
}

/// Render-thread scratch buffers, recycled per frame.
///
/// # Thread Safety
///
/// Not `Sync`: the pool belongs to the render thread.
///
/// # Frame discipline
///
/// [`ScratchGuard`]s borrow the pool, and [`end_frame`](Self::end_frame)
/// takes `&mut self`, so no buffer can be retained across frames.
pub struct ScratchBufferPool {
    pool: RefCell<ObjectPool<ScratchBuffer>>,
    /// Buffers checked out (and given back) during the current frame.
    used: RefCell<Link<ScratchBuffer>>,
    /// Guards alive right now.
    outstanding: Cell<usize>,
    /// Buffers checked out this frame.
    frame_count: Cell<usize>,
    floor_bytes: usize,
    stats: Cell<ScratchStats>,
}

impl ScratchBufferPool {
    /// Creates a pool with the default 32 KiB floor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool: RefCell::new(ObjectPool::new()),
            used: RefCell::new(None),
            outstanding: Cell::new(0),
            frame_count: Cell::new(0),
            floor_bytes: SCRATCH_FLOOR_BYTES,
            stats: Cell::new(ScratchStats::default()),
        }
    }

    /// Creates a pool with a custom floor size.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ZeroScratchFloor`] when `floor_bytes` is zero.
    pub fn with_floor(floor_bytes: usize) -> CoreResult<Self> {
        if floor_bytes == 0 {
            return Err(CoreError::ZeroScratchFloor);
        }
        let mut pool = Self::new();
        pool.floor_bytes = floor_bytes;
        Ok(pool)
    }

    /// Floor size in bytes.
    #[inline]
    #[must_use]
    pub const fn floor_bytes(&self) -> usize {
        self.floor_bytes
    }

    /// Checks out a buffer with capacity of at least `min_bytes`.
    pub fn get(&self, min_bytes: usize) -> ScratchGuard<'_> {
        let (mut buffer, fresh) = {
            let mut pool = self.pool.borrow_mut();
            let reused = pool.stats().reused;
            let buffer = pool.get();
            let fresh = pool.stats().reused == reused;
            (buffer, fresh)
        };
        let grew = buffer.grow(min_bytes, self.floor_bytes);

        let mut stats = self.stats.get();
        if fresh {
            stats.allocations += 1;
        } else {
            stats.hits += 1;
            if grew {
                stats.regrows += 1;
            }
        }

        let checked_out = self.frame_count.get() + 1;
        self.frame_count.set(checked_out);
        stats.peak_per_frame = stats.peak_per_frame.max(checked_out);
        self.stats.set(stats);
        self.outstanding.set(self.outstanding.get() + 1);

        ScratchGuard {
            pool: self,
            buffer: Some(buffer),
        }
    }

    /// Returns every buffer used this frame to the free-list.
    ///
    /// Returns the number of buffers recycled.
    pub fn end_frame(&mut self) -> usize {
        debug_assert_eq!(self.outstanding.get(), 0);

        let used = self.used.get_mut().take();
        let count = chain::len(&used);
        let released = self.pool.get_mut().release_all(used);
        debug_assert!(released.is_none());

        self.frame_count.set(0);
        let mut stats = self.stats.get();
        stats.frames += 1;
        self.stats.set(stats);

        count
    }

    /// Drops all free buffers (degraded mode after an out-of-memory frame).
    pub fn shrink(&mut self) {
        let freed = self.pool.get_mut().free_count();
        self.pool.get_mut().shrink();
        tracing::debug!(freed, "scratch pool shrunk");
    }

    /// Buffers waiting in the free-list.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.pool.borrow().free_count()
    }

    /// Guards currently alive.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.outstanding.get()
    }

    /// Pool counters.
    #[must_use]
    pub fn stats(&self) -> ScratchStats {
        self.stats.get()
    }

    fn give_back(&self, buffer: Box<ScratchBuffer>) {
        let mut used = self.used.borrow_mut();
        let head = used.take();
        *used = chain::push(head, buffer);
        self.outstanding.set(self.outstanding.get() - 1);
    }
}

impl Default for ScratchBufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A scratch buffer checked out for the current frame.
pub struct ScratchGuard<'a> {
    pool: &'a ScratchBufferPool,
    buffer: Option<Box<ScratchBuffer>>,
}

impl Deref for ScratchGuard<'_> {
    type Target = ScratchBuffer;

    fn deref(&self) -> &ScratchBuffer {
        self.buffer.as_deref().expect("scratch buffer is present until drop")
    }
}

impl DerefMut for ScratchGuard<'_> {
    fn deref_mut(&mut self) -> &mut ScratchBuffer {
        self.buffer.as_deref_mut().expect("scratch buffer is present until drop")
    }
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.give_back(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_meets_minimum_and_floor() {
        let mut pool = ScratchBufferPool::new();
        {
            let small = pool.get(16);
            assert!(small.capacity() >= SCRATCH_FLOOR_BYTES);

            let large = pool.get(SCRATCH_FLOOR_BYTES * 3 + 1);
            assert!(large.capacity() > SCRATCH_FLOOR_BYTES * 3);
        }
        assert_eq!(pool.end_frame(), 2);
        assert_eq!(pool.stats().allocations, 2);
    }

    #[test]
    fn test_smaller_request_does_not_reallocate() {
        let mut pool = ScratchBufferPool::new();
        let big = SCRATCH_FLOOR_BYTES * 4;
        {
            let buffer = pool.get(big);
            assert!(buffer.capacity() >= big);
        }
        pool.end_frame();

        {
            let buffer = pool.get(10);
            assert!(buffer.capacity() >= big);
        }
        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.regrows, 0);
    }

    #[test]
    fn test_zero_sized_request_counts_reuse() {
        let mut pool = ScratchBufferPool::new();
        for _ in 0..3 {
            let buffer = pool.get(0);
            assert!(buffer.capacity() >= SCRATCH_FLOOR_BYTES);
            drop(buffer);
            pool.end_frame();
        }
        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.regrows, 0);
    }

    #[test]
    fn test_hit_regrows_in_place() {
        let mut pool = ScratchBufferPool::with_floor(64).unwrap();
        drop(pool.get(32));
        pool.end_frame();

        let buffer = pool.get(1024);
        assert!(buffer.capacity() >= 1024);
        drop(buffer);
        assert_eq!(pool.stats().regrows, 1);
    }

    #[test]
    fn test_buffers_not_reissued_within_frame() {
        let mut pool = ScratchBufferPool::new();
        let first = pool.get(8);
        let first_addr: *const ScratchBuffer = &*first;
        drop(first);
        let second = pool.get(8);
        assert!(!std::ptr::eq(first_addr, &*second));
        drop(second);

        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.end_frame(), 2);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_typed_views() {
        let pool = ScratchBufferPool::with_floor(8).unwrap();
        let mut buffer = pool.get(8);

        let shorts = buffer.i16_mut(6);
        shorts.copy_from_slice(&[1, -1, 2, -2, 3, -3]);
        assert_eq!(buffer.bytes(12).len(), 12);

        let floats = buffer.f32_mut(4);
        floats[3] = 1.5;
        assert!(buffer.capacity() >= 16);
        assert_eq!(buffer.i32_mut(4).len(), 4);
    }

    #[test]
    fn test_shrink_drops_free_buffers() {
        let mut pool = ScratchBufferPool::new();
        drop(pool.get(1));
        drop(pool.get(1));
        pool.end_frame();
        assert_eq!(pool.free_count(), 2);

        pool.shrink();
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn test_zero_floor_rejected() {
        assert_eq!(
            ScratchBufferPool::with_floor(0).err(),
            Some(CoreError::ZeroScratchFloor)
        );
    }
}
