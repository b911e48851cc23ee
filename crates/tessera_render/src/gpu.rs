//! # GPU Context
//!
//! The minimal contract the map needs from a graphics backend, a headless
//! implementation with a memory budget, and a pool that recycles buffers
//! instead of churning allocations.
//!
//! Only the render thread owns a [`GpuContext`]; it is passed explicitly by
//! reference to everything that touches GPU resources.

use std::collections::HashMap;

use tessera_tiles::GpuBufferId;

use crate::error::{RenderError, RenderResult};
use crate::viewport::Mat4;

/// Handle of a compiled shader program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// One indexed draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCall {
    /// Program to draw with.
    pub program: ProgramId,
    /// Buffer holding vertices followed by indices.
    pub buffer: GpuBufferId,
    /// Byte offset of the index data in `buffer`.
    pub index_offset: usize,
    /// Indices to draw.
    pub index_count: u32,
    /// Model-view-projection matrix.
    pub mvp: Mat4,
}

/// What the map needs from a graphics backend.
pub trait GpuContext: Send {
    /// Allocates a buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// [`RenderError::OutOfMemory`] when the device cannot satisfy it; the
    /// context then reports out-of-memory until queried.
    fn allocate_buffer(&mut self, size: usize) -> RenderResult<GpuBufferId>;

    /// Copies `data` into `buffer` at `offset`.
    ///
    /// # Errors
    ///
    /// Fails for unknown buffers or out-of-range writes.
    fn upload(&mut self, buffer: GpuBufferId, offset: usize, data: &[u8]) -> RenderResult<()>;

    /// Frees a buffer. Unknown buffers are ignored.
    fn delete_buffer(&mut self, buffer: GpuBufferId);

    /// Size of a live buffer.
    fn buffer_size(&self, buffer: GpuBufferId) -> Option<usize>;

    /// Compiles a program.
    ///
    /// # Errors
    ///
    /// [`RenderError::ShaderCompile`] with the compiler output.
    fn compile_program(&mut self, name: &str, vertex: &str, fragment: &str)
        -> RenderResult<ProgramId>;

    /// Clears the frame.
    fn clear(&mut self, color: [f32; 4]);

    /// Issues a draw.
    ///
    /// # Errors
    ///
    /// Fails when the buffer is gone.
    fn draw(&mut self, call: &DrawCall) -> RenderResult<()>;

    /// Returns and resets the out-of-memory flag.
    fn check_out_of_memory(&mut self) -> bool;

    /// Bytes held by live buffers.
    fn memory_in_use(&self) -> usize;
}

/// Counters of a [`HeadlessGpu`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Buffers allocated.
    pub allocations: u64,
    /// Buffers deleted.
    pub deletions: u64,
    /// Bytes uploaded.
    pub uploaded_bytes: u64,
    /// Draws issued since the last clear.
    pub frame_draws: u32,
    /// Draws issued in total.
    pub total_draws: u64,
}

/// In-memory GPU used by tests, benches and the headless demo.
pub struct HeadlessGpu {
    buffers: HashMap<GpuBufferId, Vec<u8>>,
    programs: Vec<String>,
    next_buffer: u32,
    budget: usize,
    in_use: usize,
    out_of_memory: bool,
    clear_color: [f32; 4],
    draws: Vec<DrawCall>,
    stats: HeadlessStats,
}

impl HeadlessGpu {
    /// Creates a context with a memory budget in bytes.
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            programs: Vec::new(),
            next_buffer: 0,
            budget,
            in_use: 0,
            out_of_memory: false,
            clear_color: [0.0; 4],
            draws: Vec::new(),
            stats: HeadlessStats::default(),
        }
    }

    /// Changes the memory budget (existing buffers stay).
    pub fn set_budget(&mut self, budget: usize) {
        self.budget = budget;
    }

    /// Live buffers.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Contents of a live buffer.
    #[must_use]
    pub fn buffer_data(&self, buffer: GpuBufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    /// Draws issued since the last clear.
    #[must_use]
    pub fn draws(&self) -> &[DrawCall] {
        &self.draws
    }

    /// Colour of the last clear.
    #[must_use]
    pub const fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> HeadlessStats {
        self.stats
    }
}

impl GpuContext for HeadlessGpu {
    fn allocate_buffer(&mut self, size: usize) -> RenderResult<GpuBufferId> {
        let available = self.budget.saturating_sub(self.in_use);
        if size > available {
            self.out_of_memory = true;
            return Err(RenderError::OutOfMemory {
                requested: size,
                available,
            });
        }
        self.next_buffer += 1;
        let id = GpuBufferId(self.next_buffer);
        self.buffers.insert(id, vec![0; size]);
        self.in_use += size;
        self.stats.allocations += 1;
        Ok(id)
    }

    fn upload(&mut self, buffer: GpuBufferId, offset: usize, data: &[u8]) -> RenderResult<()> {
        let storage = self
            .buffers
            .get_mut(&buffer)
            .ok_or(RenderError::UnknownBuffer(buffer))?;
        let end = offset + data.len();
        if end > storage.len() {
            return Err(RenderError::UploadOverflow {
                buffer,
                offset,
                len: data.len(),
            });
        }
        storage[offset..end].copy_from_slice(data);
        self.stats.uploaded_bytes += data.len() as u64;
        Ok(())
    }

    fn delete_buffer(&mut self, buffer: GpuBufferId) {
        if let Some(storage) = self.buffers.remove(&buffer) {
            self.in_use -= storage.len();
            self.stats.deletions += 1;
        }
    }

    fn buffer_size(&self, buffer: GpuBufferId) -> Option<usize> {
        self.buffers.get(&buffer).map(Vec::len)
    }

    fn compile_program(
        &mut self,
        name: &str,
        vertex: &str,
        fragment: &str,
    ) -> RenderResult<ProgramId> {
        for (stage, source) in [("vertex", vertex), ("fragment", fragment)] {
            if !source.contains("main") {
                return Err(RenderError::ShaderCompile {
                    name: name.to_owned(),
                    reason: format!("{stage} shader has no entry point"),
                });
            }
        }
        self.programs.push(name.to_owned());
        #[allow(clippy::cast_possible_truncation)]
        Ok(ProgramId(self.programs.len() as u32))
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.clear_color = color;
        self.draws.clear();
        self.stats.frame_draws = 0;
    }

    fn draw(&mut self, call: &DrawCall) -> RenderResult<()> {
        if !self.buffers.contains_key(&call.buffer) {
            return Err(RenderError::UnknownBuffer(call.buffer));
        }
        self.draws.push(*call);
        self.stats.frame_draws += 1;
        self.stats.total_draws += 1;
        Ok(())
    }

    fn check_out_of_memory(&mut self) -> bool {
        std::mem::take(&mut self.out_of_memory)
    }

    fn memory_in_use(&self) -> usize {
        self.in_use
    }
}

/// Buffer pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Requests served by a new allocation.
    pub allocated: u64,
    /// Requests served from the free list.
    pub reused: u64,
    /// Buffers deleted by shrinking or the free limit.
    pub deleted: u64,
}

/// Recycles GPU buffers by size.
///
/// Sizes are rounded up to powers of two (at least [`Self::MIN_SIZE`]) so
/// freed buffers fit later requests.
pub struct GpuBufferPool {
    /// `(size, buffer)`, unsorted.
    free: Vec<(usize, GpuBufferId)>,
    max_free: usize,
    stats: BufferPoolStats,
}

impl GpuBufferPool {
    /// Smallest buffer allocated.
    pub const MIN_SIZE: usize = 4096;

    /// Creates a pool keeping at most `max_free` idle buffers.
    #[must_use]
    pub fn new(max_free: usize) -> Self {
        Self {
            free: Vec::new(),
            max_free,
            stats: BufferPoolStats::default(),
        }
    }

    /// A buffer of at least `min_size` bytes, best fit from the free list.
    ///
    /// # Errors
    ///
    /// Propagates allocation failures.
    pub fn acquire(&mut self, gpu: &mut dyn GpuContext, min_size: usize) -> RenderResult<GpuBufferId> {
        let best = self
            .free
            .iter()
            .enumerate()
            .filter(|(_, (size, _))| *size >= min_size)
            .min_by_key(|(_, (size, _))| *size)
            .map(|(index, _)| index);

        if let Some(index) = best {
            self.stats.reused += 1;
            return Ok(self.free.swap_remove(index).1);
        }

        let size = min_size.max(Self::MIN_SIZE).next_power_of_two();
        let buffer = gpu.allocate_buffer(size)?;
        self.stats.allocated += 1;
        Ok(buffer)
    }

    /// Takes a buffer back; deletes it when the free list is full.
    pub fn release(&mut self, gpu: &mut dyn GpuContext, buffer: GpuBufferId) {
        match gpu.buffer_size(buffer) {
            Some(size) if self.free.len() < self.max_free => self.free.push((size, buffer)),
            Some(_) => {
                gpu.delete_buffer(buffer);
                self.stats.deleted += 1;
            }
            None => tracing::warn!(?buffer, "released buffer is not live"),
        }
    }

    /// Deletes every idle buffer. Returns the bytes freed.
    pub fn shrink(&mut self, gpu: &mut dyn GpuContext) -> usize {
        let mut freed = 0;
        for (size, buffer) in self.free.drain(..) {
            gpu.delete_buffer(buffer);
            freed += size;
            self.stats.deleted += 1;
        }
        freed
    }

    /// Idle buffers.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> BufferPoolStats {
        self.stats
    }
}
