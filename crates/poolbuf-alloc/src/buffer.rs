use std::{
  fmt,
  sync::Arc,
};

use tracing::warn;

use crate::{
  allocator::Shared,
  arena::Arena,
  error::{
    BufferError,
    BufferResult,
  },
  handle::Allocation,
};

/// A reference counted byte window carved out of a pooled allocator.
///
/// The bytes stay valid for as long as the buffer holds them, independent
/// of what happens to the chunk bookkeeping. Releasing the last reference
/// hands the block back to the releasing thread's cache or to its arena.
pub struct PooledBuffer {
  shared: Arc<Shared>,
  arena: Arc<Arena>,
  allocation: Option<Allocation>,
  capacity: usize,
  max_capacity: usize,
  ref_cnt: usize,
}

impl PooledBuffer {
  pub(crate) fn new(
    shared: Arc<Shared>,
    arena: Arc<Arena>,
    allocation: Allocation,
    capacity: usize,
    max_capacity: usize,
  ) -> Self {
    Self {
      shared,
      arena,
      allocation: Some(allocation),
      capacity,
      max_capacity,
      ref_cnt: 1,
    }
  }

  #[inline(always)]
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  #[inline(always)]
  pub fn max_capacity(&self) -> usize {
    self.max_capacity
  }

  /// Size of the underlying block; at least [`PooledBuffer::capacity`].
  pub fn max_length(&self) -> usize {
    self.allocation.as_ref().map_or(0, Allocation::capacity)
  }

  #[inline(always)]
  pub fn ref_cnt(&self) -> usize {
    self.ref_cnt
  }

  pub fn is_released(&self) -> bool {
    self.allocation.is_none()
  }

  pub fn is_pooled(&self) -> bool {
    self.allocation.as_ref().is_some_and(Allocation::is_pooled)
  }

  pub fn arena_index(&self) -> usize {
    self.arena.index()
  }

  pub(crate) fn shared(&self) -> &Arc<Shared> {
    &self.shared
  }

  pub(crate) fn arena(&self) -> &Arc<Arena> {
    &self.arena
  }

  pub fn retain(&mut self) -> BufferResult<()> {
    if self.ref_cnt == 0 {
      return Err(BufferError::IllegalRefCount(0));
    }
    self.ref_cnt = self
      .ref_cnt
      .checked_add(1)
      .ok_or(BufferError::IllegalRefCount(self.ref_cnt))?;
    Ok(())
  }

  /// Drops one reference. Returns `true` when this call freed the memory.
  pub fn release(&mut self) -> BufferResult<bool> {
    match self.ref_cnt {
      0 => Err(BufferError::IllegalRefCount(0)),
      1 => {
        self.ref_cnt = 0;
        self.deallocate()?;
        Ok(true)
      }
      n => {
        self.ref_cnt = n - 1;
        Ok(false)
      }
    }
  }

  fn deallocate(&mut self) -> BufferResult<()> {
    let Some(allocation) = self.allocation.take() else {
      return Err(BufferError::Released);
    };
    self.shared.free(&self.arena, allocation)?;
    Ok(())
  }

  fn live(&self) -> BufferResult<&Allocation> {
    self.allocation.as_ref().ok_or(BufferError::Released)
  }

  fn check(&self, offset: usize, len: usize) -> BufferResult<()> {
    match offset.checked_add(len) {
      Some(end) if end <= self.capacity => Ok(()),
      _ => Err(BufferError::OutOfBounds {
        offset,
        len,
        capacity: self.capacity,
      }),
    }
  }

  pub fn as_slice(&self) -> BufferResult<&[u8]> {
    let allocation = self.live()?;
    let memory = allocation.memory();
    memory
      .check(allocation.offset(), self.capacity)
      .map_err(|_| BufferError::OutOfBounds {
        offset: allocation.offset(),
        len: self.capacity,
        capacity: memory.len(),
      })?;
    // SAFETY: the window belongs to this block alone and was checked above.
    Ok(unsafe { memory.slice(allocation.offset(), self.capacity) })
  }

  pub fn as_mut_slice(&mut self) -> BufferResult<&mut [u8]> {
    let capacity = self.capacity;
    let allocation = self.live()?;
    let memory = allocation.memory();
    memory
      .check(allocation.offset(), capacity)
      .map_err(|_| BufferError::OutOfBounds {
        offset: allocation.offset(),
        len: capacity,
        capacity: memory.len(),
      })?;
    // SAFETY: `&mut self` makes this the only view of the block's window.
    Ok(unsafe { memory.slice_mut(allocation.offset(), capacity) })
  }

  pub fn read(&self, offset: usize, dst: &mut [u8]) -> BufferResult<()> {
    self.check(offset, dst.len())?;
    let bytes = self.as_slice()?;
    dst.copy_from_slice(&bytes[offset..offset + dst.len()]);
    Ok(())
  }

  pub fn write(&mut self, offset: usize, src: &[u8]) -> BufferResult<()> {
    self.check(offset, src.len())?;
    let bytes = self.as_mut_slice()?;
    bytes[offset..offset + src.len()].copy_from_slice(src);
    Ok(())
  }

  /// Whether `new_capacity` can be served by the current block without
  /// moving the bytes.
  pub(crate) fn fits_in_place(&self, new_capacity: usize) -> bool {
    let Some(allocation) = self.allocation.as_ref() else {
      return false;
    };

    let block = allocation.capacity();
    if !allocation.is_pooled() {
      return new_capacity == self.capacity;
    }
    if new_capacity >= self.capacity {
      return new_capacity <= block;
    }
    if new_capacity <= block >> 1 {
      return false;
    }
    block > 512 || new_capacity > block - 16
  }

  pub(crate) fn set_capacity(&mut self, capacity: usize) {
    self.capacity = capacity;
  }

  /// Swaps in a new block and hands the old one back.
  pub(crate) fn replace(&mut self, arena: Arc<Arena>, allocation: Allocation, capacity: usize) -> Option<(Arc<Arena>, Allocation)> {
    let old_arena = std::mem::replace(&mut self.arena, arena);
    let old = self.allocation.replace(allocation);
    self.capacity = capacity;
    old.map(|allocation| (old_arena, allocation))
  }
}

impl Drop for PooledBuffer {
  fn drop(&mut self) {
    if self.allocation.is_none() {
      return;
    }

    warn!(
      capacity = self.capacity,
      ref_cnt = self.ref_cnt,
      arena = self.arena.index(),
      "pooled buffer dropped without release"
    );
    if let Err(err) = self.deallocate() {
      warn!(error = %err, "cannot return leaked buffer");
    }
  }
}

impl fmt::Debug for PooledBuffer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PooledBuffer")
      .field("capacity", &self.capacity)
      .field("max_capacity", &self.max_capacity)
      .field("max_length", &self.max_length())
      .field("ref_cnt", &self.ref_cnt)
      .field("arena", &self.arena.index())
      .finish()
  }
}
