use alloc::alloc::{
  Layout,
  alloc_zeroed,
  dealloc,
};
use core::{
  fmt,
  ptr::NonNull,
};

use crate::{
  extent::{
    Extent,
    ExtentError,
  },
  prim::page_size,
};

#[derive(Debug)]
pub enum RegionError {
  Extent(ExtentError),
  Layout,
  OutOfMemory,
  OutOfBounds { offset: usize, len: usize, size: usize },
}

impl fmt::Display for RegionError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RegionError::Extent(err) => write!(f, "{}", err),
      RegionError::Layout => write!(f, "invalid region layout"),
      RegionError::OutOfMemory => write!(f, "out of memory"),
      RegionError::OutOfBounds { offset, len, size } => {
        write!(f, "range {}..{} outside of region of {} bytes", offset, offset + len, size)
      }
    }
  }
}

pub type RegionResult<T> = Result<T, RegionError>;

enum Backing {
  Mapped(Extent),
  Heap(Layout),
  Empty,
}

/// A contiguous byte region that pooled blocks are carved from.
///
/// Memory comes from the system mapper when the requested alignment allows
/// it, otherwise (or when mapping is unavailable) from the global heap. The
/// region never hands out references on its own: callers address it with
/// explicit offset and length pairs.
pub struct Region {
  ptr: NonNull<u8>,
  len: usize,
  backing: Backing,
}

impl Region {
  pub fn new(len: usize, align: usize) -> RegionResult<Self> {
    if len == 0 {
      return Ok(Self {
        ptr: NonNull::dangling(),
        len: 0,
        backing: Backing::Empty,
      });
    }

    if align <= page_size() {
      match Extent::new(len) {
        Ok(extent) => {
          return Ok(Self {
            ptr: extent.as_ptr(),
            len,
            backing: Backing::Mapped(extent),
          });
        }
        Err(ExtentError::PrimError(err)) => {
          return Err(RegionError::Extent(ExtentError::PrimError(err)));
        }
        // Fall through to the heap when the system cannot map for us.
        Err(_) => {}
      }
    }

    Self::heap(len, align)
  }

  pub fn heap(len: usize, align: usize) -> RegionResult<Self> {
    if len == 0 {
      return Self::new(0, align);
    }

    let layout = Layout::from_size_align(len, align.max(1)).map_err(|_| RegionError::Layout)?;
    let raw = unsafe { alloc_zeroed(layout) };
    let ptr = NonNull::new(raw).ok_or(RegionError::OutOfMemory)?;

    Ok(Self {
      ptr,
      len,
      backing: Backing::Heap(layout),
    })
  }

  #[inline(always)]
  pub fn len(&self) -> usize {
    self.len
  }

  #[inline(always)]
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  #[inline(always)]
  pub fn is_mapped(&self) -> bool {
    matches!(self.backing, Backing::Mapped(_))
  }

  #[inline(always)]
  pub fn as_ptr(&self) -> NonNull<u8> {
    self.ptr
  }

  pub fn check(&self, offset: usize, len: usize) -> RegionResult<()> {
    match offset.checked_add(len) {
      Some(end) if end <= self.len => Ok(()),
      _ => Err(RegionError::OutOfBounds {
        offset,
        len,
        size: self.len,
      }),
    }
  }

  /// # Safety
  ///
  /// `offset..offset + len` must lie inside the region (see [`Region::check`])
  /// and no mutable view of an overlapping range may be alive.
  #[inline]
  pub unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
    unsafe { core::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len) }
  }

  /// # Safety
  ///
  /// `offset..offset + len` must lie inside the region and the caller must be
  /// the only party viewing that range for the lifetime of the slice.
  #[inline]
  #[allow(clippy::mut_from_ref)]
  pub unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
    unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len) }
  }
}

impl Drop for Region {
  fn drop(&mut self) {
    if let Backing::Heap(layout) = self.backing {
      unsafe { dealloc(self.ptr.as_ptr(), layout) };
    }
    // Mapped regions are released by the extent's own drop.
  }
}

impl fmt::Debug for Region {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Region")
      .field("ptr", &self.ptr)
      .field("len", &self.len)
      .field("mapped", &self.is_mapped())
      .finish()
  }
}

unsafe impl Send for Region {}
unsafe impl Sync for Region {}
