use core::fmt;

use getset::CopyGetters;
use poolbuf_sys::math::{
  align_up,
  log2,
  next_pow2,
};

/// Requests below this size are tiny and rounded to [`TINY_QUANTUM`] steps.
pub const TINY_LIMIT: usize = 512;
pub const TINY_QUANTUM: usize = 16;
pub const NUM_TINY_POOLS: usize = TINY_LIMIT >> 4;

const TINY_MASK: usize = !(TINY_LIMIT - 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
  Tiny,
  Small,
  Normal,
  Huge,
}

impl fmt::Display for SizeClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      SizeClass::Tiny => "tiny",
      SizeClass::Small => "small",
      SizeClass::Normal => "normal",
      SizeClass::Huge => "huge",
    };
    f.write_str(name)
  }
}

/// Size class arithmetic for one page size / chunk geometry.
///
/// Everything here is pure: the same request always maps to the same
/// normalized capacity and class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
pub struct SizeClasses {
  #[getset(get_copy = "pub")]
  page_size: usize,
  #[getset(get_copy = "pub")]
  page_shifts: usize,
  #[getset(get_copy = "pub")]
  max_order: usize,
  #[getset(get_copy = "pub")]
  chunk_size: usize,
  #[getset(get_copy = "pub")]
  alignment: usize,
  subpage_overflow_mask: usize,
}

impl SizeClasses {
  /// `page_size` must be a power of two of at least 4096 and `alignment`
  /// either zero or a power of two. Callers validate through the pool
  /// configuration.
  pub const fn new(page_size: usize, max_order: usize, alignment: usize) -> Self {
    Self {
      page_size,
      page_shifts: log2(page_size),
      max_order,
      chunk_size: page_size << max_order,
      alignment,
      subpage_overflow_mask: !(page_size - 1),
    }
  }

  #[inline]
  fn align(&self, req: usize) -> usize {
    if self.alignment == 0 {
      return req;
    }
    align_up(req, self.alignment).unwrap_or(req)
  }

  pub fn normalize(&self, req: usize) -> usize {
    if req >= self.chunk_size {
      return self.align(req);
    }

    if !Self::is_tiny(req) {
      return next_pow2(req);
    }

    // Tiny pools are 16 bytes apart, so a smaller alignment would hand out
    // sizes that share a pool with the next smaller class.
    let quantum = self.alignment.max(TINY_QUANTUM);
    align_up(req, quantum).unwrap_or(req)
  }

  #[inline(always)]
  pub fn is_tiny_or_small(&self, norm: usize) -> bool {
    norm & self.subpage_overflow_mask == 0
  }

  #[inline(always)]
  pub const fn is_tiny(norm: usize) -> bool {
    norm & TINY_MASK == 0
  }

  pub fn size_class(&self, norm: usize) -> SizeClass {
    if self.is_tiny_or_small(norm) {
      if Self::is_tiny(norm) {
        return SizeClass::Tiny;
      }
      return SizeClass::Small;
    }
    if norm <= self.chunk_size {
      return SizeClass::Normal;
    }
    SizeClass::Huge
  }

  #[inline(always)]
  pub const fn tiny_idx(norm: usize) -> usize {
    norm >> 4
  }

  pub const fn small_idx(norm: usize) -> usize {
    let mut idx = 0;
    let mut i = norm >> 10;
    while i != 0 {
      i >>= 1;
      idx += 1;
    }
    idx
  }

  #[inline(always)]
  pub const fn num_small_pools(&self) -> usize {
    self.page_shifts - 9
  }

  #[inline(always)]
  pub const fn num_pools(&self) -> usize {
    NUM_TINY_POOLS + self.num_small_pools()
  }

  /// Flat index of the subpage pool serving `norm`: tiny pools first, then
  /// small ones.
  pub fn pool_index(&self, norm: usize) -> usize {
    if Self::is_tiny(norm) {
      return Self::tiny_idx(norm);
    }
    NUM_TINY_POOLS + Self::small_idx(norm)
  }

  /// Element size served by the pool at `index`.
  pub fn pool_elem_size(&self, index: usize) -> usize {
    if index < NUM_TINY_POOLS {
      return index << 4;
    }
    TINY_LIMIT << (index - NUM_TINY_POOLS)
  }

  /// Tree depth holding runs of `norm` bytes.
  pub fn run_depth(&self, norm: usize) -> usize {
    self.max_order - (log2(norm) - self.page_shifts)
  }
}
