use std::{
  fmt,
  sync::Arc,
};

use getset::{
  CopyGetters,
  Getters,
};
use poolbuf_list::SlabKey;
use poolbuf_sys::region::Region;

/// Identity of a chunk inside its arena. Stale ids never resolve again once
/// the chunk has been destroyed.
pub type ChunkId = SlabKey;

const SUBPAGE_TAG: u64 = 0x4000_0000_0000_0000;
const BITMAP_IDX_MASK: u64 = 0x3FFF_FFFF;

/// Location of a pooled block inside one chunk.
///
/// Runs are addressed by their tree node alone; subpage slots additionally
/// carry the slot index inside the leaf's bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, CopyGetters)]
pub struct Handle {
  #[getset(get_copy = "pub")]
  node: u32,
  #[getset(get_copy = "pub")]
  bitmap_idx: Option<u32>,
}

impl Handle {
  pub const fn run(node: u32) -> Self {
    Self {
      node,
      bitmap_idx: None,
    }
  }

  pub const fn subpage(node: u32, bitmap_idx: u32) -> Self {
    Self {
      node,
      bitmap_idx: Some(bitmap_idx),
    }
  }

  #[inline(always)]
  pub const fn is_subpage(&self) -> bool {
    self.bitmap_idx.is_some()
  }

  pub const fn encode(&self) -> u64 {
    match self.bitmap_idx {
      Some(idx) => SUBPAGE_TAG | ((idx as u64) << 32) | self.node as u64,
      None => self.node as u64,
    }
  }

  pub const fn decode(raw: u64) -> Self {
    let node = raw as u32;
    if raw & SUBPAGE_TAG != 0 {
      return Self::subpage(node, ((raw >> 32) & BITMAP_IDX_MASK) as u32);
    }
    Self::run(node)
  }
}

impl fmt::Display for Handle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.bitmap_idx {
      Some(idx) => write!(f, "{}:{}", self.node, idx),
      None => write!(f, "{}", self.node),
    }
  }
}

/// Where an allocation's bytes came from and how they go back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
  Pooled { chunk: ChunkId, handle: Handle },
  Unpooled,
}

/// A block handed out by an arena: shared backing memory plus the window
/// this block owns inside it.
#[derive(Debug, Getters, CopyGetters)]
pub struct Allocation {
  #[getset(get = "pub")]
  memory: Arc<Region>,
  #[getset(get_copy = "pub")]
  offset: usize,
  #[getset(get_copy = "pub")]
  capacity: usize,
  #[getset(get_copy = "pub")]
  origin: Origin,
}

impl Allocation {
  pub fn pooled(memory: Arc<Region>, offset: usize, capacity: usize, chunk: ChunkId, handle: Handle) -> Self {
    Self {
      memory,
      offset,
      capacity,
      origin: Origin::Pooled { chunk, handle },
    }
  }

  pub fn unpooled(memory: Arc<Region>, capacity: usize) -> Self {
    Self {
      memory,
      offset: 0,
      capacity,
      origin: Origin::Unpooled,
    }
  }

  #[inline(always)]
  pub fn is_pooled(&self) -> bool {
    matches!(self.origin, Origin::Pooled { .. })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_run_encoding() {
    let handle = Handle::run(2048);
    assert_eq!(handle.encode(), 2048);
    assert_eq!(Handle::decode(2048), handle);
    assert!(!handle.is_subpage());
  }

  #[test]
  fn test_subpage_encoding() {
    let handle = Handle::subpage(2049, 0);
    assert_eq!(handle.encode(), 0x4000_0000_0000_0801);
    assert_eq!(Handle::decode(handle.encode()), handle);

    let handle = Handle::subpage(4095, 511);
    assert_eq!(handle.encode(), 0x4000_01FF_0000_0FFF);
    assert_eq!(Handle::decode(handle.encode()), handle);
  }

  #[test]
  fn test_display() {
    assert_eq!(Handle::run(3).to_string(), "3");
    assert_eq!(Handle::subpage(2050, 7).to_string(), "2050:7");
  }
}
