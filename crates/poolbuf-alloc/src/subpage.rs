use std::{
  fmt,
  sync::Arc,
};

use getset::CopyGetters;
use poolbuf_bitmap::Bitmap;
use poolbuf_list::{
  HasLink,
  Link,
  List,
  Slab,
  SlabKey,
};
use poolbuf_sys::region::Region;
use spin::{
  Mutex,
  MutexGuard,
};

use crate::{
  classes::{
    SizeClasses,
    TINY_QUANTUM,
  },
  error::{
    ChunkError,
    ChunkResult,
  },
  handle::{
    Allocation,
    ChunkId,
    Handle,
  },
};

/// One page of a chunk split into equally sized slots.
#[derive(Debug, CopyGetters)]
pub struct Subpage {
  link: Link,
  #[getset(get_copy = "pub")]
  chunk: ChunkId,
  #[getset(get_copy = "pub")]
  node: u32,
  #[getset(get_copy = "pub")]
  run_offset: usize,
  #[getset(get_copy = "pub")]
  elem_size: usize,
  #[getset(get_copy = "pub")]
  max_elems: usize,
  #[getset(get_copy = "pub")]
  num_avail: usize,
  next_avail: Option<usize>,
  bitmap: Bitmap,
  memory: Arc<Region>,
}

impl Subpage {
  pub fn new(chunk: ChunkId, node: u32, run_offset: usize, page_size: usize, elem_size: usize, memory: Arc<Region>) -> Self {
    let max_elems = page_size / elem_size;
    Self {
      link: Link::default(),
      chunk,
      node,
      run_offset,
      elem_size,
      max_elems,
      num_avail: max_elems,
      next_avail: Some(0),
      bitmap: Bitmap::with_capacity(max_elems, page_size / TINY_QUANTUM),
      memory,
    }
  }

  fn next_avail(&mut self) -> Option<usize> {
    if let Some(idx) = self.next_avail.take() {
      return Some(idx);
    }
    self.bitmap.find_fc()
  }

  fn allocate(&mut self) -> Option<Allocation> {
    if self.num_avail == 0 {
      return None;
    }

    let idx = self.next_avail()?;
    self.bitmap.set(idx).ok()?;
    self.num_avail -= 1;

    let handle = Handle::subpage(self.node, idx as u32);
    let offset = self.run_offset + idx * self.elem_size;
    Some(Allocation::pooled(
      Arc::clone(&self.memory),
      offset,
      self.elem_size,
      self.chunk,
      handle,
    ))
  }

  fn free(&mut self, idx: usize) -> ChunkResult<()> {
    let handle = Handle::subpage(self.node, idx as u32);
    self
      .bitmap
      .clear(idx)
      .map_err(|source| ChunkError::Slot { handle, source })?;
    self.next_avail = Some(idx);
    self.num_avail += 1;
    Ok(())
  }

  #[inline(always)]
  pub fn is_empty(&self) -> bool {
    self.num_avail == self.max_elems
  }

  pub fn is_allocated(&self, idx: usize) -> bool {
    self.bitmap.get(idx).unwrap_or(false)
  }

  /// Checks that the slot counters agree with the bitmap.
  pub fn verify(&self) -> ChunkResult<()> {
    let used = self.max_elems - self.num_avail;
    if self.bitmap.used() != used {
      return Err(ChunkError::Corrupted {
        node: self.node as usize,
        expected: used,
        found: self.bitmap.used(),
      });
    }
    Ok(())
  }
}

impl HasLink for Subpage {
  fn link(&self) -> &Link {
    &self.link
  }

  fn link_mut(&mut self) -> &mut Link {
    &mut self.link
  }
}

impl fmt::Display for Subpage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "({}: {}/{}, offset: {}, length: {}, elemSize: {})",
      self.node,
      self.max_elems - self.num_avail,
      self.max_elems,
      self.run_offset,
      self.max_elems * self.elem_size,
      self.elem_size
    )
  }
}

/// All subpages of one element size. Only subpages with a free slot are
/// linked in `available`; full ones stay in the slab until a slot is freed.
#[derive(Debug, CopyGetters)]
pub struct SubpagePool {
  #[getset(get_copy = "pub")]
  elem_size: usize,
  subpages: Slab<Subpage>,
  available: List,
}

impl SubpagePool {
  pub fn new(elem_size: usize) -> Self {
    Self {
      elem_size,
      subpages: Slab::new(),
      available: List::new(),
    }
  }

  pub fn insert(&mut self, subpage: Subpage) -> SlabKey {
    let key = self.subpages.insert(subpage);
    self.available.push_front(&mut self.subpages, key.index());
    key
  }

  /// Takes a slot from the first subpage with room.
  pub fn allocate(&mut self) -> Option<Allocation> {
    let index = self.available.head()?;
    self.allocate_at(index)
  }

  pub fn allocate_in(&mut self, key: SlabKey) -> Option<Allocation> {
    self.subpages.get(key)?;
    self.allocate_at(key.index())
  }

  fn allocate_at(&mut self, index: usize) -> Option<Allocation> {
    let subpage = self.subpages.at_mut(index)?;
    let allocation = subpage.allocate()?;
    if subpage.num_avail == 0 {
      self.available.remove(&mut self.subpages, index);
    }
    Some(allocation)
  }

  /// Frees one slot. Returns `false` when the subpage became empty and was
  /// retired, in which case its page must go back to the chunk.
  pub fn free(&mut self, key: SlabKey, handle: Handle) -> ChunkResult<bool> {
    let idx = handle.bitmap_idx().ok_or(ChunkError::NoSubpage(handle))? as usize;
    let subpage = self.subpages.get_mut(key).ok_or(ChunkError::NoSubpage(handle))?;
    if subpage.node != handle.node() {
      return Err(ChunkError::NoSubpage(handle));
    }

    subpage.free(idx)?;

    if subpage.num_avail == 1 {
      self.available.push_front(&mut self.subpages, key.index());
      return Ok(true);
    }

    if !subpage.is_empty() {
      return Ok(true);
    }

    // The last subpage of a pool stays around for the next allocation.
    if self.available.len() == 1 {
      return Ok(true);
    }

    self.available.remove(&mut self.subpages, key.index());
    self.subpages.remove(key);
    Ok(false)
  }

  pub fn get(&self, key: SlabKey) -> Option<&Subpage> {
    self.subpages.get(key)
  }

  pub fn len(&self) -> usize {
    self.subpages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.subpages.is_empty()
  }

  pub fn available(&self) -> usize {
    self.available.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Subpage> {
    self.subpages.iter().map(|(_, subpage)| subpage)
  }
}

/// The tiny and small pools of one arena, each behind its own lock.
pub struct SubpagePools {
  pools: Box<[Mutex<SubpagePool>]>,
}

impl SubpagePools {
  pub fn new(sizes: &SizeClasses) -> Self {
    let pools = (0..sizes.num_pools())
      .map(|index| Mutex::new(SubpagePool::new(sizes.pool_elem_size(index))))
      .collect();
    Self { pools }
  }

  #[inline]
  pub fn lock(&self, index: usize) -> Option<MutexGuard<'_, SubpagePool>> {
    self.pools.get(index).map(Mutex::lock)
  }

  pub fn len(&self) -> usize {
    self.pools.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pools.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handle::Origin;

  const PAGE: usize = 8192;

  fn handle_of(allocation: &Allocation) -> Handle {
    match allocation.origin() {
      Origin::Pooled { handle, .. } => handle,
      Origin::Unpooled => panic!("subpage slots are always pooled"),
    }
  }

  fn region() -> Arc<Region> {
    Arc::new(Region::heap(PAGE * 4, 16).unwrap())
  }

  fn subpage(memory: &Arc<Region>, node: u32, elem: usize) -> Subpage {
    Subpage::new(SlabKey::new(0, 0), node, 0, PAGE, elem, Arc::clone(memory))
  }

  #[test]
  fn test_slots_are_sequential() {
    let memory = region();
    let mut pool = SubpagePool::new(1024);
    pool.insert(subpage(&memory, 2048, 1024));

    let offsets: Vec<usize> = (0..8).map(|_| pool.allocate().unwrap().offset()).collect();
    assert_eq!(offsets, (0..8).map(|i| i * 1024).collect::<Vec<_>>());
    assert!(pool.allocate().is_none());
    assert_eq!(pool.available(), 0);
    assert_eq!(pool.len(), 1);
  }

  #[test]
  fn test_full_subpage_relinks_on_free() {
    let memory = region();
    let mut pool = SubpagePool::new(2048);
    let key = pool.insert(subpage(&memory, 2048, 2048));

    let handles: Vec<Handle> = (0..4).map(|_| handle_of(&pool.allocate().unwrap())).collect();
    assert_eq!(pool.available(), 0);

    assert!(pool.free(key, handles[2]).unwrap());
    assert_eq!(pool.available(), 1);

    let again = pool.allocate().unwrap();
    assert_eq!(again.offset(), 2 * 2048);
  }

  #[test]
  fn test_last_empty_subpage_is_kept() {
    let memory = region();
    let mut pool = SubpagePool::new(4096);
    let key = pool.insert(subpage(&memory, 2048, 4096));

    let first = pool.allocate_in(key).unwrap();
    assert!(pool.free(key, handle_of(&first)).unwrap());
    assert_eq!(pool.len(), 1);
  }

  #[test]
  fn test_empty_subpage_retires_when_not_alone() {
    let memory = region();
    let mut pool = SubpagePool::new(4096);
    let a = pool.insert(subpage(&memory, 2048, 4096));
    let _b = pool.insert(subpage(&memory, 2049, 4096));

    let alloc = pool.allocate_in(a).unwrap();
    assert!(!pool.free(a, handle_of(&alloc)).unwrap());
    assert!(pool.get(a).is_none());
    assert_eq!(pool.len(), 1);
  }

  #[test]
  fn test_double_free_slot() {
    let memory = region();
    let mut pool = SubpagePool::new(16);
    let key = pool.insert(subpage(&memory, 2048, 16));
    pool.allocate().unwrap();
    pool.allocate().unwrap();

    let handle = Handle::subpage(2048, 1);
    assert!(pool.free(key, handle).unwrap());
    assert!(matches!(pool.free(key, handle), Err(ChunkError::Slot { .. })));
    assert!(matches!(
      pool.free(key, Handle::subpage(2049, 0)),
      Err(ChunkError::NoSubpage(_))
    ));
    assert!(pool.get(key).unwrap().verify().is_ok());
  }
}
