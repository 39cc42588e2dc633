use std::fmt;

use getset::CopyGetters;
use poolbuf_list::{
  List,
  ListIter,
  Slab,
};

use crate::{
  chunk::Chunk,
  error::{
    ChunkError,
    ChunkResult,
  },
  handle::{
    Allocation,
    Handle,
  },
  subpage::SubpagePools,
};

/// Utilization buckets a chunk can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
  Init,
  Q000,
  Q025,
  Q050,
  Q075,
  Q100,
}

impl ListKind {
  pub const ALL: [ListKind; 6] = [
    ListKind::Init,
    ListKind::Q000,
    ListKind::Q025,
    ListKind::Q050,
    ListKind::Q075,
    ListKind::Q100,
  ];

  /// Busy chunks first; fresh and nearly full ones last.
  pub const ALLOCATION_ORDER: [ListKind; 5] = [
    ListKind::Q050,
    ListKind::Q025,
    ListKind::Q000,
    ListKind::Init,
    ListKind::Q075,
  ];

  #[inline(always)]
  pub const fn index(self) -> usize {
    self as usize
  }

  pub const fn min_usage(self) -> i32 {
    match self {
      ListKind::Init => i32::MIN,
      ListKind::Q000 => 1,
      ListKind::Q025 => 25,
      ListKind::Q050 => 50,
      ListKind::Q075 => 75,
      ListKind::Q100 => 100,
    }
  }

  pub const fn max_usage(self) -> i32 {
    match self {
      ListKind::Init => 25,
      ListKind::Q000 => 50,
      ListKind::Q025 => 75,
      ListKind::Q050 => 100,
      ListKind::Q075 => 100,
      ListKind::Q100 => i32::MAX,
    }
  }

  pub const fn next(self) -> Option<ListKind> {
    match self {
      ListKind::Init => Some(ListKind::Q000),
      ListKind::Q000 => Some(ListKind::Q025),
      ListKind::Q025 => Some(ListKind::Q050),
      ListKind::Q050 => Some(ListKind::Q075),
      ListKind::Q075 => Some(ListKind::Q100),
      ListKind::Q100 => None,
    }
  }

  /// `Init` falls back onto itself, so chunks that never left it are kept.
  /// `Q000` has nowhere to go: its chunks are destroyed once empty.
  pub const fn prev(self) -> Option<ListKind> {
    match self {
      ListKind::Init => Some(ListKind::Init),
      ListKind::Q000 => None,
      ListKind::Q025 => Some(ListKind::Q000),
      ListKind::Q050 => Some(ListKind::Q025),
      ListKind::Q075 => Some(ListKind::Q050),
      ListKind::Q100 => Some(ListKind::Q075),
    }
  }
}

impl fmt::Display for ListKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ListKind::Init => "qInit",
      ListKind::Q000 => "q000",
      ListKind::Q025 => "q025",
      ListKind::Q050 => "q050",
      ListKind::Q075 => "q075",
      ListKind::Q100 => "q100",
    };
    f.write_str(name)
  }
}

#[derive(Debug, CopyGetters)]
pub struct ChunkList {
  #[getset(get_copy = "pub")]
  kind: ListKind,
  #[getset(get_copy = "pub")]
  max_capacity: usize,
  chunks: List,
}

impl ChunkList {
  pub fn new(kind: ListKind, chunk_size: usize) -> Self {
    Self {
      kind,
      max_capacity: Self::max_capacity_for(kind.min_usage(), chunk_size),
      chunks: List::new(),
    }
  }

  /// Largest block a chunk of this list can still be expected to serve.
  fn max_capacity_for(min_usage: i32, chunk_size: usize) -> usize {
    let min_usage = min_usage.max(1) as usize;
    if min_usage >= 100 {
      return 0;
    }
    (chunk_size as u128 * (100 - min_usage) as u128 / 100) as usize
  }

  #[inline(always)]
  pub fn len(&self) -> usize {
    self.chunks.len()
  }

  #[inline(always)]
  pub fn is_empty(&self) -> bool {
    self.chunks.is_empty()
  }

  pub fn iter<'list>(&self, chunks: &'list Slab<Chunk>) -> ListIter<'list, Chunk, Slab<Chunk>> {
    self.chunks.iter(chunks)
  }
}

/// The six utilization lists of an arena, chained by usage thresholds.
///
/// Chunks themselves live in the arena's slab; the lists only thread slab
/// indices.
#[derive(Debug)]
pub struct ChunkLists {
  lists: [ChunkList; 6],
}

impl ChunkLists {
  pub fn new(chunk_size: usize) -> Self {
    Self {
      lists: ListKind::ALL.map(|kind| ChunkList::new(kind, chunk_size)),
    }
  }

  #[inline(always)]
  pub fn get(&self, kind: ListKind) -> &ChunkList {
    &self.lists[kind.index()]
  }

  pub fn iter(&self) -> impl Iterator<Item = &ChunkList> {
    self.lists.iter()
  }

  /// Tries every chunk of `kind` head to tail. A chunk that reaches the
  /// list's upper bound moves on to the next list.
  pub fn allocate(
    &mut self,
    chunks: &mut Slab<Chunk>,
    kind: ListKind,
    norm: usize,
    pools: &SubpagePools,
  ) -> Option<Allocation> {
    let list = self.get(kind);
    if list.is_empty() || norm > list.max_capacity() {
      return None;
    }

    let mut cursor = list.chunks.head();
    while let Some(index) = cursor {
      cursor = List::next_of(chunks, index);

      let chunk = chunks.at_mut(index)?;
      let Some(allocation) = chunk.allocate(norm, pools) else {
        continue;
      };

      if chunk.usage() >= kind.max_usage() {
        self.remove(chunks, kind, index);
        if let Some(next) = kind.next() {
          self.add(chunks, next, index);
        }
      }
      return Some(allocation);
    }

    None
  }

  /// Inserts a chunk, forwarding it to a later list when it is already too
  /// full for `kind`.
  pub fn add(&mut self, chunks: &mut Slab<Chunk>, kind: ListKind, index: usize) {
    let Some(usage) = chunks.at(index).map(Chunk::usage) else {
      return;
    };

    if usage >= kind.max_usage() {
      if let Some(next) = kind.next() {
        self.add(chunks, next, index);
        return;
      }
    }
    self.link(chunks, kind, index);
  }

  /// Frees `handle` inside the chunk at `index` and moves the chunk to a
  /// lower list when its usage drops below the current one. Returns `false`
  /// when the chunk fell out of the chain and must be destroyed.
  pub fn free(
    &mut self,
    chunks: &mut Slab<Chunk>,
    index: usize,
    handle: Handle,
    pools: &SubpagePools,
  ) -> ChunkResult<bool> {
    let chunk = chunks.at_mut(index).ok_or(ChunkError::NotAllocated(handle))?;
    chunk.free(handle, pools)?;

    let Some(kind) = chunk.list() else {
      return Ok(true);
    };

    if chunk.usage() < kind.min_usage() {
      self.remove(chunks, kind, index);
      return Ok(self.move_down(chunks, kind, index));
    }
    Ok(true)
  }

  fn move_down(&mut self, chunks: &mut Slab<Chunk>, from: ListKind, index: usize) -> bool {
    match from.prev() {
      Some(prev) => self.move_into(chunks, prev, index),
      None => false,
    }
  }

  fn move_into(&mut self, chunks: &mut Slab<Chunk>, kind: ListKind, index: usize) -> bool {
    let usage = chunks.at(index).map(Chunk::usage).unwrap_or(0);
    if usage < kind.min_usage() {
      return self.move_down(chunks, kind, index);
    }
    self.link(chunks, kind, index);
    true
  }

  fn link(&mut self, chunks: &mut Slab<Chunk>, kind: ListKind, index: usize) {
    if self.lists[kind.index()].chunks.push_front(chunks, index) {
      if let Some(chunk) = chunks.at_mut(index) {
        chunk.set_list(Some(kind));
      }
    }
  }

  pub fn remove(&mut self, chunks: &mut Slab<Chunk>, kind: ListKind, index: usize) {
    if self.lists[kind.index()].chunks.remove(chunks, index) {
      if let Some(chunk) = chunks.at_mut(index) {
        chunk.set_list(None);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    classes::SizeClasses,
    handle::Origin,
  };

  const PAGE: usize = 8192;

  struct Fixture {
    sizes: SizeClasses,
    chunks: Slab<Chunk>,
    lists: ChunkLists,
    pools: SubpagePools,
  }

  impl Fixture {
    fn new(max_order: usize) -> Self {
      let sizes = SizeClasses::new(PAGE, max_order, 0);
      Self {
        sizes,
        chunks: Slab::new(),
        lists: ChunkLists::new(sizes.chunk_size()),
        pools: SubpagePools::new(&sizes),
      }
    }

    fn new_chunk(&mut self, kind: ListKind) -> usize {
      let key = self.chunks.next_key();
      let chunk = Chunk::new(key, self.sizes).unwrap();
      let index = self.chunks.insert(chunk).index();
      self.lists.add(&mut self.chunks, kind, index);
      index
    }

    fn list_of(&self, index: usize) -> Option<ListKind> {
      self.chunks.at(index).and_then(Chunk::list)
    }

    fn allocate(&mut self, kind: ListKind, norm: usize) -> Option<Handle> {
      let allocation = self
        .lists
        .allocate(&mut self.chunks, kind, norm, &self.pools)?;
      match allocation.origin() {
        Origin::Pooled { handle, .. } => Some(handle),
        Origin::Unpooled => None,
      }
    }
  }

  #[test]
  fn test_max_capacity() {
    let chunk_size = 100 * PAGE;
    assert_eq!(ChunkList::new(ListKind::Init, chunk_size).max_capacity(), 99 * PAGE);
    assert_eq!(ChunkList::new(ListKind::Q000, chunk_size).max_capacity(), 99 * PAGE);
    assert_eq!(ChunkList::new(ListKind::Q025, chunk_size).max_capacity(), 75 * PAGE);
    assert_eq!(ChunkList::new(ListKind::Q050, chunk_size).max_capacity(), 50 * PAGE);
    assert_eq!(ChunkList::new(ListKind::Q075, chunk_size).max_capacity(), 25 * PAGE);
    assert_eq!(ChunkList::new(ListKind::Q100, chunk_size).max_capacity(), 0);
  }

  #[test]
  fn test_chain() {
    let mut kind = ListKind::Init;
    let mut seen = vec![kind];
    while let Some(next) = kind.next() {
      seen.push(next);
      kind = next;
    }
    assert_eq!(seen, ListKind::ALL.to_vec());
    assert_eq!(ListKind::Init.prev(), Some(ListKind::Init));
    assert_eq!(ListKind::Q000.prev(), None);
  }

  #[test]
  fn test_migrates_init_to_q000() {
    // 16 pages per chunk: every page is 6.25%.
    let mut fx = Fixture::new(4);
    let index = fx.new_chunk(ListKind::Init);

    for _ in 0..3 {
      fx.allocate(ListKind::Init, PAGE).unwrap();
    }
    assert_eq!(fx.list_of(index), Some(ListKind::Init));
    assert_eq!(fx.chunks.at(index).unwrap().usage(), 19);

    fx.allocate(ListKind::Init, PAGE).unwrap();
    assert_eq!(fx.chunks.at(index).unwrap().usage(), 25);
    assert_eq!(fx.list_of(index), Some(ListKind::Q000));
    assert!(fx.lists.get(ListKind::Init).is_empty());
    assert_eq!(fx.lists.get(ListKind::Q000).len(), 1);
  }

  #[test]
  fn test_add_forwards_full_chunks() {
    let mut fx = Fixture::new(4);
    let index = fx.new_chunk(ListKind::Init);
    fx.allocate(ListKind::Init, 8 * PAGE).unwrap();
    assert_eq!(fx.list_of(index), Some(ListKind::Q025));

    fx.lists.remove(&mut fx.chunks, ListKind::Q025, index);
    fx.lists.add(&mut fx.chunks, ListKind::Init, index);
    assert_eq!(fx.list_of(index), Some(ListKind::Q025));
  }

  #[test]
  fn test_free_demotes_and_destroys() {
    let mut fx = Fixture::new(4);
    let index = fx.new_chunk(ListKind::Init);

    let mut handles = Vec::new();
    for _ in 0..16 {
      let kind = fx.list_of(index).unwrap();
      handles.push(fx.allocate(kind, PAGE).unwrap());
    }
    assert_eq!(fx.list_of(index), Some(ListKind::Q100));

    let last = handles.pop().unwrap();
    for handle in handles {
      assert!(fx.lists.free(&mut fx.chunks, index, handle, &fx.pools).unwrap());
    }
    assert_eq!(fx.list_of(index), Some(ListKind::Q000));

    assert!(!fx.lists.free(&mut fx.chunks, index, last, &fx.pools).unwrap());
    assert_eq!(fx.list_of(index), None);
    assert!(ListKind::ALL.iter().all(|kind| fx.lists.get(*kind).is_empty()));
  }

  #[test]
  fn test_init_chunks_are_never_destroyed() {
    let mut fx = Fixture::new(4);
    let index = fx.new_chunk(ListKind::Init);

    let handle = fx.allocate(ListKind::Init, PAGE).unwrap();
    assert!(fx.lists.free(&mut fx.chunks, index, handle, &fx.pools).unwrap());
    assert_eq!(fx.list_of(index), Some(ListKind::Init));
  }

  #[test]
  fn test_allocate_rejects_oversized() {
    let mut fx = Fixture::new(4);
    let index = fx.new_chunk(ListKind::Init);
    fx.allocate(ListKind::Init, 8 * PAGE).unwrap();
    assert_eq!(fx.list_of(index), Some(ListKind::Q025));

    // q025 only promises 75% of a chunk.
    assert!(fx.allocate(ListKind::Q025, 16 * PAGE).is_none());
    assert!(fx.allocate(ListKind::Q050, PAGE).is_none());
  }
}
