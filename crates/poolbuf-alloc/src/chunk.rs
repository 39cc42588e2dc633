use std::{
  fmt,
  sync::Arc,
};

use getset::CopyGetters;
use poolbuf_bitmap::Bitmap;
use poolbuf_list::{
  HasLink,
  Link,
  SlabKey,
};
use poolbuf_sys::{
  math::log2,
  region::{
    Region,
    RegionResult,
  },
};

use crate::{
  chunk_list::ListKind,
  classes::SizeClasses,
  error::{
    ChunkError,
    ChunkResult,
  },
  handle::{
    Allocation,
    ChunkId,
    Handle,
  },
  subpage::{
    Subpage,
    SubpagePools,
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SubpageRef {
  pool: usize,
  key: SlabKey,
}

/// A buddy allocator over `chunk_size` bytes.
///
/// The tree is stored as a 1-based array. `memory_map[id]` is the smallest
/// depth at which a free node exists below `id`, or `unusable` when the
/// whole subtree is taken. `depth_map[id]` never changes.
#[derive(CopyGetters)]
pub struct Chunk {
  link: Link,
  #[getset(get_copy = "pub")]
  id: ChunkId,
  #[getset(get_copy = "pub")]
  list: Option<ListKind>,
  memory: Arc<Region>,
  memory_map: Box<[u8]>,
  depth_map: Box<[u8]>,
  allocated: Bitmap,
  subpages: Box<[Option<SubpageRef>]>,
  sizes: SizeClasses,
  max_subpage_allocs: usize,
  log2_chunk_size: usize,
  unusable: u8,
  #[getset(get_copy = "pub")]
  free_bytes: usize,
}

impl Chunk {
  pub fn new(id: ChunkId, sizes: SizeClasses) -> RegionResult<Self> {
    let memory = Region::new(sizes.chunk_size(), sizes.page_size())?;
    let max_order = sizes.max_order();
    let max_subpage_allocs = 1usize << max_order;
    let nodes = max_subpage_allocs << 1;

    let mut memory_map = vec![0u8; nodes];
    let mut index = 1;
    for depth in 0..=max_order {
      for _ in 0..(1usize << depth) {
        memory_map[index] = depth as u8;
        index += 1;
      }
    }
    let depth_map = memory_map.clone();

    Ok(Self {
      link: Link::default(),
      id,
      list: None,
      memory: Arc::new(memory),
      memory_map: memory_map.into_boxed_slice(),
      depth_map: depth_map.into_boxed_slice(),
      allocated: Bitmap::zero(nodes),
      subpages: vec![None; max_subpage_allocs].into_boxed_slice(),
      sizes,
      max_subpage_allocs,
      log2_chunk_size: log2(sizes.chunk_size()),
      unusable: (max_order + 1) as u8,
      free_bytes: sizes.chunk_size(),
    })
  }

  #[inline(always)]
  pub fn chunk_size(&self) -> usize {
    self.sizes.chunk_size()
  }

  #[inline(always)]
  pub fn memory(&self) -> &Arc<Region> {
    &self.memory
  }

  #[inline(always)]
  pub(crate) fn set_list(&mut self, list: Option<ListKind>) {
    self.list = list;
  }

  pub fn usage(&self) -> i32 {
    if self.free_bytes == 0 {
      return 100;
    }

    let free_pct = (self.free_bytes as u128 * 100 / self.chunk_size() as u128) as i32;
    if free_pct == 0 {
      return 99;
    }
    100 - free_pct
  }

  #[inline(always)]
  fn value(&self, id: usize) -> u8 {
    self.memory_map[id]
  }

  #[inline(always)]
  fn depth(&self, id: usize) -> u8 {
    self.depth_map[id]
  }

  #[inline(always)]
  fn run_length(&self, id: usize) -> usize {
    1 << (self.log2_chunk_size - self.depth(id) as usize)
  }

  #[inline(always)]
  fn run_offset(&self, id: usize) -> usize {
    let shift = id ^ (1 << self.depth(id));
    shift * self.run_length(id)
  }

  #[inline(always)]
  fn leaf_index(&self, id: usize) -> usize {
    id ^ self.max_subpage_allocs
  }

  /// Allocates `norm` bytes: a page run for normal sizes, a subpage slot for
  /// tiny and small ones. `None` means this chunk has no room.
  pub fn allocate(&mut self, norm: usize, pools: &SubpagePools) -> Option<Allocation> {
    let allocation = if self.sizes.is_tiny_or_small(norm) {
      self.allocate_subpage(norm, pools)
    } else {
      self.allocate_run(norm)
    };

    #[cfg(feature = "invariants")]
    self.assert_invariants();

    allocation
  }

  fn allocate_node(&mut self, d: usize) -> Option<usize> {
    let d = d as u8;
    let initial = !((1usize << d) - 1);

    let mut id = 1;
    let mut val = self.value(id);
    if val > d {
      return None;
    }

    while val < d || id & initial == 0 {
      id <<= 1;
      val = self.value(id);
      if val > d {
        id ^= 1;
        val = self.value(id);
      }
    }

    self.allocated.set(id).ok()?;
    self.memory_map[id] = self.unusable;
    self.update_parents_alloc(id);
    Some(id)
  }

  fn update_parents_alloc(&mut self, mut id: usize) {
    while id > 1 {
      let parent = id >> 1;
      let val = self.value(id).min(self.value(id ^ 1));
      self.memory_map[parent] = val;
      id = parent;
    }
  }

  fn update_parents_free(&mut self, mut id: usize) {
    let mut log_child = self.depth(id) + 1;
    while id > 1 {
      let parent = id >> 1;
      let left = self.value(id);
      let right = self.value(id ^ 1);
      log_child -= 1;

      self.memory_map[parent] = if left == log_child && right == log_child {
        log_child - 1
      } else {
        left.min(right)
      };
      id = parent;
    }
  }

  fn allocate_run(&mut self, norm: usize) -> Option<Allocation> {
    let d = self.sizes.run_depth(norm);
    let id = self.allocate_node(d)?;
    let length = self.run_length(id);
    self.free_bytes -= length;

    Some(Allocation::pooled(
      Arc::clone(&self.memory),
      self.run_offset(id),
      length,
      self.id,
      Handle::run(id as u32),
    ))
  }

  fn allocate_subpage(&mut self, norm: usize, pools: &SubpagePools) -> Option<Allocation> {
    let pool_index = self.sizes.pool_index(norm);
    let mut pool = pools.lock(pool_index)?;

    let id = self.allocate_node(self.sizes.max_order())?;
    self.free_bytes -= self.sizes.page_size();

    let subpage = Subpage::new(
      self.id,
      id as u32,
      self.run_offset(id),
      self.sizes.page_size(),
      norm,
      Arc::clone(&self.memory),
    );
    let key = pool.insert(subpage);
    let leaf = self.leaf_index(id);
    self.subpages[leaf] = Some(SubpageRef {
      pool: pool_index,
      key,
    });

    pool.allocate_in(key)
  }

  /// Returns a block to the tree. Subpage slots only give their page back
  /// once the subpage retires.
  pub fn free(&mut self, handle: Handle, pools: &SubpagePools) -> ChunkResult<()> {
    let id = handle.node() as usize;
    if id == 0 || id >= self.memory_map.len() {
      return Err(ChunkError::InvalidNode(handle.node()));
    }

    let is_leaf = id >= self.max_subpage_allocs;
    let subpage = if is_leaf {
      self.subpages[self.leaf_index(id)]
    } else {
      None
    };

    match (handle.is_subpage(), subpage) {
      (true, Some(subpage)) => {
        let mut pool = pools.lock(subpage.pool).ok_or(ChunkError::NoSubpage(handle))?;
        if pool.free(subpage.key, handle)? {
          return Ok(());
        }
        drop(pool);
        let leaf = self.leaf_index(id);
        self.subpages[leaf] = None;
      }
      (true, None) => return Err(ChunkError::NoSubpage(handle)),
      (false, Some(_)) => return Err(ChunkError::NotAllocated(handle)),
      (false, None) => {}
    }

    self
      .allocated
      .clear(id)
      .map_err(|_| ChunkError::NotAllocated(handle))?;
    self.free_bytes += self.run_length(id);
    self.memory_map[id] = self.depth(id);
    self.update_parents_free(id);

    #[cfg(feature = "invariants")]
    self.assert_invariants();

    Ok(())
  }

  /// Checks the buddy invariant over the whole tree.
  ///
  /// Allocated nodes must be `unusable`. Every other internal node is the
  /// min of its children, or its own depth when both children are whole.
  /// Leaves are either allocated or at their static depth.
  pub fn verify(&self) -> ChunkResult<()> {
    for id in 1..self.memory_map.len() {
      let val = self.value(id);
      let expected = if self.allocated.get(id).unwrap_or(false) {
        self.unusable
      } else if id >= self.max_subpage_allocs {
        self.depth(id)
      } else {
        let left = id << 1;
        let right = left | 1;
        let l = self.value(left);
        let r = self.value(right);
        if l == self.depth(left) && r == self.depth(right) {
          self.depth(id)
        } else {
          l.min(r)
        }
      };

      if val != expected {
        return Err(ChunkError::Corrupted {
          node: id,
          expected: expected as usize,
          found: val as usize,
        });
      }
    }

    Ok(())
  }

  #[cfg(feature = "invariants")]
  fn assert_invariants(&self) {
    if let Err(err) = self.verify() {
      panic!("chunk {} violates the buddy invariant: {}", self, err);
    }
  }
}

impl HasLink for Chunk {
  fn link(&self) -> &Link {
    &self.link
  }

  fn link_mut(&mut self) -> &mut Link {
    &mut self.link
  }
}

impl fmt::Display for Chunk {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Chunk(#{}.{}: {}%, {}/{})",
      self.id.index(),
      self.id.generation(),
      self.usage(),
      self.chunk_size() - self.free_bytes,
      self.chunk_size()
    )
  }
}

impl fmt::Debug for Chunk {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Chunk")
      .field("id", &self.id)
      .field("list", &self.list)
      .field("usage", &self.usage())
      .field("free_bytes", &self.free_bytes)
      .finish()
  }
}

#[cfg(test)]
mod tests;
