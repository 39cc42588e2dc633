use std::{
  fmt,
  sync::{
    Arc,
    atomic::{
      AtomicUsize,
      Ordering,
    },
  },
};

use getset::CopyGetters;
use poolbuf_list::Slab;
use poolbuf_sys::region::Region;
use spin::Mutex;
use tracing::{
  debug,
  warn,
};

use crate::{
  chunk::Chunk,
  chunk_list::{
    ChunkLists,
    ListKind,
  },
  classes::{
    NUM_TINY_POOLS,
    SizeClass,
    SizeClasses,
  },
  error::{
    ArenaError,
    ArenaResult,
  },
  handle::{
    Allocation,
    ChunkId,
    Handle,
    Origin,
  },
  metrics::{
    ArenaMetrics,
    AtomicClassCounts,
    ChunkListMetrics,
    ChunkMetrics,
  },
  subpage::SubpagePools,
  tcache::ThreadCache,
};

struct ArenaInner {
  chunks: Slab<Chunk>,
  lists: ChunkLists,
}

/// Owns a set of chunks and the subpage pools carved from them.
///
/// Chunk bookkeeping lives behind one lock. Tiny and small requests first
/// try their pool's own lock and only fall back to the arena lock when the
/// pool has no subpage with room. Locks are always taken arena first, pool
/// second.
#[derive(CopyGetters)]
pub struct Arena {
  #[getset(get_copy = "pub")]
  index: usize,
  #[getset(get_copy = "pub")]
  sizes: SizeClasses,
  inner: Mutex<ArenaInner>,
  pools: SubpagePools,
  num_thread_caches: AtomicUsize,
  allocations: AtomicClassCounts,
  deallocations: AtomicClassCounts,
  active_huge_bytes: AtomicUsize,
}

impl Arena {
  pub fn new(index: usize, sizes: SizeClasses) -> Self {
    Self {
      index,
      sizes,
      inner: Mutex::new(ArenaInner {
        chunks: Slab::new(),
        lists: ChunkLists::new(sizes.chunk_size()),
      }),
      pools: SubpagePools::new(&sizes),
      num_thread_caches: AtomicUsize::new(0),
      allocations: AtomicClassCounts::default(),
      deallocations: AtomicClassCounts::default(),
      active_huge_bytes: AtomicUsize::new(0),
    }
  }

  #[inline(always)]
  pub fn num_thread_caches(&self) -> usize {
    self.num_thread_caches.load(Ordering::Relaxed)
  }

  pub(crate) fn bind_cache(&self) {
    self.num_thread_caches.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn unbind_cache(&self) {
    self.num_thread_caches.fetch_sub(1, Ordering::Relaxed);
  }

  /// Serves `req` bytes, consulting `cache` first for pooled classes.
  pub fn allocate(&self, cache: Option<&mut ThreadCache>, req: usize) -> ArenaResult<Allocation> {
    let norm = self.sizes.normalize(req);
    if norm == 0 {
      let empty = Region::new(0, 1).map_err(ArenaError::Region)?;
      return Ok(Allocation::unpooled(Arc::new(empty), 0));
    }

    let class = self.sizes.size_class(norm);
    match class {
      SizeClass::Tiny | SizeClass::Small => {
        if let Some(allocation) = cache.and_then(|cache| cache.allocate(class, norm)) {
          return Ok(allocation);
        }

        let pooled = self
          .pools
          .lock(self.sizes.pool_index(norm))
          .and_then(|mut pool| pool.allocate());
        if let Some(allocation) = pooled {
          self.allocations.incr(class);
          return Ok(allocation);
        }

        self.allocate_normal(class, norm)
      }
      SizeClass::Normal => {
        if let Some(allocation) = cache.and_then(|cache| cache.allocate(class, norm)) {
          return Ok(allocation);
        }
        self.allocate_normal(class, norm)
      }
      SizeClass::Huge => self.allocate_unpooled(norm),
    }
  }

  fn allocate_normal(&self, class: SizeClass, norm: usize) -> ArenaResult<Allocation> {
    let mut inner = self.inner.lock();
    let ArenaInner { chunks, lists } = &mut *inner;

    for kind in ListKind::ALLOCATION_ORDER {
      if let Some(allocation) = lists.allocate(chunks, kind, norm, &self.pools) {
        self.allocations.incr(class);
        return Ok(allocation);
      }
    }

    let key = chunks.next_key();
    let mut chunk = match Chunk::new(key, self.sizes) {
      Ok(chunk) => chunk,
      Err(err) => {
        drop(inner);
        warn!(
          arena = self.index,
          norm,
          error = %err,
          "cannot map a new chunk, serving the request unpooled"
        );
        return self.allocate_unpooled(norm);
      }
    };

    let allocation = chunk.allocate(norm, &self.pools);
    debug!(arena = self.index, chunk = %chunk, "created chunk");

    let index = chunks.insert(chunk).index();
    lists.add(chunks, ListKind::Init, index);

    let allocation = allocation.ok_or(ArenaError::Exhausted(norm))?;
    self.allocations.incr(class);
    Ok(allocation)
  }

  fn allocate_unpooled(&self, norm: usize) -> ArenaResult<Allocation> {
    let align = self.sizes.alignment().max(1);
    let region = Region::new(norm, align).map_err(ArenaError::Region)?;

    self.allocations.incr(SizeClass::Huge);
    self.active_huge_bytes.fetch_add(norm, Ordering::Relaxed);
    Ok(Allocation::unpooled(Arc::new(region), norm))
  }

  /// Takes a block back. Pooled blocks go to `cache` when it has room,
  /// otherwise straight back into their chunk.
  pub fn free(&self, allocation: Allocation, cache: Option<&mut ThreadCache>) -> ArenaResult<()> {
    let (chunk, handle) = match allocation.origin() {
      Origin::Pooled { chunk, handle } => (chunk, handle),
      Origin::Unpooled => {
        let capacity = allocation.capacity();
        if capacity > 0 {
          self.deallocations.incr(SizeClass::Huge);
          self.active_huge_bytes.fetch_sub(capacity, Ordering::Relaxed);
        }
        return Ok(());
      }
    };

    let class = self.sizes.size_class(allocation.capacity());
    let allocation = match cache {
      Some(cache) => match cache.add(class, allocation) {
        Ok(()) => return Ok(()),
        Err(allocation) => allocation,
      },
      None => allocation,
    };

    drop(allocation);
    self.free_chunk(chunk, handle, class)
  }

  /// Returns `handle` to the chunk `id`. A chunk that dropped out of its
  /// list chain is destroyed once the arena lock is released.
  pub fn free_chunk(&self, id: ChunkId, handle: Handle, class: SizeClass) -> ArenaResult<()> {
    let destroyed = {
      let mut inner = self.inner.lock();
      let ArenaInner { chunks, lists } = &mut *inner;
      if chunks.get(id).is_none() {
        return Err(ArenaError::StaleChunk(id));
      }

      let keep = lists.free(chunks, id.index(), handle, &self.pools)?;
      self.deallocations.incr(class);
      if keep { None } else { chunks.remove(id) }
    };

    if let Some(chunk) = destroyed {
      debug!(arena = self.index, chunk = %chunk, "destroying chunk");
      drop(chunk);
    }
    Ok(())
  }

  pub fn num_chunks(&self) -> usize {
    self.inner.lock().chunks.len()
  }

  /// Free bytes across every chunk, including pages parked in subpages.
  pub fn free_bytes(&self) -> usize {
    let inner = self.inner.lock();
    inner.chunks.iter().map(|(_, chunk)| chunk.free_bytes()).sum()
  }

  /// Runs the buddy and subpage checks over everything this arena owns.
  pub fn verify(&self) -> ArenaResult<()> {
    let inner = self.inner.lock();
    for (_, chunk) in inner.chunks.iter() {
      chunk.verify()?;
    }

    for index in 0..self.pools.len() {
      if let Some(pool) = self.pools.lock(index) {
        for subpage in pool.iter() {
          subpage.verify()?;
        }
      }
    }
    Ok(())
  }

  pub fn metrics(&self) -> ArenaMetrics {
    let chunk_lists = {
      let inner = self.inner.lock();
      inner
        .lists
        .iter()
        .map(|list| {
          let chunks = list
            .iter(&inner.chunks)
            .filter_map(|index| inner.chunks.at(index))
            .map(|chunk| ChunkMetrics::new(chunk.usage(), chunk.chunk_size(), chunk.free_bytes()))
            .collect();
          ChunkListMetrics::new(list.kind(), chunks)
        })
        .collect()
    };

    let mut tiny_subpages = 0;
    let mut small_subpages = 0;
    for index in 0..self.pools.len() {
      let count = self.pools.lock(index).map(|pool| pool.len()).unwrap_or(0);
      if index < NUM_TINY_POOLS {
        tiny_subpages += count;
      } else {
        small_subpages += count;
      }
    }

    ArenaMetrics::new(
      self.index,
      self.num_thread_caches(),
      self.allocations.snapshot(),
      self.deallocations.snapshot(),
      self.active_huge_bytes.load(Ordering::Relaxed),
      chunk_lists,
      tiny_subpages,
      small_subpages,
    )
  }
}

impl fmt::Display for Arena {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.metrics())
  }
}

impl fmt::Debug for Arena {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Arena")
      .field("index", &self.index)
      .field("chunk_size", &self.sizes.chunk_size())
      .field("num_thread_caches", &self.num_thread_caches())
      .finish()
  }
}

#[cfg(test)]
mod tests;
