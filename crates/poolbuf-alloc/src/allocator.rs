use std::{
  fmt,
  sync::Arc,
};

use poolbuf_sync::ThreadLocal;
use tracing::debug;

use crate::{
  arena::Arena,
  buffer::PooledBuffer,
  config::PoolConfig,
  error::{
    AllocError,
    AllocResult,
    ArenaResult,
    BufferError,
    BufferResult,
  },
  handle::Allocation,
  metrics::ArenaMetrics,
  tcache::ThreadCache,
};

/// Largest capacity a buffer may ever ask for.
pub const MAX_CAPACITY: usize = isize::MAX as usize;

type CacheInit = Box<dyn Fn() -> ThreadCache + Send + Sync>;

pub(crate) struct Shared {
  config: PoolConfig,
  arenas: Box<[Arc<Arena>]>,
  caches: ThreadLocal<ThreadCache, CacheInit>,
}

/// `arenas` is never empty.
fn least_used(arenas: &[Arc<Arena>]) -> &Arc<Arena> {
  let mut best = &arenas[0];
  for arena in &arenas[1..] {
    if arena.num_thread_caches() < best.num_thread_caches() {
      best = arena;
    }
  }
  best
}

impl Shared {
  fn new(config: PoolConfig) -> Self {
    let sizes = config.size_classes();
    let arenas: Box<[Arc<Arena>]> = (0..config.num_arenas().max(1))
      .map(|index| Arc::new(Arena::new(index, sizes)))
      .collect();

    let cache_config = if config.use_thread_cache() {
      config
    } else {
      config.without_cache()
    };
    let bound = arenas.clone();
    let init: CacheInit = Box::new(move || {
      let arena = Arc::clone(least_used(&bound));
      debug!(arena = arena.index(), "binding thread cache");
      ThreadCache::new(arena, &cache_config)
    });

    Self {
      config,
      arenas,
      caches: ThreadLocal::new(init),
    }
  }

  fn allocate(&self, capacity: usize) -> AllocResult<(Arc<Arena>, Allocation)> {
    let cached = self.caches.with(|cache| {
      let arena = Arc::clone(cache.arena());
      let allocation = arena.allocate(Some(cache), capacity);
      (arena, allocation)
    });

    let (arena, allocation) = match cached {
      Some(pair) => pair,
      // The thread is tearing down its locals: go straight to an arena.
      None => {
        let arena = Arc::clone(least_used(&self.arenas));
        let allocation = arena.allocate(None, capacity);
        (arena, allocation)
      }
    };
    Ok((arena, allocation?))
  }

  /// Frees into the calling thread's cache when it is bound to `arena`,
  /// otherwise directly into the arena.
  pub(crate) fn free(&self, arena: &Arc<Arena>, allocation: Allocation) -> ArenaResult<()> {
    let mut pending = Some(allocation);
    let freed = self.caches.with_existing(|cache| match pending.take() {
      Some(allocation) if Arc::ptr_eq(cache.arena(), arena) => arena.free(allocation, Some(cache)),
      Some(allocation) => arena.free(allocation, None),
      None => Ok(()),
    });

    match pending {
      Some(allocation) => arena.free(allocation, None),
      None => freed.unwrap_or(Ok(())),
    }
  }
}

/// Entry point of the pool: a set of arenas plus one cache per thread.
///
/// Cloning is cheap and clones share everything. Buffers can be released
/// from any thread.
#[derive(Clone)]
pub struct PooledAllocator {
  shared: Arc<Shared>,
}

impl PooledAllocator {
  pub fn new(config: PoolConfig) -> AllocResult<Self> {
    config.validate()?;
    Ok(Self {
      shared: Arc::new(Shared::new(config)),
    })
  }

  #[inline(always)]
  pub fn config(&self) -> &PoolConfig {
    &self.shared.config
  }

  pub fn num_arenas(&self) -> usize {
    self.shared.arenas.len()
  }

  pub fn allocate(&self, capacity: usize) -> AllocResult<PooledBuffer> {
    self.allocate_with_max(capacity, MAX_CAPACITY)
  }

  pub fn allocate_with_max(&self, capacity: usize, max_capacity: usize) -> AllocResult<PooledBuffer> {
    if max_capacity > MAX_CAPACITY || capacity > max_capacity {
      return Err(AllocError::Capacity {
        requested: capacity,
        max: max_capacity.min(MAX_CAPACITY),
      });
    }

    let (arena, allocation) = self.shared.allocate(capacity)?;
    Ok(PooledBuffer::new(
      Arc::clone(&self.shared),
      arena,
      allocation,
      capacity,
      max_capacity,
    ))
  }

  fn check_owner(&self, buf: &PooledBuffer) -> BufferResult<()> {
    if !Arc::ptr_eq(buf.shared(), &self.shared) {
      return Err(BufferError::ForeignAllocator);
    }
    Ok(())
  }

  /// Drops one reference of `buf`. Returns `true` when the memory went
  /// back to the pool.
  pub fn release(&self, buf: &mut PooledBuffer) -> BufferResult<bool> {
    self.check_owner(buf)?;
    buf.release()
  }

  /// Resizes `buf`, moving its bytes to a new block when the current one
  /// does not fit. The first `min(old, new)` bytes are preserved.
  pub fn reallocate(&self, buf: &mut PooledBuffer, new_capacity: usize) -> BufferResult<()> {
    self.check_owner(buf)?;
    if buf.is_released() {
      return Err(BufferError::Released);
    }
    if new_capacity > buf.max_capacity() {
      return Err(BufferError::Alloc(AllocError::Capacity {
        requested: new_capacity,
        max: buf.max_capacity(),
      }));
    }

    if buf.fits_in_place(new_capacity) {
      buf.set_capacity(new_capacity);
      return Ok(());
    }

    let copied = buf.capacity().min(new_capacity);
    let (arena, allocation) = self.shared.allocate(new_capacity)?;
    let mut bytes = vec![0u8; copied];
    buf.read(0, &mut bytes)?;

    if let Some((old_arena, old)) = buf.replace(arena, allocation, new_capacity) {
      self.shared.free(&old_arena, old)?;
    }
    buf.write(0, &bytes)
  }

  /// Frees whatever the calling thread's cache did not reuse lately.
  pub fn trim_thread_cache(&self) -> bool {
    self.shared.caches.with_existing(ThreadCache::trim).is_some()
  }

  /// Blocks parked in the calling thread's cache.
  pub fn cached_blocks(&self) -> usize {
    self.shared.caches.with_existing(|cache| cache.len()).unwrap_or(0)
  }

  /// Index of the arena the calling thread is bound to, if it has a cache.
  pub fn bound_arena(&self) -> Option<usize> {
    self.shared.caches.with_existing(|cache| cache.arena().index())
  }

  pub fn metrics(&self) -> Vec<ArenaMetrics> {
    self.shared.arenas.iter().map(|arena| arena.metrics()).collect()
  }

  /// Runs the chunk and subpage consistency checks of every arena.
  pub fn verify(&self) -> AllocResult<()> {
    for arena in self.shared.arenas.iter() {
      arena.verify()?;
    }
    Ok(())
  }
}

impl Default for PooledAllocator {
  fn default() -> Self {
    Self {
      shared: Arc::new(Shared::new(*PoolConfig::global())),
    }
  }
}

impl fmt::Display for PooledAllocator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{} arena(s)", self.shared.arenas.len())?;
    for arena in self.shared.arenas.iter() {
      writeln!(f, "{}", arena)?;
    }
    Ok(())
  }
}

impl fmt::Debug for PooledAllocator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PooledAllocator")
      .field("config", &self.shared.config)
      .field("arenas", &self.shared.arenas.len())
      .finish()
  }
}
