use std::sync::Arc;

use poolbuf_ring::{
  Ring,
  RingError,
};
use poolbuf_sys::math::log2;
use tracing::{
  trace,
  warn,
};

use crate::{
  arena::Arena,
  classes::{
    NUM_TINY_POOLS,
    SizeClass,
    SizeClasses,
  },
  config::PoolConfig,
  handle::Allocation,
};

/// Freed blocks of one normalized size waiting to be handed out again.
struct RegionCache {
  queue: Ring<Allocation>,
  hits: usize,
}

impl RegionCache {
  fn new(size: usize) -> Self {
    Self {
      queue: Ring::new(size),
      hits: 0,
    }
  }

  fn add(&mut self, allocation: Allocation) -> Result<(), Allocation> {
    self.queue.push(allocation).map_err(|RingError::Full(allocation)| allocation)
  }

  fn allocate(&mut self) -> Option<Allocation> {
    let allocation = self.queue.pop()?;
    self.hits += 1;
    Some(allocation)
  }

  /// Hands back as many entries as the queue could hold minus the ones
  /// reused since the last trim.
  fn trim(&mut self) -> Vec<Allocation> {
    let free = self.queue.capacity().saturating_sub(self.hits);
    self.hits = 0;
    (0..free).map_while(|_| self.queue.pop()).collect()
  }

  fn drain(&mut self) -> Vec<Allocation> {
    self.queue.drain().collect()
  }
}

fn region_caches(size: usize, count: usize) -> Box<[RegionCache]> {
  if size == 0 {
    return Box::default();
  }
  (0..count).map(|_| RegionCache::new(size)).collect()
}

/// Number of normal size queues: one per power of two from a page up to
/// `min(chunk_size, max_cached)`.
fn normal_cache_count(sizes: &SizeClasses, max_cached: usize) -> usize {
  let max = sizes.chunk_size().min(max_cached);
  if max < sizes.page_size() {
    return 1;
  }
  log2(max / sizes.page_size()) + 1
}

/// Per thread front of one arena.
///
/// Only the owning thread ever touches a cache, so nothing in here is
/// synchronized. Dropping the cache returns every parked block.
pub struct ThreadCache {
  arena: Arc<Arena>,
  tiny: Box<[RegionCache]>,
  small: Box<[RegionCache]>,
  normal: Box<[RegionCache]>,
  max_cached: usize,
  trim_interval: usize,
  attempts: usize,
}

impl ThreadCache {
  pub fn new(arena: Arc<Arena>, config: &PoolConfig) -> Self {
    let sizes = arena.sizes();
    let normal = if config.normal_cache_size() > 0 {
      region_caches(
        config.normal_cache_size(),
        normal_cache_count(&sizes, config.max_cached_buffer_capacity()),
      )
    } else {
      Box::default()
    };

    arena.bind_cache();
    Self {
      tiny: region_caches(config.tiny_cache_size(), NUM_TINY_POOLS),
      small: region_caches(config.small_cache_size(), sizes.num_small_pools()),
      normal,
      max_cached: config.max_cached_buffer_capacity(),
      trim_interval: config.cache_trim_interval().max(1),
      attempts: 0,
      arena,
    }
  }

  #[inline(always)]
  pub fn arena(&self) -> &Arc<Arena> {
    &self.arena
  }

  fn cache_for(&mut self, class: SizeClass, norm: usize) -> Option<&mut RegionCache> {
    match class {
      SizeClass::Tiny => self.tiny.get_mut(SizeClasses::tiny_idx(norm)),
      SizeClass::Small => self.small.get_mut(SizeClasses::small_idx(norm)),
      SizeClass::Normal => {
        if norm > self.max_cached {
          return None;
        }
        let idx = log2(norm).checked_sub(self.arena.sizes().page_shifts())?;
        self.normal.get_mut(idx)
      }
      SizeClass::Huge => None,
    }
  }

  /// Pops a parked block of exactly `norm` bytes. Every call counts towards
  /// the trim interval, hit or miss.
  pub fn allocate(&mut self, class: SizeClass, norm: usize) -> Option<Allocation> {
    let allocation = self.cache_for(class, norm).and_then(RegionCache::allocate);

    self.attempts += 1;
    if self.attempts >= self.trim_interval {
      self.attempts = 0;
      self.trim();
    }
    allocation
  }

  /// Parks `allocation`. Hands it back when its queue is full or its size
  /// is not cached at all.
  pub fn add(&mut self, class: SizeClass, allocation: Allocation) -> Result<(), Allocation> {
    if !allocation.is_pooled() {
      return Err(allocation);
    }
    match self.cache_for(class, allocation.capacity()) {
      Some(cache) => cache.add(allocation),
      None => Err(allocation),
    }
  }

  /// Frees the entries that were not reused since the previous trim.
  pub fn trim(&mut self) {
    let mut freed = Vec::new();
    for cache in self
      .tiny
      .iter_mut()
      .chain(self.small.iter_mut())
      .chain(self.normal.iter_mut())
    {
      freed.extend(cache.trim());
    }

    if freed.is_empty() {
      return;
    }
    trace!(arena = self.arena.index(), freed = freed.len(), "trimmed thread cache");
    self.release(freed);
  }

  /// Blocks currently parked.
  pub fn len(&self) -> usize {
    self
      .tiny
      .iter()
      .chain(self.small.iter())
      .chain(self.normal.iter())
      .map(|cache| cache.queue.len())
      .sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn release(&self, allocations: Vec<Allocation>) {
    for allocation in allocations {
      if let Err(err) = self.arena.free(allocation, None) {
        warn!(arena = self.arena.index(), error = %err, "dropping cached block");
      }
    }
  }
}

impl Drop for ThreadCache {
  fn drop(&mut self) {
    let mut parked = Vec::new();
    for cache in self
      .tiny
      .iter_mut()
      .chain(self.small.iter_mut())
      .chain(self.normal.iter_mut())
    {
      parked.extend(cache.drain());
    }

    if !parked.is_empty() {
      trace!(arena = self.arena.index(), freed = parked.len(), "draining thread cache");
    }
    self.release(parked);
    self.arena.unbind_cache();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const PAGE: usize = 8192;

  fn setup(config: PoolConfig) -> (Arc<Arena>, ThreadCache) {
    let arena = Arc::new(Arena::new(0, config.size_classes()));
    let cache = ThreadCache::new(Arc::clone(&arena), &config);
    (arena, cache)
  }

  #[test]
  fn test_normal_cache_count() {
    let sizes = SizeClasses::new(PAGE, 11, 0);
    assert_eq!(normal_cache_count(&sizes, 32 * 1024), 3);
    assert_eq!(normal_cache_count(&sizes, PAGE), 1);
    assert_eq!(normal_cache_count(&sizes, 100), 1);
    assert_eq!(normal_cache_count(&sizes, usize::MAX), 12);
  }

  #[test]
  fn test_binds_to_arena() {
    let (arena, cache) = setup(PoolConfig::default());
    assert_eq!(arena.num_thread_caches(), 1);
    drop(cache);
    assert_eq!(arena.num_thread_caches(), 0);
  }

  #[test]
  fn test_reuses_freed_block() {
    let (arena, mut cache) = setup(PoolConfig::default());

    let first = arena.allocate(Some(&mut cache), 100).unwrap();
    let offset = first.offset();
    arena.free(first, Some(&mut cache)).unwrap();
    assert_eq!(cache.len(), 1);

    let second = arena.allocate(Some(&mut cache), 100).unwrap();
    assert_eq!(second.offset(), offset);
    assert!(cache.is_empty());
    arena.free(second, None).unwrap();
  }

  #[test]
  fn test_skips_large_normal() {
    let (arena, mut cache) = setup(PoolConfig::default());

    let block = arena.allocate(Some(&mut cache), 64 * 1024).unwrap();
    arena.free(block, Some(&mut cache)).unwrap();
    assert!(cache.is_empty());
  }

  #[test]
  fn test_full_queue_falls_through() {
    let config = PoolConfig::default().with_tiny_cache_size(2);
    let (arena, mut cache) = setup(config);

    let blocks: Vec<_> = (0..3)
      .map(|_| arena.allocate(Some(&mut cache), 32).unwrap())
      .collect();
    for block in blocks {
      arena.free(block, Some(&mut cache)).unwrap();
    }
    assert_eq!(cache.len(), 2);
    assert_eq!(arena.metrics().deallocations().tiny(), 1);
  }

  #[test]
  fn test_disabled_caches() {
    let (arena, mut cache) = setup(PoolConfig::default().without_cache());

    let block = arena.allocate(Some(&mut cache), 32).unwrap();
    arena.free(block, Some(&mut cache)).unwrap();
    assert!(cache.is_empty());
  }

  #[test]
  fn test_trim_frees_unused_entries() {
    let config = PoolConfig::default()
      .with_tiny_cache_size(4)
      .with_cache_trim_interval(1_000_000);
    let (arena, mut cache) = setup(config);

    let blocks: Vec<_> = (0..3)
      .map(|_| arena.allocate(Some(&mut cache), 48).unwrap())
      .collect();
    for block in blocks {
      arena.free(block, Some(&mut cache)).unwrap();
    }
    assert_eq!(cache.len(), 3);

    // One reuse since the last trim: up to 4 - 1 entries go back.
    let reused = arena.allocate(Some(&mut cache), 48).unwrap();
    cache.trim();
    assert!(cache.is_empty());
    arena.free(reused, None).unwrap();

    let metrics = arena.metrics();
    assert_eq!(metrics.active_allocations(), 0);
  }

  #[test]
  fn test_trim_interval_fires() {
    let config = PoolConfig::default().with_cache_trim_interval(2);
    let (arena, mut cache) = setup(config);

    let block = arena.allocate(Some(&mut cache), 64).unwrap();
    arena.free(block, Some(&mut cache)).unwrap();
    assert_eq!(cache.len(), 1);

    // Second attempt hits the interval: the reused entry is out of the
    // queue already, nothing else is parked.
    let block = arena.allocate(Some(&mut cache), 64).unwrap();
    assert!(cache.is_empty());
    arena.free(block, Some(&mut cache)).unwrap();
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn test_drop_returns_entries() {
    let config = PoolConfig::default();
    let (arena, mut cache) = setup(config);

    let blocks: Vec<_> = (0..8)
      .map(|i| arena.allocate(Some(&mut cache), 16 << (i % 4)).unwrap())
      .collect();
    for block in blocks {
      arena.free(block, Some(&mut cache)).unwrap();
    }
    assert_eq!(cache.len(), 8);

    drop(cache);
    assert_eq!(arena.metrics().active_allocations(), 0);
    arena.verify().unwrap();
  }
}
