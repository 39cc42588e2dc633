use std::{
  sync::Arc,
  thread,
};

use rand::{
  Rng,
  SeedableRng,
  rngs::StdRng,
};

use super::*;
use crate::error::ChunkError;

const PAGE: usize = 8192;
const CHUNK: usize = PAGE << 11;

fn arena() -> Arena {
  Arena::new(0, SizeClasses::new(PAGE, 11, 0))
}

fn chunk_of(allocation: &Allocation) -> Option<ChunkId> {
  match allocation.origin() {
    Origin::Pooled { chunk, .. } => Some(chunk),
    Origin::Unpooled => None,
  }
}

#[test]
fn test_zero_size() {
  let arena = arena();
  let allocation = arena.allocate(None, 0).unwrap();
  assert_eq!(allocation.capacity(), 0);
  assert!(!allocation.is_pooled());
  arena.free(allocation, None).unwrap();

  let metrics = arena.metrics();
  assert_eq!(metrics.allocations().total(), 0);
  assert_eq!(metrics.num_chunks(), 0);
}

#[test]
fn test_fill_chunk_with_pages() {
  let arena = arena();

  let pages: Vec<_> = (0..2048).map(|_| arena.allocate(None, PAGE).unwrap()).collect();
  assert_eq!(arena.num_chunks(), 1);
  let first = chunk_of(&pages[0]).unwrap();
  assert!(pages.iter().all(|page| chunk_of(page) == Some(first)));

  let metrics = arena.metrics();
  assert_eq!(metrics.list(ListKind::Q100).unwrap().chunks().len(), 1);

  let overflow = arena.allocate(None, PAGE).unwrap();
  assert_ne!(chunk_of(&overflow), Some(first));
  assert_eq!(arena.num_chunks(), 2);

  for page in pages {
    arena.free(page, None).unwrap();
  }

  // The first chunk walked down to q000 and was destroyed at 0%.
  assert_eq!(arena.num_chunks(), 1);
  let metrics = arena.metrics();
  assert_eq!(metrics.list(ListKind::Init).unwrap().chunks().len(), 1);
  assert_eq!(metrics.list(ListKind::Q000).unwrap().chunks().len(), 0);

  arena.free(overflow, None).unwrap();
  assert_eq!(arena.free_bytes(), CHUNK);
  arena.verify().unwrap();
}

#[test]
fn test_round_trip_restores_free_bytes() {
  let arena = arena();
  let seed = arena.allocate(None, PAGE).unwrap();
  let baseline = arena.free_bytes();

  for req in [1, 16, 100, 511, 512, 1000, 4096, PAGE, PAGE + 1, 3 * PAGE, 1 << 20] {
    let allocation = arena.allocate(None, req).unwrap();
    assert!(allocation.capacity() >= req);
    arena.free(allocation, None).unwrap();
    arena.verify().unwrap();
  }

  // Subpages stay parked as their pool's last page.
  let parked = arena.metrics().tiny_subpages() + arena.metrics().small_subpages();
  assert_eq!(arena.free_bytes(), baseline - parked * PAGE);
  arena.free(seed, None).unwrap();
}

#[test]
fn test_huge_is_unpooled() {
  let arena = arena();
  let allocation = arena.allocate(None, CHUNK + 1).unwrap();
  assert!(!allocation.is_pooled());
  assert_eq!(allocation.capacity(), CHUNK + 1);
  assert_eq!(arena.num_chunks(), 0);
  assert_eq!(arena.metrics().active_huge_bytes(), CHUNK + 1);

  arena.free(allocation, None).unwrap();
  let metrics = arena.metrics();
  assert_eq!(metrics.active_huge_bytes(), 0);
  assert_eq!(metrics.deallocations().huge(), 1);
}

#[test]
fn test_whole_chunk_is_normal() {
  let arena = arena();
  let allocation = arena.allocate(None, CHUNK).unwrap();
  assert!(allocation.is_pooled());
  assert_eq!(allocation.capacity(), CHUNK);
  arena.free(allocation, None).unwrap();
}

#[test]
fn test_tiny_slots_share_a_page() {
  let arena = arena();
  let a = arena.allocate(None, 32).unwrap();
  let b = arena.allocate(None, 32).unwrap();
  assert_eq!(a.capacity(), 32);
  assert_eq!(b.offset(), a.offset() + 32);
  assert_eq!(arena.metrics().tiny_subpages(), 1);

  arena.free(a, None).unwrap();
  arena.free(b, None).unwrap();
  arena.verify().unwrap();
}

#[test]
fn test_small_alignment_does_not_share_slots() {
  let arena = Arena::new(0, SizeClasses::new(PAGE, 11, 8));
  let blocks: Vec<_> = [16, 24, 16, 8]
    .into_iter()
    .map(|size| arena.allocate(None, size).unwrap())
    .collect();
  assert_eq!(blocks[1].capacity(), 32);
  assert_eq!(blocks[3].capacity(), 16);

  for (i, x) in blocks.iter().enumerate() {
    for y in &blocks[i + 1..] {
      if !Arc::ptr_eq(x.memory(), y.memory()) {
        continue;
      }
      let apart = x.offset() + x.capacity() <= y.offset() || y.offset() + y.capacity() <= x.offset();
      assert!(apart, "{}+{} overlaps {}+{}", x.offset(), x.capacity(), y.offset(), y.capacity());
    }
  }

  for block in blocks {
    arena.free(block, None).unwrap();
  }
  arena.verify().unwrap();
}

#[test]
fn test_stale_chunk() {
  let arena = arena();
  let allocation = arena.allocate(None, PAGE).unwrap();
  let Origin::Pooled { chunk, handle } = allocation.origin() else {
    panic!("page allocations are pooled");
  };
  let forged = ChunkId::new(chunk.index(), chunk.generation() + 1);

  assert!(matches!(
    arena.free_chunk(forged, handle, SizeClass::Normal),
    Err(ArenaError::StaleChunk(_))
  ));
  arena.free(allocation, None).unwrap();
}

#[test]
fn test_double_free_is_reported() {
  let arena = arena();
  let keep = arena.allocate(None, PAGE).unwrap();
  let allocation = arena.allocate(None, PAGE).unwrap();
  let Origin::Pooled { chunk, handle } = allocation.origin() else {
    panic!("page allocations are pooled");
  };

  arena.free(allocation, None).unwrap();
  assert!(matches!(
    arena.free_chunk(chunk, handle, SizeClass::Normal),
    Err(ArenaError::Chunk(ChunkError::NotAllocated(_)))
  ));
  arena.free(keep, None).unwrap();
}

#[test]
fn test_metrics_counts() {
  let arena = arena();
  let tiny = arena.allocate(None, 10).unwrap();
  let small = arena.allocate(None, 600).unwrap();
  let normal = arena.allocate(None, 3 * PAGE).unwrap();

  let metrics = arena.metrics();
  assert_eq!(metrics.allocations().tiny(), 1);
  assert_eq!(metrics.allocations().small(), 1);
  assert_eq!(metrics.allocations().normal(), 1);
  assert_eq!(metrics.active_allocations(), 3);
  assert!(metrics.to_string().starts_with("Arena #0"));

  for allocation in [tiny, small, normal] {
    arena.free(allocation, None).unwrap();
  }
  assert_eq!(arena.metrics().active_allocations(), 0);
}

#[test]
fn test_random_sequences() {
  let arena = arena();
  let mut rng = StdRng::seed_from_u64(0x5eed);
  let mut live = Vec::new();

  for _ in 0..4000 {
    if live.is_empty() || rng.random_bool(0.55) {
      let req = match rng.random_range(0..3) {
        0 => rng.random_range(1..512),
        1 => rng.random_range(512..PAGE),
        _ => rng.random_range(PAGE..=64 * PAGE),
      };
      live.push(arena.allocate(None, req).unwrap());
    } else {
      let idx = rng.random_range(0..live.len());
      arena.free(live.swap_remove(idx), None).unwrap();
    }
  }
  arena.verify().unwrap();

  for allocation in live.drain(..) {
    arena.free(allocation, None).unwrap();
  }
  arena.verify().unwrap();
  assert_eq!(arena.metrics().active_allocations(), 0);
}

#[test]
fn test_cross_thread_free() {
  let arena = Arc::new(arena());

  let handles: Vec<_> = (0..4)
    .map(|_| {
      let arena = Arc::clone(&arena);
      thread::spawn(move || {
        (0..256)
          .map(|i| arena.allocate(None, 16 + (i % 64) * 16).unwrap())
          .collect::<Vec<_>>()
      })
    })
    .collect();

  let blocks: Vec<_> = handles
    .into_iter()
    .flat_map(|handle| handle.join().unwrap())
    .collect();
  assert_eq!(arena.metrics().active_allocations(), 1024);

  let mut blocks = blocks.into_iter();
  let workers: Vec<_> = (0..4)
    .map(|_| {
      let arena = Arc::clone(&arena);
      let batch: Vec<_> = blocks.by_ref().take(256).collect();
      thread::spawn(move || {
        for block in batch.into_iter().rev() {
          arena.free(block, None).unwrap();
        }
      })
    })
    .collect();
  for worker in workers {
    worker.join().unwrap();
  }

  assert_eq!(arena.metrics().active_allocations(), 0);
  arena.verify().unwrap();
}
