use rand::{
  Rng,
  SeedableRng,
  rngs::StdRng,
};

use super::*;
use crate::handle::Origin;

const PAGE: usize = 8192;

fn sizes(max_order: usize) -> SizeClasses {
  SizeClasses::new(PAGE, max_order, 0)
}

fn chunk(max_order: usize) -> (Chunk, SubpagePools) {
  let sizes = sizes(max_order);
  let chunk = Chunk::new(SlabKey::new(0, 0), sizes).unwrap();
  (chunk, SubpagePools::new(&sizes))
}

fn handle_of(allocation: &Allocation) -> Handle {
  match allocation.origin() {
    Origin::Pooled { handle, .. } => handle,
    Origin::Unpooled => panic!("chunk allocations are pooled"),
  }
}

#[test]
fn test_fresh_chunk() {
  let (chunk, _) = chunk(11);
  assert_eq!(chunk.chunk_size(), 16 * 1024 * 1024);
  assert_eq!(chunk.free_bytes(), chunk.chunk_size());
  assert_eq!(chunk.usage(), 0);
  assert!(chunk.verify().is_ok());
  assert_eq!(chunk.to_string(), "Chunk(#0.0: 0%, 0/16777216)");
}

#[test]
fn test_fill_with_pages() {
  let (mut chunk, pools) = chunk(11);

  let mut offsets = Vec::with_capacity(2048);
  let mut handles = Vec::with_capacity(2048);
  for _ in 0..2048 {
    let allocation = chunk.allocate(PAGE, &pools).unwrap();
    assert_eq!(allocation.capacity(), PAGE);
    offsets.push(allocation.offset());
    handles.push(handle_of(&allocation));
  }

  offsets.sort_unstable();
  offsets.dedup();
  assert_eq!(offsets.len(), 2048);
  assert_eq!(offsets.last().copied(), Some(chunk.chunk_size() - PAGE));

  assert!(chunk.allocate(PAGE, &pools).is_none());
  assert!(chunk.allocate(16, &pools).is_none());
  assert_eq!(chunk.usage(), 100);
  assert!(chunk.verify().is_ok());

  for handle in handles {
    chunk.free(handle, &pools).unwrap();
  }
  assert_eq!(chunk.usage(), 0);
  assert_eq!(chunk.free_bytes(), chunk.chunk_size());
  assert!(chunk.verify().is_ok());
}

#[test]
fn test_buddies_merge() {
  let (mut chunk, pools) = chunk(4);

  let a = chunk.allocate(PAGE, &pools).unwrap();
  let b = chunk.allocate(PAGE, &pools).unwrap();
  assert_eq!(a.offset(), 0);
  assert_eq!(b.offset(), PAGE);

  chunk.free(handle_of(&a), &pools).unwrap();
  chunk.free(handle_of(&b), &pools).unwrap();

  // The whole chunk must be available as one run again.
  let whole = chunk.allocate(chunk.chunk_size(), &pools).unwrap();
  assert_eq!(whole.offset(), 0);
  assert_eq!(handle_of(&whole), Handle::run(1));
  assert_eq!(chunk.usage(), 100);
}

#[test]
fn test_usage_rounding() {
  let (mut chunk, pools) = chunk(11);

  for _ in 0..2047 {
    chunk.allocate(PAGE, &pools).unwrap();
  }
  // A single free page is well under one percent.
  assert_eq!(chunk.usage(), 99);
}

#[test]
fn test_double_free_run() {
  let (mut chunk, pools) = chunk(4);

  let run = chunk.allocate(4 * PAGE, &pools).unwrap();
  let handle = handle_of(&run);
  chunk.free(handle, &pools).unwrap();

  assert_eq!(chunk.free(handle, &pools), Err(ChunkError::NotAllocated(handle)));
  assert_eq!(
    chunk.free(Handle::run(0), &pools),
    Err(ChunkError::InvalidNode(0))
  );
  assert_eq!(
    chunk.free(Handle::run(1 << 10), &pools),
    Err(ChunkError::InvalidNode(1 << 10))
  );
  assert!(chunk.verify().is_ok());
}

#[test]
fn test_free_unallocated_parent() {
  let (mut chunk, pools) = chunk(4);

  let a = chunk.allocate(PAGE, &pools).unwrap();
  let b = chunk.allocate(PAGE, &pools).unwrap();

  // Node 8 covers both pages but was never handed out itself.
  assert_eq!(
    chunk.free(Handle::run(8), &pools),
    Err(ChunkError::NotAllocated(Handle::run(8)))
  );

  chunk.free(handle_of(&a), &pools).unwrap();
  chunk.free(handle_of(&b), &pools).unwrap();
  assert!(chunk.verify().is_ok());
}

#[test]
fn test_subpage_slots() {
  let (mut chunk, pools) = chunk(4);

  let first = chunk.allocate(16, &pools).unwrap();
  let handle = handle_of(&first);
  assert_eq!(handle.bitmap_idx(), Some(0));
  assert_eq!(first.capacity(), 16);
  assert_eq!(chunk.free_bytes(), chunk.chunk_size() - PAGE);

  // Later slots come straight from the pool.
  let second = pools.lock(1).unwrap().allocate().unwrap();
  assert_eq!(second.offset(), first.offset() + 16);

  chunk.free(handle_of(&second), &pools).unwrap();
  chunk.free(handle, &pools).unwrap();

  // The only subpage of its pool keeps its page.
  assert_eq!(chunk.free_bytes(), chunk.chunk_size() - PAGE);
  assert_eq!(pools.lock(1).unwrap().len(), 1);

  assert!(matches!(chunk.free(handle, &pools), Err(ChunkError::Slot { .. })));
  assert_eq!(
    chunk.free(Handle::run(handle.node()), &pools),
    Err(ChunkError::NotAllocated(Handle::run(handle.node())))
  );
}

#[test]
fn test_second_subpage_retires() {
  let (mut chunk, pools) = chunk(4);
  let pool = 32 + 2;

  // 2048 byte slots: four per page.
  let mut slots = Vec::new();
  for _ in 0..8 {
    let pooled = pools.lock(pool).unwrap().allocate();
    let allocation = match pooled {
      Some(allocation) => allocation,
      None => chunk.allocate(2048, &pools).unwrap(),
    };
    slots.push(handle_of(&allocation));
  }
  assert_eq!(pools.lock(pool).unwrap().len(), 2);
  assert_eq!(chunk.free_bytes(), chunk.chunk_size() - 2 * PAGE);

  for handle in &slots[4..] {
    chunk.free(*handle, &pools).unwrap();
  }
  assert_eq!(pools.lock(pool).unwrap().len(), 2);

  for handle in &slots[..4] {
    chunk.free(*handle, &pools).unwrap();
  }
  assert_eq!(pools.lock(pool).unwrap().len(), 1);
  assert_eq!(chunk.free_bytes(), chunk.chunk_size() - PAGE);
  assert!(chunk.verify().is_ok());
}

#[test]
fn test_random_sequences_keep_invariant() {
  let (mut chunk, pools) = chunk(8);
  let mut rng = StdRng::seed_from_u64(0x5eed);
  let mut live: Vec<Handle> = Vec::new();

  for _ in 0..4000 {
    if live.is_empty() || rng.random_bool(0.55) {
      let norm = PAGE << rng.random_range(0..5);
      if let Some(allocation) = chunk.allocate(norm, &pools) {
        live.push(handle_of(&allocation));
      }
    } else {
      let index = rng.random_range(0..live.len());
      let handle = live.swap_remove(index);
      chunk.free(handle, &pools).unwrap();
    }
    assert!(chunk.verify().is_ok());
  }

  for handle in live.drain(..) {
    chunk.free(handle, &pools).unwrap();
  }
  assert_eq!(chunk.free_bytes(), chunk.chunk_size());
  assert!(chunk.verify().is_ok());
}
