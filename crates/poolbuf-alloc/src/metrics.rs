use std::{
  fmt,
  sync::atomic::{
    AtomicUsize,
    Ordering,
  },
};

use getset::{
  CopyGetters,
  Getters,
};

use crate::{
  chunk_list::ListKind,
  classes::SizeClass,
};

/// Per size class tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct ClassCounts {
  tiny: usize,
  small: usize,
  normal: usize,
  huge: usize,
}

impl ClassCounts {
  pub fn get(&self, class: SizeClass) -> usize {
    match class {
      SizeClass::Tiny => self.tiny,
      SizeClass::Small => self.small,
      SizeClass::Normal => self.normal,
      SizeClass::Huge => self.huge,
    }
  }

  pub fn total(&self) -> usize {
    self.tiny + self.small + self.normal + self.huge
  }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicClassCounts {
  tiny: AtomicUsize,
  small: AtomicUsize,
  normal: AtomicUsize,
  huge: AtomicUsize,
}

impl AtomicClassCounts {
  #[inline]
  pub(crate) fn incr(&self, class: SizeClass) {
    let counter = match class {
      SizeClass::Tiny => &self.tiny,
      SizeClass::Small => &self.small,
      SizeClass::Normal => &self.normal,
      SizeClass::Huge => &self.huge,
    };
    counter.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn snapshot(&self) -> ClassCounts {
    ClassCounts {
      tiny: self.tiny.load(Ordering::Relaxed),
      small: self.small.load(Ordering::Relaxed),
      normal: self.normal.load(Ordering::Relaxed),
      huge: self.huge.load(Ordering::Relaxed),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct ChunkMetrics {
  usage: i32,
  chunk_size: usize,
  free_bytes: usize,
}

impl ChunkMetrics {
  pub(crate) fn new(usage: i32, chunk_size: usize, free_bytes: usize) -> Self {
    Self {
      usage,
      chunk_size,
      free_bytes,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct ChunkListMetrics {
  #[getset(get_copy = "pub")]
  kind: ListKind,
  #[getset(get_copy = "pub")]
  min_usage: i32,
  #[getset(get_copy = "pub")]
  max_usage: i32,
  #[getset(get = "pub")]
  chunks: Vec<ChunkMetrics>,
}

impl ChunkListMetrics {
  pub(crate) fn new(kind: ListKind, chunks: Vec<ChunkMetrics>) -> Self {
    Self {
      kind,
      min_usage: kind.min_usage().max(1),
      max_usage: kind.max_usage().min(100),
      chunks,
    }
  }
}

impl fmt::Display for ChunkListMetrics {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.chunks.is_empty() {
      return write!(f, "{}: none", self.kind);
    }

    write!(f, "{}:", self.kind)?;
    for chunk in &self.chunks {
      write!(
        f,
        " Chunk({}%, {}/{})",
        chunk.usage,
        chunk.chunk_size - chunk.free_bytes,
        chunk.chunk_size
      )?;
    }
    Ok(())
  }
}

/// Point in time view of one arena.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct ArenaMetrics {
  #[getset(get_copy = "pub")]
  index: usize,
  #[getset(get_copy = "pub")]
  num_thread_caches: usize,
  #[getset(get_copy = "pub")]
  allocations: ClassCounts,
  #[getset(get_copy = "pub")]
  deallocations: ClassCounts,
  #[getset(get_copy = "pub")]
  active_huge_bytes: usize,
  #[getset(get = "pub")]
  chunk_lists: Vec<ChunkListMetrics>,
  #[getset(get_copy = "pub")]
  tiny_subpages: usize,
  #[getset(get_copy = "pub")]
  small_subpages: usize,
}

impl ArenaMetrics {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    index: usize,
    num_thread_caches: usize,
    allocations: ClassCounts,
    deallocations: ClassCounts,
    active_huge_bytes: usize,
    chunk_lists: Vec<ChunkListMetrics>,
    tiny_subpages: usize,
    small_subpages: usize,
  ) -> Self {
    Self {
      index,
      num_thread_caches,
      allocations,
      deallocations,
      active_huge_bytes,
      chunk_lists,
      tiny_subpages,
      small_subpages,
    }
  }

  /// Blocks handed out by the arena itself and not yet returned to it.
  /// Blocks parked in a thread cache still count as active.
  pub fn active_allocations(&self) -> usize {
    self.allocations.total().saturating_sub(self.deallocations.total())
  }

  pub fn num_chunks(&self) -> usize {
    self.chunk_lists.iter().map(|list| list.chunks.len()).sum()
  }

  /// Bytes currently carved out of pooled chunks.
  pub fn active_pooled_bytes(&self) -> usize {
    self
      .chunk_lists
      .iter()
      .flat_map(|list| list.chunks.iter())
      .map(|chunk| chunk.chunk_size - chunk.free_bytes)
      .sum()
  }

  pub fn list(&self, kind: ListKind) -> Option<&ChunkListMetrics> {
    self.chunk_lists.iter().find(|list| list.kind == kind)
  }
}

impl fmt::Display for ArenaMetrics {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "Arena #{}: {} thread caches, {} active allocations ({} huge bytes)",
      self.index,
      self.num_thread_caches,
      self.active_allocations(),
      self.active_huge_bytes
    )?;
    for list in &self.chunk_lists {
      writeln!(f, "  {}", list)?;
    }
    write!(
      f,
      "  subpages: {} tiny, {} small",
      self.tiny_subpages, self.small_subpages
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_class_counts() {
    let counts = AtomicClassCounts::default();
    counts.incr(SizeClass::Tiny);
    counts.incr(SizeClass::Tiny);
    counts.incr(SizeClass::Huge);

    let snapshot = counts.snapshot();
    assert_eq!(snapshot.get(SizeClass::Tiny), 2);
    assert_eq!(snapshot.get(SizeClass::Small), 0);
    assert_eq!(snapshot.huge(), 1);
    assert_eq!(snapshot.total(), 3);
  }

  #[test]
  fn test_list_display() {
    let empty = ChunkListMetrics::new(ListKind::Q050, Vec::new());
    assert_eq!(empty.to_string(), "q050: none");

    let list = ChunkListMetrics::new(ListKind::Init, vec![ChunkMetrics::new(6, 1024, 960)]);
    assert_eq!(list.to_string(), "qInit: Chunk(6%, 64/1024)");
    assert_eq!(list.min_usage(), 1);
    assert_eq!(list.max_usage(), 25);
  }
}
