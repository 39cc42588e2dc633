use std::{
  cell::UnsafeCell,
  sync::{
    Arc,
    Weak,
    atomic::{
      AtomicUsize,
      Ordering,
    },
  },
};

use poolbuf_sync::Liveness;
use spin::Once;

use crate::{
  handle::Entry,
  stack::{
    Items,
    StackShared,
  },
};

/// Takes `space` out of `available` unless that would go negative.
pub(crate) fn reserve(available: &AtomicUsize, space: usize) -> bool {
  let mut current = available.load(Ordering::Relaxed);
  loop {
    if current < space {
      return false;
    }
    match available.compare_exchange_weak(current, current - space, Ordering::AcqRel, Ordering::Relaxed) {
      Ok(_) => return true,
      Err(actual) => current = actual,
    }
  }
}

/// Fixed block of slots filled by one foreign thread and drained by the
/// home thread.
///
/// Slots below `write` belong to the reader, slots at or above it to the
/// writer. The writer publishes a slot by storing `write` with release
/// ordering after filling it.
struct Link<T> {
  slots: Box<[UnsafeCell<Option<Entry<T>>>]>,
  write: AtomicUsize,
  next: Once<Arc<Link<T>>>,
}

unsafe impl<T: Send> Send for Link<T> {}
unsafe impl<T: Send> Sync for Link<T> {}

impl<T> Link<T> {
  fn new(capacity: usize) -> Arc<Self> {
    Arc::new(Self {
      slots: (0..capacity).map(|_| UnsafeCell::new(None)).collect(),
      write: AtomicUsize::new(0),
      next: Once::new(),
    })
  }

  #[inline(always)]
  fn capacity(&self) -> usize {
    self.slots.len()
  }
}

/// Producer half of a queue, kept by the foreign thread.
pub(crate) struct QueueWriter<T> {
  tail: Arc<Link<T>>,
  available: Arc<AtomicUsize>,
  home: Weak<StackShared<T>>,
}

impl<T> QueueWriter<T> {
  /// Opens a queue towards `home`, reserving its first link from the
  /// shared budget. `None` when the budget is spent.
  pub(crate) fn open(home: &Arc<StackShared<T>>, owner: Liveness, link_capacity: usize) -> Option<(Self, QueueReader<T>)> {
    if !reserve(home.available(), link_capacity) {
      return None;
    }

    let link = Link::new(link_capacity);
    let writer = Self {
      tail: Arc::clone(&link),
      available: Arc::clone(home.available()),
      home: Arc::downgrade(home),
    };
    let reader = QueueReader {
      head: link,
      read: 0,
      owner,
      available: Arc::clone(home.available()),
    };
    Some((writer, reader))
  }

  /// Appends `entry`. Drops it when the tail is full and no further link
  /// fits in the shared budget.
  pub(crate) fn add(&mut self, entry: Entry<T>) -> bool {
    let capacity = self.tail.capacity();
    let mut index = self.tail.write.load(Ordering::Relaxed);

    if index == capacity {
      if !reserve(&self.available, capacity) {
        return false;
      }
      let link = Link::new(capacity);
      self.tail.next.call_once(|| Arc::clone(&link));
      self.tail = link;
      index = 0;
    }

    // SAFETY: `index` is at or above the published write index, so the
    // reader never looks at this slot until the store below.
    unsafe { *self.tail.slots[index].get() = Some(entry) };
    self.tail.write.store(index + 1, Ordering::Release);
    true
  }

  pub(crate) fn home_alive(&self) -> bool {
    self.home.strong_count() > 0
  }
}

/// Consumer half of a queue, kept by the home stack.
pub(crate) struct QueueReader<T> {
  head: Arc<Link<T>>,
  read: usize,
  owner: Liveness,
  available: Arc<AtomicUsize>,
}

impl<T> QueueReader<T> {
  /// Whether the foreign thread feeding this queue still runs.
  #[inline]
  pub(crate) fn owner_alive(&self) -> bool {
    self.owner.is_alive()
  }

  fn advance(&mut self) -> bool {
    let Some(next) = self.head.next.get().cloned() else {
      return false;
    };
    self.available.fetch_add(self.head.capacity(), Ordering::AcqRel);
    self.head = next;
    self.read = 0;
    true
  }

  /// Moves one link's worth of published entries into `dst`. Returns `true`
  /// when at least one entry landed on the stack.
  pub(crate) fn transfer(&mut self, dst: &mut Items<T>) -> bool {
    if self.read == self.head.capacity() && !self.advance() {
      return false;
    }

    let start = self.read;
    let mut end = self.head.write.load(Ordering::Acquire);
    if start == end {
      return false;
    }

    let expected = dst.len() + (end - start);
    if expected > dst.capacity() {
      let actual = dst.increase_capacity(expected);
      end = end.min(start + actual.saturating_sub(dst.len()));
    }
    if start == end {
      return false;
    }

    let before = dst.len();
    for slot in &self.head.slots[start..end] {
      // SAFETY: slots below the acquired write index are complete and only
      // the reader touches them from now on.
      let Some(entry) = (unsafe { (*slot.get()).take() }) else {
        continue;
      };
      dst.push_transferred(entry);
    }

    self.read = end;
    if end == self.head.capacity() {
      self.advance();
    }
    dst.len() != before
  }

  /// Whether the writer published entries that were not read yet.
  pub(crate) fn has_pending(&self) -> bool {
    if self.read < self.head.write.load(Ordering::Acquire) {
      return true;
    }
    self.head.next.get().is_some()
  }
}

impl<T> Drop for QueueReader<T> {
  fn drop(&mut self) {
    let mut links = 1;
    let mut link = Arc::clone(&self.head);
    while let Some(next) = link.next.get().cloned() {
      links += 1;
      link = next;
    }
    self
      .available
      .fetch_add(links * self.head.capacity(), Ordering::AcqRel);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handle::Handle;

  fn entry(value: u32) -> Entry<u32> {
    Entry {
      value,
      handle: Handle::noop(),
    }
  }

  fn home(budget: usize) -> Arc<StackShared<u32>> {
    Arc::new(StackShared::new(0, budget))
  }

  fn drain(reader: &mut QueueReader<u32>, items: &mut Items<u32>) -> Vec<u32> {
    while reader.transfer(items) {}
    let mut out = Vec::new();
    while let Some(entry) = items.pop() {
      out.push(entry.value);
    }
    out.sort();
    out
  }

  #[test]
  fn test_reserve() {
    let available = AtomicUsize::new(20);
    assert!(reserve(&available, 16));
    assert!(!reserve(&available, 16));
    assert!(reserve(&available, 4));
    assert_eq!(available.load(Ordering::Relaxed), 0);
  }

  #[test]
  fn test_open_needs_budget() {
    let home = home(8);
    assert!(QueueWriter::open(&home, Liveness::current().unwrap(), 16).is_none());
  }

  #[test]
  fn test_links_chain_and_budget_returns() {
    let home = home(32);
    let (mut writer, mut reader) = QueueWriter::open(&home, Liveness::current().unwrap(), 16).unwrap();
    assert_eq!(home.available().load(Ordering::Relaxed), 16);

    for value in 0..40 {
      let kept = writer.add(entry(value));
      assert_eq!(kept, value < 32, "value {}", value);
    }
    assert_eq!(home.available().load(Ordering::Relaxed), 0);
    assert!(reader.has_pending());

    let mut items = Items::new(1024, 1024, 1);
    let values = drain(&mut reader, &mut items);
    assert_eq!(values, (0..32).collect::<Vec<_>>());

    // The first link was consumed and handed back; the tail link stays.
    assert_eq!(home.available().load(Ordering::Relaxed), 16);
    drop(reader);
    assert_eq!(home.available().load(Ordering::Relaxed), 32);
    assert!(writer.home_alive());
  }

  #[test]
  fn test_transfer_respects_stack_limit() {
    let home = home(64);
    let (mut writer, mut reader) = QueueWriter::open(&home, Liveness::current().unwrap(), 16).unwrap();
    for value in 0..10 {
      assert!(writer.add(entry(value)));
    }

    let mut items = Items::new(4, 4, 1);
    assert!(reader.transfer(&mut items));
    assert_eq!(items.len(), 4);
    assert!(!reader.transfer(&mut items));
    assert!(reader.has_pending());
  }

  #[test]
  fn test_writer_sees_dead_home() {
    let home = home(64);
    let (writer, reader) = QueueWriter::open(&home, Liveness::current().unwrap(), 16).unwrap();
    drop(reader);
    drop(home);
    assert!(!writer.home_alive());
  }
}
