use std::sync::{
  Arc,
  atomic::{
    AtomicBool,
    AtomicUsize,
    Ordering,
  },
};

use poolbuf_sync::Liveness;
use spin::Mutex;
use tracing::trace;

use crate::{
  config::RecyclerConfig,
  handle::Entry,
  queue::QueueReader,
};

/// The parts of a stack foreign threads may reach.
pub(crate) struct StackShared<T> {
  id: usize,
  owner: Option<Liveness>,
  available: Arc<AtomicUsize>,
  pending: Mutex<Vec<QueueReader<T>>>,
  has_pending: AtomicBool,
}

impl<T> StackShared<T> {
  pub(crate) fn new(id: usize, shared_capacity: usize) -> Self {
    Self {
      id,
      owner: Liveness::current(),
      available: Arc::new(AtomicUsize::new(shared_capacity)),
      pending: Mutex::new(Vec::new()),
      has_pending: AtomicBool::new(false),
    }
  }

  #[inline(always)]
  pub(crate) fn id(&self) -> usize {
    self.id
  }

  /// Whether the calling thread is the one this stack lives on.
  pub(crate) fn is_home_thread(&self) -> bool {
    match (&self.owner, Liveness::current()) {
      (Some(owner), Some(current)) => owner.same_thread(&current),
      _ => false,
    }
  }

  #[inline(always)]
  pub(crate) fn available(&self) -> &Arc<AtomicUsize> {
    &self.available
  }

  /// Hands a freshly opened queue to the home thread.
  pub(crate) fn register(&self, reader: QueueReader<T>) {
    self.pending.lock().push(reader);
    self.has_pending.store(true, Ordering::Release);
  }

  fn take_pending(&self) -> Vec<QueueReader<T>> {
    if !self.has_pending.swap(false, Ordering::AcqRel) {
      return Vec::new();
    }
    std::mem::take(&mut *self.pending.lock())
  }
}

/// Recycled entries of the home thread, bounded by `max_capacity`.
///
/// `capacity` grows by doubling the way a growable array would, so it
/// reports how far the stack has expanded rather than what `Vec` reserved.
pub(crate) struct Items<T> {
  entries: Vec<Entry<T>>,
  capacity: usize,
  max_capacity: usize,
  ratio_mask: usize,
  recycle_count: usize,
}

impl<T> Items<T> {
  pub(crate) fn new(initial_capacity: usize, max_capacity: usize, ratio: usize) -> Self {
    let capacity = initial_capacity.min(max_capacity);
    Self {
      entries: Vec::with_capacity(capacity),
      capacity,
      max_capacity,
      ratio_mask: ratio.max(1).next_power_of_two() - 1,
      // Wraps to zero on the first recycle, so that one is always kept.
      recycle_count: usize::MAX,
    }
  }

  #[inline(always)]
  pub(crate) fn len(&self) -> usize {
    self.entries.len()
  }

  #[inline(always)]
  pub(crate) fn capacity(&self) -> usize {
    self.capacity
  }

  #[inline(always)]
  pub(crate) fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub(crate) fn pop(&mut self) -> Option<Entry<T>> {
    self.entries.pop()
  }

  /// Keeps one in `ratio` of the handles that were never recycled before.
  fn drop_handle(&mut self, entry: &Entry<T>) -> bool {
    if entry.handle.kept_once() {
      return false;
    }
    self.recycle_count = self.recycle_count.wrapping_add(1);
    if self.recycle_count & self.ratio_mask != 0 {
      return true;
    }
    entry.handle.set_kept_once();
    false
  }

  pub(crate) fn increase_capacity(&mut self, expected: usize) -> usize {
    let mut capacity = self.capacity.max(1);
    loop {
      capacity <<= 1;
      if capacity >= expected || capacity >= self.max_capacity {
        break;
      }
    }
    self.capacity = capacity.min(self.max_capacity);
    self.capacity
  }

  /// Pushes an entry recycled on the home thread.
  pub(crate) fn push(&mut self, entry: Entry<T>) -> bool {
    let size = self.entries.len();
    if size >= self.max_capacity || self.drop_handle(&entry) {
      return false;
    }
    if size == self.capacity {
      self.capacity = (size << 1).min(self.max_capacity);
    }
    self.entries.push(entry);
    true
  }

  /// Pushes an entry drained from a foreign queue. Room was made by
  /// [`Items::increase_capacity`] beforehand.
  pub(crate) fn push_transferred(&mut self, entry: Entry<T>) -> bool {
    if self.entries.len() >= self.capacity || self.drop_handle(&entry) {
      return false;
    }
    self.entries.push(entry);
    true
  }
}

/// Per thread pool of one recycler.
pub(crate) struct Stack<T> {
  shared: Arc<StackShared<T>>,
  items: Items<T>,
  queues: Vec<QueueReader<T>>,
  cursor: usize,
}

static NEXT_STACK: AtomicUsize = AtomicUsize::new(0);

impl<T> Stack<T> {
  pub(crate) fn new(config: &RecyclerConfig) -> Self {
    let id = NEXT_STACK.fetch_add(1, Ordering::Relaxed);
    Self {
      shared: Arc::new(StackShared::new(id, config.shared_capacity())),
      items: Items::new(
        config.initial_capacity(),
        config.max_capacity_per_thread(),
        config.ratio(),
      ),
      queues: Vec::new(),
      cursor: 0,
    }
  }

  #[inline(always)]
  pub(crate) fn shared(&self) -> &Arc<StackShared<T>> {
    &self.shared
  }

  pub(crate) fn len(&self) -> usize {
    self.items.len()
  }

  pub(crate) fn capacity(&self) -> usize {
    self.items.capacity()
  }

  pub(crate) fn num_queues(&self) -> usize {
    self.queues.len() + self.shared.pending.lock().len()
  }

  pub(crate) fn push(&mut self, entry: Entry<T>) -> bool {
    self.items.push(entry)
  }

  /// Pops a recycled entry, scavenging foreign queues when empty.
  pub(crate) fn pop(&mut self) -> Option<Entry<T>> {
    if self.items.is_empty() && !self.scavenge() {
      return None;
    }
    self.items.pop()
  }

  pub(crate) fn scavenge(&mut self) -> bool {
    self.queues.extend(self.shared.take_pending());
    if self.scavenge_some() {
      return true;
    }
    self.cursor = 0;
    false
  }

  /// Visits queues from the cursor on until one yields entries. Queues of
  /// exited threads are drained one last time and dropped.
  fn scavenge_some(&mut self) -> bool {
    if self.cursor >= self.queues.len() {
      self.cursor = 0;
    }

    let mut success = false;
    while self.cursor < self.queues.len() && !success {
      let queue = &mut self.queues[self.cursor];
      if queue.transfer(&mut self.items) {
        success = true;
        break;
      }

      if queue.owner_alive() {
        self.cursor += 1;
        continue;
      }

      if queue.has_pending() {
        while queue.transfer(&mut self.items) {
          success = true;
        }
      }
      self.queues.remove(self.cursor);
      trace!(stack = self.shared.id, "retired queue of an exited thread");
    }
    success
  }
}
