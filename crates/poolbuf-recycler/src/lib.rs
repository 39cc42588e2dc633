use std::{
  collections::HashMap,
  fmt,
  ops::{
    Deref,
    DerefMut,
  },
  sync::{
    Arc,
    Weak,
    atomic::{
      AtomicUsize,
      Ordering,
    },
  },
};

use poolbuf_sync::{
  Liveness,
  ThreadLocal,
};
use tracing::trace;

pub mod config;
pub mod handle;
mod queue;
mod stack;

pub use config::{
  ConfigError,
  ConfigResult,
  RecyclerConfig,
};
pub use handle::{
  Handle,
  RecycleError,
  RecycleResult,
};

use crate::{
  handle::Entry,
  queue::QueueWriter,
  stack::{
    Stack,
    StackShared,
  },
};

pub mod prelude {
  pub use super::{
    Pooled,
    Recycler,
    config::{
      ConfigError,
      RecyclerConfig,
    },
    handle::{
      Handle,
      RecycleError,
      RecycleResult,
    },
  };
}

static NEXT_RECYCLER: AtomicUsize = AtomicUsize::new(0);

/// What a foreign thread does with recycles bound for one home stack.
enum Delayed<T> {
  Queue(QueueWriter<T>),
  /// The thread hit its queue limit: recycles for this stack are dropped.
  Dropping(Weak<StackShared<T>>),
}

impl<T> Delayed<T> {
  fn home_alive(&self) -> bool {
    match self {
      Delayed::Queue(writer) => writer.home_alive(),
      Delayed::Dropping(home) => home.strong_count() > 0,
    }
  }
}

type StackInit<T> = Box<dyn Fn() -> Stack<T> + Send + Sync>;
type DelayedMap<T> = HashMap<usize, Delayed<T>>;

struct Shared<T> {
  id: usize,
  config: RecyclerConfig,
  factory: Box<dyn Fn() -> T + Send + Sync>,
  stacks: ThreadLocal<Stack<T>, StackInit<T>>,
  delayed: ThreadLocal<DelayedMap<T>>,
}

/// A pool of reusable objects with one stack per thread.
///
/// Objects recycled on the thread that created them go straight back onto
/// its stack. Objects recycled elsewhere travel through a per thread queue
/// and become visible to the home thread the next time its stack runs dry.
pub struct Recycler<T> {
  shared: Arc<Shared<T>>,
}

impl<T> Clone for Recycler<T> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T> Recycler<T>
where
  T: Send + 'static,
{
  /// Uses the process wide [`RecyclerConfig::global`] limits.
  pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
    Self::build(*RecyclerConfig::global(), factory)
  }

  pub fn with_config(config: RecyclerConfig, factory: impl Fn() -> T + Send + Sync + 'static) -> ConfigResult<Self> {
    config.validate()?;
    Ok(Self::build(config, factory))
  }

  fn build(config: RecyclerConfig, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
    let init: StackInit<T> = Box::new(move || Stack::new(&config));
    Self {
      shared: Arc::new(Shared {
        id: NEXT_RECYCLER.fetch_add(1, Ordering::Relaxed),
        config,
        factory: Box::new(factory),
        stacks: ThreadLocal::new(init),
        delayed: ThreadLocal::new(HashMap::new),
      }),
    }
  }

  #[inline(always)]
  pub fn config(&self) -> &RecyclerConfig {
    &self.shared.config
  }

  /// Hands out a recycled object, or a fresh one when the calling thread
  /// has none left.
  pub fn get(&self) -> Pooled<T> {
    if self.shared.config.is_disabled() {
      return self.wrap((self.shared.factory)(), Handle::noop());
    }

    let recycled = self.shared.stacks.with(|stack| {
      let home = Arc::downgrade(stack.shared());
      (stack.pop(), home)
    });

    match recycled {
      Some((Some(entry), _)) => {
        entry.handle.mark_in_use();
        self.wrap(entry.value, entry.handle)
      }
      Some((None, home)) => self.wrap((self.shared.factory)(), Handle::new(self.shared.id, home)),
      None => self.wrap((self.shared.factory)(), Handle::noop()),
    }
  }

  fn wrap(&self, value: T, handle: Handle<T>) -> Pooled<T> {
    Pooled {
      value: Some(value),
      handle,
      recycler: self.clone(),
    }
  }

  /// Gives `value` back to the stack `handle` belongs to.
  ///
  /// `Ok(true)` means the object was kept for reuse. Objects may be dropped
  /// instead when a limit is hit, their home thread is gone, or the handle
  /// is a no-op one.
  pub fn recycle(&self, value: T, handle: &Handle<T>) -> RecycleResult<bool> {
    let Some(recycler) = handle.recycler() else {
      return Ok(false);
    };
    if recycler != self.shared.id {
      return Err(RecycleError::ForeignHandle);
    }
    handle.mark_recycled()?;

    let Some(home) = handle.home() else {
      return Ok(false);
    };

    let mut entry = Some(Entry {
      value,
      handle: handle.clone(),
    });
    let pushed = self
      .shared
      .stacks
      .with_existing(|stack| {
        if !Arc::ptr_eq(stack.shared(), &home) {
          return None;
        }
        entry.take().map(|entry| stack.push(entry))
      })
      .flatten();

    if let Some(pushed) = pushed {
      return Ok(pushed);
    }
    if home.is_home_thread() {
      // The stack is lent to a call further up, e.g. a value dropped while
      // pushing recycles another one.
      trace!(stack = home.id(), "dropping recycle during stack access");
      return Ok(false);
    }
    match entry.take() {
      Some(entry) => Ok(self.push_later(entry, &home)),
      None => Ok(false),
    }
  }

  fn push_later(&self, entry: Entry<T>, home: &Arc<StackShared<T>>) -> bool {
    let config = self.shared.config;
    self
      .shared
      .delayed
      .with(|delayed| {
        if let Some(slot) = delayed.get_mut(&home.id()) {
          return match slot {
            Delayed::Queue(writer) => writer.add(entry),
            Delayed::Dropping(_) => false,
          };
        }

        if delayed.len() >= config.max_delayed_queues_per_thread() {
          delayed.retain(|_, slot| slot.home_alive());
        }
        if delayed.len() >= config.max_delayed_queues_per_thread() {
          delayed.insert(home.id(), Delayed::Dropping(Arc::downgrade(home)));
          return false;
        }

        let Some(owner) = Liveness::current() else {
          return false;
        };
        let Some((mut writer, reader)) = QueueWriter::open(home, owner, config.link_capacity()) else {
          return false;
        };
        home.register(reader);
        let kept = writer.add(entry);
        delayed.insert(home.id(), Delayed::Queue(writer));
        kept
      })
      .unwrap_or(false)
  }

  /// Capacity the calling thread's stack has grown to.
  pub fn thread_local_capacity(&self) -> usize {
    self.shared.stacks.with(|stack| stack.capacity()).unwrap_or(0)
  }

  /// Objects waiting on the calling thread's stack.
  pub fn thread_local_size(&self) -> usize {
    self.shared.stacks.with(|stack| stack.len()).unwrap_or(0)
  }

  /// Foreign queues known to the calling thread's stack.
  pub fn thread_local_queues(&self) -> usize {
    self.shared.stacks.with(|stack| stack.num_queues()).unwrap_or(0)
  }

  /// Pulls whatever other threads handed back since the last look.
  pub fn scavenge(&self) -> bool {
    self.shared.stacks.with(Stack::scavenge).unwrap_or(false)
  }
}

impl<T> fmt::Debug for Recycler<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Recycler")
      .field("id", &self.shared.id)
      .field("config", &self.shared.config)
      .finish()
  }
}

/// An object on loan from a [`Recycler`]. Dropping it recycles it.
pub struct Pooled<T>
where
  T: Send + 'static,
{
  value: Option<T>,
  handle: Handle<T>,
  recycler: Recycler<T>,
}

impl<T> Pooled<T>
where
  T: Send + 'static,
{
  #[inline(always)]
  pub fn handle(&self) -> &Handle<T> {
    &self.handle
  }

  pub fn recycle(mut self) -> RecycleResult<bool> {
    match self.value.take() {
      Some(value) => self.recycler.recycle(value, &self.handle),
      None => Err(RecycleError::RecycledAlready),
    }
  }

  /// Detaches the object from automatic recycling. Hand both parts to
  /// [`Recycler::recycle`] to return it.
  pub fn into_parts(mut self) -> (T, Handle<T>) {
    let handle = self.handle.clone();
    match self.value.take() {
      Some(value) => (value, handle),
      // `value` is only taken by consuming methods.
      None => unreachable!("pooled value already taken"),
    }
  }
}

impl<T> Deref for Pooled<T>
where
  T: Send + 'static,
{
  type Target = T;

  fn deref(&self) -> &T {
    match self.value.as_ref() {
      Some(value) => value,
      None => unreachable!("pooled value already taken"),
    }
  }
}

impl<T> DerefMut for Pooled<T>
where
  T: Send + 'static,
{
  fn deref_mut(&mut self) -> &mut T {
    match self.value.as_mut() {
      Some(value) => value,
      None => unreachable!("pooled value already taken"),
    }
  }
}

impl<T> Drop for Pooled<T>
where
  T: Send + 'static,
{
  fn drop(&mut self) {
    if let Some(value) = self.value.take() {
      let _ = self.recycler.recycle(value, &self.handle);
    }
  }
}

impl<T> fmt::Debug for Pooled<T>
where
  T: Send + fmt::Debug + 'static,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Pooled")
      .field("value", &self.value)
      .field("handle", &self.handle)
      .finish()
  }
}
