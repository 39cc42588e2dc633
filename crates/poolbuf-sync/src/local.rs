use std::{
  any::Any,
  cell::RefCell,
  collections::HashMap,
  marker::PhantomData,
  mem,
  sync::atomic::{
    AtomicUsize,
    Ordering,
  },
};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

enum Slot {
  Present(Box<dyn Any>),
  /// The value is out on loan to a running `with` call.
  Borrowed,
}

#[derive(Default)]
struct Registry {
  slots: HashMap<usize, Slot>,
}

impl Drop for Registry {
  fn drop(&mut self) {
    // Values may reach for other thread locals while dropping. The registry
    // is already gone at that point, so those lookups see `None`.
    for (_, slot) in self.slots.drain() {
      drop(slot);
    }
  }
}

thread_local! {
  static REGISTRY: RefCell<Registry> = RefCell::new(Registry::default());
}

enum Taken {
  Present(Box<dyn Any>),
  Vacant,
  Borrowed,
}

/// Per-instance thread local storage.
///
/// Unlike `thread_local!`, every `ThreadLocal` value owns a separate slot on
/// each thread, so two allocators never share their per-thread state. Slots
/// are dropped when their thread exits. Dropping the `ThreadLocal` itself
/// only clears the calling thread's slot; slots on other threads stay until
/// those threads exit.
pub struct ThreadLocal<T, F = fn() -> T> {
  id: usize,
  init: F,
  _marker: PhantomData<fn() -> T>,
}

impl<T, F> ThreadLocal<T, F>
where
  T: 'static,
  F: Fn() -> T,
{
  pub fn new(init: F) -> Self {
    Self {
      id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
      init,
      _marker: PhantomData,
    }
  }

  /// Lends this thread's value out, leaving a marker in its place. `None`
  /// when the registry is gone or borrowed itself.
  fn take(&self) -> Option<Taken> {
    REGISTRY
      .try_with(|registry| {
        let mut registry = registry.try_borrow_mut().ok()?;
        let taken = match registry.slots.get_mut(&self.id) {
          Some(slot) => match mem::replace(slot, Slot::Borrowed) {
            Slot::Present(value) => Taken::Present(value),
            Slot::Borrowed => Taken::Borrowed,
          },
          None => Taken::Vacant,
        };
        Some(taken)
      })
      .ok()
      .flatten()
  }

  /// Reserves a vacant slot while its value is being created.
  fn mark(&self) -> bool {
    REGISTRY
      .try_with(|registry| match registry.try_borrow_mut() {
        Ok(mut registry) => {
          registry.slots.insert(self.id, Slot::Borrowed);
          true
        }
        Err(_) => false,
      })
      .unwrap_or(false)
  }

  /// Returns a lent value. The box is the one `take` handed out, so the
  /// value keeps its address across calls.
  fn put(&self, value: Box<dyn Any>) {
    let rejected = REGISTRY.try_with(|registry| match registry.try_borrow_mut() {
      Ok(mut registry) => {
        registry.slots.insert(self.id, Slot::Present(value));
        None
      }
      Err(_) => Some(value),
    });

    if let Ok(Some(value)) = rejected {
      drop(value);
    }
  }

  fn run<R>(&self, mut value: Box<dyn Any>, f: impl FnOnce(&mut T) -> R) -> Option<R> {
    let result = value.downcast_mut::<T>().map(f);
    self.put(value);
    result
  }

  /// Runs `f` with this thread's value, creating it first if needed.
  ///
  /// Returns `None` when the thread is tearing down its locals or when the
  /// value is already lent to a call further up the stack. Other thread
  /// locals stay usable inside `f`.
  pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
    match self.take()? {
      Taken::Present(value) => self.run(value, f),
      Taken::Vacant => {
        if !self.mark() {
          return None;
        }
        self.run(Box::new((self.init)()), f)
      }
      Taken::Borrowed => None,
    }
  }

  /// Like [`ThreadLocal::with`] but never creates the value.
  pub fn with_existing<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
    match self.take()? {
      Taken::Present(value) => self.run(value, f),
      Taken::Vacant | Taken::Borrowed => None,
    }
  }

  /// Whether this thread holds a value, lent out or not.
  pub fn is_present(&self) -> bool {
    REGISTRY
      .try_with(|registry| {
        registry
          .try_borrow()
          .map(|registry| registry.slots.contains_key(&self.id))
          .unwrap_or(false)
      })
      .unwrap_or(false)
  }

  /// Whether a `with` call on this thread currently holds the value.
  pub fn is_borrowed(&self) -> bool {
    REGISTRY
      .try_with(|registry| {
        registry
          .try_borrow()
          .map(|registry| matches!(registry.slots.get(&self.id), Some(Slot::Borrowed)))
          .unwrap_or(false)
      })
      .unwrap_or(false)
  }

  /// Removes this thread's value and hands it back. A value that is lent
  /// out stays where it is.
  pub fn remove(&self) -> Option<T> {
    REGISTRY
      .try_with(|registry| {
        let mut registry = registry.try_borrow_mut().ok()?;
        if !matches!(registry.slots.get(&self.id), Some(Slot::Present(_))) {
          return None;
        }
        match registry.slots.remove(&self.id)? {
          Slot::Present(value) => value.downcast::<T>().ok().map(|value| *value),
          Slot::Borrowed => None,
        }
      })
      .ok()
      .flatten()
  }
}

impl<T, F> Drop for ThreadLocal<T, F> {
  fn drop(&mut self) {
    let id = self.id;
    let value = REGISTRY
      .try_with(|registry| registry.try_borrow_mut().ok()?.slots.remove(&id))
      .ok()
      .flatten();
    drop(value);
  }
}
