use std::{
  error::Error,
  fmt,
  sync::{
    Arc,
    Weak,
    atomic::{
      AtomicBool,
      AtomicU8,
      Ordering,
    },
  },
};

use crate::stack::StackShared;

const IN_USE: u8 = 0;
const RECYCLED: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleError {
  RecycledAlready,
  ForeignHandle,
}

impl fmt::Display for RecycleError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RecycleError::RecycledAlready => write!(f, "recycled already"),
      RecycleError::ForeignHandle => write!(f, "handle belongs to another recycler"),
    }
  }
}

impl Error for RecycleError {}

pub type RecycleResult<T> = Result<T, RecycleError>;

pub(crate) struct HandleState<T> {
  recycler: usize,
  state: AtomicU8,
  kept_once: AtomicBool,
  home: Weak<StackShared<T>>,
}

/// Ties a pooled object to the stack of the thread that created it.
///
/// Clones share the same state: once any of them recycled the object, every
/// further recycle through any clone fails until the object is handed out
/// again.
pub struct Handle<T> {
  state: Option<Arc<HandleState<T>>>,
}

impl<T> Handle<T> {
  /// A handle that silently ignores every recycle.
  pub(crate) fn noop() -> Self {
    Self { state: None }
  }

  pub(crate) fn new(recycler: usize, home: Weak<StackShared<T>>) -> Self {
    Self {
      state: Some(Arc::new(HandleState {
        recycler,
        state: AtomicU8::new(IN_USE),
        kept_once: AtomicBool::new(false),
        home,
      })),
    }
  }

  #[inline(always)]
  pub fn is_noop(&self) -> bool {
    self.state.is_none()
  }

  pub fn is_recycled(&self) -> bool {
    self
      .state
      .as_ref()
      .is_some_and(|state| state.state.load(Ordering::Acquire) == RECYCLED)
  }

  pub(crate) fn recycler(&self) -> Option<usize> {
    self.state.as_ref().map(|state| state.recycler)
  }

  pub(crate) fn home(&self) -> Option<Arc<StackShared<T>>> {
    self.state.as_ref()?.home.upgrade()
  }

  /// `IN_USE -> RECYCLED`. Fails when another recycle got there first.
  pub(crate) fn mark_recycled(&self) -> RecycleResult<()> {
    let Some(state) = self.state.as_ref() else {
      return Ok(());
    };
    state
      .state
      .compare_exchange(IN_USE, RECYCLED, Ordering::AcqRel, Ordering::Acquire)
      .map(|_| ())
      .map_err(|_| RecycleError::RecycledAlready)
  }

  pub(crate) fn mark_in_use(&self) {
    if let Some(state) = self.state.as_ref() {
      state.state.store(IN_USE, Ordering::Release);
    }
  }

  /// Whether this handle already survived the ratio filter once. Only the
  /// home thread asks, so relaxed ordering is enough.
  pub(crate) fn kept_once(&self) -> bool {
    self
      .state
      .as_ref()
      .is_some_and(|state| state.kept_once.load(Ordering::Relaxed))
  }

  pub(crate) fn set_kept_once(&self) {
    if let Some(state) = self.state.as_ref() {
      state.kept_once.store(true, Ordering::Relaxed);
    }
  }
}

impl<T> Clone for Handle<T> {
  fn clone(&self) -> Self {
    Self {
      state: self.state.clone(),
    }
  }
}

impl<T> fmt::Debug for Handle<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Handle")
      .field("noop", &self.is_noop())
      .field("recycled", &self.is_recycled())
      .finish()
  }
}

/// A recycled object together with the handle that brings it home.
pub(crate) struct Entry<T> {
  pub(crate) value: T,
  pub(crate) handle: Handle<T>,
}
