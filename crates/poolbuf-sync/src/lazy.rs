use core::ops::Deref;

use spin::Once;

/// A value computed on first access and shared for the rest of the process.
pub struct Lazy<T, F = fn() -> T> {
  once: Once<T>,
  init: F,
}

impl<T, F> Lazy<T, F>
where
  F: Fn() -> T,
{
  pub const fn new(init: F) -> Self {
    Self {
      once: Once::new(),
      init,
    }
  }

  pub fn force(this: &Lazy<T, F>) -> &T {
    this.once.call_once(|| (this.init)())
  }

  pub fn get(this: &Lazy<T, F>) -> Option<&T> {
    this.once.get()
  }
}

impl<T, F> Deref for Lazy<T, F>
where
  F: Fn() -> T,
{
  type Target = T;

  fn deref(&self) -> &Self::Target {
    Self::force(self)
  }
}
