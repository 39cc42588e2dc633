use std::sync::{
  Arc,
  Weak,
};

thread_local! {
  static TOKEN: Arc<()> = Arc::new(());
}

/// Observes whether a thread is still running without keeping anything of it
/// alive.
///
/// The owning thread holds the only strong reference to its token. Once the
/// thread has exited (and its thread locals are gone) every observation
/// reports it dead. The weak side is never upgraded.
#[derive(Debug, Clone)]
pub struct Liveness {
  token: Weak<()>,
}

impl Liveness {
  /// Liveness of the calling thread, or `None` while it is tearing down.
  pub fn current() -> Option<Self> {
    TOKEN
      .try_with(|token| Self {
        token: Arc::downgrade(token),
      })
      .ok()
  }

  #[inline]
  pub fn is_alive(&self) -> bool {
    self.token.strong_count() > 0
  }

  /// Whether both observations belong to the same thread.
  pub fn same_thread(&self, other: &Liveness) -> bool {
    Weak::ptr_eq(&self.token, &other.token)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_current_thread_is_alive() {
    let live = Liveness::current().unwrap();
    assert!(live.is_alive());
    assert!(live.same_thread(&Liveness::current().unwrap()));
  }

  #[test]
  fn test_exited_thread_is_dead() {
    let live = std::thread::spawn(|| Liveness::current().unwrap())
      .join()
      .unwrap();

    assert!(!live.is_alive());
    assert!(!live.same_thread(&Liveness::current().unwrap()));
  }
}
