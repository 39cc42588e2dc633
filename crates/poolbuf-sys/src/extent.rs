use core::{
  fmt,
  ops::Range,
  ptr::NonNull,
};

use crate::{
  GLOBAL_SYSTEM,
  prim::{
    PrimError,
    page_align,
  },
  system::SysError,
};

#[derive(Debug)]
pub enum ExtentError {
  SystemError(SysError),
  PrimError(PrimError),
  OutOfBounds,
}

impl fmt::Display for ExtentError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ExtentError::SystemError(err) => write!(f, "mapping failed: {}", err),
      ExtentError::PrimError(err) => write!(f, "invalid extent size: {:?}", err),
      ExtentError::OutOfBounds => write!(f, "range outside of extent"),
    }
  }
}

pub type ExtentResult<T> = Result<T, ExtentError>;

/// A page-aligned mapping obtained from [`GLOBAL_SYSTEM`], unmapped on drop.
pub struct Extent {
  ptr: NonNull<u8>,
  len: usize,
}

impl Extent {
  pub fn new(size: usize) -> ExtentResult<Extent> {
    if size == 0 {
      return Ok(Extent {
        ptr: NonNull::dangling(),
        len: 0,
      });
    }

    let len = page_align(size).map_err(ExtentError::PrimError)?;
    let ptr = unsafe { GLOBAL_SYSTEM.map(len) }.map_err(ExtentError::SystemError)?;

    Ok(Extent { ptr, len })
  }

  #[inline(always)]
  pub fn as_ptr(&self) -> NonNull<u8> {
    self.ptr
  }

  #[inline(always)]
  pub fn len(&self) -> usize {
    self.len
  }

  #[inline(always)]
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn check(&self, range: Range<usize>) -> ExtentResult<()> {
    if range.start > range.end || range.end > self.len {
      return Err(ExtentError::OutOfBounds);
    }
    Ok(())
  }
}

impl Drop for Extent {
  fn drop(&mut self) {
    if self.len == 0 {
      return;
    }
    let _ = unsafe { GLOBAL_SYSTEM.unmap(self.ptr, self.len) };
  }
}

unsafe impl Send for Extent {}
unsafe impl Sync for Extent {}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::prim::page_size;

  #[test]
  #[cfg(any(target_os = "linux", target_os = "macos"))]
  fn test_extent_new() {
    let ps = page_size();
    let extent = Extent::new(ps).unwrap();
    assert_eq!(extent.len(), ps);
  }

  #[test]
  #[cfg(any(target_os = "linux", target_os = "macos"))]
  fn test_extent_rounds_to_pages() {
    let ps = page_size();
    let extent = Extent::new(ps + 1).unwrap();
    assert_eq!(extent.len(), ps * 2);
  }

  #[test]
  fn test_extent_zero_size() {
    let extent = Extent::new(0).unwrap();
    assert!(extent.is_empty());
  }

  #[test]
  #[cfg(any(target_os = "linux", target_os = "macos"))]
  fn test_extent_check() {
    let ps = page_size();
    let extent = Extent::new(ps).unwrap();
    assert!(extent.check(0..ps).is_ok());
    assert!(extent.check(100..100).is_ok());
    assert!(matches!(extent.check(0..ps + 1), Err(ExtentError::OutOfBounds)));
    assert!(matches!(extent.check(100..50), Err(ExtentError::OutOfBounds)));
  }
}
