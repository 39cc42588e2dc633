use core::{
  fmt,
  ptr::NonNull,
};

#[cfg(any(target_os = "linux", target_os = "macos"))]
use crate::unix::UNIX_SYSTEM;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
  Unsupported,
  OutOfMemory,
  InvalidArgument,
}

impl fmt::Display for SysError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SysError::Unsupported => write!(f, "system memory mapping is not supported"),
      SysError::OutOfMemory => write!(f, "the system refused to map more memory"),
      SysError::InvalidArgument => write!(f, "invalid argument passed to the system"),
    }
  }
}

pub type SysResult<T> = Result<T, SysError>;

/// Low-level source of page-granular memory.
///
/// # Safety
///
/// Implementors must ensure that:
/// - `map` returns readable and writable memory of exactly `size` bytes
/// - `unmap` only operates on memory previously mapped by this system
/// - memory is never handed out twice while still mapped
pub unsafe trait System
where
  Self: Send + Sync,
{
  /// Maps `size` bytes of zeroed memory.
  ///
  /// # Safety
  ///
  /// `size` must be a non-zero multiple of the OS page size.
  unsafe fn map(&self, size: usize) -> SysResult<NonNull<u8>> {
    _ = size;
    Err(SysError::Unsupported)
  }

  /// Unmaps memory previously obtained from [`System::map`].
  ///
  /// # Safety
  ///
  /// `ptr` and `size` must describe exactly one live mapping of this system,
  /// and the memory must not be accessed afterwards.
  unsafe fn unmap(&self, ptr: NonNull<u8>, size: usize) -> SysResult<()> {
    _ = (ptr, size);
    Err(SysError::Unsupported)
  }
}

pub struct UnsupportedSystem {}
unsafe impl System for UnsupportedSystem {}

#[cfg(any(target_os = "linux", target_os = "macos"))]
pub static GLOBAL_SYSTEM: &dyn System = &UNIX_SYSTEM;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub static GLOBAL_SYSTEM: &dyn System = &UnsupportedSystem {};
