#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod extent;
pub mod math;
pub mod prim;
pub mod region;
pub mod system;
pub mod unix;

pub use system::GLOBAL_SYSTEM;

pub mod prelude {
  pub use super::{
    GLOBAL_SYSTEM,
    config::{
      ConfigError,
      ConfigResult,
    },
    extent::{
      Extent,
      ExtentError,
    },
    math::{
      align_up,
      is_aligned,
      log2,
      next_pow2,
    },
    prim::{
      is_page_aligned,
      page_align,
      page_size,
    },
    region::{
      Region,
      RegionError,
      RegionResult,
    },
    system::{
      SysError,
      SysResult,
      System,
    },
  };
}
