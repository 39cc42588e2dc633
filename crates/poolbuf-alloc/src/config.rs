use std::thread;

use getset::CopyGetters;
use poolbuf_sync::Lazy;
use poolbuf_sys::config::parse_var;
pub use poolbuf_sys::config::{
  ConfigError,
  ConfigResult,
};
use tracing::{
  debug,
  warn,
};

use crate::classes::{
  SizeClasses,
  TINY_QUANTUM,
};

pub const MIN_PAGE_SIZE: usize = 4096;
pub const MAX_ORDER: usize = 14;
pub const MAX_CHUNK_SIZE: usize = 1 << 30;

pub const ENV_PAGE_SIZE: &str = "POOLBUF_PAGE_SIZE";
pub const ENV_MAX_ORDER: &str = "POOLBUF_MAX_ORDER";
pub const ENV_NUM_ARENAS: &str = "POOLBUF_NUM_ARENAS";
pub const ENV_TINY_CACHE_SIZE: &str = "POOLBUF_TINY_CACHE_SIZE";
pub const ENV_SMALL_CACHE_SIZE: &str = "POOLBUF_SMALL_CACHE_SIZE";
pub const ENV_NORMAL_CACHE_SIZE: &str = "POOLBUF_NORMAL_CACHE_SIZE";
pub const ENV_MAX_CACHED_BUFFER_CAPACITY: &str = "POOLBUF_MAX_CACHED_BUFFER_CAPACITY";
pub const ENV_CACHE_TRIM_INTERVAL: &str = "POOLBUF_CACHE_TRIM_INTERVAL";
pub const ENV_ALIGNMENT: &str = "POOLBUF_ALIGNMENT";
pub const ENV_USE_THREAD_CACHE: &str = "POOLBUF_USE_THREAD_CACHE";

static GLOBAL: Lazy<PoolConfig> = Lazy::new(PoolConfig::resolve);

/// Tunables of a [`crate::PooledAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct PoolConfig {
  page_size: usize,
  max_order: usize,
  num_arenas: usize,
  tiny_cache_size: usize,
  small_cache_size: usize,
  normal_cache_size: usize,
  max_cached_buffer_capacity: usize,
  cache_trim_interval: usize,
  alignment: usize,
  use_thread_cache: bool,
}

impl Default for PoolConfig {
  fn default() -> Self {
    let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    Self {
      page_size: 8192,
      max_order: 11,
      num_arenas: cores * 2,
      tiny_cache_size: 512,
      small_cache_size: 256,
      normal_cache_size: 64,
      max_cached_buffer_capacity: 32 * 1024,
      cache_trim_interval: 8192,
      alignment: 0,
      use_thread_cache: true,
    }
  }
}

impl PoolConfig {
  /// Process wide defaults, read from the environment once.
  pub fn global() -> &'static PoolConfig {
    &GLOBAL
  }

  fn resolve() -> PoolConfig {
    let config = match PoolConfig::from_env() {
      Ok(config) => config,
      Err(err) => {
        warn!("ignoring pool configuration from the environment: {}", err);
        PoolConfig::default()
      }
    };

    debug!(
      page_size = config.page_size,
      max_order = config.max_order,
      chunk_size = config.chunk_size(),
      num_arenas = config.num_arenas,
      tiny_cache_size = config.tiny_cache_size,
      small_cache_size = config.small_cache_size,
      normal_cache_size = config.normal_cache_size,
      max_cached_buffer_capacity = config.max_cached_buffer_capacity,
      cache_trim_interval = config.cache_trim_interval,
      alignment = config.alignment,
      use_thread_cache = config.use_thread_cache,
      "resolved pool configuration"
    );
    config
  }

  pub fn from_env() -> ConfigResult<PoolConfig> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Builds a validated configuration from `lookup`, using defaults for
  /// every key it does not know.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<PoolConfig> {
    let mut config = PoolConfig::default();

    if let Some(v) = parse_var(&lookup, ENV_PAGE_SIZE)? {
      config.page_size = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_MAX_ORDER)? {
      config.max_order = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_NUM_ARENAS)? {
      config.num_arenas = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_TINY_CACHE_SIZE)? {
      config.tiny_cache_size = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_SMALL_CACHE_SIZE)? {
      config.small_cache_size = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_NORMAL_CACHE_SIZE)? {
      config.normal_cache_size = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_MAX_CACHED_BUFFER_CAPACITY)? {
      config.max_cached_buffer_capacity = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_CACHE_TRIM_INTERVAL)? {
      config.cache_trim_interval = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_ALIGNMENT)? {
      config.alignment = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_USE_THREAD_CACHE)? {
      config.use_thread_cache = v;
    }

    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> ConfigResult<()> {
    if self.page_size < MIN_PAGE_SIZE || !self.page_size.is_power_of_two() {
      return Err(ConfigError::OutOfRange {
        key: ENV_PAGE_SIZE,
        value: self.page_size,
        reason: "expected a power of two of at least 4096",
      });
    }

    if self.max_order > MAX_ORDER {
      return Err(ConfigError::OutOfRange {
        key: ENV_MAX_ORDER,
        value: self.max_order,
        reason: "expected at most 14",
      });
    }

    if self.page_size.checked_shl(self.max_order as u32).is_none_or(|size| size > MAX_CHUNK_SIZE) {
      return Err(ConfigError::OutOfRange {
        key: ENV_MAX_ORDER,
        value: self.max_order,
        reason: "chunk size would exceed 1 GiB",
      });
    }

    if self.num_arenas == 0 {
      return Err(ConfigError::OutOfRange {
        key: ENV_NUM_ARENAS,
        value: 0,
        reason: "at least one arena is required",
      });
    }

    if self.alignment != 0
      && (!self.alignment.is_power_of_two() || self.alignment < TINY_QUANTUM || self.alignment > self.page_size)
    {
      return Err(ConfigError::OutOfRange {
        key: ENV_ALIGNMENT,
        value: self.alignment,
        reason: "expected zero or a power of two between 16 and the page size",
      });
    }

    if self.cache_trim_interval == 0 {
      return Err(ConfigError::OutOfRange {
        key: ENV_CACHE_TRIM_INTERVAL,
        value: 0,
        reason: "expected a positive allocation count",
      });
    }

    Ok(())
  }

  #[inline(always)]
  pub fn chunk_size(&self) -> usize {
    self.page_size << self.max_order
  }

  pub fn size_classes(&self) -> SizeClasses {
    SizeClasses::new(self.page_size, self.max_order, self.alignment)
  }

  pub fn with_page_size(mut self, page_size: usize) -> Self {
    self.page_size = page_size;
    self
  }

  pub fn with_max_order(mut self, max_order: usize) -> Self {
    self.max_order = max_order;
    self
  }

  pub fn with_num_arenas(mut self, num_arenas: usize) -> Self {
    self.num_arenas = num_arenas;
    self
  }

  pub fn with_tiny_cache_size(mut self, size: usize) -> Self {
    self.tiny_cache_size = size;
    self
  }

  pub fn with_small_cache_size(mut self, size: usize) -> Self {
    self.small_cache_size = size;
    self
  }

  pub fn with_normal_cache_size(mut self, size: usize) -> Self {
    self.normal_cache_size = size;
    self
  }

  pub fn with_max_cached_buffer_capacity(mut self, capacity: usize) -> Self {
    self.max_cached_buffer_capacity = capacity;
    self
  }

  pub fn with_cache_trim_interval(mut self, interval: usize) -> Self {
    self.cache_trim_interval = interval;
    self
  }

  pub fn with_alignment(mut self, alignment: usize) -> Self {
    self.alignment = alignment;
    self
  }

  pub fn with_thread_cache(mut self, enabled: bool) -> Self {
    self.use_thread_cache = enabled;
    self
  }

  /// Same configuration with every thread cache queue sized to zero.
  pub fn without_cache(self) -> Self {
    self
      .with_thread_cache(false)
      .with_tiny_cache_size(0)
      .with_small_cache_size(0)
      .with_normal_cache_size(0)
  }
}
