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

pub const MIN_LINK_CAPACITY: usize = 16;

pub const ENV_MAX_CAPACITY_PER_THREAD: &str = "POOLBUF_RECYCLER_MAX_CAPACITY_PER_THREAD";
pub const ENV_MAX_SHARED_CAPACITY_FACTOR: &str = "POOLBUF_RECYCLER_MAX_SHARED_CAPACITY_FACTOR";
pub const ENV_RATIO: &str = "POOLBUF_RECYCLER_RATIO";
pub const ENV_MAX_DELAYED_QUEUES_PER_THREAD: &str = "POOLBUF_RECYCLER_MAX_DELAYED_QUEUES_PER_THREAD";
pub const ENV_LINK_CAPACITY: &str = "POOLBUF_RECYCLER_LINK_CAPACITY";

static GLOBAL: Lazy<RecyclerConfig> = Lazy::new(RecyclerConfig::resolve);

/// Limits of a [`crate::Recycler`]. A zero `max_capacity_per_thread` turns
/// pooling off entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct RecyclerConfig {
  max_capacity_per_thread: usize,
  max_shared_capacity_factor: usize,
  ratio: usize,
  max_delayed_queues_per_thread: usize,
  link_capacity: usize,
}

impl Default for RecyclerConfig {
  fn default() -> Self {
    let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    Self {
      max_capacity_per_thread: 4096,
      max_shared_capacity_factor: 2,
      ratio: 8,
      max_delayed_queues_per_thread: cores * 2,
      link_capacity: MIN_LINK_CAPACITY,
    }
  }
}

impl RecyclerConfig {
  pub fn global() -> &'static RecyclerConfig {
    &GLOBAL
  }

  fn resolve() -> RecyclerConfig {
    let config = match RecyclerConfig::from_env() {
      Ok(config) => config,
      Err(err) => {
        warn!("ignoring recycler configuration from the environment: {}", err);
        RecyclerConfig::default()
      }
    };

    if config.is_disabled() {
      debug!("recycler pooling disabled");
    } else {
      debug!(
        max_capacity_per_thread = config.max_capacity_per_thread,
        max_shared_capacity_factor = config.max_shared_capacity_factor,
        ratio = config.ratio,
        max_delayed_queues_per_thread = config.max_delayed_queues_per_thread,
        link_capacity = config.link_capacity,
        "resolved recycler configuration"
      );
    }
    config
  }

  pub fn from_env() -> ConfigResult<RecyclerConfig> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<RecyclerConfig> {
    let mut config = RecyclerConfig::default();

    if let Some(v) = parse_var(&lookup, ENV_MAX_CAPACITY_PER_THREAD)? {
      config.max_capacity_per_thread = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_MAX_SHARED_CAPACITY_FACTOR)? {
      config.max_shared_capacity_factor = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_RATIO)? {
      config.ratio = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_MAX_DELAYED_QUEUES_PER_THREAD)? {
      config.max_delayed_queues_per_thread = v;
    }
    if let Some(v) = parse_var(&lookup, ENV_LINK_CAPACITY)? {
      config.link_capacity = v;
    }

    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> ConfigResult<()> {
    if self.ratio == 0 || !self.ratio.is_power_of_two() {
      return Err(ConfigError::OutOfRange {
        key: ENV_RATIO,
        value: self.ratio,
        reason: "expected a positive power of two",
      });
    }

    if self.max_shared_capacity_factor == 0 {
      return Err(ConfigError::OutOfRange {
        key: ENV_MAX_SHARED_CAPACITY_FACTOR,
        value: 0,
        reason: "expected at least 1",
      });
    }

    if self.link_capacity < MIN_LINK_CAPACITY || !self.link_capacity.is_power_of_two() {
      return Err(ConfigError::OutOfRange {
        key: ENV_LINK_CAPACITY,
        value: self.link_capacity,
        reason: "expected a power of two of at least 16",
      });
    }

    Ok(())
  }

  #[inline(always)]
  pub fn is_disabled(&self) -> bool {
    self.max_capacity_per_thread == 0
  }

  /// Budget foreign threads share for handing objects back to one stack.
  pub fn shared_capacity(&self) -> usize {
    (self.max_capacity_per_thread / self.max_shared_capacity_factor.max(1)).max(self.link_capacity)
  }

  pub fn initial_capacity(&self) -> usize {
    self.max_capacity_per_thread.min(256)
  }

  pub fn with_max_capacity_per_thread(mut self, capacity: usize) -> Self {
    self.max_capacity_per_thread = capacity;
    self
  }

  pub fn with_max_shared_capacity_factor(mut self, factor: usize) -> Self {
    self.max_shared_capacity_factor = factor;
    self
  }

  pub fn with_ratio(mut self, ratio: usize) -> Self {
    self.ratio = ratio;
    self
  }

  pub fn with_max_delayed_queues_per_thread(mut self, queues: usize) -> Self {
    self.max_delayed_queues_per_thread = queues;
    self
  }

  pub fn with_link_capacity(mut self, capacity: usize) -> Self {
    self.link_capacity = capacity;
    self
  }
}
