pub mod allocator;
pub mod arena;
pub mod buffer;
pub mod chunk;
pub mod chunk_list;
pub mod classes;
pub mod config;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod subpage;
pub mod tcache;

pub use allocator::PooledAllocator;
pub use buffer::PooledBuffer;
pub use config::PoolConfig;

pub mod prelude {
  pub use super::{
    allocator::{
      MAX_CAPACITY,
      PooledAllocator,
    },
    buffer::PooledBuffer,
    classes::{
      SizeClass,
      SizeClasses,
    },
    config::{
      ConfigError,
      PoolConfig,
    },
    error::{
      AllocError,
      AllocResult,
      BufferError,
      BufferResult,
    },
    metrics::{
      ArenaMetrics,
      ChunkListMetrics,
      ClassCounts,
    },
  };
}
