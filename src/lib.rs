//! Pooled byte buffers and recyclable objects.
//!
//! [`PooledAllocator`] hands out [`PooledBuffer`]s carved from per arena
//! chunks, fronted by one cache per thread. [`Recycler`] keeps finished
//! objects around for reuse on the thread that created them.

pub use poolbuf_alloc as alloc;
pub use poolbuf_recycler as recycler;
pub use poolbuf_sync as sync;

pub use poolbuf_alloc::{
  PoolConfig,
  PooledAllocator,
  PooledBuffer,
};
pub use poolbuf_recycler::{
  Pooled,
  Recycler,
  RecyclerConfig,
};

pub mod prelude {
  pub use poolbuf_alloc::prelude::*;
  pub use poolbuf_recycler::prelude::{
    Handle,
    Pooled,
    RecycleError,
    RecycleResult,
    Recycler,
    RecyclerConfig,
  };
}
