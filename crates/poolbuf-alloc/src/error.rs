use std::{
  error::Error,
  fmt,
};

use poolbuf_bitmap::BitmapError;
use poolbuf_sys::region::RegionError;

use crate::{
  config::ConfigError,
  handle::{
    ChunkId,
    Handle,
  },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
  InvalidNode(u32),
  NotAllocated(Handle),
  NoSubpage(Handle),
  Slot { handle: Handle, source: BitmapError },
  Corrupted { node: usize, expected: usize, found: usize },
}

impl fmt::Display for ChunkError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ChunkError::InvalidNode(node) => write!(f, "node {} is not part of the chunk tree", node),
      ChunkError::NotAllocated(handle) => write!(f, "handle {} is not allocated", handle),
      ChunkError::NoSubpage(handle) => write!(f, "handle {} points at a leaf without a subpage", handle),
      ChunkError::Slot { handle, source } => write!(f, "slot of handle {}: {}", handle, source),
      ChunkError::Corrupted {
        node,
        expected,
        found,
      } => write!(f, "tree node {} holds {} but {} was expected", node, found, expected),
    }
  }
}

impl Error for ChunkError {}

pub type ChunkResult<T> = Result<T, ChunkError>;

#[derive(Debug)]
pub enum ArenaError {
  StaleChunk(ChunkId),
  Chunk(ChunkError),
  Region(RegionError),
  Exhausted(usize),
}

impl fmt::Display for ArenaError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ArenaError::StaleChunk(id) => {
        write!(f, "chunk #{}.{} no longer exists", id.index(), id.generation())
      }
      ArenaError::Chunk(err) => write!(f, "{}", err),
      ArenaError::Region(err) => write!(f, "memory region: {}", err),
      ArenaError::Exhausted(norm) => write!(f, "a fresh chunk could not serve {} bytes", norm),
    }
  }
}

impl Error for ArenaError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      ArenaError::Chunk(err) => Some(err),
      _ => None,
    }
  }
}

impl From<ChunkError> for ArenaError {
  fn from(err: ChunkError) -> Self {
    ArenaError::Chunk(err)
  }
}

pub type ArenaResult<T> = Result<T, ArenaError>;

#[derive(Debug)]
pub enum AllocError {
  Capacity { requested: usize, max: usize },
  Arena(ArenaError),
  Config(ConfigError),
}

impl fmt::Display for AllocError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AllocError::Capacity { requested, max } => {
        write!(f, "requested capacity {} exceeds maximum {}", requested, max)
      }
      AllocError::Arena(err) => write!(f, "{}", err),
      AllocError::Config(err) => write!(f, "invalid configuration: {}", err),
    }
  }
}

impl Error for AllocError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      AllocError::Arena(err) => Some(err),
      AllocError::Config(err) => Some(err),
      _ => None,
    }
  }
}

impl From<ArenaError> for AllocError {
  fn from(err: ArenaError) -> Self {
    AllocError::Arena(err)
  }
}

impl From<ConfigError> for AllocError {
  fn from(err: ConfigError) -> Self {
    AllocError::Config(err)
  }
}

pub type AllocResult<T> = Result<T, AllocError>;

#[derive(Debug)]
pub enum BufferError {
  IllegalRefCount(usize),
  Released,
  OutOfBounds { offset: usize, len: usize, capacity: usize },
  ForeignAllocator,
  Alloc(AllocError),
}

impl fmt::Display for BufferError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BufferError::IllegalRefCount(cnt) => write!(f, "illegal reference count: {}", cnt),
      BufferError::Released => write!(f, "buffer was already released"),
      BufferError::OutOfBounds {
        offset,
        len,
        capacity,
      } => write!(f, "range {}..{} exceeds capacity {}", offset, offset + len, capacity),
      BufferError::ForeignAllocator => write!(f, "buffer belongs to another allocator"),
      BufferError::Alloc(err) => write!(f, "{}", err),
    }
  }
}

impl Error for BufferError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      BufferError::Alloc(err) => Some(err),
      _ => None,
    }
  }
}

impl From<AllocError> for BufferError {
  fn from(err: AllocError) -> Self {
    BufferError::Alloc(err)
  }
}

impl From<ArenaError> for BufferError {
  fn from(err: ArenaError) -> Self {
    BufferError::Alloc(AllocError::Arena(err))
  }
}

pub type BufferResult<T> = Result<T, BufferError>;
