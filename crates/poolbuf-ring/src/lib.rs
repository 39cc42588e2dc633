#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{
  boxed::Box,
  vec::Vec,
};

#[derive(Debug, PartialEq, Eq)]
pub enum RingError<T> {
  Full(T),
}

/// Bounded FIFO with a capacity chosen at runtime.
///
/// Owned by a single thread, so there is no synchronization at all. A zero
/// capacity ring rejects every push.
#[derive(Debug)]
pub struct Ring<T> {
  buf: Box<[Option<T>]>,
  head: usize,
  tail: usize,
  len: usize,
}

impl<T> Ring<T> {
  pub fn new(capacity: usize) -> Self {
    let mut buf = Vec::with_capacity(capacity);
    buf.resize_with(capacity, || None);
    Self {
      buf: buf.into_boxed_slice(),
      head: 0,
      tail: 0,
      len: 0,
    }
  }

  #[inline(always)]
  pub fn capacity(&self) -> usize {
    self.buf.len()
  }

  #[inline(always)]
  pub fn len(&self) -> usize {
    self.len
  }

  #[inline(always)]
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  #[inline(always)]
  pub fn is_full(&self) -> bool {
    self.len == self.buf.len()
  }

  #[inline(always)]
  fn next_idx(&self, current: usize) -> usize {
    (current + 1) % self.buf.len()
  }

  pub fn push(&mut self, val: T) -> Result<(), RingError<T>> {
    if self.is_full() {
      return Err(RingError::Full(val));
    }

    self.buf[self.head] = Some(val);
    self.head = self.next_idx(self.head);
    self.len += 1;

    Ok(())
  }

  pub fn pop(&mut self) -> Option<T> {
    if self.is_empty() {
      return None;
    }

    let val = self.buf[self.tail].take();
    self.tail = self.next_idx(self.tail);
    self.len -= 1;

    val
  }

  pub fn peek(&self) -> Option<&T> {
    if self.is_empty() {
      return None;
    }
    self.buf[self.tail].as_ref()
  }

  pub fn drain(&mut self) -> Drain<'_, T> {
    Drain { ring: self }
  }
}

pub struct Drain<'ring, T> {
  ring: &'ring mut Ring<T>,
}

impl<T> Iterator for Drain<'_, T> {
  type Item = T;

  fn next(&mut self) -> Option<T> {
    self.ring.pop()
  }
}
