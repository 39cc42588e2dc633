#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{
  boxed::Box,
  vec,
};
use core::fmt;

#[cfg(test)]
pub mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapError {
  InsufficientSize { have: usize, need: usize },
  OutOfBounds { index: usize, size: usize },
  AlreadySet(usize),
  NotSet(usize),
}

impl fmt::Display for BitmapError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BitmapError::InsufficientSize { have, need } => {
        write!(f, "bitmap holds {} bits but {} are needed", have, need)
      }
      BitmapError::OutOfBounds { index, size } => {
        write!(f, "bit {} out of bounds for bitmap of {} bits", index, size)
      }
      BitmapError::AlreadySet(index) => write!(f, "bit {} is already set", index),
      BitmapError::NotSet(index) => write!(f, "bit {} is not set", index),
    }
  }
}

pub type BitmapResult<T> = Result<T, BitmapError>;

pub type BitmapWord = usize;

const WORD_BITS: usize = usize::BITS as usize;

/// Owned bitmap with a fixed word store and a logical bit count.
///
/// The logical length can shrink or grow within the store through
/// [`Bitmap::reset`], so a store sized for the largest use can be recycled.
#[derive(Debug, Clone)]
pub struct Bitmap {
  store: Box<[BitmapWord]>,
  bits: usize,
  used: usize,
}

impl Bitmap {
  #[inline(always)]
  pub const fn words(fields: usize) -> usize {
    fields.div_ceil(WORD_BITS)
  }

  #[inline(always)]
  pub const fn bytes(fields: usize) -> usize {
    Self::words(fields) * core::mem::size_of::<BitmapWord>()
  }

  pub fn zero(bits: usize) -> Self {
    Self::with_capacity(bits, bits)
  }

  /// A cleared bitmap of `bits` logical bits backed by room for `capacity`.
  pub fn with_capacity(bits: usize, capacity: usize) -> Self {
    let words = Self::words(capacity.max(bits)).max(1);
    Self {
      store: vec![0; words].into_boxed_slice(),
      bits,
      used: 0,
    }
  }

  #[inline(always)]
  pub fn available(&self) -> usize {
    self.store.len() * WORD_BITS
  }

  #[inline(always)]
  pub fn store(&self) -> &[BitmapWord] {
    &self.store
  }

  #[inline(always)]
  pub const fn bits(&self) -> usize {
    self.bits
  }

  #[inline(always)]
  pub const fn used(&self) -> usize {
    self.used
  }

  #[inline]
  fn position(&self, index: usize) -> BitmapResult<(usize, usize)> {
    if index >= self.bits {
      return Err(BitmapError::OutOfBounds {
        index,
        size: self.bits,
      });
    }
    Ok((index / WORD_BITS, index % WORD_BITS))
  }

  pub fn check(&self, fields: usize) -> BitmapResult<()> {
    let have = self.available();
    if fields > have {
      return Err(BitmapError::InsufficientSize { have, need: fields });
    }
    Ok(())
  }

  /// Clears every bit and changes the logical length to `bits`.
  pub fn reset(&mut self, bits: usize) -> BitmapResult<()> {
    self.check(bits)?;
    self.store.fill(0);
    self.bits = bits;
    self.used = 0;
    Ok(())
  }

  #[inline]
  pub fn set(&mut self, index: usize) -> BitmapResult<()> {
    let (word, bit) = self.position(index)?;
    let mask = 1usize << bit;
    if self.store[word] & mask != 0 {
      return Err(BitmapError::AlreadySet(index));
    }
    self.store[word] |= mask;
    self.used += 1;
    Ok(())
  }

  #[inline]
  pub fn clear(&mut self, index: usize) -> BitmapResult<()> {
    let (word, bit) = self.position(index)?;
    let mask = 1usize << bit;
    if self.store[word] & mask == 0 {
      return Err(BitmapError::NotSet(index));
    }
    self.store[word] &= !mask;
    self.used -= 1;
    Ok(())
  }

  #[inline]
  pub fn get(&self, index: usize) -> BitmapResult<bool> {
    let (word, bit) = self.position(index)?;
    Ok(self.store[word] & (1usize << bit) != 0)
  }

  pub fn clear_all(&mut self) {
    self.store.fill(0);
    self.used = 0;
  }

  pub fn set_all(&mut self) {
    let full_words = self.bits / WORD_BITS;
    self.store[..full_words].fill(usize::MAX);

    let remaining = self.bits % WORD_BITS;
    if remaining > 0 {
      self.store[full_words] = usize::MAX >> (WORD_BITS - remaining);
    }
    self.used = self.bits;
  }

  pub fn find_fs(&self) -> Option<usize> {
    self.find_from(0, |word| word)
  }

  pub fn find_fc(&self) -> Option<usize> {
    self.find_from(0, |word| !word)
  }

  /// First clear bit at or after `start`, wrapping around once.
  pub fn find_fc_from(&self, start: usize) -> Option<usize> {
    if start >= self.bits {
      return self.find_fc();
    }
    self.find_from(start, |word| !word).or_else(|| self.find_fc())
  }

  fn find_from(&self, start: usize, view: impl Fn(usize) -> usize) -> Option<usize> {
    let first = start / WORD_BITS;
    let last = Self::words(self.bits);

    for word_index in first..last {
      let mut value = view(self.store[word_index]);
      if word_index == first {
        value &= usize::MAX << (start % WORD_BITS);
      }
      if value != 0 {
        let index = word_index * WORD_BITS + value.trailing_zeros() as usize;
        return (index < self.bits).then_some(index);
      }
    }
    None
  }

  #[inline]
  pub fn is_clear(&self) -> bool {
    self.used == 0
  }

  #[inline]
  pub fn is_full(&self) -> bool {
    self.used == self.bits
  }

  #[inline]
  pub fn one_clear(&self) -> bool {
    self.used < self.bits
  }
}
