pub const fn is_aligned(value: usize, align: usize) -> Option<bool> {
  if !align.is_power_of_two() {
    return None;
  }
  Some((value & (align - 1)) == 0)
}

pub const fn align_up(value: usize, align: usize) -> Option<usize> {
  if !align.is_power_of_two() {
    return None;
  }

  let mask = align - 1;
  if let Some(sum) = value.checked_add(mask) {
    return Some(sum & !mask);
  }

  None
}

/// Floor of the base-2 logarithm. `log2(0)` is defined as 0.
#[inline(always)]
pub const fn log2(value: usize) -> usize {
  if value == 0 {
    return 0;
  }
  (usize::BITS - 1 - value.leading_zeros()) as usize
}

/// Rounds up to the next power of two with the classic smear cascade.
///
/// Values that are already a power of two are returned unchanged. When the
/// result would not fit in a `usize` the highest representable power of two
/// is returned instead.
pub const fn next_pow2(value: usize) -> usize {
  if value <= 1 {
    return 1;
  }

  let mut n = value - 1;
  n |= n >> 1;
  n |= n >> 2;
  n |= n >> 4;
  n |= n >> 8;
  n |= n >> 16;
  #[cfg(target_pointer_width = "64")]
  {
    n |= n >> 32;
  }

  match n.checked_add(1) {
    Some(pow) => pow,
    None => 1 << (usize::BITS - 1),
  }
}
