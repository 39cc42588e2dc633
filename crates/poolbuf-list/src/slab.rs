use alloc::vec::Vec;

use getset::CopyGetters;

use crate::{
  HasLink,
  Nodes,
};

/// Stable address of a slab entry. The generation changes every time the
/// slot is reused, so keys to removed entries never resolve again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, CopyGetters)]
pub struct SlabKey {
  #[getset(get_copy = "pub")]
  index: usize,
  #[getset(get_copy = "pub")]
  generation: u32,
}

impl SlabKey {
  pub const fn new(index: usize, generation: u32) -> Self {
    Self { index, generation }
  }
}

#[derive(Debug)]
struct Slot<T> {
  value: Option<T>,
  generation: u32,
}

#[derive(Debug)]
pub struct Slab<T> {
  slots: Vec<Slot<T>>,
  vacant: Vec<usize>,
  len: usize,
}

impl<T> Default for Slab<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Slab<T> {
  pub const fn new() -> Self {
    Self {
      slots: Vec::new(),
      vacant: Vec::new(),
      len: 0,
    }
  }

  #[inline(always)]
  pub fn len(&self) -> usize {
    self.len
  }

  #[inline(always)]
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Key the next [`Slab::insert`] will return.
  pub fn next_key(&self) -> SlabKey {
    match self.vacant.last() {
      Some(&index) => SlabKey::new(index, self.slots[index].generation),
      None => SlabKey::new(self.slots.len(), 0),
    }
  }

  pub fn insert(&mut self, value: T) -> SlabKey {
    if let Some(index) = self.vacant.pop() {
      let slot = &mut self.slots[index];
      slot.value = Some(value);
      self.len += 1;
      return SlabKey::new(index, slot.generation);
    }

    let index = self.slots.len();
    self.slots.push(Slot {
      value: Some(value),
      generation: 0,
    });
    self.len += 1;
    SlabKey::new(index, 0)
  }

  pub fn remove(&mut self, key: SlabKey) -> Option<T> {
    let slot = self.slots.get_mut(key.index)?;
    if slot.generation != key.generation {
      return None;
    }
    let value = slot.value.take()?;
    slot.generation = slot.generation.wrapping_add(1);
    self.vacant.push(key.index);
    self.len -= 1;
    Some(value)
  }

  pub fn get(&self, key: SlabKey) -> Option<&T> {
    let slot = self.slots.get(key.index)?;
    if slot.generation != key.generation {
      return None;
    }
    slot.value.as_ref()
  }

  pub fn get_mut(&mut self, key: SlabKey) -> Option<&mut T> {
    let slot = self.slots.get_mut(key.index)?;
    if slot.generation != key.generation {
      return None;
    }
    slot.value.as_mut()
  }

  #[inline]
  pub fn at(&self, index: usize) -> Option<&T> {
    self.slots.get(index).and_then(|s| s.value.as_ref())
  }

  #[inline]
  pub fn at_mut(&mut self, index: usize) -> Option<&mut T> {
    self.slots.get_mut(index).and_then(|s| s.value.as_mut())
  }

  pub fn key_of(&self, index: usize) -> Option<SlabKey> {
    let slot = self.slots.get(index)?;
    slot.value.as_ref().map(|_| SlabKey::new(index, slot.generation))
  }

  pub fn iter(&self) -> impl Iterator<Item = (SlabKey, &T)> {
    self.slots.iter().enumerate().filter_map(|(index, slot)| {
      slot
        .value
        .as_ref()
        .map(|value| (SlabKey::new(index, slot.generation), value))
    })
  }

  pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
    self.vacant.clear();
    self.len = 0;
    self.slots.drain(..).filter_map(|slot| slot.value)
  }
}

impl<T> Nodes<T> for Slab<T>
where
  T: HasLink,
{
  fn node(&self, index: usize) -> Option<&T> {
    self.at(index)
  }

  fn node_mut(&mut self, index: usize) -> Option<&mut T> {
    self.at_mut(index)
  }
}
