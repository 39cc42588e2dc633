#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod slab;

pub use slab::{
  Slab,
  SlabKey,
};

use core::marker::PhantomData;

use getset::CopyGetters;

/// Nodes that can be threaded onto a [`List`].
pub trait HasLink {
  fn link(&self) -> &Link;
  fn link_mut(&mut self) -> &mut Link;
}

/// Index based storage a [`List`] threads through.
pub trait Nodes<T>
where
  T: HasLink,
{
  fn node(&self, index: usize) -> Option<&T>;
  fn node_mut(&mut self, index: usize) -> Option<&mut T>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, CopyGetters)]
pub struct Link {
  #[getset(get_copy = "pub")]
  next: Option<usize>,
  #[getset(get_copy = "pub")]
  prev: Option<usize>,
  #[getset(get_copy = "pub")]
  linked: bool,
}

impl Link {
  fn reset(&mut self) {
    self.next = None;
    self.prev = None;
    self.linked = false;
  }
}

/// Doubly linked list of slots in some [`Nodes`] storage.
///
/// The list only holds the head, tail and length. Links live inside the
/// nodes themselves, so one node can be in at most one list at a time.
#[derive(Debug, Default, Clone, Copy, CopyGetters)]
pub struct List {
  #[getset(get_copy = "pub")]
  head: Option<usize>,
  #[getset(get_copy = "pub")]
  tail: Option<usize>,
  #[getset(get_copy = "pub")]
  len: usize,
}

impl List {
  pub const fn new() -> Self {
    Self {
      head: None,
      tail: None,
      len: 0,
    }
  }

  #[inline(always)]
  pub const fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn contains<T, N>(&self, nodes: &N, index: usize) -> bool
  where
    T: HasLink,
    N: Nodes<T>,
  {
    self.iter(nodes).any(|i| i == index)
  }

  /// Links `index` at the front. Returns false if the node is missing or
  /// already linked somewhere.
  pub fn push_front<T, N>(&mut self, nodes: &mut N, index: usize) -> bool
  where
    T: HasLink,
    N: Nodes<T>,
  {
    let old_head = self.head;
    let Some(node) = nodes.node_mut(index) else {
      return false;
    };
    let link = node.link_mut();
    if link.linked {
      return false;
    }
    link.prev = None;
    link.next = old_head;
    link.linked = true;

    match old_head.and_then(|h| nodes.node_mut(h)) {
      Some(head) => head.link_mut().prev = Some(index),
      None => self.tail = Some(index),
    }

    self.head = Some(index);
    self.len += 1;
    true
  }

  pub fn push_back<T, N>(&mut self, nodes: &mut N, index: usize) -> bool
  where
    T: HasLink,
    N: Nodes<T>,
  {
    let old_tail = self.tail;
    let Some(node) = nodes.node_mut(index) else {
      return false;
    };
    let link = node.link_mut();
    if link.linked {
      return false;
    }
    link.next = None;
    link.prev = old_tail;
    link.linked = true;

    match old_tail.and_then(|t| nodes.node_mut(t)) {
      Some(tail) => tail.link_mut().next = Some(index),
      None => self.head = Some(index),
    }

    self.tail = Some(index);
    self.len += 1;
    true
  }

  /// Unlinks `index`. The caller must only remove nodes of this list.
  pub fn remove<T, N>(&mut self, nodes: &mut N, index: usize) -> bool
  where
    T: HasLink,
    N: Nodes<T>,
  {
    let Some(node) = nodes.node_mut(index) else {
      return false;
    };
    let link = *node.link();
    if !link.linked {
      return false;
    }
    node.link_mut().reset();

    match link.prev.and_then(|p| nodes.node_mut(p)) {
      Some(prev) => prev.link_mut().next = link.next,
      None => self.head = link.next,
    }

    match link.next.and_then(|n| nodes.node_mut(n)) {
      Some(next) => next.link_mut().prev = link.prev,
      None => self.tail = link.prev,
    }

    self.len -= 1;
    true
  }

  pub fn pop_front<T, N>(&mut self, nodes: &mut N) -> Option<usize>
  where
    T: HasLink,
    N: Nodes<T>,
  {
    let head = self.head?;
    self.remove(nodes, head);
    Some(head)
  }

  pub fn next_of<T, N>(nodes: &N, index: usize) -> Option<usize>
  where
    T: HasLink,
    N: Nodes<T>,
  {
    nodes.node(index).and_then(|n| n.link().next)
  }

  pub fn iter<'list, T, N>(&self, nodes: &'list N) -> ListIter<'list, T, N>
  where
    T: HasLink,
    N: Nodes<T>,
  {
    ListIter::new(nodes, self.head)
  }
}

pub struct ListIter<'list, T, N>
where
  T: HasLink,
  N: Nodes<T>,
{
  nodes: &'list N,
  next: Option<usize>,
  marker: PhantomData<&'list T>,
}

impl<'list, T, N> ListIter<'list, T, N>
where
  T: HasLink,
  N: Nodes<T>,
{
  pub fn new(nodes: &'list N, start: Option<usize>) -> Self {
    Self {
      nodes,
      next: start,
      marker: PhantomData,
    }
  }
}

impl<'list, T, N> Iterator for ListIter<'list, T, N>
where
  T: HasLink,
  N: Nodes<T>,
{
  type Item = usize;

  fn next(&mut self) -> Option<Self::Item> {
    let current = self.next?;
    self.next = List::next_of(self.nodes, current);
    Some(current)
  }
}
