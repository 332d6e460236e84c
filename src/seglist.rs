//! Segregated free lists.
//!
//! Free blocks are threaded through their own payloads into one of
//! [`NUM_CLASSES`] doubly linked chains, picked by size:
//!
//! ```text
//!   class   0      1       2        3             12              13
//!   range  <32  [32,64) [64,128) [128,256) ... [64K,128K)      >= 128K
//!          ┌──┐   ┌──┐    ┌──┐     ┌──┐           ┌──┐           ┌──┐
//!   heads  │  │   │ ●│    │  │     │ ●│    ...    │  │           │ ●│
//!          └──┘   └┼─┘    └──┘     └┼─┘           └──┘           └┼─┘
//!                  ▼                ▼                             ▼
//!                 ┌──┐ ◄──┐        ┌──┐                          ┌──┐
//!                 │48│    │        │160                          │..│
//!                 └┼─┘    │        └──┘                          └──┘
//!                  ▼      │
//!                 ┌──┐ ───┘
//!                 │32│
//!                 └──┘
//! ```
//!
//! Chains are unordered; insertion pushes at the head.

use std::marker::PhantomData;

use crate::block::{FreeBlock, MIN_BLOCK_SIZE};

/// Number of size classes, including the catch-all top class.
pub const NUM_CLASSES: usize = 14;

/// Lower bound of classes 1 through 13.
pub const CLASS_THRESHOLDS: [usize; NUM_CLASSES - 1] = [
  32, 64, 128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768, 65536, 131072,
];

/// Size class for a block of `size` bytes.
pub fn class_of(size: usize) -> usize {
  if size < MIN_BLOCK_SIZE {
    return 0;
  }

  let doublings = (size / MIN_BLOCK_SIZE).ilog2() as usize;
  (doublings + 1).min(NUM_CLASSES - 1)
}

pub struct SegList {
  heads: [Option<FreeBlock>; NUM_CLASSES],
}

impl SegList {
  pub const fn new() -> Self {
    Self {
      heads: [None; NUM_CLASSES],
    }
  }

  pub fn head(
    &self,
    class: usize,
  ) -> Option<FreeBlock> {
    self.heads[class]
  }

  /// Pushes `block` at the head of the chain for its current size.
  ///
  /// # Safety
  ///
  /// `block` must be a formatted free block that is not registered yet.
  pub unsafe fn insert(
    &mut self,
    block: FreeBlock,
  ) {
    unsafe {
      let class = class_of(block.size());
      let head = self.heads[class];

      block.set_prev_link(None);
      block.set_next_link(head);

      if let Some(head) = head {
        head.set_prev_link(Some(block));
      }

      self.heads[class] = Some(block);
    }
  }

  /// Splices `block` out of its chain.
  ///
  /// # Safety
  ///
  /// `block` must be registered, and its size must be the one it had when it
  /// was inserted.
  pub unsafe fn remove(
    &mut self,
    block: FreeBlock,
  ) {
    unsafe {
      let class = class_of(block.size());
      let prev = block.prev_link();
      let next = block.next_link();

      match prev {
        Some(prev) => prev.set_next_link(next),
        None => self.heads[class] = next,
      }

      if let Some(next) = next {
        next.set_prev_link(prev);
      }
    }
  }

  /// Iterates over one chain from its head.
  ///
  /// # Safety
  ///
  /// The chain must not be mutated while the iterator is alive, and every
  /// linked block must still be free.
  pub unsafe fn chain(
    &self,
    class: usize,
  ) -> Chain<'_> {
    Chain {
      cursor: self.heads[class],
      _lists: PhantomData,
    }
  }

  /// Head of the first non-empty class strictly above `class`.
  pub fn first_above(
    &self,
    class: usize,
  ) -> Option<FreeBlock> {
    self.heads.iter().skip(class + 1).find_map(|head| *head)
  }

  /// Total number of registered blocks.
  ///
  /// # Safety
  ///
  /// See [`SegList::chain`].
  pub unsafe fn len(&self) -> usize {
    (0..NUM_CLASSES).map(|class| unsafe { self.chain(class).count() }).sum()
  }
}

impl Default for SegList {
  fn default() -> Self {
    Self::new()
  }
}

pub struct Chain<'a> {
  cursor: Option<FreeBlock>,
  _lists: PhantomData<&'a SegList>,
}

impl Iterator for Chain<'_> {
  type Item = FreeBlock;

  fn next(&mut self) -> Option<FreeBlock> {
    let current = self.cursor?;
    self.cursor = unsafe { current.next_link() };
    Some(current)
  }
}
