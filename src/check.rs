//! Heap consistency checker.
//!
//! Walks the arena block by block and then every free list, collecting
//! anything that breaks the heap's invariants. Nothing here panics or stops
//! early on the first problem; a bogus block size only ends the physical walk,
//! since the next header can no longer be located.

use std::fmt;

use log::warn;

use crate::{
  align::{ALIGNMENT, is_aligned},
  arena::Arena,
  block::{Block, BlockPtr, FreeBlock, MIN_BLOCK_SIZE, Tag, WORD},
  heap::Heap,
  seglist::{NUM_CLASSES, class_of},
};

/// One broken invariant, located by block payload address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
  /// `init` has not run.
  Uninitialized,
  /// The prologue header or footer is not `16 | allocated`.
  BadPrologue,
  /// The walk did not end on an allocated, zero-size header at the arena end.
  BadEpilogue { block: usize, tag: usize },
  /// A block runs past the end of the arena.
  OutOfBounds { block: usize, size: usize },
  Misaligned { block: usize },
  /// Size is not a multiple of 16 or is below the minimum block size.
  BadSize { block: usize, size: usize },
  TagMismatch { block: usize, header: usize, footer: usize },
  /// Two physically adjacent free blocks escaped coalescing.
  AdjacentFree { block: usize, next: usize },
  /// A list link points outside the arena.
  StrayLink { class: usize, link: usize },
  /// A block reachable from a list is marked allocated.
  ListedAllocated { class: usize, block: usize },
  /// A block sits in a chain other than the one its size selects.
  WrongClass { class: usize, block: usize, size: usize },
  /// A block's back link does not point at its chain predecessor.
  BrokenBackLink { class: usize, block: usize },
  /// The chain is longer than the number of blocks in the arena.
  Cycle { class: usize },
  /// Free blocks found by the walk and by the lists differ in number.
  FreeCountMismatch { in_heap: usize, in_lists: usize },
}

impl fmt::Display for Violation {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::Uninitialized => write!(f, "heap is not initialized"),
      Self::BadPrologue => write!(f, "prologue is corrupt"),
      Self::BadEpilogue { block, tag } => {
        write!(f, "bad epilogue at {block:#x}: tag {tag:#x}")
      }
      Self::OutOfBounds { block, size } => {
        write!(f, "block {block:#x} of {size} bytes runs past the arena")
      }
      Self::Misaligned { block } => write!(f, "block {block:#x} is misaligned"),
      Self::BadSize { block, size } => {
        write!(f, "block {block:#x} has invalid size {size}")
      }
      Self::TagMismatch {
        block,
        header,
        footer,
      } => {
        write!(
          f,
          "header and footer mismatch at {block:#x}: {header:#x} != {footer:#x}"
        )
      }
      Self::AdjacentFree { block, next } => {
        write!(f, "adjacent free blocks at {block:#x} and {next:#x}")
      }
      Self::StrayLink { class, link } => {
        write!(f, "class {class} links to {link:#x} outside the arena")
      }
      Self::ListedAllocated { class, block } => {
        write!(f, "allocated block {block:#x} is listed in class {class}")
      }
      Self::WrongClass { class, block, size } => {
        write!(f, "block {block:#x} of {size} bytes is listed in class {class}")
      }
      Self::BrokenBackLink { class, block } => {
        write!(f, "block {block:#x} in class {class} has a broken back link")
      }
      Self::Cycle { class } => write!(f, "class {class} contains a cycle"),
      Self::FreeCountMismatch { in_heap, in_lists } => {
        write!(
          f,
          "{in_heap} free blocks in the arena but {in_lists} in the free lists"
        )
      }
    }
  }
}

/// Result of [`Heap::check`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapReport {
  /// Real blocks walked, excluding prologue and epilogue.
  pub blocks: usize,
  pub free_blocks: usize,
  pub listed_blocks: usize,
  pub violations: Vec<Violation>,
}

impl HeapReport {
  pub fn is_ok(&self) -> bool {
    self.violations.is_empty()
  }

  fn report(
    &mut self,
    violation: Violation,
  ) {
    warn!("heap check: {violation}");
    self.violations.push(violation);
  }
}

impl<A: Arena> Heap<A> {
  /// Whether `ptr` points inside the arena.
  pub fn in_heap(
    &self,
    ptr: *const u8,
  ) -> bool {
    self.arena.contains(ptr)
  }

  /// Verifies the arena and the free lists, logging every violation found.
  pub fn check(&self) -> HeapReport {
    let mut report = HeapReport::default();

    let Some(prologue) = self.prologue else {
      report.report(Violation::Uninitialized);
      return report;
    };

    unsafe {
      self.walk_blocks(prologue, &mut report);
      self.walk_lists(&mut report);
    }

    if report.free_blocks != report.listed_blocks {
      report.report(Violation::FreeCountMismatch {
        in_heap: report.free_blocks,
        in_lists: report.listed_blocks,
      });
    }

    report
  }

  /// Whether the header of a block with this payload address is in bounds.
  fn header_in_heap(
    &self,
    block: BlockPtr,
  ) -> bool {
    self.in_heap(block.payload().wrapping_sub(WORD))
  }

  unsafe fn walk_blocks(
    &self,
    prologue: BlockPtr,
    report: &mut HeapReport,
  ) {
    unsafe {
      let prologue_tag = Tag::pack(2 * WORD, true);
      if prologue.tag() != prologue_tag || prologue.footer() != prologue_tag {
        report.report(Violation::BadPrologue);
        return;
      }

      let upper = self.arena.upper_bound() as usize;
      let mut block = prologue.next();
      let mut prev_free = false;

      loop {
        if !self.header_in_heap(block) {
          report.report(Violation::BadEpilogue {
            block: block.addr(),
            tag: 0,
          });
          return;
        }

        let tag = block.tag();
        let size = tag.size();

        if size == 0 {
          if !tag.is_allocated() || block.addr() != upper {
            report.report(Violation::BadEpilogue {
              block: block.addr(),
              tag: tag.raw(),
            });
          }
          return;
        }

        if !is_aligned(block.payload()) {
          report.report(Violation::Misaligned { block: block.addr() });
        }

        if size % ALIGNMENT != 0 || size < MIN_BLOCK_SIZE {
          report.report(Violation::BadSize {
            block: block.addr(),
            size,
          });
          return;
        }

        if size > upper.saturating_sub(block.addr()) {
          report.report(Violation::OutOfBounds {
            block: block.addr(),
            size,
          });
          return;
        }

        let footer = block.footer();
        if footer != tag {
          report.report(Violation::TagMismatch {
            block: block.addr(),
            header: tag.raw(),
            footer: footer.raw(),
          });
        }

        let free = match block.classify() {
          Block::Free(free) => {
            report.free_blocks += 1;
            if prev_free {
              report.report(Violation::AdjacentFree {
                block: block.prev().addr(),
                next: free.block().addr(),
              });
            }
            true
          }
          Block::Used(_) => false,
        };

        report.blocks += 1;
        prev_free = free;
        block = block.next();
      }
    }
  }

  unsafe fn walk_lists(
    &self,
    report: &mut HeapReport,
  ) {
    // Every listed block occupies at least MIN_BLOCK_SIZE bytes.
    let max_len = self.arena.size() / MIN_BLOCK_SIZE + 1;
    let upper = self.arena.upper_bound() as usize;

    for class in 0..NUM_CLASSES {
      let mut prev: Option<FreeBlock> = None;
      let mut cursor = self.lists.head(class);
      let mut len = 0;

      while let Some(node) = cursor {
        let block = node.block();

        // Both link words must be readable too.
        let links_in_heap = block
          .addr()
          .checked_add(2 * WORD)
          .is_some_and(|end| end <= upper);

        if !self.header_in_heap(block) || !links_in_heap || !is_aligned(block.payload()) {
          report.report(Violation::StrayLink {
            class,
            link: block.addr(),
          });
          break;
        }

        len += 1;
        if len > max_len {
          report.report(Violation::Cycle { class });
          break;
        }

        unsafe {
          let tag = block.tag();
          if tag.is_allocated() {
            report.report(Violation::ListedAllocated {
              class,
              block: block.addr(),
            });
            break;
          }

          if class_of(tag.size()) != class {
            report.report(Violation::WrongClass {
              class,
              block: block.addr(),
              size: tag.size(),
            });
          }

          if node.prev_link() != prev {
            report.report(Violation::BrokenBackLink {
              class,
              block: block.addr(),
            });
          }

          report.listed_blocks += 1;
          prev = Some(node);
          cursor = node.next_link();
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arena::BoundedArena;

  fn heap() -> Heap<BoundedArena> {
    let mut heap = Heap::new(BoundedArena::new(1 << 16).unwrap());
    assert!(heap.init());
    heap
  }

  #[test]
  fn test_uninitialized() {
    let heap = Heap::new(BoundedArena::new(64).unwrap());
    assert_eq!(heap.check().violations, vec![Violation::Uninitialized]);
  }

  #[test]
  fn test_fresh_heap_is_clean() {
    let report = heap().check();
    assert!(report.is_ok(), "{:?}", report.violations);
    assert_eq!(report.blocks, 1);
    assert_eq!(report.free_blocks, 1);
    assert_eq!(report.listed_blocks, 1);
  }

  #[test]
  fn test_detects_tag_mismatch() {
    let mut heap = heap();

    unsafe {
      let p = heap.malloc(40);
      let block = BlockPtr::new(p).unwrap();
      // Scribble over the footer.
      p.add(block.size() - 16).cast::<usize>().write(0x31);

      let report = heap.check();
      assert_eq!(
        report.violations,
        vec![Violation::TagMismatch {
          block: block.addr(),
          header: 0x41,
          footer: 0x31,
        }]
      );
    }
  }

  #[test]
  fn test_detects_unlisted_free_block() {
    let mut heap = heap();

    unsafe {
      let p = heap.malloc(40);
      let _q = heap.malloc(40);
      // Free the block behind the allocator's back.
      BlockPtr::new(p).unwrap().set_tags(Tag::pack(64, false));

      let report = heap.check();
      assert_eq!(report.free_blocks, 2);
      assert_eq!(report.listed_blocks, 1);
      assert_eq!(
        report.violations,
        vec![Violation::FreeCountMismatch {
          in_heap: 2,
          in_lists: 1,
        }]
      );
    }
  }

  #[test]
  fn test_detects_adjacent_free_blocks() {
    let mut heap = heap();

    unsafe {
      let p = heap.malloc(40);
      let q = heap.malloc(40);
      let _r = heap.malloc(40);
      heap.free(p);
      // Mark q free without coalescing or listing it.
      BlockPtr::new(q).unwrap().set_tags(Tag::pack(64, false));

      let report = heap.check();
      assert!(report.violations.contains(&Violation::AdjacentFree {
        block: p as usize,
        next: q as usize,
      }));
    }
  }

  #[test]
  fn test_huge_size_is_out_of_bounds() {
    let mut heap = heap();

    unsafe {
      let p = heap.malloc(40);
      p.sub(WORD).cast::<usize>().write(usize::MAX & !0xe);

      let report = heap.check();
      assert!(report.violations.contains(&Violation::OutOfBounds {
        block: p as usize,
        size: usize::MAX & !0xf,
      }));
    }
  }

  #[test]
  fn test_link_to_arena_end_is_stray() {
    let mut heap = heap();

    unsafe {
      let p = heap.malloc(40);
      let upper = heap.arena().upper_bound();
      // Tail block left by the split: its next link now names the epilogue.
      p.add(64 + WORD).cast::<*mut u8>().write(upper);

      let report = heap.check();
      assert_eq!(
        report.violations,
        vec![Violation::StrayLink {
          class: class_of(4032),
          link: upper as usize,
        }]
      );
    }
  }
}
