use std::{cmp, ptr};

use log::{debug, trace};

use crate::{
  align::{ALIGNMENT, checked_align, is_aligned},
  arena::Arena,
  block::{Block, BlockPtr, FreeBlock, MIN_BLOCK_SIZE, OVERHEAD, Tag, UsedBlock, WORD},
  config::HeapConfig,
  seglist::{SegList, class_of},
};

/// Bytes requested at `init` for the padding word, the prologue and the
/// first epilogue header.
const PROLOGUE_BYTES: usize = 4 * WORD;

/// The prologue is a header plus a footer with nothing in between.
const PROLOGUE_SIZE: usize = 2 * WORD;

/// Block size needed to serve a request of `size` bytes.
///
/// Returns `None` when the arithmetic would overflow.
pub fn block_size_for(size: usize) -> Option<usize> {
  if size <= OVERHEAD {
    Some(MIN_BLOCK_SIZE)
  } else {
    checked_align(size.checked_add(OVERHEAD)?)
  }
}

/// A segregated-fit allocator over a single growable arena.
///
/// All state lives in this struct, so independent heaps can coexist. A heap
/// is not thread-safe; callers sharing one across threads must serialize
/// every call themselves.
pub struct Heap<A: Arena> {
  pub(crate) arena: A,
  pub(crate) lists: SegList,
  pub(crate) config: HeapConfig,
  pub(crate) prologue: Option<BlockPtr>,
}

impl<A: Arena> Heap<A> {
  pub fn new(arena: A) -> Self {
    Self::with_config(arena, HeapConfig::default())
  }

  pub fn with_config(
    arena: A,
    config: HeapConfig,
  ) -> Self {
    Self {
      arena,
      lists: SegList::new(),
      config,
      prologue: None,
    }
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn arena(&self) -> &A {
    &self.arena
  }

  /// Bytes taken from the arena so far. Never decreases.
  pub fn arena_size(&self) -> usize {
    self.arena.size()
  }

  /// Lays down the prologue and epilogue and makes the first free block.
  ///
  /// Must succeed exactly once before any other operation. Returns `false`
  /// if the arena cannot provide the initial space.
  pub fn init(&mut self) -> bool {
    self.lists = SegList::new();

    let start = match self.arena.grow(PROLOGUE_BYTES) {
      Ok(start) => start,
      Err(err) => {
        debug!("init: no room for sentinels: {err}");
        return false;
      }
    };

    if !is_aligned(start.as_ptr()) {
      debug!("init: arena starts at unaligned address {:?}", start);
      return false;
    }

    unsafe {
      // [pad][prologue header][prologue footer][epilogue header]
      start.cast::<usize>().write(0);
      let prologue = BlockPtr::from_non_null(start.add(2 * WORD));
      prologue.set_tags(Tag::pack(PROLOGUE_SIZE, true));
      prologue.next().set_header(Tag::EPILOGUE);
      self.prologue = Some(prologue);

      debug!(
        "init: arena at {:?}, extending by {}",
        start, self.config.extend_size
      );

      self.extend(self.config.extend_size).is_some()
    }
  }

  /// Grows the arena by `bytes` (rounded up, and never less than a minimum
  /// block) and returns the resulting free
  /// block after merging it with a free block that ended the old arena.
  ///
  /// # Safety
  ///
  /// The heap must be initialized.
  unsafe fn extend(
    &mut self,
    bytes: usize,
  ) -> Option<FreeBlock> {
    let size = checked_align(cmp::max(bytes, MIN_BLOCK_SIZE))?;

    let region = match self.arena.grow(size) {
      Ok(region) => region,
      Err(err) => {
        debug!("extend: arena refused {size} bytes: {err}");
        return None;
      }
    };

    unsafe {
      // The new block's header lands on the old epilogue.
      let block = FreeBlock::format(BlockPtr::from_non_null(region), size);
      block.block().next().set_header(Tag::EPILOGUE);
      self.lists.insert(block);

      debug!(
        "extend: {size} bytes at {:?}, arena now {} bytes",
        region,
        self.arena.size()
      );

      Some(self.coalesce(block))
    }
  }

  /// Merges a registered free block with its free physical neighbours and
  /// returns the registered result.
  ///
  /// # Safety
  ///
  /// `block` must be free and registered.
  unsafe fn coalesce(
    &mut self,
    block: FreeBlock,
  ) -> FreeBlock {
    unsafe {
      let prev = block.block().prev();
      let next = block.block().next();
      let prev_tag = prev.tag();
      let next_tag = next.tag();
      let size = block.size();

      let merged = match (prev_tag.is_allocated(), next_tag.is_allocated()) {
        (true, true) => return block,
        (false, true) => {
          let prev = FreeBlock::assume(prev);
          self.lists.remove(block);
          self.lists.remove(prev);
          FreeBlock::format(prev.block(), size + prev_tag.size())
        }
        (true, false) => {
          let next = FreeBlock::assume(next);
          self.lists.remove(block);
          self.lists.remove(next);
          FreeBlock::format(block.block(), size + next_tag.size())
        }
        (false, false) => {
          let (prev, next) = (FreeBlock::assume(prev), FreeBlock::assume(next));
          self.lists.remove(prev);
          self.lists.remove(block);
          self.lists.remove(next);
          FreeBlock::format(prev.block(), prev_tag.size() + size + next_tag.size())
        }
      };

      trace!(
        "coalesce: {:?} ({size}) -> {:?} ({})",
        block.block().payload(),
        merged.block().payload(),
        merged.size()
      );

      self.lists.insert(merged);
      merged
    }
  }

  /// Looks for a registered block of at least `asize` bytes.
  ///
  /// The target class is searched for at most `search_limit` candidates; after
  /// that the head of the next non-empty larger class wins unconditionally.
  fn find_fit(
    &self,
    asize: usize,
  ) -> Option<FreeBlock> {
    let class = class_of(asize);

    let found = unsafe {
      self
        .lists
        .chain(class)
        .take(self.config.search_limit)
        .find(|block| block.size() >= asize)
    };

    found.or_else(|| self.lists.first_above(class))
  }

  /// Carves `asize` bytes out of `block`, registering any usable remainder.
  ///
  /// # Safety
  ///
  /// `block` must be free, registered and at least `asize` bytes.
  unsafe fn place(
    &mut self,
    block: FreeBlock,
    asize: usize,
  ) -> UsedBlock {
    unsafe {
      self.lists.remove(block);

      let csize = block.size();
      let remainder = csize - asize;

      if remainder >= MIN_BLOCK_SIZE {
        let used = block.allocate(asize);
        let rest = FreeBlock::format(used.block().next(), remainder);
        self.lists.insert(rest);

        trace!(
          "place: split {csize} at {:?} into {asize} + {remainder}",
          used.payload()
        );

        used
      } else {
        trace!("place: whole {csize} at {:?} for {asize}", block.block().payload());
        block.allocate(csize)
      }
    }
  }

  /// Allocates at least `size` bytes aligned to 16.
  ///
  /// Returns null for `size == 0` and when the arena cannot grow.
  ///
  /// # Safety
  ///
  /// [`Heap::init`] must have succeeded.
  pub unsafe fn malloc(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    let Some(asize) = block_size_for(size) else {
      debug!("malloc: request of {size} bytes overflows");
      return ptr::null_mut();
    };

    unsafe {
      let block = match self.find_fit(asize) {
        Some(block) => block,
        None => match self.extend(cmp::max(asize, self.config.extend_size)) {
          Some(block) => block,
          None => return ptr::null_mut(),
        },
      };

      let used = self.place(block, asize);
      debug_assert_eq!(used.payload() as usize % ALIGNMENT, 0);
      used.payload()
    }
  }

  /// Returns a block to the heap. Null is ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer returned by this heap.
  pub unsafe fn free(
    &mut self,
    ptr: *mut u8,
  ) {
    let Some(block) = BlockPtr::new(ptr) else {
      return;
    };

    unsafe {
      let free = UsedBlock::assume(block).release();
      self.lists.insert(free);
      self.coalesce(free);
    }
  }

  /// Moves an allocation to a block of `size` bytes, keeping the common
  /// prefix of its contents.
  ///
  /// Null `ptr` behaves like [`Heap::malloc`]; zero `size` frees `ptr` and
  /// returns null. If the new block cannot be allocated the old one is left
  /// intact and null is returned.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer returned by this heap.
  pub unsafe fn realloc(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      let Some(block) = BlockPtr::new(ptr) else {
        return self.malloc(size);
      };

      if size == 0 {
        self.free(ptr);
        return ptr::null_mut();
      }

      let new = self.malloc(size);
      if new.is_null() {
        return ptr::null_mut();
      }

      let copy = cmp::min(size, UsedBlock::assume(block).capacity());
      ptr::copy_nonoverlapping(ptr, new, copy);
      self.free(ptr);
      new
    }
  }

  /// Allocates `count * size` zeroed bytes.
  ///
  /// The multiplication wraps on overflow, so an overflowing request gets a
  /// smaller block than asked for.
  ///
  /// # Safety
  ///
  /// [`Heap::init`] must have succeeded.
  pub unsafe fn calloc(
    &mut self,
    count: usize,
    size: usize,
  ) -> *mut u8 {
    let bytes = count.wrapping_mul(size);

    unsafe {
      let ptr = self.malloc(bytes);
      if !ptr.is_null() {
        ptr::write_bytes(ptr, 0, bytes);
      }
      ptr
    }
  }

  /// Bytes usable behind a live pointer. May exceed the requested size.
  /// Null and pointers to free blocks report 0.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a pointer returned by this heap.
  pub unsafe fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> usize {
    let Some(block) = BlockPtr::new(ptr) else {
      return 0;
    };

    match unsafe { block.classify() } {
      Block::Used(used) => unsafe { used.capacity() },
      Block::Free(_) => 0,
    }
  }

  /// Number of blocks currently registered in the free lists.
  pub fn free_block_count(&self) -> usize {
    unsafe { self.lists.len() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arena::BoundedArena;

  fn heap() -> Heap<BoundedArena> {
    let mut heap = Heap::new(BoundedArena::new(1 << 20).unwrap());
    assert!(heap.init());
    heap
  }

  #[test]
  fn test_block_size_for() {
    assert_eq!(block_size_for(1), Some(32));
    assert_eq!(block_size_for(16), Some(32));
    assert_eq!(block_size_for(17), Some(48));
    assert_eq!(block_size_for(24), Some(48));
    assert_eq!(block_size_for(32), Some(48));
    assert_eq!(block_size_for(33), Some(64));
    assert_eq!(block_size_for(96), Some(112));
    assert_eq!(block_size_for(usize::MAX - 8), None);
  }

  #[test]
  fn test_init_layout() {
    let heap = heap();
    let prologue = heap.prologue.unwrap();

    assert_eq!(heap.arena_size(), PROLOGUE_BYTES + 4096);
    assert_eq!(heap.free_block_count(), 1);

    unsafe {
      assert_eq!(prologue.addr(), heap.arena.lower_bound() as usize + 16);
      assert_eq!(prologue.tag(), Tag::pack(16, true));
      assert_eq!(prologue.footer(), Tag::pack(16, true));

      let first = prologue.next();
      assert_eq!(first.tag(), Tag::pack(4096, false));
      assert_eq!(first.next().payload(), heap.arena.upper_bound());
      assert_eq!(first.next().tag(), Tag::EPILOGUE);
      assert_eq!(heap.lists.head(class_of(4096)), Some(FreeBlock::assume(first)));
    }
  }

  #[test]
  fn test_init_fails_without_room() {
    let mut heap = Heap::new(BoundedArena::new(16).unwrap());
    assert!(!heap.init());

    let mut heap = Heap::new(BoundedArena::new(PROLOGUE_BYTES + 4080).unwrap());
    assert!(!heap.init());
  }

  #[test]
  fn test_split_registers_remainder() {
    let mut heap = heap();

    unsafe {
      let p = heap.malloc(100);
      let block = BlockPtr::new(p).unwrap();
      assert_eq!(block.tag(), Tag::pack(128, true));
      assert_eq!(block.footer(), Tag::pack(128, true));

      let rest = block.next();
      assert_eq!(rest.tag(), Tag::pack(4096 - 128, false));
      assert_eq!(heap.lists.head(class_of(4096 - 128)), Some(FreeBlock::assume(rest)));
    }
  }

  #[test]
  fn test_small_remainder_is_absorbed() {
    let mut heap = heap();

    unsafe {
      // Leave a 48-byte hole between two allocated blocks.
      let a = heap.malloc(32);
      let b = heap.malloc(1);
      heap.free(a);

      // 32-byte block into the 48-byte hole: 16 bytes left over, no split.
      let c = heap.malloc(8);
      assert_eq!(c, a);
      assert_eq!(heap.usable_size(c), 32);
      assert_eq!(BlockPtr::new(c).unwrap().next().payload(), b);
    }
  }

  #[test]
  fn test_coalesce_all_four_cases() {
    let mut heap = heap();

    unsafe {
      let a = heap.malloc(16);
      let b = heap.malloc(16);
      let c = heap.malloc(16);
      let d = heap.malloc(16);
      let e = heap.malloc(16);
      let tail_before = heap.free_block_count();

      // Neighbours allocated: no merge.
      heap.free(b);
      assert_eq!(heap.free_block_count(), tail_before + 1);

      // Predecessor free.
      heap.free(c);
      assert_eq!(heap.free_block_count(), tail_before + 1);
      assert_eq!(BlockPtr::new(b).unwrap().size(), 64);

      // Successor free.
      heap.free(a);
      assert_eq!(heap.free_block_count(), tail_before + 1);
      assert_eq!(BlockPtr::new(a).unwrap().size(), 96);

      // Both free: e merges with d's neighbour on the left and the tail.
      heap.free(e);
      heap.free(d);
      assert_eq!(heap.free_block_count(), 1);
      assert_eq!(BlockPtr::new(a).unwrap().size(), 4096);
    }
  }

  #[test]
  fn test_extend_merges_with_trailing_free_block() {
    let mut heap = heap();

    unsafe {
      let p = heap.malloc(100);
      let q = heap.malloc(5000);

      assert_eq!(q, p.add(128));
      assert_eq!(heap.arena_size(), PROLOGUE_BYTES + 4096 + 5024);
      assert_eq!(heap.usable_size(q), 5024 - OVERHEAD);
    }
  }

  #[test]
  fn test_large_request_extends_by_block_size() {
    let mut heap = heap();

    unsafe {
      let _guard = heap.malloc(4000);
      let before = heap.arena_size();
      let p = heap.malloc(20_000);

      assert!(!p.is_null());
      assert_eq!(heap.arena_size(), before + 20_016);
    }
  }
}
