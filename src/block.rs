//! Boundary-tag encoding and the raw block view.
//!
//! Every other module goes through the types in here to touch header, footer
//! or free-list link bytes. Nothing above this module does pointer arithmetic
//! on the arena.
//!
//! ```text
//!   Allocated block                      Free block
//!   ┌────────────────────┐               ┌────────────────────┐
//!   │ header: size | 1   │ 8             │ header: size | 0   │ 8
//!   ├────────────────────┤ ◄── payload   ├────────────────────┤ ◄── payload
//!   │                    │               │ prev-in-class      │ 8
//!   │     user data      │               │ next-in-class      │ 8
//!   │                    │               │       ...          │
//!   ├────────────────────┤               ├────────────────────┤
//!   │ footer: size | 1   │ 8             │ footer: size | 0   │ 8
//!   └────────────────────┘               └────────────────────┘
//! ```

use std::{mem, ptr, ptr::NonNull};

/// Size of a header or footer word.
pub const WORD: usize = mem::size_of::<usize>();

/// Header plus footer.
pub const OVERHEAD: usize = 2 * WORD;

/// Smallest block that can hold a header, a footer and both list links.
pub const MIN_BLOCK_SIZE: usize = 32;

const ALLOCATED: usize = 0x1;
const SIZE_MASK: usize = !0xf;

/// A header/footer word: block size in the high bits, allocation flag in bit 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct Tag(usize);

impl Tag {
  /// The epilogue header: size 0, allocated.
  pub const EPILOGUE: Tag = Tag::pack(0, true);

  pub const fn pack(
    size: usize,
    allocated: bool,
  ) -> Self {
    Tag(size | allocated as usize)
  }

  pub const fn from_raw(word: usize) -> Self {
    Tag(word)
  }

  pub const fn raw(self) -> usize {
    self.0
  }

  /// Block size with the flag and padding bits masked out.
  pub const fn size(self) -> usize {
    self.0 & SIZE_MASK
  }

  pub const fn is_allocated(self) -> bool {
    self.0 & ALLOCATED != 0
  }
}

/// Opaque handle to a block, identified by its payload address.
///
/// A `BlockPtr` says nothing about the block's state. Use [`BlockPtr::classify`]
/// or one of the `assume` constructors to get a typed view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockPtr(NonNull<u8>);

impl BlockPtr {
  pub fn new(payload: *mut u8) -> Option<Self> {
    NonNull::new(payload).map(BlockPtr)
  }

  pub fn from_non_null(payload: NonNull<u8>) -> Self {
    BlockPtr(payload)
  }

  pub fn payload(self) -> *mut u8 {
    self.0.as_ptr()
  }

  pub fn addr(self) -> usize {
    self.0.as_ptr() as usize
  }

  fn header_ptr(self) -> *mut usize {
    self.payload().wrapping_sub(WORD).cast()
  }

  /// # Safety
  ///
  /// The header word of this block must lie inside the arena.
  pub unsafe fn tag(self) -> Tag {
    unsafe { Tag::from_raw(self.header_ptr().read()) }
  }

  /// # Safety
  ///
  /// The header word of this block must lie inside the arena.
  pub unsafe fn size(self) -> usize {
    unsafe { self.tag().size() }
  }

  /// Reads the footer at the position implied by the current header.
  ///
  /// # Safety
  ///
  /// The header must describe a block that lies inside the arena.
  pub unsafe fn footer(self) -> Tag {
    unsafe { Tag::from_raw(self.footer_ptr(self.size()).read()) }
  }

  fn footer_ptr(
    self,
    size: usize,
  ) -> *mut usize {
    self.payload().wrapping_add(size).wrapping_sub(OVERHEAD).cast()
  }

  /// Writes `tag` into both the header and the footer of a block spanning
  /// `tag.size()` bytes.
  ///
  /// # Safety
  ///
  /// The whole span must lie inside the arena and not overlap a live payload.
  pub unsafe fn set_tags(
    self,
    tag: Tag,
  ) {
    unsafe {
      self.header_ptr().write(tag.0);
      self.footer_ptr(tag.size()).write(tag.0);
    }
  }

  /// Writes only the header word. Used for the epilogue, which has no footer.
  ///
  /// # Safety
  ///
  /// The header word must lie inside the arena.
  pub unsafe fn set_header(
    self,
    tag: Tag,
  ) {
    unsafe { self.header_ptr().write(tag.0) }
  }

  /// Physical successor.
  ///
  /// # Safety
  ///
  /// The header must be valid; the epilogue has no successor.
  pub unsafe fn next(self) -> BlockPtr {
    unsafe { BlockPtr(self.0.add(self.size())) }
  }

  /// Footer word of the physical predecessor.
  ///
  /// # Safety
  ///
  /// The block must not be the prologue.
  pub unsafe fn prev_footer(self) -> Tag {
    unsafe { Tag::from_raw(self.payload().sub(OVERHEAD).cast::<usize>().read()) }
  }

  /// Physical predecessor, located through its footer.
  ///
  /// # Safety
  ///
  /// The block must not be the prologue, and the predecessor's footer must be
  /// current.
  pub unsafe fn prev(self) -> BlockPtr {
    unsafe { BlockPtr(self.0.sub(self.prev_footer().size())) }
  }

  /// # Safety
  ///
  /// The header must be valid.
  pub unsafe fn classify(self) -> Block {
    unsafe {
      if self.tag().is_allocated() {
        Block::Used(UsedBlock(self))
      } else {
        Block::Free(FreeBlock(self))
      }
    }
  }
}

/// A block whose state has been read from its header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Block {
  Free(FreeBlock),
  Used(UsedBlock),
}

/// A block carrying the free encoding. Only this type can touch list links.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeBlock(BlockPtr);

impl FreeBlock {
  /// # Safety
  ///
  /// The block's header must carry the free encoding.
  pub unsafe fn assume(block: BlockPtr) -> Self {
    debug_assert!(unsafe { !block.tag().is_allocated() });
    FreeBlock(block)
  }

  /// Writes a free header and footer spanning `size` bytes at `block`.
  ///
  /// # Safety
  ///
  /// The span must lie inside the arena and belong to no other live block.
  pub unsafe fn format(
    block: BlockPtr,
    size: usize,
  ) -> Self {
    unsafe { block.set_tags(Tag::pack(size, false)) };
    FreeBlock(block)
  }

  pub fn block(self) -> BlockPtr {
    self.0
  }

  /// # Safety
  ///
  /// See [`BlockPtr::size`].
  pub unsafe fn size(self) -> usize {
    unsafe { self.0.size() }
  }

  fn links(self) -> *mut *mut u8 {
    self.0.payload().cast()
  }

  /// # Safety
  ///
  /// The block must be registered in a free list.
  pub unsafe fn prev_link(self) -> Option<FreeBlock> {
    unsafe { BlockPtr::new(self.links().read()).map(FreeBlock) }
  }

  /// # Safety
  ///
  /// The block must be registered in a free list.
  pub unsafe fn next_link(self) -> Option<FreeBlock> {
    unsafe { BlockPtr::new(self.links().add(1).read()).map(FreeBlock) }
  }

  /// # Safety
  ///
  /// The block's payload must be inside the arena.
  pub unsafe fn set_prev_link(
    self,
    prev: Option<FreeBlock>,
  ) {
    unsafe { self.links().write(link_ptr(prev)) }
  }

  /// # Safety
  ///
  /// The block's payload must be inside the arena.
  pub unsafe fn set_next_link(
    self,
    next: Option<FreeBlock>,
  ) {
    unsafe { self.links().add(1).write(link_ptr(next)) }
  }

  /// Marks the first `size` bytes of this block as allocated.
  ///
  /// # Safety
  ///
  /// The block must have been removed from its free list, and `size` must not
  /// exceed its current size.
  pub unsafe fn allocate(
    self,
    size: usize,
  ) -> UsedBlock {
    unsafe { self.0.set_tags(Tag::pack(size, true)) };
    UsedBlock(self.0)
  }
}

fn link_ptr(link: Option<FreeBlock>) -> *mut u8 {
  link.map_or(ptr::null_mut(), |free| free.0.payload())
}

/// A block carrying the allocated encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsedBlock(BlockPtr);

impl UsedBlock {
  /// # Safety
  ///
  /// The block's header must carry the allocated encoding.
  pub unsafe fn assume(block: BlockPtr) -> Self {
    debug_assert!(unsafe { block.tag().is_allocated() });
    UsedBlock(block)
  }

  pub fn block(self) -> BlockPtr {
    self.0
  }

  pub fn payload(self) -> *mut u8 {
    self.0.payload()
  }

  /// # Safety
  ///
  /// See [`BlockPtr::size`].
  pub unsafe fn size(self) -> usize {
    unsafe { self.0.size() }
  }

  /// Bytes the caller may use.
  ///
  /// # Safety
  ///
  /// See [`BlockPtr::size`].
  pub unsafe fn capacity(self) -> usize {
    unsafe { self.size() - OVERHEAD }
  }

  /// Rewrites header and footer with the free encoding, keeping the size.
  ///
  /// # Safety
  ///
  /// The caller must register the result in a free list before the next
  /// public operation completes.
  pub unsafe fn release(self) -> FreeBlock {
    unsafe { FreeBlock::format(self.0, self.size()) }
  }
}
