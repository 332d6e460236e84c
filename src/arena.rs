use std::{alloc, ptr, ptr::NonNull};

use libc::{c_void, intptr_t, sbrk};

use crate::{align, align::ALIGNMENT, error::ArenaError};

/// A contiguous region that can only grow at its high end.
///
/// The heap formats everything it receives from [`Arena::grow`] as blocks and
/// relies on every region being appended directly after the previous one.
pub trait Arena {
  /// Appends `bytes` to the arena and returns the start of the new region.
  ///
  /// `bytes` is always a multiple of [`ALIGNMENT`]. On error the arena's
  /// bounds are left as they were. Memory an implementation could not hand
  /// out may still have been consumed from the system; see
  /// [`SbrkArena`].
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, ArenaError>;

  /// First byte of the arena.
  fn lower_bound(&self) -> *mut u8;

  /// One past the last byte of the arena.
  fn upper_bound(&self) -> *mut u8;

  /// Bytes handed out so far.
  fn size(&self) -> usize {
    self.upper_bound() as usize - self.lower_bound() as usize
  }

  /// Whether `ptr` lies inside the arena.
  fn contains(
    &self,
    ptr: *const u8,
  ) -> bool {
    ptr >= self.lower_bound().cast_const() && ptr < self.upper_bound().cast_const()
  }
}

/// An arena backed by the process's program break.
///
/// The program break is process-wide, so at most one `SbrkArena` should be
/// growing at a time. If anything else moves the break between two calls to
/// [`Arena::grow`], the next growth fails with
/// [`ArenaError::Discontiguous`]. The bytes that call took from the break
/// are not returned and stay outside the arena.
pub struct SbrkArena {
  start: *mut u8,
  end: *mut u8,
}

impl SbrkArena {
  pub const fn new() -> Self {
    Self {
      start: ptr::null_mut(),
      end: ptr::null_mut(),
    }
  }

  /// Moves the break up to the next [`ALIGNMENT`] boundary and records it as
  /// the arena start.
  unsafe fn claim_start(&mut self) -> Result<(), ArenaError> {
    unsafe {
      let address = sbrk(0);

      if address == usize::MAX as *mut c_void {
        return Err(ArenaError::Refused { requested: 0 });
      }

      let current = address as usize;
      let padding = align!(current) - current;

      if padding > 0 && sbrk(padding as intptr_t) == usize::MAX as *mut c_void {
        return Err(ArenaError::Refused { requested: padding });
      }

      self.start = (address as *mut u8).add(padding);
      self.end = self.start;
      Ok(())
    }
  }
}

impl Default for SbrkArena {
  fn default() -> Self {
    Self::new()
  }
}

impl Arena for SbrkArena {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    if bytes % ALIGNMENT != 0 {
      return Err(ArenaError::InvalidRequest { requested: bytes });
    }

    let increment =
      intptr_t::try_from(bytes).map_err(|_| ArenaError::InvalidRequest { requested: bytes })?;

    unsafe {
      if self.start.is_null() {
        self.claim_start()?;
      }

      let address = sbrk(increment);

      if address == usize::MAX as *mut c_void {
        return Err(ArenaError::Refused { requested: bytes });
      }

      let address = address as *mut u8;

      if address != self.end {
        return Err(ArenaError::Discontiguous {
          expected: self.end as usize,
          actual: address as usize,
        });
      }

      self.end = address.add(bytes);
      NonNull::new(address).ok_or(ArenaError::Refused { requested: bytes })
    }
  }

  fn lower_bound(&self) -> *mut u8 {
    self.start
  }

  fn upper_bound(&self) -> *mut u8 {
    self.end
  }
}

/// A fixed-capacity arena carved out of one aligned allocation.
///
/// Growth succeeds until `capacity` bytes have been handed out and fails with
/// [`ArenaError::Exhausted`] afterwards. Independent instances never interfere
/// with each other, which makes this the arena of choice for tests.
pub struct BoundedArena {
  base: NonNull<u8>,
  layout: alloc::Layout,
  capacity: usize,
  used: usize,
}

impl BoundedArena {
  /// Reserves `capacity` bytes, rounded up to [`ALIGNMENT`].
  pub fn new(capacity: usize) -> Result<Self, ArenaError> {
    let invalid = ArenaError::InvalidRequest {
      requested: capacity,
    };

    let capacity = crate::align::checked_align(capacity).ok_or(invalid.clone())?;
    let layout = alloc::Layout::from_size_align(capacity.max(ALIGNMENT), ALIGNMENT)
      .map_err(|_| invalid)?;

    let raw = unsafe { alloc::alloc_zeroed(layout) };
    let Some(base) = NonNull::new(raw) else {
      alloc::handle_alloc_error(layout);
    };

    Ok(Self {
      base,
      layout,
      capacity,
      used: 0,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn remaining(&self) -> usize {
    self.capacity - self.used
  }
}

impl Arena for BoundedArena {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    if bytes % ALIGNMENT != 0 {
      return Err(ArenaError::InvalidRequest { requested: bytes });
    }

    if bytes > self.remaining() {
      return Err(ArenaError::Exhausted {
        requested: bytes,
        available: self.remaining(),
      });
    }

    let region = unsafe { self.base.add(self.used) };
    self.used += bytes;
    Ok(region)
  }

  fn lower_bound(&self) -> *mut u8 {
    self.base.as_ptr()
  }

  fn upper_bound(&self) -> *mut u8 {
    unsafe { self.base.as_ptr().add(self.used) }
  }
}

impl Drop for BoundedArena {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
  }
}
