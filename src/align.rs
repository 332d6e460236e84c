/// Payload alignment guaranteed by the allocator, in bytes.
pub const ALIGNMENT: usize = 16;

/// Rounds `value` up to the next multiple of [`ALIGNMENT`].
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align!(1), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(40), 48);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Overflow-checked version of [`align!`].
pub const fn checked_align(value: usize) -> Option<usize> {
  match value.checked_add(ALIGNMENT - 1) {
    Some(padded) => Some(padded & !(ALIGNMENT - 1)),
    None => None,
  }
}

/// Whether `ptr` sits on an [`ALIGNMENT`] boundary.
pub fn is_aligned(ptr: *const u8) -> bool {
  (ptr as usize) % ALIGNMENT == 0
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_align() {
    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (ALIGNMENT * i + 1)..=(ALIGNMENT * (i + 1));

      let expected_alignment = ALIGNMENT * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
        assert_eq!(Some(expected), checked_align(size));
      }
    }
  }

  #[test]
  fn test_checked_align_overflow() {
    assert_eq!(checked_align(usize::MAX), None);
    assert_eq!(checked_align(usize::MAX - 14), None);
    assert_eq!(checked_align(usize::MAX - 15), Some(usize::MAX - 15));
  }

  #[test]
  fn test_is_aligned() {
    assert!(is_aligned(0x1000 as *const u8));
    assert!(is_aligned(0x30 as *const u8));
    assert!(!is_aligned(0x38 as *const u8));
    assert!(!is_aligned(0x1 as *const u8));
  }
}
