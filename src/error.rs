//! Errors reported by arena primitives.

use std::error::Error;
use std::fmt;

/// Reasons an arena could not grow.
///
/// The public allocation calls collapse every variant into a null pointer;
/// the variant is only visible to callers driving an [`Arena`](crate::Arena)
/// directly and in the allocator's debug log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
  /// A fixed-capacity arena has no room left.
  Exhausted {
    /// Number of bytes requested.
    requested: usize,
    /// Bytes still available.
    available: usize,
  },
  /// The operating system refused to move the program break.
  Refused {
    /// Number of bytes requested.
    requested: usize,
  },
  /// The program break moved underneath the arena, so the new region is not
  /// contiguous with the old one.
  Discontiguous {
    /// Address the arena expected the region to start at.
    expected: usize,
    /// Address the region actually starts at.
    actual: usize,
  },
  /// The request is not a multiple of the allocator alignment, or does not
  /// fit the platform's increment type.
  InvalidRequest {
    /// Number of bytes requested.
    requested: usize,
  },
}

impl fmt::Display for ArenaError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::Exhausted { requested, available } => {
        write!(
          f,
          "arena exhausted: requested {requested} bytes, {available} bytes available"
        )
      }
      Self::Refused { requested } => {
        write!(f, "program break refused to grow by {requested} bytes")
      }
      Self::Discontiguous { expected, actual } => {
        write!(
          f,
          "arena is no longer contiguous: expected {expected:#x}, got {actual:#x}"
        )
      }
      Self::InvalidRequest { requested } => {
        write!(f, "invalid growth request of {requested} bytes")
      }
    }
  }
}

impl Error for ArenaError {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_display() {
    let err = ArenaError::Exhausted {
      requested: 4096,
      available: 32,
    };
    assert_eq!(
      err.to_string(),
      "arena exhausted: requested 4096 bytes, 32 bytes available"
    );

    let err = ArenaError::Discontiguous {
      expected: 0x1000,
      actual: 0x2000,
    };
    assert_eq!(
      err.to_string(),
      "arena is no longer contiguous: expected 0x1000, got 0x2000"
    );
  }
}
