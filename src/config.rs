//! Allocator tuning parameters.

/// Configuration for a [`Heap`](crate::Heap).
///
/// Both values shape observable fragmentation behaviour, so the defaults are
/// the ones the allocator is specified with. Tests override them to show the
/// effect of each knob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapConfig {
  /// Minimum number of bytes requested from the arena when no free block
  /// fits. Larger requests grow the arena by exactly the block size.
  ///
  /// Default: 4096. Also the size of the first free block made by `init`.
  /// Values below the minimum block size are raised to it.
  pub extend_size: usize,

  /// Maximum number of candidates examined in the target size class before
  /// falling back to larger classes.
  ///
  /// Default: 32.
  pub search_limit: usize,
}

impl HeapConfig {
  /// Default arena extension quantum.
  pub const DEFAULT_EXTEND_SIZE: usize = 4096;

  /// Default search depth within the target class.
  pub const DEFAULT_SEARCH_LIMIT: usize = 32;

  pub fn new() -> Self {
    Self {
      extend_size: Self::DEFAULT_EXTEND_SIZE,
      search_limit: Self::DEFAULT_SEARCH_LIMIT,
    }
  }

  pub fn with_extend_size(
    mut self,
    extend_size: usize,
  ) -> Self {
    self.extend_size = extend_size;
    self
  }

  pub fn with_search_limit(
    mut self,
    search_limit: usize,
  ) -> Self {
    self.search_limit = search_limit;
    self
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::new()
  }
}
