//! # segalloc - A Segregated-Fit Memory Allocator Library
//!
//! This crate provides a general-purpose **malloc/free/realloc/calloc**
//! allocator in Rust. It manages a single arena that only ever grows, by
//! default the program break moved with `sbrk(2)`.
//!
//! ## Overview
//!
//! The arena is cut into blocks. Each block carries a boundary tag (its size
//! and an allocated bit) at both ends, so the allocator can step to either
//! physical neighbour in constant time:
//!
//! ```text
//!   Arena Layout:
//!
//!   ┌─────┬──────────┬─────────┬────────────┬─────────┬──────────────┬─────┐
//!   │ pad │ prologue │ block A │  block B   │ block C │   block D    │ epi │
//!   │  0  │  16 | 1  │ 48 | 1  │  128 | 0   │ 32 | 1  │  3888 | 0    │ 0|1 │
//!   └─────┴──────────┴─────────┴────────────┴─────────┴──────────────┴─────┘
//!   ▲                                                                      ▲
//!   │                                                                      │
//!   lower bound                                                  upper bound
//! ```
//!
//! Free blocks are indexed by size class. Each class holds a doubly linked
//! list threaded through the free blocks' own payloads:
//!
//! ```text
//!   Segregated Free Lists:
//!
//!   class  1 [32, 64)     ──► A' ◄─► F ◄─► K
//!   class  2 [64, 128)    ──► (empty)
//!   class  3 [128, 256)   ──► B
//!     ...
//!   class  7 [2048, 4096) ──► D
//!     ...
//!   class 13 [128K, ∞)    ──► (empty)
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macro and helpers (align!)
//!   ├── arena      - Arena trait, SbrkArena, BoundedArena
//!   ├── block      - Boundary tags and the raw block view (internal)
//!   ├── check      - Heap consistency checker
//!   ├── config     - HeapConfig
//!   ├── error      - ArenaError
//!   ├── heap       - Heap: extend, coalesce, place, public API
//!   └── seglist    - Segregated free lists (internal)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{BoundedArena, Heap};
//!
//! let mut heap = Heap::new(BoundedArena::new(1 << 20).unwrap());
//! assert!(heap.init());
//!
//! unsafe {
//!     let ptr = heap.malloc(64);
//!     assert!(!ptr.is_null());
//!     assert_eq!(ptr as usize % 16, 0);
//!
//!     ptr.write_bytes(0xAB, 64);
//!
//!     let ptr = heap.realloc(ptr, 256);
//!     assert_eq!(*ptr.add(63), 0xAB);
//!
//!     heap.free(ptr);
//! }
//!
//! assert!(heap.check().is_ok());
//! ```
//!
//! ## How It Works
//!
//! `malloc` turns the request into a block size (request plus header and
//! footer, rounded to 16, at least 32) and then:
//!
//! ```text
//!   1. scan up to 32 blocks in the request's own class, first fit wins
//!   2. otherwise take the head of the next non-empty larger class
//!   3. otherwise grow the arena by max(block size, 4096)
//!   4. split the block if the leftover can stand as a block on its own
//! ```
//!
//! `free` marks the block free, lists it, and merges it with free physical
//! neighbours immediately, so no two free blocks are ever adjacent:
//!
//! ```text
//!   Before free(B):   │ A: free │ B: used │ C: free │
//!   After free(B):    │        A+B+C: free          │
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Arena never shrinks**: Freed memory is reused, never returned
//! - **realloc always moves**: Allocate, copy, free
//! - **calloc does not check overflow**: `count * size` wraps
//!
//! ## Safety
//!
//! Allocation, deallocation and reallocation are `unsafe`: calling them
//! before a successful [`Heap::init`], freeing a pointer twice, or passing a
//! pointer this heap did not hand out is undefined behaviour. [`Heap::check`]
//! can be used during development to catch corruption.

pub mod align;
mod arena;
mod block;
mod check;
mod config;
mod error;
mod heap;
mod seglist;

pub use arena::{Arena, BoundedArena, SbrkArena};
pub use block::MIN_BLOCK_SIZE;
pub use check::{HeapReport, Violation};
pub use config::HeapConfig;
pub use error::ArenaError;
pub use heap::{Heap, block_size_for};
pub use seglist::{CLASS_THRESHOLDS, NUM_CLASSES, class_of};
