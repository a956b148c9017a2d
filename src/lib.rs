//! # brkheap - A First-Fit Heap on the Program Break
//!
//! This crate provides a small **first-fit** allocator that manages memory
//! carved from one growable region, by default the process data segment
//! moved with `sbrk(2)`. It does not rely on any other allocator.
//!
//! ## Overview
//!
//! Every request that cannot be served from an existing free block moves the
//! break up and appends a new block to the chain:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         HEAP MEMORY                                  │
//!   │                                                                      │
//!   │   ┌──────┬──────┬──────┬──────┬────────────────────────────────────┐ │
//!   │   │ B1   │ B2   │ B3   │ B4   │           Unreserved               │ │
//!   │   │ used │ free │ used │ used │                                    │ │
//!   │   └──────┴──────┴──────┴──────┴────────────────────────────────────┘ │
//!   │   ▲                           ▲                                      │
//!   │   │                           │                                      │
//!   │  head                       Program                                  │
//!   │   └─ next ─▶ B2 ─▶ B3 ─▶ B4    Break                                  │
//!   │                   (tail)                                             │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   allocate(n): first free block with size >= n, else grow at the break.
//!   free(B4):    B4 ends at the break, so the break moves back down.
//!   free(B2):    B2 is only marked free and kept for reuse.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   brkheap
//!   ├── align      - align! macro and the 16-byte ALIGNMENT
//!   ├── block      - in-band block header (internal)
//!   ├── error      - AllocError
//!   ├── global     - process-wide HEAP and malloc/free/calloc/realloc
//!   ├── grower     - Grower trait, SbrkGrower, RegionGrower
//!   └── heap       - Heap implementation
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use brkheap::global::{free, malloc};
//!
//! let address = malloc(8) as *mut u64;
//! assert!(!address.is_null());
//!
//! unsafe {
//!     *address = 42;
//!     println!("Value: {}", *address);
//!     free(address as *mut u8);
//! }
//! ```
//!
//! A private heap over its own region is handy when the real break is
//! shared with other allocators:
//!
//! ```rust
//! use brkheap::{Heap, RegionGrower};
//!
//! let heap = Heap::new(RegionGrower::with_capacity(1 << 16).unwrap());
//! let payload = heap.try_allocate(100).unwrap();
//! assert_eq!(heap.usable_size(payload), Ok(100));
//! unsafe { heap.try_deallocate(payload).unwrap() };
//! ```
//!
//! ## Blocks
//!
//! ```text
//!   Single Allocation:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ is_free: false  │  │  │  N bytes, rounded up to  │  │
//!   │  │ next: +distance │  │  │  a multiple of 16        │  │
//!   │  └─────────────────┘  │  └──────────────────────────┘  │
//!   │   HEADER_SIZE bytes   │                                │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user (16-byte aligned)
//! ```
//!
//! `next` is the distance to the following header rather than an address,
//! and pointers passed back to the heap are looked up in the chain before
//! anything is changed. Unknown pointers and double frees are refused.
//!
//! ## Limitations
//!
//! - **No splitting or coalescing**: a reused block keeps its full size
//! - **Limited release**: only the block ending at the break goes back to the OS,
//!   one per call
//! - **Linear search**: allocation and free walk the whole chain
//! - **Over-aligned requests waste space**: alignments above 16 reserve
//!   `align - 16` extra bytes per block
//! - **Unix-only**: requires `libc` (`sbrk`, `mmap`)
//!
//! ## Safety
//!
//! Freeing and reallocating end the caller's ownership of a block, so those
//! operations are `unsafe`.

pub mod align;
mod block;
pub mod error;
pub mod global;
pub mod grower;
mod heap;

pub use block::HEADER_SIZE;
pub use error::AllocError;
pub use grower::{Grower, RegionGrower, SbrkGrower};
pub use heap::{BlockInfo, Heap, HeapStats};
