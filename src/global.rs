//! The process-wide heap, carved from the real program break.
//!
//! `sbrk(2)` moves a single break shared by the whole process. Anything else
//! that moves it (the system allocator included) simply makes the affected
//! blocks non-topmost, so they are kept for reuse instead of being released.

use crate::{grower::SbrkGrower, heap::Heap};

pub static HEAP: Heap<SbrkGrower> = Heap::new(SbrkGrower::new());

/// Allocates `size` bytes from [`HEAP`]; null on failure or when `size` is 0.
pub fn malloc(
  size: usize,
) -> *mut u8 {
  HEAP.allocate(size)
}

/// Frees a pointer obtained from this module. Null is ignored.
///
/// # Safety
///
/// `address` must not be used after this call.
pub unsafe fn free(
  address: *mut u8,
) {
  unsafe { HEAP.deallocate(address) }
}

/// Zero-filled room for `count` elements of `size` bytes from [`HEAP`].
pub fn calloc(
  count: usize,
  size: usize,
) -> *mut u8 {
  HEAP.calloc(count, size)
}

/// Resizes a block obtained from this module; null on failure.
///
/// # Safety
///
/// If a different non-null pointer is returned, `address` must not be used
/// afterwards.
pub unsafe fn realloc(
  address: *mut u8,
  size: usize,
) -> *mut u8 {
  unsafe { HEAP.reallocate(address, size) }
}
