use std::{mem, num::NonZeroUsize, ptr::NonNull};

use crate::align;

/// Metadata written in front of every payload.
///
/// `next` is the forward distance in bytes to the following header. Headers
/// are appended at strictly increasing addresses, so the distance is never
/// zero and `None` marks the tail.
///
/// `lead` counts the bytes the break was advanced by, below the header, to
/// bring it to an aligned address. They belong to the block and go back to
/// the grower with it.
#[repr(C, align(16))]
pub struct Header {
  pub size: usize,
  pub is_free: bool,
  pub lead: u8,
  pub next: Option<NonZeroUsize>,
}

/// Bytes taken by a [`Header`]; always a multiple of [`ALIGNMENT`](crate::align::ALIGNMENT).
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

/// Handle to a header living inside the managed heap.
///
/// A `Block` is only produced by [`Block::init`] or by following `next` from
/// another block, and the heap unlinks it before handing its memory back to
/// the grower. Holding one therefore means the header behind it is readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block(NonNull<Header>);

impl Block {
  /// Writes a fresh in-use, unlinked header at `address`, preceded by
  /// `lead` bytes of alignment padding.
  ///
  /// # Safety
  ///
  /// `address` must be aligned to `ALIGNMENT`, `lead` must be below
  /// `ALIGNMENT`, and the `lead + HEADER_SIZE + align!(size)` bytes starting
  /// `lead` bytes below `address` must be valid for writes and owned by the
  /// heap.
  pub unsafe fn init(
    address: NonNull<u8>,
    size: usize,
    lead: u8,
  ) -> Self {
    let header = address.cast::<Header>();
    unsafe {
      header.write(Header {
        size,
        is_free: false,
        lead,
        next: None,
      });
    }
    Self(header)
  }

  pub fn address(self) -> usize {
    self.0.as_ptr() as usize
  }

  /// First byte handed out to the caller.
  pub fn payload(self) -> NonNull<u8> {
    unsafe { self.0.cast::<u8>().add(HEADER_SIZE) }
  }

  pub fn size(self) -> usize {
    unsafe { (*self.0.as_ptr()).size }
  }

  pub fn lead(self) -> usize {
    unsafe { (*self.0.as_ptr()).lead as usize }
  }

  /// First byte of the block's footprint, padding included.
  pub fn start(self) -> usize {
    self.address() - self.lead()
  }

  pub fn is_free(self) -> bool {
    unsafe { (*self.0.as_ptr()).is_free }
  }

  pub fn set_free(
    self,
    is_free: bool,
  ) {
    unsafe { (*self.0.as_ptr()).is_free = is_free }
  }

  pub fn next(self) -> Option<Block> {
    let distance = unsafe { (*self.0.as_ptr()).next }?;
    Some(Block(unsafe { self.0.byte_add(distance.get()) }))
  }

  /// Links `next` after this block. `next` must sit at a higher address.
  pub fn set_next(
    self,
    next: Option<Block>,
  ) {
    let distance = next.map(|next| {
      debug_assert!(next.address() > self.address(), "chain must grow upward");
      NonZeroUsize::new(next.address() - self.address())
    });
    unsafe { (*self.0.as_ptr()).next = distance.flatten() }
  }

  /// Bytes the block occupies on the heap, leading padding and header
  /// included.
  pub fn extent(self) -> usize {
    self.lead() + HEADER_SIZE + align!(self.size())
  }

  /// Address one past the block's last byte.
  pub fn end(self) -> usize {
    self.start() + self.extent()
  }
}
