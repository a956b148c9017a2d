use std::{
  io,
  ptr::{self, NonNull},
};

use libc::{c_void, intptr_t, sbrk};

/// A memory source that behaves like the process data segment: one
/// contiguous region whose upper boundary (the break) moves up to reserve
/// memory and down to release it.
///
/// # Safety
///
/// Implementors must guarantee that every byte between the start of the
/// region and the current break is valid for reads and writes, and that a
/// successful [`extend`](Grower::extend) moves the break by exactly the
/// requested increment.
pub unsafe trait Grower {
  /// Current break.
  fn program_break(&self) -> *mut u8;

  /// Moves the break by `increment` bytes and returns the previous break,
  /// or `None` when the break cannot be moved.
  ///
  /// # Safety
  ///
  /// With a negative increment, the released bytes must no longer be in use.
  unsafe fn extend(
    &mut self,
    increment: isize,
  ) -> Option<NonNull<u8>>;
}

/// The real process break, driven through `sbrk(2)`.
#[derive(Debug, Default)]
pub struct SbrkGrower;

impl SbrkGrower {
  pub const fn new() -> Self {
    Self
  }
}

unsafe impl Grower for SbrkGrower {
  fn program_break(&self) -> *mut u8 {
    unsafe { sbrk(0) as *mut u8 }
  }

  unsafe fn extend(
    &mut self,
    increment: isize,
  ) -> Option<NonNull<u8>> {
    let previous = unsafe { sbrk(increment as intptr_t) };

    if previous == usize::MAX as *mut c_void {
      return None;
    }

    NonNull::new(previous as *mut u8)
  }
}

/// A private, fixed-size data segment reserved with `mmap(2)`.
///
/// The break starts at the bottom of the mapping and can never move past
/// `capacity`. Nothing else in the process touches it, which makes heap
/// growth and release observable byte for byte.
#[derive(Debug)]
pub struct RegionGrower {
  base: NonNull<u8>,
  capacity: usize,
  brk: usize,
}

// The mapping is owned exclusively by this value.
unsafe impl Send for RegionGrower {}

impl RegionGrower {
  /// Reserves `capacity` bytes of anonymous, zero-filled memory.
  pub fn with_capacity(
    capacity: usize,
  ) -> io::Result<Self> {
    let address = unsafe {
      libc::mmap(
        ptr::null_mut(),
        capacity,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if address == libc::MAP_FAILED {
      return Err(io::Error::last_os_error());
    }

    let base = NonNull::new(address as *mut u8)
      .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;

    Ok(Self {
      base,
      capacity,
      brk: 0,
    })
  }

  /// Lowest address of the region.
  pub fn base(&self) -> *mut u8 {
    self.base.as_ptr()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes between the base and the break.
  pub fn used(&self) -> usize {
    self.brk
  }
}

unsafe impl Grower for RegionGrower {
  fn program_break(&self) -> *mut u8 {
    self.base.as_ptr().wrapping_add(self.brk)
  }

  unsafe fn extend(
    &mut self,
    increment: isize,
  ) -> Option<NonNull<u8>> {
    let previous = self.brk;
    let next = previous.checked_add_signed(increment)?;

    if next > self.capacity {
      return None;
    }

    self.brk = next;
    Some(unsafe { self.base.add(previous) })
  }
}

impl Drop for RegionGrower {
  fn drop(&mut self) {
    unsafe {
      libc::munmap(self.base.as_ptr() as *mut c_void, self.capacity);
    }
  }
}
