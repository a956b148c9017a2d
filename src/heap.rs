use std::{
  alloc::{GlobalAlloc, Layout},
  ptr::{self, NonNull},
};

use log::{debug, trace, warn};
use spin::Mutex;

use crate::{
  align,
  align::{ALIGNMENT, padding_for, padding_to},
  block::{Block, HEADER_SIZE},
  error::AllocError,
  grower::Grower,
};

/// Largest payload whose footprint still fits a signed break increment.
const MAX_REQUEST: usize = isize::MAX as usize - HEADER_SIZE - 2 * ALIGNMENT;

/// A block as seen from outside the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub payload: NonNull<u8>,
  pub size: usize,
  pub is_free: bool,
}

/// Totals over every block in the chain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  pub blocks: usize,
  pub free_blocks: usize,
  /// Recorded payload bytes of in-use blocks.
  pub used_bytes: usize,
  /// Recorded payload bytes of free blocks.
  pub free_bytes: usize,
  /// Bytes spanned by the chain, headers and padding included.
  pub heap_bytes: usize,
}

enum Release {
  Returned { extent: usize },
  Marked,
}

struct Blocks {
  next: Option<Block>,
}

impl Iterator for Blocks {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    let current = self.next?;
    self.next = current.next();
    Some(current)
  }
}

/// Header chain plus the memory source it was carved from.
struct Chain<G> {
  head: Option<Block>,
  tail: Option<Block>,
  grower: G,
}

// Every block lives in memory owned by `grower`; the chain is only touched
// under the heap lock.
unsafe impl<G: Send> Send for Chain<G> {}

impl<G: Grower> Chain<G> {
  fn blocks(&self) -> Blocks {
    Blocks { next: self.head }
  }

  /// First free block able to hold `size` bytes.
  fn find_free_block(
    &self,
    size: usize,
  ) -> Option<Block> {
    self
      .blocks()
      .find(|block| block.is_free() && block.size() >= size)
  }

  /// Block whose payload, rounded up to `align`, is `address`, together
  /// with its predecessor in the chain. The rounded address must still lie
  /// inside the payload.
  fn find_previous_block(
    &self,
    address: NonNull<u8>,
    align: usize,
  ) -> Result<(Option<Block>, Block), AllocError> {
    let target = address.as_ptr() as usize;
    let mut previous = None;

    for block in self.blocks() {
      let payload = block.payload().as_ptr() as usize;
      let offset = padding_to(payload, align);
      if payload + offset == target && offset < block.size() {
        return Ok((previous, block));
      }
      if block.address() > target {
        break;
      }
      previous = Some(block);
    }

    Err(AllocError::UnknownPointer)
  }

  /// Carves a new tail block out of fresh break space.
  fn grow(
    &mut self,
    size: usize,
  ) -> Result<Block, AllocError> {
    if size > MAX_REQUEST {
      return Err(AllocError::Overflow);
    }

    let padding = padding_for(self.grower.program_break() as usize);
    let extent = HEADER_SIZE + align!(size);

    let previous = unsafe { self.grower.extend((padding + extent) as isize) }
      .ok_or(AllocError::OutOfMemory)?;

    let address = unsafe { previous.add(padding) };
    debug_assert_eq!(address.as_ptr() as usize % ALIGNMENT, 0);

    let block = unsafe { Block::init(address, size, padding as u8) };

    match self.tail {
      Some(tail) => tail.set_next(Some(block)),
      None => self.head = Some(block),
    }
    self.tail = Some(block);

    Ok(block)
  }

  fn release(
    &mut self,
    address: NonNull<u8>,
    align: usize,
  ) -> Result<Release, AllocError> {
    let (previous, block) = self.find_previous_block(address, align)?;

    if block.is_free() {
      return Err(AllocError::DoubleFree);
    }

    if block.end() != self.grower.program_break() as usize {
      block.set_free(true);
      return Ok(Release::Marked);
    }

    debug_assert_eq!(Some(block), self.tail);

    let extent = block.extent();
    if unsafe { self.grower.extend(-(extent as isize)) }.is_none() {
      block.set_free(true);
      return Ok(Release::Marked);
    }

    match previous {
      Some(previous) => {
        previous.set_next(None);
        self.tail = Some(previous);
      }
      None => {
        self.head = None;
        self.tail = None;
      }
    }

    Ok(Release::Returned { extent })
  }

  fn check(&self) -> Result<(), AllocError> {
    let brk = self.grower.program_break() as usize;

    let (head, tail) = match (self.head, self.tail) {
      (None, None) => return Ok(()),
      (Some(head), Some(tail)) => (head, tail),
      _ => return Err(AllocError::Corrupted("head and tail disagree")),
    };

    let mut current = head;
    loop {
      if current.end() > brk {
        return Err(AllocError::Corrupted("block extends past the break"));
      }

      match current.next() {
        Some(next) if next.address() + HEADER_SIZE > brk => {
          return Err(AllocError::Corrupted("header lies past the break"));
        }
        Some(next) if next.start() < current.end() => {
          return Err(AllocError::Corrupted("blocks overlap or run backwards"));
        }
        Some(next) => current = next,
        None => break,
      }
    }

    if current != tail {
      return Err(AllocError::Corrupted("tail is not the last block"));
    }

    Ok(())
  }
}

/// First-fit heap over a single growable region.
///
/// Every block ever carved from the region stays in one address-ordered
/// chain. Freed blocks are kept for reuse by same-or-smaller requests; only
/// the block that ends exactly at the break is handed back to the grower.
///
/// All chain updates and break moves happen under one lock. `calloc` and
/// `reallocate` are built from the other operations and take that lock once
/// per step, so they are not atomic as a whole.
pub struct Heap<G> {
  chain: Mutex<Chain<G>>,
}

impl<G: Grower> Heap<G> {
  pub const fn new(grower: G) -> Self {
    Self {
      chain: Mutex::new(Chain {
        head: None,
        tail: None,
        grower,
      }),
    }
  }

  /// Hands out at least `size` bytes, reusing the first free block that is
  /// large enough before growing the heap.
  pub fn try_allocate(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let (block, grown) = {
      let mut chain = self.chain.lock();
      match chain.find_free_block(size) {
        Some(block) => {
          block.set_free(false);
          (block, false)
        }
        None => (chain.grow(size)?, true),
      }
    };

    if grown {
      debug!(
        "grew heap for {} bytes, block = {:#x}",
        size,
        block.address()
      );
    } else {
      trace!(
        "reused block {:#x} ({} bytes) for {} bytes",
        block.address(),
        block.size(),
        size
      );
    }

    Ok(block.payload())
  }

  /// Returns a block to the heap.
  ///
  /// When the block ends at the break the memory goes back to the grower;
  /// otherwise the block is only marked free.
  ///
  /// # Safety
  ///
  /// After a successful call the caller must no longer use `payload`.
  pub unsafe fn try_deallocate(
    &self,
    payload: NonNull<u8>,
  ) -> Result<(), AllocError> {
    unsafe { self.try_deallocate_aligned(payload, ALIGNMENT) }
  }

  /// Hands out `size` bytes starting at a multiple of `align`.
  ///
  /// Alignments up to [`ALIGNMENT`] are plain allocations. Larger ones
  /// reserve `align - ALIGNMENT` extra bytes and return the first aligned
  /// address inside the payload.
  pub fn try_allocate_aligned(
    &self,
    size: usize,
    align: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if !align.is_power_of_two() {
      return Err(AllocError::BadAlignment);
    }
    if align <= ALIGNMENT {
      return self.try_allocate(size);
    }
    if size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let padded = size
      .checked_add(align - ALIGNMENT)
      .ok_or(AllocError::Overflow)?;
    let payload = self.try_allocate(padded)?;
    let offset = padding_to(payload.as_ptr() as usize, align);

    trace!("aligned {:?} by {} bytes to {}", payload, offset, align);

    Ok(unsafe { payload.add(offset) })
  }

  /// Returns a block obtained from
  /// [`try_allocate_aligned`](Self::try_allocate_aligned) with the same
  /// `align`.
  ///
  /// # Safety
  ///
  /// After a successful call the caller must no longer use `address`.
  pub unsafe fn try_deallocate_aligned(
    &self,
    address: NonNull<u8>,
    align: usize,
  ) -> Result<(), AllocError> {
    if !align.is_power_of_two() {
      return Err(AllocError::BadAlignment);
    }

    let release = self
      .chain
      .lock()
      .release(address, align.max(ALIGNMENT))?;

    match release {
      Release::Returned { extent } => {
        debug!("released {} bytes at {:?} to the grower", extent, address)
      }
      Release::Marked => trace!("marked {:?} free", address),
    }

    Ok(())
  }

  /// Zero-filled room for `count` elements of `size` bytes each.
  pub fn try_calloc(
    &self,
    count: usize,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if count == 0 || size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let total = count.checked_mul(size).ok_or(AllocError::Overflow)?;
    let payload = self.try_allocate(total)?;

    unsafe { payload.as_ptr().write_bytes(0, total) };

    trace!(
      "zeroed {} x {} bytes at {:?}",
      count,
      size,
      payload
    );

    Ok(payload)
  }

  /// Makes `payload` able to hold `new_size` bytes.
  ///
  /// A block that is already large enough comes back unchanged and keeps
  /// its recorded size. Otherwise the contents move to a new block and the
  /// old one is freed. If the new block cannot be obtained, the old one is
  /// left intact.
  ///
  /// # Safety
  ///
  /// If the returned pointer differs from `payload`, the caller must no
  /// longer use `payload`.
  pub unsafe fn try_reallocate(
    &self,
    payload: NonNull<u8>,
    new_size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if new_size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let old_size = self.usable_size(payload)?;

    if old_size >= new_size {
      trace!("{:?} already holds {} bytes", payload, new_size);
      return Ok(payload);
    }

    let moved = self.try_allocate(new_size)?;

    unsafe {
      ptr::copy_nonoverlapping(payload.as_ptr(), moved.as_ptr(), old_size);
      self.try_deallocate(payload)?;
    }

    trace!("moved {:?} to {:?} ({} bytes)", payload, moved, new_size);

    Ok(moved)
  }

  /// Like [`try_allocate`](Self::try_allocate), with null as the failure value.
  pub fn allocate(
    &self,
    size: usize,
  ) -> *mut u8 {
    self
      .try_allocate(size)
      .map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  /// Like [`try_deallocate`](Self::try_deallocate). Null is ignored, and so
  /// is any pointer the heap does not recognise as a live block.
  ///
  /// # Safety
  ///
  /// The caller must no longer use `payload` after this call.
  pub unsafe fn deallocate(
    &self,
    payload: *mut u8,
  ) {
    let Some(payload) = NonNull::new(payload) else {
      return;
    };

    if let Err(err) = unsafe { self.try_deallocate(payload) } {
      warn!("ignoring free of {:?}: {}", payload, err);
    }
  }

  /// Like [`try_calloc`](Self::try_calloc), with null as the failure value.
  pub fn calloc(
    &self,
    count: usize,
    size: usize,
  ) -> *mut u8 {
    self
      .try_calloc(count, size)
      .map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  /// Like [`try_reallocate`](Self::try_reallocate), with null as the failure
  /// value. A null `payload` fails instead of allocating.
  ///
  /// # Safety
  ///
  /// If a non-null pointer different from `payload` is returned, the caller
  /// must no longer use `payload`.
  pub unsafe fn reallocate(
    &self,
    payload: *mut u8,
    new_size: usize,
  ) -> *mut u8 {
    let result = NonNull::new(payload)
      .ok_or(AllocError::NullPointer)
      .and_then(|payload| unsafe { self.try_reallocate(payload, new_size) });

    match result {
      Ok(moved) => moved.as_ptr(),
      Err(AllocError::UnknownPointer | AllocError::DoubleFree) => {
        warn!("refusing to reallocate {:?}", payload);
        ptr::null_mut()
      }
      Err(_) => ptr::null_mut(),
    }
  }

  /// Recorded size of the live block owning `payload`.
  pub fn usable_size(
    &self,
    payload: NonNull<u8>,
  ) -> Result<usize, AllocError> {
    let chain = self.chain.lock();
    let (_, block) = chain.find_previous_block(payload, ALIGNMENT)?;

    if block.is_free() {
      return Err(AllocError::DoubleFree);
    }

    Ok(block.size())
  }

  pub fn program_break(&self) -> *mut u8 {
    self.chain.lock().grower.program_break()
  }

  /// Calls `f` for every block in chain order.
  ///
  /// The heap stays locked for the whole walk, so `f` must not call back
  /// into this heap.
  pub fn for_each_block(
    &self,
    mut f: impl FnMut(BlockInfo),
  ) {
    let chain = self.chain.lock();

    for block in chain.blocks() {
      f(BlockInfo {
        payload: block.payload(),
        size: block.size(),
        is_free: block.is_free(),
      });
    }
  }

  pub fn stats(&self) -> HeapStats {
    let chain = self.chain.lock();
    let mut stats = HeapStats::default();

    for block in chain.blocks() {
      stats.blocks += 1;
      if block.is_free() {
        stats.free_blocks += 1;
        stats.free_bytes += block.size();
      } else {
        stats.used_bytes += block.size();
      }
    }

    if let (Some(head), Some(tail)) = (chain.head, chain.tail) {
      stats.heap_bytes = tail.end() - head.start();
    }

    stats
  }

  /// Walks the chain and verifies its structural invariants.
  pub fn check_integrity(&self) -> Result<(), AllocError> {
    self.chain.lock().check()
  }
}

unsafe impl<G: Grower> GlobalAlloc for Heap<G> {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    self
      .try_allocate_aligned(layout.size(), layout.align())
      .map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() <= ALIGNMENT {
      return self.calloc(1, layout.size());
    }

    let address = unsafe { self.alloc(layout) };
    if !address.is_null() {
      unsafe { address.write_bytes(0, layout.size()) };
    }
    address
  }

  unsafe fn dealloc(
    &self,
    address: *mut u8,
    layout: Layout,
  ) {
    let Some(address) = NonNull::new(address) else {
      return;
    };

    if let Err(err) = unsafe { self.try_deallocate_aligned(address, layout.align()) } {
      warn!("ignoring dealloc of {:?}: {}", address, err);
    }
  }

  unsafe fn realloc(
    &self,
    address: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if layout.align() <= ALIGNMENT {
      return unsafe { self.reallocate(address, new_size) };
    }

    let Ok(new_layout) = Layout::from_size_align(new_size, layout.align()) else {
      return ptr::null_mut();
    };

    let moved = unsafe { self.alloc(new_layout) };
    if !moved.is_null() {
      unsafe {
        ptr::copy_nonoverlapping(address, moved, layout.size().min(new_size));
        self.dealloc(address, layout);
      }
    }
    moved
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grower::RegionGrower;

  fn heap(capacity: usize) -> Heap<RegionGrower> {
    Heap::new(RegionGrower::with_capacity(capacity).unwrap())
  }

  #[test]
  fn test_alloc() {
    let heap = heap(1 << 16);

    unsafe {
      let first_addr = heap.allocate(8) as *mut u64;

      *first_addr = 3u64;

      assert_eq!(*first_addr, 3);

      let size: usize = 6;

      let second_addr = heap.allocate(size * 2) as *mut u16;

      for i in 0..size {
        *(second_addr.add(i)) = (i + 1) as u16;
      }

      assert_eq!(*first_addr, 3);

      for i in 0..size {
        assert_eq!((i + 1) as u16, *(second_addr.add(i)))
      }

      heap.deallocate(first_addr as *mut u8);

      let third_addr = heap.allocate(4) as *mut u32;

      assert_eq!(first_addr as *mut u32, third_addr);

      heap.deallocate(third_addr as *mut u8);

      let fourth_addr = heap.allocate(16) as *mut u128;

      *fourth_addr = 25;

      assert!(fourth_addr > third_addr as *mut u128);

      assert_eq!(*fourth_addr, 25);
    }

    heap.check_integrity().unwrap();
  }

  #[test]
  fn test_zero_size_fails_without_growth() {
    let heap = heap(4096);
    let before = heap.program_break();

    assert_eq!(heap.try_allocate(0), Err(AllocError::ZeroSize));
    assert!(heap.allocate(0).is_null());
    unsafe { heap.deallocate(ptr::null_mut()) };

    assert_eq!(heap.program_break(), before);
    assert_eq!(heap.stats(), HeapStats::default());
  }

  #[test]
  fn test_payloads_are_aligned() {
    let heap = heap(1 << 16);

    for size in [1, 3, 15, 16, 17, 100] {
      let payload = heap.try_allocate(size).unwrap();
      assert_eq!(payload.as_ptr() as usize % ALIGNMENT, 0);
    }
  }

  #[test]
  fn test_topmost_release_restores_break() {
    let heap = heap(4096);
    let before = heap.program_break();

    let payload = heap.try_allocate(100).unwrap();
    assert_eq!(
      heap.program_break() as usize,
      before as usize + HEADER_SIZE + align!(100)
    );

    unsafe { heap.try_deallocate(payload).unwrap() };

    assert_eq!(heap.program_break(), before);
    assert_eq!(heap.stats().blocks, 0);
  }

  #[test]
  fn test_sole_block_comes_back_at_same_address() {
    let heap = heap(4096);

    let payload = heap.try_allocate(64).unwrap();
    unsafe { heap.try_deallocate(payload).unwrap() };
    let brk = heap.program_break();

    let again = heap.try_allocate(32).unwrap();
    assert_eq!(again, payload);

    unsafe { heap.try_deallocate(again).unwrap() };
    assert_eq!(heap.program_break(), brk);
  }

  #[test]
  fn test_reuse_does_not_grow() {
    let heap = heap(4096);

    let first = heap.try_allocate(64).unwrap();
    let _guard = heap.try_allocate(8).unwrap();

    unsafe { heap.try_deallocate(first).unwrap() };

    let brk = heap.program_break();
    let reused = heap.try_allocate(10).unwrap();

    assert_eq!(reused, first);
    assert_eq!(heap.program_break(), brk);
    assert_eq!(heap.usable_size(reused), Ok(64));
  }

  #[test]
  fn test_first_fit_not_best_fit() {
    let heap = heap(4096);

    let large = heap.try_allocate(200).unwrap();
    let small = heap.try_allocate(16).unwrap();
    let _guard = heap.try_allocate(1).unwrap();

    unsafe {
      heap.try_deallocate(large).unwrap();
      heap.try_deallocate(small).unwrap();
    }

    assert_eq!(heap.try_allocate(10), Ok(large));
    assert_eq!(heap.try_allocate(10), Ok(small));
  }

  #[test]
  fn test_release_is_not_cascaded() {
    let heap = heap(4096);

    let lower = heap.try_allocate(32).unwrap();
    let upper = heap.try_allocate(32).unwrap();

    unsafe {
      heap.try_deallocate(lower).unwrap();
      heap.try_deallocate(upper).unwrap();
    }

    let stats = heap.stats();
    assert_eq!(stats.blocks, 1);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.free_bytes, 32);
    assert_eq!(
      heap.program_break() as usize,
      lower.as_ptr() as usize + align!(32)
    );

    heap.check_integrity().unwrap();
  }

  #[test]
  fn test_out_of_memory_leaves_state() {
    let heap = heap(4096);

    let payload = heap.try_allocate(64).unwrap();
    let brk = heap.program_break();
    let stats = heap.stats();

    assert_eq!(heap.try_allocate(8192), Err(AllocError::OutOfMemory));
    assert_eq!(heap.try_allocate(usize::MAX), Err(AllocError::Overflow));

    assert_eq!(heap.program_break(), brk);
    assert_eq!(heap.stats(), stats);
    assert_eq!(heap.usable_size(payload), Ok(64));
  }

  #[test]
  fn test_calloc_zeroes_reused_memory() {
    let heap = heap(4096);

    let dirty = heap.try_allocate(64).unwrap();
    unsafe { dirty.as_ptr().write_bytes(0xAB, 64) };
    let _guard = heap.try_allocate(8).unwrap();
    unsafe { heap.try_deallocate(dirty).unwrap() };

    let zeroed = heap.try_calloc(4, 8).unwrap();
    assert_eq!(zeroed, dirty);

    let bytes = unsafe { std::slice::from_raw_parts(zeroed.as_ptr(), 32) };
    assert!(bytes.iter().all(|&b| b == 0));
  }

  #[test]
  fn test_calloc_sizes_by_count_times_size() {
    let heap = heap(4096);

    let payload = heap.try_calloc(10, 10).unwrap();
    assert_eq!(heap.usable_size(payload), Ok(100));
  }

  #[test]
  fn test_calloc_rejects_bad_arguments() {
    let heap = heap(4096);

    assert_eq!(heap.try_calloc(0, 8), Err(AllocError::ZeroSize));
    assert_eq!(heap.try_calloc(8, 0), Err(AllocError::ZeroSize));
    assert_eq!(
      heap.try_calloc(2, usize::MAX / 3 * 2),
      Err(AllocError::Overflow)
    );
    assert!(heap.calloc(usize::MAX, 2).is_null());
    assert_eq!(heap.stats().blocks, 0);
  }

  #[test]
  fn test_realloc_shrink_keeps_block() {
    let heap = heap(4096);

    unsafe {
      let payload = heap.allocate(10);
      let shrunk = heap.reallocate(payload, 5);

      assert_eq!(shrunk, payload);
      assert_eq!(heap.usable_size(NonNull::new(shrunk).unwrap()), Ok(10));
    }
  }

  #[test]
  fn test_realloc_grow_moves_contents() {
    let heap = heap(4096);

    unsafe {
      let payload = heap.try_allocate(10).unwrap();
      for i in 0..10 {
        payload.as_ptr().add(i).write(i as u8);
      }

      let grown = heap.try_reallocate(payload, 20).unwrap();
      assert_ne!(grown, payload);

      for i in 0..10 {
        assert_eq!(grown.as_ptr().add(i).read(), i as u8);
      }

      assert_eq!(heap.try_deallocate(payload), Err(AllocError::DoubleFree));
      assert_eq!(heap.usable_size(grown), Ok(20));
    }
  }

  #[test]
  fn test_realloc_failure_keeps_old_block() {
    let heap = heap(4096);

    unsafe {
      let payload = heap.try_allocate(16).unwrap();
      payload.as_ptr().write_bytes(0x7F, 16);

      assert!(heap.reallocate(payload.as_ptr(), 1 << 20).is_null());
      assert!(heap.reallocate(ptr::null_mut(), 8).is_null());
      assert!(heap.reallocate(payload.as_ptr(), 0).is_null());

      assert_eq!(heap.usable_size(payload), Ok(16));
      assert_eq!(payload.as_ptr().read(), 0x7F);
    }
  }

  #[test]
  fn test_foreign_pointers_are_rejected() {
    let heap = heap(4096);
    let payload = heap.try_allocate(64).unwrap();
    let mut local = 0u8;

    unsafe {
      let inside = payload.add(8);
      assert_eq!(heap.try_deallocate(inside), Err(AllocError::UnknownPointer));
      assert_eq!(
        heap.try_deallocate(NonNull::from(&mut local)),
        Err(AllocError::UnknownPointer)
      );

      heap.deallocate(inside.as_ptr());
      assert!(heap.reallocate(inside.as_ptr(), 128).is_null());
    }

    assert_eq!(heap.stats().free_blocks, 0);
    assert_eq!(heap.usable_size(payload), Ok(64));
  }

  #[test]
  fn test_double_free_is_rejected() {
    let heap = heap(4096);

    let lower = heap.try_allocate(16).unwrap();
    let _upper = heap.try_allocate(16).unwrap();

    unsafe {
      heap.try_deallocate(lower).unwrap();
      assert_eq!(heap.try_deallocate(lower), Err(AllocError::DoubleFree));
    }

    assert_eq!(heap.stats().free_blocks, 1);
  }

  #[test]
  fn test_for_each_block_in_address_order() {
    let heap = heap(4096);

    let sizes = [8, 40, 3];
    let payloads: Vec<_> = sizes
      .iter()
      .map(|&size| heap.try_allocate(size).unwrap())
      .collect();
    unsafe { heap.try_deallocate(payloads[1]).unwrap() };

    let mut seen = Vec::new();
    heap.for_each_block(|info| seen.push(info));

    assert_eq!(seen.len(), 3);
    for (info, (&payload, &size)) in seen.iter().zip(payloads.iter().zip(&sizes)) {
      assert_eq!(info.payload, payload);
      assert_eq!(info.size, size);
    }
    assert_eq!(
      seen.iter().map(|info| info.is_free).collect::<Vec<_>>(),
      [false, true, false]
    );

    let stats = heap.stats();
    assert_eq!(stats.used_bytes, 11);
    assert_eq!(stats.free_bytes, 40);
    assert_eq!(stats.heap_bytes, 3 * HEADER_SIZE + 16 + 48 + 16);
  }

  #[test]
  fn test_global_alloc_interface() {
    let heap = heap(4096);

    unsafe {
      let layout = Layout::new::<u64>();
      let address = heap.alloc_zeroed(layout) as *mut u64;
      assert!(!address.is_null());
      assert_eq!(*address, 0);

      *address = 0xDEAD_BEEF;
      let grown = heap.realloc(address as *mut u8, layout, 64) as *mut u64;
      assert_eq!(*grown, 0xDEAD_BEEF);

      heap.dealloc(grown as *mut u8, Layout::from_size_align(64, 8).unwrap());
    }

    heap.check_integrity().unwrap();
  }

  #[test]
  fn test_offset_break_is_fully_released() {
    let mut region = RegionGrower::with_capacity(4096).unwrap();
    unsafe { region.extend(8).unwrap() };
    let heap = Heap::new(region);
    let before = heap.program_break();

    let payload = heap.try_allocate(24).unwrap();
    assert_eq!(payload.as_ptr() as usize % ALIGNMENT, 0);
    assert_eq!(heap.stats().heap_bytes, 8 + HEADER_SIZE + 32);
    heap.check_integrity().unwrap();

    unsafe { heap.try_deallocate(payload).unwrap() };

    assert_eq!(heap.program_break(), before);
    assert_eq!(heap.stats().blocks, 0);
  }

  #[test]
  fn test_over_aligned_layouts() {
    let heap = heap(1 << 16);

    unsafe {
      let _small = heap.try_allocate(8).unwrap();

      let layout = Layout::from_size_align(100, 128).unwrap();
      let address = heap.alloc(layout);
      assert!(!address.is_null());
      assert_eq!(address as usize % 128, 0);
      address.write_bytes(0x42, 100);

      let zeroed = heap.alloc_zeroed(Layout::from_size_align(64, 64).unwrap());
      assert_eq!(zeroed as usize % 64, 0);
      assert!(std::slice::from_raw_parts(zeroed, 64).iter().all(|&b| b == 0));

      let grown = heap.realloc(address, layout, 300);
      assert_eq!(grown as usize % 128, 0);
      assert!(std::slice::from_raw_parts(grown, 100).iter().all(|&b| b == 0x42));

      let grown = NonNull::new(grown).unwrap();
      assert_eq!(
        heap.try_deallocate_aligned(grown.add(16), 128),
        Err(AllocError::UnknownPointer)
      );
      assert_eq!(
        heap.try_deallocate_aligned(grown, 3),
        Err(AllocError::BadAlignment)
      );

      heap.try_deallocate_aligned(grown, 128).unwrap();
      heap.dealloc(zeroed, Layout::from_size_align(64, 64).unwrap());
    }

    heap.check_integrity().unwrap();
    assert_eq!(heap.stats().used_bytes, 8);
  }

  #[test]
  fn test_aligned_lookup_stays_inside_payload() {
    let heap = heap(4096);

    let _first = heap.try_allocate(16).unwrap();
    let middle = heap.try_allocate(16).unwrap();
    let last = heap.try_allocate(16).unwrap();

    // The region is page aligned, so the middle payload rounded up to 64
    // lands exactly on the last payload.
    let middle_addr = middle.as_ptr() as usize;
    assert_eq!(middle_addr + padding_to(middle_addr, 64), last.as_ptr() as usize);

    unsafe { heap.try_deallocate_aligned(last, 64).unwrap() };

    assert_eq!(heap.usable_size(middle), Ok(16));
    assert_eq!(heap.usable_size(last), Err(AllocError::UnknownPointer));
    assert_eq!(heap.stats().used_bytes, 32);
  }

  #[test]
  fn test_calloc_is_traced() {
    capture::install();

    let heap = heap(4096);
    heap.try_calloc(7, 13).unwrap();

    assert!(capture::contains("zeroed 7 x 13 bytes"));
  }

  mod capture {
    use std::sync::{Mutex, Once};

    use log::{LevelFilter, Log, Metadata, Record};

    static LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());
    static INSTALL: Once = Once::new();

    struct Capture;

    impl Log for Capture {
      fn enabled(
        &self,
        _metadata: &Metadata,
      ) -> bool {
        true
      }

      fn log(
        &self,
        record: &Record,
      ) {
        LINES.lock().unwrap().push(record.args().to_string());
      }

      fn flush(&self) {}
    }

    pub fn install() {
      INSTALL.call_once(|| {
        log::set_logger(&Capture).unwrap();
        log::set_max_level(LevelFilter::Trace);
      });
    }

    pub fn contains(
      needle: &str,
    ) -> bool {
      LINES.lock().unwrap().iter().any(|line| line.starts_with(needle))
    }
  }
}
