/// Alignment guaranteed for every payload handed out by the heap.
pub const ALIGNMENT: usize = 16;

/// Rounds the given byte count up to the next multiple of [`ALIGNMENT`].
///
/// The caller is responsible for keeping `$value` at least `ALIGNMENT - 1`
/// below `usize::MAX`.
///
/// # Examples
///
/// ```rust
/// use brkheap::align;
///
/// assert_eq!(align!(0), 0);
/// assert_eq!(align!(1), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(17), 32);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Distance from `address` to the next `align` boundary. `align` must be a
/// power of two and `address` must be at least `align - 1` below
/// `usize::MAX`.
pub(crate) fn padding_to(
  address: usize,
  align: usize,
) -> usize {
  debug_assert!(align.is_power_of_two());
  ((address + align - 1) & !(align - 1)) - address
}

/// Distance from `address` to the next [`ALIGNMENT`] boundary.
pub(crate) fn padding_for(
  address: usize,
) -> usize {
  padding_to(address, ALIGNMENT)
}
