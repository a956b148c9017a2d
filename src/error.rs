use std::fmt;

/// Reasons an allocator operation can be refused.
///
/// Every failure leaves the heap exactly as it was before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  /// A zero byte count or a zero element count was requested.
  ZeroSize,
  /// A null payload pointer was passed where one is not accepted.
  NullPointer,
  /// `count * size` or the block footprint does not fit the address space.
  Overflow,
  /// The requested alignment is not a power of two.
  BadAlignment,
  /// The heap-growth primitive refused to move the break.
  OutOfMemory,
  /// The pointer is not the payload of any block in the chain.
  UnknownPointer,
  /// The block is already marked free.
  DoubleFree,
  /// The header chain violates one of its invariants.
  Corrupted(&'static str),
}

impl fmt::Display for AllocError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::ZeroSize => f.write_str("zero-sized request"),
      Self::NullPointer => f.write_str("null pointer"),
      Self::Overflow => f.write_str("requested size overflows the address space"),
      Self::BadAlignment => f.write_str("alignment is not a power of two"),
      Self::OutOfMemory => f.write_str("heap break cannot be extended"),
      Self::UnknownPointer => f.write_str("pointer does not belong to this heap"),
      Self::DoubleFree => f.write_str("block is already free"),
      Self::Corrupted(reason) => write!(f, "heap corrupted: {reason}"),
    }
  }
}

impl std::error::Error for AllocError {}
