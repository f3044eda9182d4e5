use thiserror::Error;

/// Errors that can occur when operating on an [`OpaqueVec`][crate::OpaqueVec].
///
/// A failed operation never leaves the vector partially modified. The vector remains in
/// the last valid state it had before the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The vector has already been released and owns no storage.
    #[error("the vector has been released and no longer owns any storage")]
    Unallocated,

    /// Memory for the vector could not be obtained, either because the allocator failed or
    /// because the requested size does not fit in the address space.
    #[error("failed to allocate {requested_bytes} bytes of element storage")]
    AllocationFailure {
        /// The total size of the buffer that was requested, saturated at `usize::MAX` if the
        /// size calculation itself overflowed.
        requested_bytes: usize,
    },

    /// The operation requires at least one element, or a shrink released all storage
    /// because the vector holds no elements.
    #[error("the vector is empty")]
    Empty,

    /// An insertion position was past the end of the vector.
    #[error("position {position} is out of bounds for a vector of length {len}")]
    InvalidPosition {
        /// The position the caller asked to insert at.
        position: usize,

        /// The length of the vector at the time of the call.
        len: usize,
    },

    /// The source of an insertion overlaps the storage of the destination.
    #[error("the insertion source overlaps the storage of the destination")]
    OverlappingBuffers,

    /// The caller supplied an element whose size does not match the vector's element size.
    #[error("element size mismatch: expected {expected} bytes, got {actual} bytes")]
    ElementSizeMismatch {
        /// The element size of the vector.
        expected: usize,

        /// The element size the caller supplied.
        actual: usize,
    },
}

/// A specialized `Result` type for vector operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
