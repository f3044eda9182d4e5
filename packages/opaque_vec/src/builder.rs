use std::alloc::Layout;
use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::{DEFAULT_GROWTH_INCREMENT, OpaqueVec, Result};

/// Builder for creating an instance of [`OpaqueVec`].
///
/// [`OpaqueVec`] requires the element memory layout to be specified at construction time.
/// Use `.layout()` to provide a specific layout, `.layout_of::<T>()` to derive it from a
/// type, or `.element_size()` to describe elements as plain byte blocks.
///
/// The layout is mandatory, whereas other settings are optional.
///
/// # Examples
///
/// Using type-based layout:
///
/// ```
/// use opaque_vec::OpaqueVec;
///
/// let vec = OpaqueVec::builder().layout_of::<u64>().build().unwrap();
/// assert_eq!(vec.element_size(), 8);
/// ```
///
/// Configuring capacity and growth:
///
/// ```
/// use new_zealand::nz;
/// use opaque_vec::OpaqueVec;
///
/// let vec = OpaqueVec::builder()
///     .element_size(12)
///     .initial_capacity(100)
///     .growth_increment(nz!(32))
///     .build()
///     .unwrap();
///
/// assert_eq!(vec.capacity(), 100);
/// assert_eq!(vec.growth_increment().get(), 32);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct OpaqueVecBuilder {
    item_layout: Option<Layout>,
    initial_capacity: usize,
    growth_increment: NonZero<usize>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl OpaqueVecBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            item_layout: None,
            initial_capacity: 0,
            growth_increment: DEFAULT_GROWTH_INCREMENT,
            _not_sync: PhantomData,
        }
    }

    /// Sets the memory layout of the elements.
    ///
    /// The size is padded up to the alignment, so the resulting element size is always a
    /// multiple of the alignment.
    ///
    /// # Panics
    ///
    /// Panics if the layout has a size of zero.
    #[inline]
    pub fn layout(mut self, layout: Layout) -> Self {
        assert!(layout.size() > 0, "OpaqueVec must have non-zero element size");
        self.item_layout = Some(layout.pad_to_align());
        self
    }

    /// Sets the memory layout of the elements based on a type.
    ///
    /// # Panics
    ///
    /// Panics if `T` is a zero-sized type.
    #[inline]
    pub fn layout_of<T>(self) -> Self {
        self.layout(Layout::new::<T>())
    }

    /// Sets the element size in bytes, with no alignment requirement beyond one byte.
    ///
    /// Use this when elements are only accessed as byte slices.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or larger than `isize::MAX`.
    #[inline]
    pub fn element_size(self, size: usize) -> Self {
        let layout =
            Layout::from_size_align(size, 1).expect("element size must not exceed isize::MAX");
        self.layout(layout)
    }

    /// Sets the number of element slots to allocate up front. Defaults to zero, in which
    /// case nothing is allocated until the first element is added.
    #[inline]
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Sets the number of slots added when an append finds the vector full. Defaults to 8.
    #[inline]
    pub fn growth_increment(mut self, increment: NonZero<usize>) -> Self {
        self.growth_increment = increment;
        self
    }

    /// Builds the vector, allocating zero-filled storage for the initial capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`][crate::Error::AllocationFailure] if the initial
    /// storage cannot be allocated.
    ///
    /// # Panics
    ///
    /// Panics if no layout has been set using [`layout`](Self::layout),
    /// [`layout_of`](Self::layout_of) or [`element_size`](Self::element_size).
    #[inline]
    pub fn build(self) -> Result<OpaqueVec> {
        let layout = self.item_layout.expect(
            "Layout must be set using .layout(), .layout_of::<T>() or .element_size() before calling .build()",
        );

        OpaqueVec::new_inner(layout, self.initial_capacity, self.growth_increment)
    }
}
