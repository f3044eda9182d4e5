use std::alloc::Layout;
use std::cmp::Ordering;
use std::num::NonZero;
use std::ptr::{self, NonNull};
use std::slice;

use new_zealand::nz;
use rand::RngCore;
use tracing::trace;

use crate::{Error, OpaqueVecBuilder, RawBuffer, Result};

/// Number of slots added by an append that finds the vector full, unless configured otherwise.
pub(crate) const DEFAULT_GROWTH_INCREMENT: NonZero<usize> = nz!(8);

/// A type-erased growable array of equally sized elements.
///
/// `OpaqueVec` stores elements of any type whose [`Layout`] matches the element layout chosen
/// at creation time. Elements are kept contiguously, in insertion order, and are copied in and
/// out as plain bytes; the vector never runs destructors for its elements.
///
/// # Key Features
///
/// - **Type erasure**: one vector can hold values of any type sharing its element layout
/// - **Amortized growth**: appends grow capacity by a configurable increment when full
/// - **Bulk insertion**: insert one vector into another at any position, with aliasing checks
/// - **Explicit capacity control**: [`expand()`](Self::expand) and
///   [`shrink_to_fit()`](Self::shrink_to_fit)
/// - **Sorting and shuffling**: by caller-supplied comparator and any [`RngCore`]
/// - **Failure atomicity**: a failed operation leaves the vector unchanged
///
/// # Lifecycle
///
/// The vector owns its storage from creation until [`release()`](Self::release) is called or
/// the vector is dropped. After release, every operation reports [`Error::Unallocated`] and
/// accessors report zero length, capacity and element size.
///
/// # Examples
///
/// ```
/// use opaque_vec::OpaqueVec;
///
/// let mut vec = OpaqueVec::with_capacity(4, 8).unwrap();
///
/// vec.push_bytes(&42_u64.to_ne_bytes()).unwrap();
/// vec.push_bytes(&7_u64.to_ne_bytes()).unwrap();
///
/// assert_eq!(vec.len(), 2);
/// assert_eq!(vec.get_bytes(1), Some(&7_u64.to_ne_bytes()[..]));
/// assert_eq!(vec.get_bytes(2), None);
///
/// vec.remove_last().unwrap();
/// assert_eq!(vec.len(), 1);
///
/// vec.release().unwrap();
/// assert!(vec.release().is_err());
/// ```
///
/// Typed access, with the caller vouching for the element type:
///
/// ```
/// use opaque_vec::OpaqueVec;
///
/// let mut vec = OpaqueVec::builder().layout_of::<u32>().build().unwrap();
///
/// // SAFETY: u32 matches the layout used to create the vector.
/// unsafe {
///     vec.push(3_u32).unwrap();
/// }
/// // SAFETY: u32 matches the layout used to create the vector.
/// unsafe {
///     vec.push(1_u32).unwrap();
/// }
///
/// vec.sort_by(|a, b| a.cmp(b)).unwrap();
///
/// // SAFETY: The vector only contains u32 values.
/// assert_eq!(unsafe { vec.as_slice::<u32>() }, &[1, 3]);
/// ```
///
/// # Thread safety
///
/// The vector is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]). It assumes a single
/// owner at a time.
#[derive(Debug)]
pub struct OpaqueVec {
    /// Layout of one element, padded to its alignment so the size is also the stride.
    item_layout: Layout,

    /// `None` once the vector has been released.
    buffer: Option<RawBuffer>,

    /// Number of initialized elements at the start of the buffer.
    len: usize,

    growth_increment: NonZero<usize>,
}

impl OpaqueVec {
    /// Starts building a new vector.
    ///
    /// # Examples
    ///
    /// ```
    /// use opaque_vec::OpaqueVec;
    ///
    /// let vec = OpaqueVec::builder()
    ///     .layout_of::<u16>()
    ///     .initial_capacity(16)
    ///     .build()
    ///     .unwrap();
    /// ```
    #[inline]
    pub fn builder() -> OpaqueVecBuilder {
        OpaqueVecBuilder::new()
    }

    /// Creates a vector of byte-aligned elements of `element_size` bytes with room for
    /// `initial_capacity` elements. The storage is zero-filled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the storage cannot be allocated.
    ///
    /// # Panics
    ///
    /// Panics if `element_size` is zero.
    pub fn with_capacity(initial_capacity: usize, element_size: usize) -> Result<Self> {
        Self::builder()
            .element_size(element_size)
            .initial_capacity(initial_capacity)
            .build()
    }

    pub(crate) fn new_inner(
        item_layout: Layout,
        initial_capacity: usize,
        growth_increment: NonZero<usize>,
    ) -> Result<Self> {
        let buffer = RawBuffer::allocate_zeroed(item_layout, initial_capacity)?;

        Ok(Self {
            item_layout,
            buffer: Some(buffer),
            len: 0,
            growth_increment,
        })
    }

    /// Creates an empty vector that owns no allocation yet. Infallible, unlike the builder.
    pub(crate) fn empty(item_layout: Layout) -> Self {
        Self {
            item_layout,
            buffer: Some(RawBuffer::empty(item_layout)),
            len: 0,
            growth_increment: DEFAULT_GROWTH_INCREMENT,
        }
    }

    /// The number of elements in the vector.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the vector contains no elements.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of elements the vector can hold without growing.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, RawBuffer::capacity)
    }

    /// The size of one element in bytes, or zero if the vector has been released.
    #[must_use]
    #[inline]
    pub fn element_size(&self) -> usize {
        if self.buffer.is_some() {
            self.item_layout.size()
        } else {
            0
        }
    }

    /// The memory layout of one element, as configured at creation.
    #[must_use]
    #[inline]
    pub fn element_layout(&self) -> Layout {
        self.item_layout
    }

    /// The number of slots added when an append finds the vector full.
    #[must_use]
    #[inline]
    pub fn growth_increment(&self) -> NonZero<usize> {
        self.growth_increment
    }

    /// Changes the number of slots added when an append finds the vector full.
    #[inline]
    pub fn set_growth_increment(&mut self, increment: NonZero<usize>) {
        self.growth_increment = increment;
    }

    /// Whether [`release()`](Self::release) has been called on this vector.
    #[must_use]
    #[inline]
    pub fn is_released(&self) -> bool {
        self.buffer.is_none()
    }

    /// Frees the storage of the vector. All elements are discarded.
    ///
    /// Dropping the vector has the same effect, so calling this is only necessary to free
    /// memory early or to detect double release.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unallocated`] if the vector was already released.
    pub fn release(&mut self) -> Result<()> {
        let buffer = self.buffer.take().ok_or(Error::Unallocated)?;

        trace!(
            len = self.len,
            capacity = buffer.capacity(),
            "releasing opaque vec"
        );

        drop(buffer);
        self.len = 0;

        Ok(())
    }

    fn buffer(&self) -> Result<&RawBuffer> {
        self.buffer.as_ref().ok_or(Error::Unallocated)
    }

    /// Returns a pointer to the element at `index`, or `None` if `index` is not below
    /// [`len()`](Self::len).
    ///
    /// The pointer is valid until the vector is next modified.
    #[must_use]
    pub fn get_ptr(&self, index: usize) -> Option<NonNull<u8>> {
        if index >= self.len {
            return None;
        }

        Some(self.buffer.as_ref()?.slot_ptr(index))
    }

    /// Returns the bytes of the element at `index`, or `None` if `index` is not below
    /// [`len()`](Self::len).
    #[must_use]
    pub fn get_bytes(&self, index: usize) -> Option<&[u8]> {
        let ptr = self.get_ptr(index)?;

        // SAFETY: The slot is below len, so it holds an element written by this vector, and the
        // returned borrow of self prevents any modification while the slice is alive.
        Some(unsafe { slice::from_raw_parts(ptr.as_ptr(), self.item_layout.size()) })
    }

    /// Returns the bytes of the element at `index` for modification, or `None` if `index` is
    /// not below [`len()`](Self::len).
    #[must_use]
    pub fn get_bytes_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let ptr = self.get_ptr(index)?;

        // SAFETY: As in get_bytes(), and the exclusive borrow of self makes this the only
        // reference to the element.
        Some(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), self.item_layout.size()) })
    }

    /// Returns a reference to the element at `index` as a `T`, or `None` if `index` is not
    /// below [`len()`](Self::len).
    ///
    /// # Safety
    ///
    /// The element at `index` must hold a valid value of type `T`, and the layout of `T` must
    /// match the element layout of the vector. In debug builds, the layout is checked with an
    /// assertion.
    #[must_use]
    pub unsafe fn get<T: Copy>(&self, index: usize) -> Option<&T> {
        self.debug_assert_layout_of::<T>();

        let ptr = self.get_ptr(index)?;

        // SAFETY: The slot is in bounds and aligned for the element layout, and the caller
        // guarantees it holds a valid T.
        Some(unsafe { ptr.cast::<T>().as_ref() })
    }

    /// Returns an exclusive reference to the element at `index` as a `T`, or `None` if `index`
    /// is not below [`len()`](Self::len).
    ///
    /// # Safety
    ///
    /// Same as [`get()`](Self::get).
    #[must_use]
    pub unsafe fn get_mut<T: Copy>(&mut self, index: usize) -> Option<&mut T> {
        self.debug_assert_layout_of::<T>();

        let ptr = self.get_ptr(index)?;

        // SAFETY: As in get(), and the exclusive borrow of self makes this the only reference.
        Some(unsafe { ptr.cast::<T>().as_mut() })
    }

    /// The bytes of all elements, in order. Empty if the vector has been released.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        let Some(buffer) = &self.buffer else {
            return &[];
        };

        // SAFETY: The first len slots hold elements written by this vector and are contiguous.
        // Cannot overflow because len does not exceed the allocated capacity.
        unsafe {
            slice::from_raw_parts(
                buffer.as_ptr().as_ptr(),
                self.len.wrapping_mul(self.item_layout.size()),
            )
        }
    }

    /// The bytes of all elements, in order, for modification. Empty if the vector has been
    /// released.
    #[must_use]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let byte_len = self.len.wrapping_mul(self.item_layout.size());

        let Some(buffer) = &mut self.buffer else {
            return &mut [];
        };

        // SAFETY: As in as_bytes(), and the exclusive borrow of self makes this the only
        // reference to the elements.
        unsafe { slice::from_raw_parts_mut(buffer.as_ptr().as_ptr(), byte_len) }
    }

    /// Views all elements as a slice of `T`.
    ///
    /// # Safety
    ///
    /// Every element must hold a valid value of type `T`, and the layout of `T` must match the
    /// element layout of the vector. In debug builds, the layout is checked with an assertion.
    #[must_use]
    pub unsafe fn as_slice<T: Copy>(&self) -> &[T] {
        self.debug_assert_layout_of::<T>();

        let Some(buffer) = &self.buffer else {
            return &[];
        };

        // SAFETY: The buffer pointer is aligned for the element layout even when nothing is
        // allocated, the first len slots are initialized, and the caller guarantees they hold
        // valid T values with a matching stride.
        unsafe { slice::from_raw_parts(buffer.as_ptr().cast::<T>().as_ptr(), self.len) }
    }

    /// Views all elements as an exclusive slice of `T`.
    ///
    /// # Safety
    ///
    /// Same as [`as_slice()`](Self::as_slice).
    #[must_use]
    pub unsafe fn as_mut_slice<T: Copy>(&mut self) -> &mut [T] {
        self.debug_assert_layout_of::<T>();

        let len = self.len;

        let Some(buffer) = &mut self.buffer else {
            return &mut [];
        };

        // SAFETY: As in as_slice(), and the exclusive borrow of self makes this the only
        // reference to the elements.
        unsafe { slice::from_raw_parts_mut(buffer.as_ptr().cast::<T>().as_ptr(), len) }
    }

    /// Grows the capacity by `extra_slots` elements.
    ///
    /// Existing elements are preserved. The new slots are not zero-filled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unallocated`] if the vector has been released, or
    /// [`Error::AllocationFailure`] if the larger storage cannot be allocated, in which case
    /// the vector is unchanged.
    pub fn expand(&mut self, extra_slots: usize) -> Result<()> {
        let buffer = self.buffer.as_mut().ok_or(Error::Unallocated)?;

        let new_capacity =
            buffer
                .capacity()
                .checked_add(extra_slots)
                .ok_or(Error::AllocationFailure {
                    requested_bytes: usize::MAX,
                })?;

        buffer.resize(new_capacity)
    }

    /// Reduces the capacity to exactly [`len()`](Self::len).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] if the vector has no elements. The storage is still released
    /// in that case, leaving a vector with zero capacity that remains usable: the next append
    /// allocates new storage.
    ///
    /// Returns [`Error::Unallocated`] if the vector has been released, or
    /// [`Error::AllocationFailure`] if the allocator cannot provide the smaller block, in
    /// which case the vector is unchanged.
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        let len = self.len;
        let buffer = self.buffer.as_mut().ok_or(Error::Unallocated)?;

        buffer.resize(len)?;

        if len == 0 {
            return Err(Error::Empty);
        }

        Ok(())
    }

    /// Makes sure there is a free slot at the end, growing by the growth increment if needed.
    fn reserve_one(&mut self) -> Result<NonNull<u8>> {
        if self.len == self.buffer()?.capacity() {
            self.expand(self.growth_increment.get())?;
        }

        Ok(self.buffer()?.slot_ptr(self.len))
    }

    /// Appends an element given as its bytes.
    ///
    /// If the vector is full, it first grows by the [growth increment][Self::growth_increment].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unallocated`] if the vector has been released,
    /// [`Error::ElementSizeMismatch`] if `element` is not exactly one element long, or
    /// [`Error::AllocationFailure`] if growing fails. The vector is unchanged on error.
    pub fn push_bytes(&mut self, element: &[u8]) -> Result<()> {
        self.buffer()?;
        self.check_element_size(element.len())?;

        let slot = self.reserve_one()?;

        // SAFETY: reserve_one() guarantees the slot is within capacity, and `element` is a
        // shared borrow that cannot alias the storage we hold exclusively.
        unsafe {
            ptr::copy_nonoverlapping(element.as_ptr(), slot.as_ptr(), element.len());
        }

        // Cannot overflow because len is below capacity.
        self.len = self.len.wrapping_add(1);

        Ok(())
    }

    /// Appends a value of type `T`.
    ///
    /// # Errors
    ///
    /// Same as [`push_bytes()`](Self::push_bytes), except that the size is not checked at
    /// runtime.
    ///
    /// # Safety
    ///
    /// The layout of `T` must match the element layout of the vector. In debug builds, this is
    /// checked with an assertion. If the element is later read through the byte accessors,
    /// `T` must not contain padding bytes.
    pub unsafe fn push<T: Copy>(&mut self, value: T) -> Result<()> {
        self.debug_assert_layout_of::<T>();

        self.buffer()?;
        let slot = self.reserve_one()?;

        // SAFETY: The slot is within capacity and aligned for the element layout, which the
        // caller guarantees matches T.
        unsafe {
            slot.cast::<T>().write(value);
        }

        // Cannot overflow because len is below capacity.
        self.len = self.len.wrapping_add(1);

        Ok(())
    }

    /// Removes the last element. The storage is kept and its bytes are left as they were.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] if there are no elements, or [`Error::Unallocated`] if the
    /// vector has been released.
    pub fn remove_last(&mut self) -> Result<()> {
        self.buffer()?;

        self.len = self.len.checked_sub(1).ok_or(Error::Empty)?;

        Ok(())
    }

    /// Inserts all elements of `source` at `position`, moving the elements at and after
    /// `position` towards the end.
    ///
    /// Inserting at `position == len()` appends the elements in order. If the combined length
    /// exceeds the capacity, the vector first grows by `source.len()` slots.
    ///
    /// # Errors
    ///
    /// - [`Error::Unallocated`] if either vector has been released.
    /// - [`Error::ElementSizeMismatch`] if the element sizes differ.
    /// - [`Error::InvalidPosition`] if `position > len()`. The position is never clamped.
    /// - [`Error::AllocationFailure`] if growing fails.
    ///
    /// The destination is unchanged on error.
    ///
    /// # Examples
    ///
    /// ```
    /// use opaque_vec::OpaqueVec;
    ///
    /// let mut dest = OpaqueVec::with_capacity(4, 1).unwrap();
    /// dest.push_bytes(&[1]).unwrap();
    /// dest.push_bytes(&[4]).unwrap();
    ///
    /// let mut source = OpaqueVec::with_capacity(2, 1).unwrap();
    /// source.push_bytes(&[2]).unwrap();
    /// source.push_bytes(&[3]).unwrap();
    ///
    /// dest.insert_from(1, &source).unwrap();
    /// assert_eq!(dest.as_bytes(), &[1, 2, 3, 4]);
    /// ```
    pub fn insert_from(&mut self, position: usize, source: &Self) -> Result<()> {
        self.buffer()?;
        let source_buffer = source.buffer()?;
        self.check_element_size(source.item_layout.size())?;

        // SAFETY: The source buffer holds source.len initialized elements of our element size
        // and stays valid for the whole call because we hold a shared borrow of it.
        unsafe { self.insert_raw(position, source_buffer.as_ptr(), source.len) }
    }

    /// Inserts `count` elements read from `source` at `position`, moving the elements at and
    /// after `position` towards the end.
    ///
    /// The source may point anywhere, including into this vector. A source whose bytes
    /// intersect this vector's storage (its whole capacity, since the storage may move while
    /// growing) is rejected instead of being read while it is being moved.
    ///
    /// # Errors
    ///
    /// - [`Error::Unallocated`] if the vector has been released.
    /// - [`Error::InvalidPosition`] if `position > len()`.
    /// - [`Error::OverlappingBuffers`] if the source bytes intersect this vector's storage.
    /// - [`Error::AllocationFailure`] if growing fails.
    ///
    /// The vector is unchanged on error.
    ///
    /// # Safety
    ///
    /// `source` must be valid for reads of `count * element_size()` bytes for the duration of
    /// the call, unless it overlaps this vector's storage.
    pub unsafe fn insert_raw(
        &mut self,
        position: usize,
        source: NonNull<u8>,
        count: usize,
    ) -> Result<()> {
        let len = self.len;
        let element_size = self.item_layout.size();
        let buffer = self.buffer()?;

        if position > len {
            return Err(Error::InvalidPosition { position, len });
        }

        let source_bytes = count
            .checked_mul(element_size)
            .ok_or(Error::AllocationFailure {
                requested_bytes: usize::MAX,
            })?;

        if ranges_overlap(
            buffer.as_ptr().addr().get(),
            buffer.size_bytes(),
            source.addr().get(),
            source_bytes,
        ) {
            return Err(Error::OverlappingBuffers);
        }

        if count == 0 {
            return Ok(());
        }

        let new_len = len.checked_add(count).ok_or(Error::AllocationFailure {
            requested_bytes: usize::MAX,
        })?;

        if new_len > buffer.capacity() {
            self.expand(count)?;
        }

        let buffer = self.buffer()?;
        let gap_start = buffer.slot_ptr(position);
        // Cannot overflow because position + count <= new_len.
        let gap_end = buffer.slot_ptr(position.wrapping_add(count));
        // Cannot overflow because position <= len and the tail fits in the allocation.
        let tail_bytes = len.wrapping_sub(position).wrapping_mul(element_size);

        // SAFETY: Capacity is at least new_len, so both the current tail and its shifted
        // destination are within the allocation. ptr::copy() permits the ranges to overlap.
        unsafe {
            ptr::copy(gap_start.as_ptr(), gap_end.as_ptr(), tail_bytes);
        }

        // SAFETY: The caller guarantees the source is readable, we verified that it does not
        // intersect our storage, and the gap is within capacity.
        unsafe {
            ptr::copy_nonoverlapping(source.as_ptr(), gap_start.as_ptr(), source_bytes);
        }

        self.len = new_len;

        trace!(position, count, len = new_len, "inserted elements");

        Ok(())
    }

    /// Sorts all elements with a comparator over element bytes. The sort is unstable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unallocated`] if the vector has been released.
    pub fn sort_by<F>(&mut self, compare: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        self.sort_range_by(0, self.len, compare)
    }

    /// Sorts `count` elements starting at `offset` with a comparator over element bytes,
    /// leaving the other elements in place. The sort is unstable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unallocated`] if the vector has been released.
    ///
    /// # Panics
    ///
    /// Panics if `offset + count` exceeds [`len()`](Self::len).
    pub fn sort_range_by<F>(&mut self, offset: usize, count: usize, mut compare: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        self.buffer()?;

        let len = self.len;
        let element_size = self.item_layout.size();

        let Some(end) = offset.checked_add(count).filter(|&end| end <= len) else {
            panic!(
                "sort range of {count} elements at offset {offset} is out of bounds for a vector of length {len}"
            );
        };

        // Cannot overflow because end <= len and all elements fit in the allocation.
        let byte_range = offset.wrapping_mul(element_size)..end.wrapping_mul(element_size);

        let region = self
            .as_bytes_mut()
            .get_mut(byte_range)
            .expect("range was checked against len above");

        heap_sort(region, element_size, count, &mut compare);

        Ok(())
    }

    /// Randomly permutes the elements using `rng`.
    ///
    /// Each position `i` is swapped with a position drawn from `i..len()` as
    /// `rng.next_u64() % (len() - i)`, which makes every permutation equally likely up to the
    /// modulo bias of the generator output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unallocated`] if the vector has been released.
    pub fn shuffle<R>(&mut self, rng: &mut R) -> Result<()>
    where
        R: RngCore + ?Sized,
    {
        let len = self.len;
        let element_size = self.item_layout.size();
        let buffer = self.buffer.as_mut().ok_or(Error::Unallocated)?;

        for index in 0..len {
            // Cannot overflow or underflow because index < len.
            let partner = index.wrapping_add(draw_below(rng, len.wrapping_sub(index)));

            if partner == index {
                continue;
            }

            // SAFETY: Both slots are below len and distinct, so the two element ranges are in
            // bounds and disjoint.
            unsafe {
                ptr::swap_nonoverlapping(
                    buffer.slot_ptr(index).as_ptr(),
                    buffer.slot_ptr(partner).as_ptr(),
                    element_size,
                );
            }
        }

        Ok(())
    }

    fn check_element_size(&self, actual: usize) -> Result<()> {
        let expected = self.item_layout.size();

        if actual != expected {
            return Err(Error::ElementSizeMismatch { expected, actual });
        }

        Ok(())
    }

    fn debug_assert_layout_of<T>(&self) {
        debug_assert_eq!(
            Layout::new::<T>(),
            self.item_layout,
            "type layout mismatch: expected layout {:?}, got layout {:?}",
            self.item_layout,
            Layout::new::<T>()
        );
    }
}

/// Whether the half-open address ranges `[a, a + a_len)` and `[b, b + b_len)` intersect.
/// Empty ranges never intersect anything.
fn ranges_overlap(a: usize, a_len: usize, b: usize, b_len: usize) -> bool {
    let a_end = a.saturating_add(a_len);
    let b_end = b.saturating_add(b_len);

    a_len > 0 && b_len > 0 && a < b_end && b < a_end
}

/// Sorts the `count` elements of `element_size` bytes that make up `region`, in place.
///
/// Heapsort: no auxiliary storage, `O(n log n)` comparisons, not stable.
fn heap_sort<F>(region: &mut [u8], element_size: usize, count: usize, compare: &mut F)
where
    F: FnMut(&[u8], &[u8]) -> Ordering,
{
    debug_assert_eq!(region.len(), count.wrapping_mul(element_size));

    // Every parent in the max-heap is among the first half of the elements.
    for root in (0..count.div_ceil(2)).rev() {
        sift_down(region, element_size, root, count, compare);
    }

    for end in (1..count).rev() {
        swap_elements(region, element_size, 0, end);
        sift_down(region, element_size, 0, end, compare);
    }
}

/// Restores the max-heap property for the subtree at `root`, considering only the first `end`
/// elements.
fn sift_down<F>(
    region: &mut [u8],
    element_size: usize,
    mut root: usize,
    end: usize,
    compare: &mut F,
) where
    F: FnMut(&[u8], &[u8]) -> Ordering,
{
    loop {
        // Cannot overflow because root < end and there are at most isize::MAX elements.
        let left = root.wrapping_mul(2).wrapping_add(1);

        if left >= end {
            return;
        }

        let right = left.wrapping_add(1);

        let larger_child = if right < end
            && compare(
                element_at(region, element_size, right),
                element_at(region, element_size, left),
            ) == Ordering::Greater
        {
            right
        } else {
            left
        };

        if compare(
            element_at(region, element_size, larger_child),
            element_at(region, element_size, root),
        ) != Ordering::Greater
        {
            return;
        }

        swap_elements(region, element_size, root, larger_child);
        root = larger_child;
    }
}

fn element_at(region: &[u8], element_size: usize, index: usize) -> &[u8] {
    // Cannot overflow because the index is within the region.
    let start = index.wrapping_mul(element_size);

    region
        .get(start..start.wrapping_add(element_size))
        .expect("element index is within the sorted region")
}

/// Swaps two distinct elements of `region` in place.
fn swap_elements(region: &mut [u8], element_size: usize, a: usize, b: usize) {
    debug_assert_ne!(a, b, "an element cannot be swapped with itself");

    let (low, high) = if a < b { (a, b) } else { (b, a) };

    // Cannot overflow because both indexes are within the region.
    let (head, tail) = region.split_at_mut(high.wrapping_mul(element_size));
    let low_start = low.wrapping_mul(element_size);

    let low_element = head
        .get_mut(low_start..low_start.wrapping_add(element_size))
        .expect("element index is within the sorted region");
    let high_element = tail
        .get_mut(..element_size)
        .expect("element index is within the sorted region");

    low_element.swap_with_slice(high_element);
}

/// Draws a value uniformly from `0..bound` (up to modulo bias).
fn draw_below<R>(rng: &mut R, bound: usize) -> usize
where
    R: RngCore + ?Sized,
{
    debug_assert!(bound > 0, "bound must be non-zero");

    let drawn = rng.next_u64() % bound as u64;

    #[expect(
        clippy::cast_possible_truncation,
        reason = "the value is below a usize bound, so it always fits"
    )]
    let drawn = drawn as usize;

    drawn
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};
    use xoshiro_rng::XoshiroRng;

    use super::*;

    assert_impl_all!(OpaqueVec: Send, std::fmt::Debug);
    assert_not_impl_any!(OpaqueVec: Sync);

    fn u64_vec(values: &[u64]) -> OpaqueVec {
        let mut vec = OpaqueVec::builder().layout_of::<u64>().build().unwrap();

        for &value in values {
            vec.push_bytes(&value.to_ne_bytes()).unwrap();
        }

        vec
    }

    fn u64_values(vec: &OpaqueVec) -> Vec<u64> {
        // SAFETY: The test vectors only hold u64 values.
        unsafe { vec.as_slice::<u64>() }.to_vec()
    }

    #[test]
    fn smoke_test() {
        let mut vec = OpaqueVec::with_capacity(4, 8).unwrap();

        assert_eq!(vec.len(), 0);
        assert!(vec.is_empty());
        assert_eq!(vec.capacity(), 4);
        assert_eq!(vec.element_size(), 8);
        assert_eq!(vec.growth_increment(), DEFAULT_GROWTH_INCREMENT);

        vec.push_bytes(&[1; 8]).unwrap();
        vec.push_bytes(&[2; 8]).unwrap();

        assert_eq!(vec.len(), 2);
        assert_eq!(vec.get_bytes(0), Some(&[1; 8][..]));
        assert_eq!(vec.get_bytes(1), Some(&[2; 8][..]));
        assert_eq!(vec.get_bytes(2), None);
    }

    #[test]
    fn initial_storage_is_zero_filled_but_not_visible() {
        let vec = OpaqueVec::with_capacity(3, 4).unwrap();

        assert_eq!(vec.get_bytes(0), None);
        assert!(vec.as_bytes().is_empty());
    }

    #[test]
    fn fifth_append_grows_by_default_increment() {
        let mut vec = OpaqueVec::with_capacity(4, 8).unwrap();

        for value in 0_u64..4 {
            vec.push_bytes(&value.to_ne_bytes()).unwrap();
            assert_eq!(vec.capacity(), 4);
        }

        vec.push_bytes(&4_u64.to_ne_bytes()).unwrap();

        assert_eq!(vec.capacity(), 12);
        assert_eq!(vec.len(), 5);
    }

    #[test]
    fn append_from_zero_capacity_allocates_increment() {
        let mut vec = OpaqueVec::builder()
            .element_size(2)
            .growth_increment(nz!(3))
            .build()
            .unwrap();

        assert_eq!(vec.capacity(), 0);

        vec.push_bytes(&[1, 2]).unwrap();
        assert_eq!(vec.capacity(), 3);
    }

    #[test]
    fn set_growth_increment_changes_growth() {
        let mut vec = OpaqueVec::with_capacity(1, 1).unwrap();
        vec.set_growth_increment(nz!(100));

        vec.push_bytes(&[1]).unwrap();
        vec.push_bytes(&[2]).unwrap();

        assert_eq!(vec.capacity(), 101);
    }

    #[test]
    fn push_bytes_with_wrong_size_fails() {
        let mut vec = OpaqueVec::with_capacity(1, 4).unwrap();

        assert_eq!(
            vec.push_bytes(&[1, 2]),
            Err(Error::ElementSizeMismatch {
                expected: 4,
                actual: 2
            })
        );
        assert!(vec.is_empty());
    }

    #[test]
    fn typed_push_and_get() {
        let mut vec = OpaqueVec::builder().layout_of::<u32>().build().unwrap();

        // SAFETY: u32 matches the layout of the vector.
        unsafe {
            vec.push(10_u32).unwrap();
        }
        // SAFETY: u32 matches the layout of the vector.
        unsafe {
            vec.push(20_u32).unwrap();
        }

        // SAFETY: The vector only holds u32 values.
        unsafe {
            assert_eq!(vec.get::<u32>(0), Some(&10));
        }
        // SAFETY: The vector only holds u32 values.
        unsafe {
            assert_eq!(vec.get::<u32>(2), None);
        }

        // SAFETY: The vector only holds u32 values.
        let second = unsafe { vec.get_mut::<u32>(1) }.unwrap();
        *second = 25;

        assert_eq!(vec.get_bytes(1), Some(&25_u32.to_ne_bytes()[..]));
    }

    #[test]
    fn get_bytes_mut_modifies_element() {
        let mut vec = OpaqueVec::with_capacity(2, 2).unwrap();
        vec.push_bytes(&[0, 0]).unwrap();

        vec.get_bytes_mut(0).unwrap().copy_from_slice(&[5, 6]);

        assert_eq!(vec.as_bytes(), &[5, 6]);
        assert!(vec.get_bytes_mut(1).is_none());
    }

    #[test]
    fn get_ptr_points_at_element() {
        let vec = u64_vec(&[11, 22]);

        let ptr = vec.get_ptr(1).unwrap();

        // SAFETY: Index 1 holds a u64.
        assert_eq!(unsafe { ptr.cast::<u64>().read() }, 22);
        assert!(vec.get_ptr(2).is_none());
    }

    #[test]
    fn release_then_release_again_fails() {
        let mut vec = u64_vec(&[1, 2, 3]);

        vec.release().unwrap();

        assert!(vec.is_released());
        assert_eq!(vec.len(), 0);
        assert_eq!(vec.capacity(), 0);
        assert_eq!(vec.element_size(), 0);
        assert_eq!(vec.release(), Err(Error::Unallocated));
    }

    #[test]
    fn operations_on_released_vec_fail() {
        let mut vec = u64_vec(&[1]);
        vec.release().unwrap();

        assert_eq!(vec.get_bytes(0), None);
        assert!(vec.as_bytes().is_empty());
        assert_eq!(vec.push_bytes(&[0; 8]), Err(Error::Unallocated));
        assert_eq!(vec.remove_last(), Err(Error::Unallocated));
        assert_eq!(vec.expand(4), Err(Error::Unallocated));
        assert_eq!(vec.shrink_to_fit(), Err(Error::Unallocated));
        assert_eq!(vec.sort_by(<[u8]>::cmp), Err(Error::Unallocated));
        assert_eq!(
            vec.shuffle(&mut XoshiroRng::new(1)),
            Err(Error::Unallocated)
        );

        let other = u64_vec(&[2]);
        assert_eq!(vec.insert_from(0, &other), Err(Error::Unallocated));
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn insert_from_released_source_fails() {
        let mut dest = u64_vec(&[1]);
        let mut source = u64_vec(&[2]);
        source.release().unwrap();

        assert_eq!(dest.insert_from(0, &source), Err(Error::Unallocated));
        assert_eq!(u64_values(&dest), [1]);
    }

    #[test]
    fn expand_grows_capacity_and_keeps_elements() {
        let mut vec = u64_vec(&[7, 8]);
        let capacity = vec.capacity();

        vec.expand(10).unwrap();

        assert_eq!(vec.capacity(), capacity + 10);
        assert_eq!(u64_values(&vec), [7, 8]);
    }

    #[test]
    fn expand_overflow_fails_without_change() {
        let mut vec = u64_vec(&[7]);
        let capacity = vec.capacity();

        assert!(matches!(
            vec.expand(usize::MAX),
            Err(Error::AllocationFailure { .. })
        ));
        assert_eq!(vec.capacity(), capacity);
        assert_eq!(u64_values(&vec), [7]);
    }

    #[test]
    fn shrink_to_fit_matches_len() {
        let mut vec = u64_vec(&[1, 2, 3, 4, 5]);
        vec.remove_last().unwrap();
        vec.remove_last().unwrap();

        vec.shrink_to_fit().unwrap();

        assert_eq!(vec.capacity(), 3);
        assert_eq!(u64_values(&vec), [1, 2, 3]);
    }

    #[test]
    fn shrink_to_fit_when_empty_releases_storage_but_stays_usable() {
        let mut vec = OpaqueVec::with_capacity(16, 8).unwrap();

        assert_eq!(vec.shrink_to_fit(), Err(Error::Empty));
        assert_eq!(vec.capacity(), 0);
        assert!(!vec.is_released());

        vec.push_bytes(&[3; 8]).unwrap();
        assert_eq!(vec.capacity(), 8);
        assert_eq!(vec.get_bytes(0), Some(&[3; 8][..]));
    }

    #[test]
    fn remove_last_until_empty() {
        let mut vec = u64_vec(&[1, 2]);
        let capacity = vec.capacity();

        vec.remove_last().unwrap();
        vec.remove_last().unwrap();

        assert_eq!(vec.remove_last(), Err(Error::Empty));
        assert_eq!(vec.capacity(), capacity);
    }

    #[test]
    fn insert_from_in_middle() {
        let mut dest = u64_vec(&[1, 5]);
        let source = u64_vec(&[2, 3, 4]);

        dest.insert_from(1, &source).unwrap();

        assert_eq!(u64_values(&dest), [1, 2, 3, 4, 5]);
        assert_eq!(u64_values(&source), [2, 3, 4]);
    }

    #[test]
    fn insert_from_at_start() {
        let mut dest = u64_vec(&[3]);
        let source = u64_vec(&[1, 2]);

        dest.insert_from(0, &source).unwrap();

        assert_eq!(u64_values(&dest), [1, 2, 3]);
    }

    #[test]
    fn insert_from_grows_by_source_len() {
        let mut dest = OpaqueVec::with_capacity(2, 1).unwrap();
        dest.push_bytes(&[1]).unwrap();
        dest.push_bytes(&[2]).unwrap();

        let mut source = OpaqueVec::with_capacity(3, 1).unwrap();
        for byte in [7, 8, 9] {
            source.push_bytes(&[byte]).unwrap();
        }

        dest.insert_from(1, &source).unwrap();

        assert_eq!(dest.capacity(), 5);
        assert_eq!(dest.as_bytes(), &[1, 7, 8, 9, 2]);
    }

    #[test]
    fn insert_from_empty_source_is_noop() {
        let mut dest = u64_vec(&[1]);
        let source = u64_vec(&[]);

        dest.insert_from(1, &source).unwrap();

        assert_eq!(u64_values(&dest), [1]);
    }

    #[test]
    fn insert_from_past_end_is_rejected() {
        let mut dest = u64_vec(&[1, 2]);
        let source = u64_vec(&[3]);

        assert_eq!(
            dest.insert_from(3, &source),
            Err(Error::InvalidPosition {
                position: 3,
                len: 2
            })
        );
        assert_eq!(u64_values(&dest), [1, 2]);
    }

    #[test]
    fn insert_from_with_different_element_size_is_rejected() {
        let mut dest = u64_vec(&[1]);
        let source = OpaqueVec::with_capacity(1, 4).unwrap();

        assert_eq!(
            dest.insert_from(0, &source),
            Err(Error::ElementSizeMismatch {
                expected: 8,
                actual: 4
            })
        );
    }

    #[test]
    fn insert_raw_from_own_elements_is_rejected() {
        let mut vec = u64_vec(&[1, 2, 3]);
        let own = vec.get_ptr(0).unwrap();

        // SAFETY: The source points into the vector itself, which must be rejected before it
        // is read.
        let result = unsafe { vec.insert_raw(1, own, 2) };

        assert_eq!(result, Err(Error::OverlappingBuffers));
        assert_eq!(u64_values(&vec), [1, 2, 3]);
    }

    #[test]
    fn insert_raw_from_own_spare_capacity_is_rejected() {
        let mut vec = OpaqueVec::with_capacity(8, 1).unwrap();
        vec.push_bytes(&[1]).unwrap();

        let spare = vec.buffer.as_ref().unwrap().slot_ptr(4);

        // SAFETY: The source points into the spare capacity, which must be rejected before it
        // is read.
        let result = unsafe { vec.insert_raw(0, spare, 2) };

        assert_eq!(result, Err(Error::OverlappingBuffers));
        assert_eq!(vec.as_bytes(), &[1]);
    }

    #[test]
    fn insert_raw_from_external_memory() {
        let mut vec = OpaqueVec::with_capacity(2, 2).unwrap();
        vec.push_bytes(&[1, 1]).unwrap();

        let external = [2_u8, 2, 3, 3];

        // SAFETY: The array is valid for reads of two 2-byte elements.
        unsafe {
            vec.insert_raw(1, NonNull::from(&external).cast::<u8>(), 2)
                .unwrap();
        }

        assert_eq!(vec.as_bytes(), &[1, 1, 2, 2, 3, 3]);
    }

    /// An address just past the storage of `vec`, so a source starting there never overlaps it.
    fn address_past_storage(vec: &OpaqueVec) -> NonNull<u8> {
        let storage_end = vec
            .buffer()
            .unwrap()
            .slot_ptr(vec.capacity())
            .addr()
            .get();

        NonNull::<u8>::dangling().with_addr(NonZero::new(storage_end + 64).unwrap())
    }

    #[test]
    fn insert_raw_with_overflowing_byte_count_fails_without_change() {
        let mut vec = u64_vec(&[1, 2, 3]);
        let before = vec.as_bytes().to_vec();
        let capacity = vec.capacity();

        let source = address_past_storage(&vec);

        // SAFETY: The byte count overflows, so the call fails before reading the source.
        let result = unsafe { vec.insert_raw(1, source, usize::MAX / 8 + 1) };

        assert!(matches!(result, Err(Error::AllocationFailure { .. })));
        assert_eq!(vec.as_bytes(), before);
        assert_eq!(vec.len(), 3);
        assert_eq!(vec.capacity(), capacity);
    }

    #[test]
    fn insert_raw_with_unallocatable_growth_fails_without_change() {
        let mut vec = u64_vec(&[1, 2, 3]);
        let before = vec.as_bytes().to_vec();
        let capacity = vec.capacity();

        let source = address_past_storage(&vec);

        // The source size fits in usize, but the grown storage would exceed isize::MAX bytes.
        let count = isize::MAX.unsigned_abs() / 8 + 1;

        // SAFETY: Growing the storage fails, so the call returns before reading the source.
        let result = unsafe { vec.insert_raw(0, source, count) };

        assert!(matches!(result, Err(Error::AllocationFailure { .. })));
        assert_eq!(vec.as_bytes(), before);
        assert_eq!(vec.len(), 3);
        assert_eq!(vec.capacity(), capacity);
    }

    #[test]
    fn sort_by_orders_elements() {
        let mut vec = u64_vec(&[5, 3, 9, 1]);

        vec.sort_by(|a, b| {
            let a = u64::from_ne_bytes(a.try_into().unwrap());
            let b = u64::from_ne_bytes(b.try_into().unwrap());
            a.cmp(&b)
        })
        .unwrap();

        assert_eq!(u64_values(&vec), [1, 3, 5, 9]);
    }

    #[test]
    fn sort_range_by_leaves_outside_untouched() {
        let mut vec = OpaqueVec::with_capacity(6, 1).unwrap();
        for byte in [9, 8, 7, 6, 5, 4] {
            vec.push_bytes(&[byte]).unwrap();
        }

        vec.sort_range_by(1, 3, <[u8]>::cmp).unwrap();

        assert_eq!(vec.as_bytes(), &[9, 6, 7, 8, 5, 4]);
    }

    #[test]
    fn sort_range_by_empty_range_is_noop() {
        let mut vec = u64_vec(&[2, 1]);

        vec.sort_range_by(2, 0, <[u8]>::cmp).unwrap();

        assert_eq!(u64_values(&vec), [2, 1]);
    }

    #[test]
    #[should_panic]
    fn sort_range_by_past_end_panics() {
        let mut vec = u64_vec(&[2, 1]);
        _ = vec.sort_range_by(1, 2, <[u8]>::cmp);
    }

    #[test]
    fn sort_by_handles_duplicates_and_every_small_length() {
        let mut rng = XoshiroRng::new(17);

        for len in 0..40_u64 {
            let values: Vec<u64> = (0..len).map(|_| rng.next_u64() % 8).collect();
            let mut vec = u64_vec(&values);

            vec.sort_by(|a, b| {
                let a = u64::from_ne_bytes(a.try_into().unwrap());
                let b = u64::from_ne_bytes(b.try_into().unwrap());
                a.cmp(&b)
            })
            .unwrap();

            let mut expected = values;
            expected.sort_unstable();
            assert_eq!(u64_values(&vec), expected, "length {len}");
        }
    }

    #[test]
    fn sort_by_descending_comparator() {
        let mut vec = OpaqueVec::with_capacity(0, 3).unwrap();
        for element in [[1, 0, 0], [3, 2, 1], [2, 9, 9], [3, 2, 0]] {
            vec.push_bytes(&element).unwrap();
        }

        vec.sort_by(|a, b| b.cmp(a)).unwrap();

        assert_eq!(
            vec.as_bytes(),
            &[3, 2, 1, 3, 2, 0, 2, 9, 9, 1, 0, 0]
        );
    }

    #[test]
    fn heap_sort_orders_multi_byte_elements() {
        let mut region = [4_u8, 4, 1, 1, 3, 3, 2, 2, 0, 0];

        heap_sort(&mut region, 2, 5, &mut <[u8]>::cmp);

        assert_eq!(region, [0, 0, 1, 1, 2, 2, 3, 3, 4, 4]);
    }

    #[test]
    fn swap_elements_exchanges_whole_elements() {
        let mut region = [1_u8, 2, 3, 4, 5, 6];

        swap_elements(&mut region, 2, 2, 0);

        assert_eq!(region, [5, 6, 3, 4, 1, 2]);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let original: Vec<u64> = (0..100).collect();
        let mut vec = u64_vec(&original);

        vec.shuffle(&mut XoshiroRng::new(5)).unwrap();

        let mut shuffled = u64_values(&vec);
        assert_ne!(shuffled, original);

        shuffled.sort_unstable();
        assert_eq!(shuffled, original);
    }

    #[test]
    fn shuffle_is_reproducible_for_same_seed() {
        let original: Vec<u64> = (0..50).collect();

        let mut a = u64_vec(&original);
        let mut b = u64_vec(&original);

        a.shuffle(&mut XoshiroRng::new(77)).unwrap();
        b.shuffle(&mut XoshiroRng::new(77)).unwrap();

        assert_eq!(u64_values(&a), u64_values(&b));
    }

    #[test]
    fn shuffle_of_empty_and_single_is_noop() {
        let mut rng = XoshiroRng::new(3);

        let mut empty = u64_vec(&[]);
        empty.shuffle(&mut rng).unwrap();
        assert!(empty.is_empty());

        let mut single = u64_vec(&[42]);
        single.shuffle(&mut rng).unwrap();
        assert_eq!(u64_values(&single), [42]);
    }

    #[test]
    fn shuffle_accepts_dyn_rng() {
        let mut rng = XoshiroRng::new(3);
        let dyn_rng: &mut dyn RngCore = &mut rng;

        let mut vec = u64_vec(&[1, 2, 3]);
        vec.shuffle(dyn_rng).unwrap();

        assert_eq!(vec.len(), 3);
    }

    #[test]
    fn ranges_overlap_cases() {
        assert!(ranges_overlap(0, 10, 5, 10));
        assert!(ranges_overlap(5, 10, 0, 10));
        assert!(ranges_overlap(0, 10, 2, 3));
        assert!(!ranges_overlap(0, 10, 10, 5));
        assert!(!ranges_overlap(10, 5, 0, 10));
        assert!(!ranges_overlap(0, 0, 0, 10));
        assert!(!ranges_overlap(0, 10, 5, 0));
    }

    #[test]
    fn draw_below_stays_in_bounds() {
        let mut rng = XoshiroRng::new(8);

        for bound in 1..50 {
            assert!(draw_below(&mut rng, bound) < bound);
        }
    }

    #[test]
    fn works_with_aligned_custom_layout() {
        let layout = Layout::from_size_align(24, 8).unwrap();
        let mut vec = OpaqueVec::builder().layout(layout).build().unwrap();

        vec.push_bytes(&[1; 24]).unwrap();

        assert_eq!(vec.get_ptr(0).unwrap().addr().get() % 8, 0);
    }
}
