use std::alloc::Layout;
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;
use std::slice;

use rand::RngCore;

use crate::{OpaqueVec, Result};

/// A growable array of `T` values backed by an [`OpaqueVec`].
///
/// `TypedVec` fixes the element layout to that of `T`, which makes every operation of the
/// underlying vector safe to expose. It keeps the same growth, insertion, release and error
/// semantics as [`OpaqueVec`].
///
/// Elements are `Copy` because the storage moves them as plain bytes and never runs
/// destructors.
///
/// # Examples
///
/// ```
/// use opaque_vec::TypedVec;
/// use xoshiro_rng::XoshiroRng;
///
/// let mut vec = TypedVec::<u32>::with_capacity(4).unwrap();
///
/// for value in [4, 1, 3, 2] {
///     vec.push(value).unwrap();
/// }
///
/// vec.sort_by(u32::cmp).unwrap();
/// assert_eq!(vec.as_slice(), &[1, 2, 3, 4]);
///
/// vec.shuffle(&mut XoshiroRng::new(42)).unwrap();
/// assert_eq!(vec.len(), 4);
/// ```
///
/// # Panics
///
/// Constructors panic if `T` is a zero-sized type.
pub struct TypedVec<T> {
    inner: OpaqueVec,

    _element: PhantomData<T>,
}

impl<T: Copy> TypedVec<T> {
    /// Creates an empty vector without allocating.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: OpaqueVec::empty(checked_layout::<T>()),
            _element: PhantomData,
        }
    }

    /// Creates an empty vector with zero-filled storage for `capacity` elements.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`][crate::Error::AllocationFailure] if the storage
    /// cannot be allocated.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let inner = OpaqueVec::builder()
            .layout(checked_layout::<T>())
            .initial_capacity(capacity)
            .build()?;

        Ok(Self {
            inner,
            _element: PhantomData,
        })
    }

    /// The number of elements in the vector.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the vector contains no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The number of elements the vector can hold without growing.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// The number of slots added when an append finds the vector full.
    #[must_use]
    pub fn growth_increment(&self) -> NonZero<usize> {
        self.inner.growth_increment()
    }

    /// Changes the number of slots added when an append finds the vector full.
    pub fn set_growth_increment(&mut self, increment: NonZero<usize>) {
        self.inner.set_growth_increment(increment);
    }

    /// Whether [`release()`](Self::release) has been called on this vector.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.is_released()
    }

    /// The type-erased vector that stores the elements.
    #[must_use]
    pub fn as_opaque(&self) -> &OpaqueVec {
        &self.inner
    }

    /// Frees the storage. See [`OpaqueVec::release()`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unallocated`][crate::Error::Unallocated] if already released.
    pub fn release(&mut self) -> Result<()> {
        self.inner.release()
    }

    /// Appends a value, growing by the growth increment if the vector is full.
    ///
    /// # Errors
    ///
    /// See [`OpaqueVec::push_bytes()`].
    pub fn push(&mut self, value: T) -> Result<()> {
        // SAFETY: The element layout was derived from T when the vector was created.
        unsafe { self.inner.push(value) }
    }

    /// Returns the element at `index`, or `None` if out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        // SAFETY: Every element was written as a T with a matching layout.
        unsafe { self.inner.get(index) }
    }

    /// Returns the element at `index` for modification, or `None` if out of bounds.
    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        // SAFETY: Every element was written as a T with a matching layout.
        unsafe { self.inner.get_mut(index) }
    }

    /// Removes the last element. See [`OpaqueVec::remove_last()`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`][crate::Error::Empty] if there are no elements.
    pub fn remove_last(&mut self) -> Result<()> {
        self.inner.remove_last()
    }

    /// Inserts all elements of `source` at `position`. See [`OpaqueVec::insert_from()`].
    ///
    /// # Errors
    ///
    /// See [`OpaqueVec::insert_from()`].
    pub fn insert_from(&mut self, position: usize, source: &Self) -> Result<()> {
        self.inner.insert_from(position, &source.inner)
    }

    /// Grows the capacity by `extra_slots` elements. See [`OpaqueVec::expand()`].
    ///
    /// # Errors
    ///
    /// See [`OpaqueVec::expand()`].
    pub fn expand(&mut self, extra_slots: usize) -> Result<()> {
        self.inner.expand(extra_slots)
    }

    /// Reduces the capacity to the length. See [`OpaqueVec::shrink_to_fit()`].
    ///
    /// # Errors
    ///
    /// See [`OpaqueVec::shrink_to_fit()`].
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        self.inner.shrink_to_fit()
    }

    /// Sorts all elements with `compare`. The sort is unstable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unallocated`][crate::Error::Unallocated] if the vector has been
    /// released.
    pub fn sort_by<F>(&mut self, compare: F) -> Result<()>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        self.sort_range_by(0, self.len(), compare)
    }

    /// Sorts `count` elements starting at `offset` with `compare`. The sort is unstable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unallocated`][crate::Error::Unallocated] if the vector has been
    /// released.
    ///
    /// # Panics
    ///
    /// Panics if `offset + count` exceeds [`len()`](Self::len).
    pub fn sort_range_by<F>(&mut self, offset: usize, count: usize, compare: F) -> Result<()>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        if self.inner.is_released() {
            return Err(crate::Error::Unallocated);
        }

        let len = self.len();

        let Some(end) = offset.checked_add(count).filter(|&end| end <= len) else {
            panic!(
                "sort range of {count} elements at offset {offset} is out of bounds for a vector of length {len}"
            );
        };

        self.as_mut_slice()
            .get_mut(offset..end)
            .expect("range was checked against len above")
            .sort_unstable_by(compare);

        Ok(())
    }

    /// Randomly permutes the elements. See [`OpaqueVec::shuffle()`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unallocated`][crate::Error::Unallocated] if the vector has been
    /// released.
    pub fn shuffle<R>(&mut self, rng: &mut R) -> Result<()>
    where
        R: RngCore + ?Sized,
    {
        self.inner.shuffle(rng)
    }

    /// All elements as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: Every element was written as a T with a matching layout.
        unsafe { self.inner.as_slice() }
    }

    /// All elements as an exclusive slice.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: Every element was written as a T with a matching layout.
        unsafe { self.inner.as_mut_slice() }
    }

    /// Iterates over the elements in order.
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.as_slice().iter()
    }
}

impl<T: Copy> Default for TypedVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for TypedVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedVec")
            .field("elements", &self.as_slice())
            .field("capacity", &self.capacity())
            .field("growth_increment", &self.growth_increment())
            .finish()
    }
}

impl<'a, T: Copy> IntoIterator for &'a TypedVec<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn checked_layout<T>() -> Layout {
    let layout = Layout::new::<T>();
    assert!(layout.size() > 0, "TypedVec cannot store zero-sized types");
    layout
}
