use std::alloc::{self, Layout};
use std::num::NonZero;
use std::ptr::NonNull;

use tracing::trace;

use crate::{Error, Result};

/// Exclusively owned, aligned storage for `capacity` elements of one layout.
///
/// The buffer does not know which slots hold valid data. It only manages the memory block,
/// which is released when the buffer is dropped.
///
/// A buffer with zero capacity owns no allocation and points at a dangling, well-aligned
/// address instead.
#[derive(Debug)]
pub(crate) struct RawBuffer {
    /// Layout of a single element. The size is non-zero and a multiple of the alignment, so it
    /// doubles as the stride between consecutive elements.
    item_layout: Layout,

    /// Start of the memory block, or a dangling aligned pointer if `capacity` is zero.
    ptr: NonNull<u8>,

    /// Number of element slots in the memory block.
    capacity: usize,
}

// SAFETY: The buffer exclusively owns a block of plain bytes with no thread affinity, so moving
// it to another thread is sound. It is not `Sync` because callers mutate through raw pointers.
unsafe impl Send for RawBuffer {}

impl RawBuffer {
    /// Creates a buffer without any allocation.
    #[must_use]
    pub(crate) fn empty(item_layout: Layout) -> Self {
        debug_assert_layout(item_layout);

        Self {
            item_layout,
            ptr: dangling(item_layout),
            capacity: 0,
        }
    }

    /// Allocates a zero-filled buffer with room for `capacity` elements.
    pub(crate) fn allocate_zeroed(item_layout: Layout, capacity: usize) -> Result<Self> {
        debug_assert_layout(item_layout);

        if capacity == 0 {
            return Ok(Self::empty(item_layout));
        }

        let array_layout = array_layout(item_layout, capacity)?;

        // SAFETY: The layout has a non-zero size because both the item size and the capacity
        // are non-zero, which is the only requirement of `alloc_zeroed()`.
        let ptr = unsafe { alloc::alloc_zeroed(array_layout) };

        let ptr = NonNull::new(ptr).ok_or(Error::AllocationFailure {
            requested_bytes: array_layout.size(),
        })?;

        trace!(
            capacity,
            bytes = array_layout.size(),
            "allocated element storage"
        );

        Ok(Self {
            item_layout,
            ptr,
            capacity,
        })
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of the memory block in bytes.
    #[must_use]
    pub(crate) fn size_bytes(&self) -> usize {
        // Cannot overflow because the same product was a valid allocation size.
        self.capacity.wrapping_mul(self.item_layout.size())
    }

    #[must_use]
    pub(crate) fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Returns a pointer to the slot at `index`. An index equal to the capacity yields the
    /// one-past-the-end pointer.
    #[must_use]
    pub(crate) fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(
            index <= self.capacity,
            "slot {index} is out of bounds in a buffer of capacity {}",
            self.capacity
        );

        // Cannot overflow because that would imply the buffer extends beyond virtual memory.
        let offset = index.wrapping_mul(self.item_layout.size());

        // SAFETY: The offset is at most the size of the memory block (guarded by the bounds
        // check above), so the result stays within or one past the end of the block.
        unsafe { self.ptr.byte_add(offset) }
    }

    /// Changes the capacity of the buffer, preserving the contents of the slots that remain.
    ///
    /// Resizing to zero capacity releases the memory block. If the allocator cannot satisfy
    /// the request, the buffer is left exactly as it was.
    pub(crate) fn resize(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity == self.capacity {
            return Ok(());
        }

        if new_capacity == 0 {
            self.deallocate();
            return Ok(());
        }

        let new_layout = array_layout(self.item_layout, new_capacity)?;

        let new_ptr = if self.capacity == 0 {
            // SAFETY: The layout has a non-zero size because new_capacity is non-zero.
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = self.current_layout();

            // SAFETY: The block was allocated by the global allocator with `old_layout`, the new
            // size is non-zero and `array_layout()` verified that it does not overflow `isize`
            // when rounded up to the alignment.
            unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_layout.size()) }
        };

        // A failed reallocation leaves the original block untouched and still owned by us.
        let new_ptr = NonNull::new(new_ptr).ok_or(Error::AllocationFailure {
            requested_bytes: new_layout.size(),
        })?;

        trace!(
            old_capacity = self.capacity,
            new_capacity,
            "resized element storage"
        );

        self.ptr = new_ptr;
        self.capacity = new_capacity;

        Ok(())
    }

    fn current_layout(&self) -> Layout {
        array_layout(self.item_layout, self.capacity)
            .expect("the layout was valid when the current block was allocated")
    }

    fn deallocate(&mut self) {
        if self.capacity == 0 {
            return;
        }

        let layout = self.current_layout();

        // SAFETY: The block was allocated by the global allocator with this exact layout and
        // we reset our state below, so it cannot be deallocated twice.
        unsafe {
            alloc::dealloc(self.ptr.as_ptr(), layout);
        }

        trace!(capacity = self.capacity, "released element storage");

        self.ptr = dangling(self.item_layout);
        self.capacity = 0;
    }
}

impl Drop for RawBuffer {
    #[cfg_attr(test, mutants::skip)] // Can be mutated to a silent leak that tests cannot observe.
    fn drop(&mut self) {
        self.deallocate();
    }
}

/// Calculates the layout of an array of `capacity` elements of `item_layout`.
fn array_layout(item_layout: Layout, capacity: usize) -> Result<Layout> {
    let requested_bytes =
        item_layout
            .size()
            .checked_mul(capacity)
            .ok_or(Error::AllocationFailure {
                requested_bytes: usize::MAX,
            })?;

    Layout::from_size_align(requested_bytes, item_layout.align()).map_err(|_layout_error| {
        Error::AllocationFailure { requested_bytes }
    })
}

/// An aligned, non-null address that is never dereferenced.
fn dangling(item_layout: Layout) -> NonNull<u8> {
    // Alignment is always a non-zero power of two.
    let align = NonZero::new(item_layout.align()).unwrap_or(NonZero::<usize>::MIN);

    NonNull::<u8>::dangling().with_addr(align)
}

fn debug_assert_layout(item_layout: Layout) {
    debug_assert!(item_layout.size() > 0, "element size must be non-zero");
    debug_assert_eq!(
        item_layout,
        item_layout.pad_to_align(),
        "element layout must be padded to its alignment"
    );
}
