//! Several typed arrays packed into a single allocation.
//!
//! An [`ArrayTuple`] is built from a list of [`Item`]s. The items are laid out
//! one after another in a single buffer, each aligned for its element type. The
//! tuple owns that buffer, and dropping it destructs every element and releases
//! the memory. Each item publishes its sub-array to an [`ArrayViewMut`] the
//! caller provides.
//!
//! ```
//! use strata_containers::{ArrayTuple, ArrayViewMut, Item};
//!
//! let mut ids = ArrayViewMut::<u32>::empty();
//! let mut names = ArrayViewMut::<String>::empty();
//! let mut tuple = ArrayTuple::new([
//!     Item::from_fn(3, &mut ids, |i| i as u32 * 10),
//!     Item::value_init(3, &mut names),
//! ])
//! .unwrap();
//!
//! // SAFETY: both views were published by `tuple`.
//! unsafe {
//!     assert_eq!(tuple.slice(ids.as_const()), &[0, 10, 20]);
//!     tuple.slice_mut(names)[1].push_str("second");
//!     assert_eq!(tuple.slice(names.as_const())[1], "second");
//! }
//! ```
//!
//! The memory comes from the global allocator by default. A custom allocator
//! returns the memory together with a [`TupleDeleter`]: [`DefaultDeleter`], a
//! stateless [`RawDeleter`] function or a [`StatefulDeleter`] closure. The
//! tuple stores whatever is needed to run that deleter later. Trivially
//! destructible items paired with a default or stateless deleter need no
//! bookkeeping at all. In that case the buffer holds nothing but the items.

mod deleter;
mod item;
mod layout;


use std::{
    fmt,
    mem::{self, ManuallyDrop},
    ptr,
};

use strata_common::{LOG_TARGET, Result, error::Error};

pub use deleter::{
    DefaultDeleter, DeleterStorage, RawDeleter, StatefulDeleter, TupleDeleter, default_allocate,
    default_release,
};
pub use item::Item;

use layout::{DeleterDestination, PlacedItem};

use crate::{
    array::Array,
    view::{ArrayView, ArrayViewMut},
};

/// Owner of a packed multi-array buffer.
///
/// Holds exactly the buffer pointer, its size in bytes and the top-level
/// deleter. `None` stands for the default deleter.
pub struct ArrayTuple {
    data: *mut u8,
    size: usize,
    deleter: Option<RawDeleter>,
}

impl ArrayTuple {
    /// An empty tuple. Does not allocate.
    pub const fn empty() -> ArrayTuple {
        ArrayTuple {
            data: ptr::null_mut(),
            size: 0,
            deleter: None,
        }
    }

    /// Allocates and constructs all `items` using [`default_allocate`].
    ///
    /// Fails with `InvalidArgument` if an item needs more than
    /// [`DEFAULT_ALLOCATION_ALIGNMENT`](crate::DEFAULT_ALLOCATION_ALIGNMENT).
    pub fn new<'a>(items: impl IntoIterator<Item = Item<'a>>) -> Result<ArrayTuple> {
        Self::with_allocator(items, default_allocate)
    }

    /// Allocates and constructs all `items` using a custom allocator.
    ///
    /// `allocator` is called with the total size and alignment and returns the
    /// memory along with the deleter that releases it. The allocator is not
    /// called when the total size is zero; zero-sized elements are then still
    /// constructed and published with their full count.
    ///
    /// A null pointer is reported as `AllocationFailed`. A misaligned pointer is
    /// handed back to the deleter and reported as `InvalidArgument`. If an element
    /// constructor panics, the elements constructed so far are dropped in reverse
    /// order and the memory is released through the deleter before the panic
    /// resumes. Destination views are written only on success.
    pub fn with_allocator<'a, A, D>(
        items: impl IntoIterator<Item = Item<'a>>,
        allocator: A,
    ) -> Result<ArrayTuple>
    where
        A: FnOnce(usize, usize) -> Result<(*mut u8, D)>,
        D: TupleDeleter,
    {
        let mut items = items.into_iter().collect::<Vec<_>>();
        let storage = D::storage();
        let sizing = layout::size_alignment_for(&items, &storage)?;

        if sizing.size == 0 {
            // Only zero-sized elements can be present, none of them needing drop.
            for item in &mut items {
                debug_assert!(item.element_size == 0 || item.element_count == 0);
                let data = ptr::without_provenance_mut::<u8>(item.element_alignment);
                if let Some(constructor) = item.constructor.as_mut() {
                    for element in 0..item.element_count {
                        constructor(data, element);
                    }
                }
            }
            for item in &mut items {
                let data = ptr::without_provenance_mut::<u8>(item.element_alignment);
                unsafe { item.publish(data) };
            }
            return Ok(ArrayTuple::empty());
        }

        let (data, deleter) = allocator(sizing.size, sizing.alignment)?;
        if data.is_null() {
            return Err(Error::allocation_failed(sizing.size, sizing.alignment).report());
        }
        if !crate::align::is_aligned_ptr(data, sizing.alignment) {
            unsafe { deleter.release(data, sizing.size) };
            return Err(Error::invalid_arg(
                "allocator",
                format!(
                    "returned memory at {data:p} is not aligned to {}",
                    sizing.alignment
                ),
            )
            .report());
        }
        log::debug!(
            target: LOG_TARGET,
            "array tuple of {} items: {} bytes aligned to {}, {} destructor records, {:?} deleter",
            items.len(),
            sizing.size,
            sizing.alignment,
            sizing.record_count,
            storage,
        );

        let placement = unsafe { layout::place(data, &sizing, &items, &storage) };

        let mut guard = ConstructionGuard {
            data,
            size: sizing.size,
            placed: &placement.items,
            items_done: 0,
            elements_done: 0,
            deleter: ManuallyDrop::new(deleter),
        };
        for (index, (item, placed)) in items.iter_mut().zip(&placement.items).enumerate() {
            guard.items_done = index;
            guard.elements_done = 0;
            if let Some(constructor) = item.constructor.as_mut() {
                for element in 0..placed.count {
                    constructor(unsafe { placed.data.add(element * placed.element_size) }, element);
                    guard.elements_done = element + 1;
                }
            }
        }
        let deleter = guard.disarm();

        let mut tuple = ArrayTuple {
            data,
            size: sizing.size,
            deleter: (sizing.record_count != 0).then_some(layout::dispatch_records as RawDeleter),
        };
        let destination = match placement.deleter_destination {
            DeleterDestination::None => ptr::null_mut(),
            DeleterDestination::TopLevel => (&raw mut tuple.deleter).cast(),
            DeleterDestination::Buffer(slot) => slot,
        };
        unsafe { deleter.install(destination) };

        for (item, placed) in items.iter_mut().zip(&placement.items) {
            unsafe { item.publish(placed.data) };
        }
        Ok(tuple)
    }

    /// Start of the buffer; null for an empty tuple.
    #[inline]
    pub fn data(&self) -> *mut u8 {
        self.data
    }

    /// Total buffer size in bytes, including bookkeeping and padding.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_null()
    }

    /// The top-level deleter. `None` means [`default_release`].
    #[inline]
    pub fn deleter(&self) -> Option<RawDeleter> {
        self.deleter
    }

    /// Gives up ownership of the buffer and resets the tuple to empty.
    ///
    /// The caller becomes responsible for calling the deleter (as read from
    /// [`deleter`](Self::deleter) before the call, or [`default_release`] if that
    /// was `None`) with the pointer and [`size`](Self::size).
    pub fn release(&mut self) -> *mut u8 {
        self.size = 0;
        self.deleter = None;
        mem::replace(&mut self.data, ptr::null_mut())
    }

    /// The elements behind a view published by this tuple.
    ///
    /// # Safety
    ///
    /// `view` must have been published by this tuple (or be a sub-view of one
    /// that was), and the elements must be initialized. A view outliving the
    /// tuple that published it may point into an unrelated buffer.
    ///
    /// # Panics
    ///
    /// Panics if a non-empty view does not lie within this tuple's buffer.
    pub unsafe fn slice<T>(&self, view: ArrayView<T>) -> &[T] {
        self.check_view(view.as_ptr().cast(), view.len() * size_of::<T>());
        unsafe { view.as_slice() }
    }

    /// Mutable access to the elements behind a view published by this tuple.
    ///
    /// # Safety
    ///
    /// Same as [`slice`](Self::slice).
    ///
    /// # Panics
    ///
    /// Panics if a non-empty view does not lie within this tuple's buffer.
    pub unsafe fn slice_mut<T>(&mut self, view: ArrayViewMut<T>) -> &mut [T] {
        self.check_view(view.as_ptr().cast(), view.len() * size_of::<T>());
        unsafe { view.as_mut_slice() }
    }

    fn check_view(&self, start: *const u8, bytes: usize) {
        if bytes == 0 {
            return;
        }
        let begin = self.data.addr();
        let end = begin + self.size;
        let view_begin = start.addr();
        assert!(
            view_begin >= begin && view_begin <= end && bytes <= end - view_begin,
            "view at {start:p} of {bytes} bytes is outside of the tuple buffer at {:p} of {} bytes",
            self.data,
            self.size
        );
    }

    /// Converts the tuple into a raw byte array, resetting the tuple to empty.
    ///
    /// Only possible when no destructor records are involved, that is, all items
    /// are trivially destructible and the deleter is the default or a stateless
    /// one. Fails with `UnsupportedConversion` otherwise, leaving the tuple intact.
    pub fn take_bytes(&mut self) -> Result<Array<u8>> {
        let dispatching = self
            .deleter
            .is_some_and(|deleter| ptr::fn_addr_eq(deleter, layout::dispatch_records as RawDeleter));
        if dispatching {
            return Err(Error::unsupported_conversion(
                "array tuple with non-trivially destructible items or a stateful deleter \
                 cannot be converted to a byte array",
            )
            .report());
        }
        if self.is_empty() {
            return Ok(Array::new());
        }
        let size = self.size;
        let deleter = self.deleter.unwrap_or(default_release);
        let data = self.release();
        Ok(unsafe { Array::from_raw_parts(data, size, deleter) })
    }
}

impl Drop for ArrayTuple {
    fn drop(&mut self) {
        if self.data.is_null() {
            return;
        }
        match self.deleter {
            Some(deleter) => unsafe { deleter(self.data, self.size) },
            None => unsafe { default_release(self.data, self.size) },
        }
    }
}

impl Default for ArrayTuple {
    fn default() -> Self {
        ArrayTuple::empty()
    }
}

impl fmt::Debug for ArrayTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayTuple")
            .field("data", &self.data)
            .field("size", &self.size)
            .field("deleter", &self.deleter.map(|deleter| deleter as *const ()))
            .finish()
    }
}

impl TryFrom<ArrayTuple> for Array<u8> {
    type Error = Error;

    fn try_from(mut tuple: ArrayTuple) -> Result<Array<u8>> {
        tuple.take_bytes()
    }
}

/// Unwinds a partially constructed tuple: drops what was constructed and
/// releases the buffer through the allocator's deleter.
struct ConstructionGuard<'p, D: TupleDeleter> {
    data: *mut u8,
    size: usize,
    placed: &'p [PlacedItem],
    items_done: usize,
    elements_done: usize,
    deleter: ManuallyDrop<D>,
}

impl<D: TupleDeleter> ConstructionGuard<'_, D> {
    fn disarm(self) -> D {
        let mut this = ManuallyDrop::new(self);
        unsafe { ManuallyDrop::take(&mut this.deleter) }
    }
}

impl<D: TupleDeleter> Drop for ConstructionGuard<'_, D> {
    fn drop(&mut self) {
        log::error!(
            target: LOG_TARGET,
            "array tuple construction failed at item {} element {}, unwinding",
            self.items_done,
            self.elements_done
        );
        unsafe {
            if let Some(current) = self.placed.get(self.items_done) {
                current.destruct(self.elements_done, self.size);
            }
            for placed in self.placed[..self.items_done].iter().rev() {
                if placed.constructed {
                    placed.destruct(placed.count, self.size);
                }
            }
            ManuallyDrop::take(&mut self.deleter).release(self.data, self.size);
        }
    }
}
