//! Owning array handle with a custom deleter.

use std::{
    alloc::{self, Layout},
    fmt,
    mem::{self, MaybeUninit},
    ops::{Deref, DerefMut},
    ptr::{self, NonNull},
};

use bytemuck::Zeroable;
use strata_common::{Result, error::Error};

use crate::view::{ArrayView, ArrayViewMut};

/// Releases the storage of an [`Array`].
///
/// Called with the data pointer and the element count. By the time the deleter
/// runs the elements have already been dropped; the deleter releases memory only.
pub type ArrayDeleter<T> = unsafe fn(*mut T, usize);

/// Owning pointer/length/deleter triple.
///
/// With no deleter the storage is a `Box<[T]>` of exactly `len` elements. A custom
/// deleter lets the same handle own memory from anywhere: a packed
/// [`ArrayTuple`](crate::ArrayTuple) buffer, a growable allocation (see
/// [`growable`](crate::growable)), or a caller-provided block.
pub struct Array<T> {
    pub(crate) data: *mut T,
    pub(crate) len: usize,
    pub(crate) deleter: Option<ArrayDeleter<T>>,
}

unsafe impl<T: Send> Send for Array<T> {}
unsafe impl<T: Sync> Sync for Array<T> {}

impl<T> Array<T> {
    /// An empty array. Does not allocate.
    #[inline]
    pub const fn new() -> Array<T> {
        Array {
            data: NonNull::dangling().as_ptr(),
            len: 0,
            deleter: None,
        }
    }

    pub fn from_boxed_slice(values: Box<[T]>) -> Array<T> {
        let len = values.len();
        let data = Box::into_raw(values) as *mut T;
        Array {
            data,
            len,
            deleter: None,
        }
    }

    pub fn from_vec(values: Vec<T>) -> Array<T> {
        Self::from_boxed_slice(values.into_boxed_slice())
    }

    /// Creates an array of `len` elements, each produced by `f(index)`.
    pub fn from_fn(len: usize, f: impl FnMut(usize) -> T) -> Array<T> {
        Self::from_vec((0..len).map(f).collect())
    }

    /// Creates an array of `len` default-constructed elements.
    pub fn value_init(len: usize) -> Array<T>
    where
        T: Default,
    {
        Self::from_fn(len, |_| T::default())
    }

    /// Creates an array of `len` elements with all bytes zero.
    pub fn zeroed(len: usize) -> Array<T>
    where
        T: Zeroable,
    {
        Self::from_fn(len, |_| T::zeroed())
    }

    /// Creates an array of `len` clones of `value`.
    pub fn from_value(len: usize, value: T) -> Array<T>
    where
        T: Clone,
    {
        Self::from_vec(vec![value; len])
    }

    /// Takes ownership of `len` initialized elements at `data`.
    ///
    /// # Safety
    ///
    /// `data` must point to `len` initialized elements (or be dangling and aligned
    /// for an empty array), and `deleter` must release that storage when called with
    /// `(data, len)` after the elements are dropped.
    #[inline]
    pub unsafe fn from_raw_parts(data: *mut T, len: usize, deleter: ArrayDeleter<T>) -> Array<T> {
        Array {
            data,
            len,
            deleter: Some(deleter),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.data
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.data
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.data, self.len) }
    }

    /// The custom deleter, or `None` for boxed-slice storage.
    #[inline]
    pub fn deleter(&self) -> Option<ArrayDeleter<T>> {
        self.deleter
    }

    #[inline]
    pub fn view(&self) -> ArrayView<T> {
        ArrayView::from(self.as_slice())
    }

    #[inline]
    pub fn view_mut(&mut self) -> ArrayViewMut<T> {
        ArrayViewMut::from(self.as_mut_slice())
    }

    /// Gives up ownership without dropping anything.
    ///
    /// The caller becomes responsible for the elements and for releasing the
    /// storage (through the deleter, or as a `Box<[T]>` when there is none).
    #[inline]
    pub fn into_raw_parts(self) -> (*mut T, usize, Option<ArrayDeleter<T>>) {
        let this = mem::ManuallyDrop::new(self);
        (this.data, this.len, this.deleter)
    }

    /// Releases the storage without dropping the elements, which must have been
    /// moved out or dropped already.
    pub(crate) unsafe fn free_storage(self) {
        let (data, len, deleter) = self.into_raw_parts();
        match deleter {
            Some(deleter) => unsafe { deleter(data, len) },
            None => unsafe {
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                    data as *mut MaybeUninit<T>,
                    len,
                )))
            },
        }
    }

    /// Moves the elements into fresh boxed-slice storage of exactly `len` elements.
    pub(crate) fn relocate_to_boxed(&mut self) -> Result<()> {
        let len = self.len;
        let data = allocate_boxed::<T>(len)?;
        unsafe { ptr::copy_nonoverlapping(self.data, data, len) };
        let old = mem::replace(
            self,
            Array {
                data,
                len,
                deleter: None,
            },
        );
        unsafe { old.free_storage() };
        Ok(())
    }
}

/// Allocates storage compatible with `Box<[T]>` of `len` elements.
pub(crate) fn allocate_boxed<T>(len: usize) -> Result<*mut T> {
    let layout = Layout::array::<T>(len)
        .map_err(|_| Error::invalid_arg("len", format!("{len} elements overflow")).report())?;
    if layout.size() == 0 {
        return Ok(NonNull::dangling().as_ptr());
    }
    let data = unsafe { alloc::alloc(layout) };
    if data.is_null() {
        return Err(Error::allocation_failed(layout.size(), layout.align()).report());
    }
    Ok(data.cast())
}

impl<T> Drop for Array<T> {
    fn drop(&mut self) {
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.data, self.len));
            ptr::read(self).free_storage();
        }
    }
}

impl<T> Default for Array<T> {
    fn default() -> Self {
        Array::new()
    }
}

impl<T> Deref for Array<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T> DerefMut for Array<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T: Clone> Clone for Array<T> {
    /// Clones into boxed-slice storage regardless of how `self` is stored.
    fn clone(&self) -> Self {
        Array::from_vec(self.as_slice().to_vec())
    }
}

impl<T: fmt::Debug> fmt::Debug for Array<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

impl<T: PartialEq> PartialEq<[T]> for Array<T> {
    fn eq(&self, other: &[T]) -> bool {
        self.as_slice() == other
    }
}

impl<T: PartialEq, const N: usize> PartialEq<[T; N]> for Array<T> {
    fn eq(&self, other: &[T; N]) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T> From<Vec<T>> for Array<T> {
    fn from(values: Vec<T>) -> Self {
        Array::from_vec(values)
    }
}

impl<T> From<Box<[T]>> for Array<T> {
    fn from(values: Box<[T]>) -> Self {
        Array::from_boxed_slice(values)
    }
}

impl<T> FromIterator<T> for Array<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Array::from_vec(iter.into_iter().collect())
    }
}
