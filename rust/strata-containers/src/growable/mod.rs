//! Growable arrays on top of [`Array`].
//!
//! A growable array is a plain [`Array`] whose storage comes from an
//! [`ArrayAllocator`] and whose deleter is that allocator's deleter. The
//! allocation carries a header in front of the elements that records the
//! capacity, so the handle itself needs no extra field. Growth operations
//! check the deleter to tell which case they are in. An array with any other
//! deleter is moved into a growable block the first time it has to change
//! size.
//!
//! ```
//! use strata_containers::{Array, growable};
//!
//! let mut values = Array::<i32>::new();
//! for i in 1..=5 {
//!     growable::array_append(&mut values, i).unwrap();
//! }
//! assert!(growable::array_is_growable(&values));
//! assert!(growable::array_capacity(&values) >= 5);
//!
//! growable::array_remove(&mut values, 1, 2).unwrap();
//! assert_eq!(values, [1, 4, 5]);
//!
//! growable::array_shrink(&mut values).unwrap();
//! assert!(!growable::array_is_growable(&values));
//! ```
//!
//! The free `array_*` functions use [`DefaultArrayAllocator`]. The same
//! operations are available for any allocator through [`ArrayGrowth`], e.g.
//! `ArrayMallocAllocator::append(&mut array, value)`.

mod allocator;
mod ops;

#[cfg(test)]
mod tests;

use std::mem::MaybeUninit;

use bytemuck::Pod;
use strata_common::{Result, error::Error};

pub use allocator::{
    ArrayAllocator, ArrayMallocAllocator, ArrayNewAllocator, DefaultArrayAllocator, array_growth,
};
pub use ops::ArrayGrowth;

use crate::{DEFAULT_ALLOCATION_ALIGNMENT, array::Array};

pub fn array_is_growable<T>(array: &Array<T>) -> bool {
    DefaultArrayAllocator::is_growable(array)
}

pub fn array_capacity<T>(array: &Array<T>) -> usize {
    DefaultArrayAllocator::capacity_of(array)
}

pub fn array_reserve<T>(array: &mut Array<T>, capacity: usize) -> Result<usize> {
    DefaultArrayAllocator::reserve(array, capacity)
}

pub fn array_resize<T: Default>(array: &mut Array<T>, len: usize) -> Result<()> {
    DefaultArrayAllocator::resize(array, len)
}

pub fn array_resize_with<T>(array: &mut Array<T>, len: usize, f: impl FnMut() -> T) -> Result<()> {
    DefaultArrayAllocator::resize_with(array, len, f)
}

pub fn array_resize_value<T: Clone>(array: &mut Array<T>, len: usize, value: T) -> Result<()> {
    DefaultArrayAllocator::resize_value(array, len, value)
}

/// # Safety
///
/// See [`ArrayGrowth::resize_no_init`].
pub unsafe fn array_resize_no_init<T>(array: &mut Array<T>, len: usize) -> Result<()> {
    unsafe { DefaultArrayAllocator::resize_no_init(array, len) }
}

pub fn array_append<T>(array: &mut Array<T>, value: T) -> Result<&mut T> {
    DefaultArrayAllocator::append(array, value)
}

pub fn array_append_with<T>(array: &mut Array<T>, f: impl FnOnce() -> T) -> Result<&mut T> {
    DefaultArrayAllocator::append_with(array, f)
}

pub fn array_append_slice<'a, T: Clone>(
    array: &'a mut Array<T>,
    values: &[T],
) -> Result<&'a mut [T]> {
    DefaultArrayAllocator::append_slice(array, values)
}

pub fn array_append_value<T: Clone>(
    array: &mut Array<T>,
    count: usize,
    value: T,
) -> Result<&mut [T]> {
    DefaultArrayAllocator::append_value(array, count, value)
}

pub fn array_append_default<T: Default>(array: &mut Array<T>, count: usize) -> Result<&mut [T]> {
    DefaultArrayAllocator::append_default(array, count)
}

/// # Safety
///
/// See [`ArrayGrowth::append_no_init`].
pub unsafe fn array_append_no_init<T>(
    array: &mut Array<T>,
    count: usize,
) -> Result<&mut [MaybeUninit<T>]> {
    unsafe { DefaultArrayAllocator::append_no_init(array, count) }
}

pub fn array_insert<T>(array: &mut Array<T>, index: usize, value: T) -> Result<&mut T> {
    DefaultArrayAllocator::insert(array, index, value)
}

pub fn array_insert_slice<'a, T: Clone>(
    array: &'a mut Array<T>,
    index: usize,
    values: &[T],
) -> Result<&'a mut [T]> {
    DefaultArrayAllocator::insert_slice(array, index, values)
}

/// # Safety
///
/// See [`ArrayGrowth::insert_no_init`].
pub unsafe fn array_insert_no_init<T>(
    array: &mut Array<T>,
    index: usize,
    count: usize,
) -> Result<&mut [MaybeUninit<T>]> {
    unsafe { DefaultArrayAllocator::insert_no_init(array, index, count) }
}

pub fn array_remove<T>(array: &mut Array<T>, index: usize, count: usize) -> Result<()> {
    DefaultArrayAllocator::remove(array, index, count)
}

pub fn array_remove_unordered<T>(array: &mut Array<T>, index: usize, count: usize) -> Result<()> {
    DefaultArrayAllocator::remove_unordered(array, index, count)
}

pub fn array_remove_suffix<T>(array: &mut Array<T>, count: usize) -> Result<()> {
    DefaultArrayAllocator::remove_suffix(array, count)
}

pub fn array_clear<T>(array: &mut Array<T>) {
    DefaultArrayAllocator::clear(array)
}

pub fn array_shrink<T>(array: &mut Array<T>) -> Result<()> {
    DefaultArrayAllocator::shrink(array)
}

/// Reinterprets an array grown with [`ArrayMallocAllocator`] as an array of
/// another plain-data type, keeping it growable.
///
/// The allocation header stores the size in bytes, so the capacity carries
/// over. Fails with `InvalidArgument` if the array does not come from the
/// malloc allocator, if its byte size is not a multiple of `size_of::<U>()`,
/// or if the two types put their elements at different header offsets. On
/// failure `array` is left untouched. An empty array with no deleter becomes
/// an empty array of `U`.
pub fn array_allocator_cast<U: Pod, T: Pod>(array: &mut Array<T>) -> Result<Array<U>> {
    if array.is_empty() && array.deleter.is_none() {
        *array = Array::new();
        return Ok(Array::new());
    }
    if !ArrayMallocAllocator::is_growable(array) {
        return Err(Error::invalid_arg(
            "array",
            "the array has to be grown with the malloc allocator",
        )
        .report());
    }
    let bytes = array.len * size_of::<T>();
    if size_of::<U>() == 0 || bytes % size_of::<U>() != 0 {
        return Err(Error::invalid_arg(
            "array",
            format!(
                "can't reinterpret {} {}-byte items as {}-byte items",
                array.len,
                size_of::<T>(),
                size_of::<U>()
            ),
        )
        .report());
    }
    if align_of::<U>() > DEFAULT_ALLOCATION_ALIGNMENT
        || ArrayMallocAllocator::allocation_offset::<T>()
            != ArrayMallocAllocator::allocation_offset::<U>()
    {
        return Err(Error::invalid_arg(
            "U",
            format!(
                "{} and {} use different allocation offsets",
                std::any::type_name::<T>(),
                std::any::type_name::<U>()
            ),
        )
        .report());
    }
    let (data, _, _) = std::mem::take(array).into_raw_parts();
    Ok(Array {
        data: data.cast::<U>(),
        len: bytes / size_of::<U>(),
        deleter: Some(allocator::growable_deleter::<ArrayMallocAllocator, U>()),
    })
}
