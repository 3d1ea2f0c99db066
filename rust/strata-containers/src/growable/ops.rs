use std::{
    marker::PhantomData,
    mem::{self, ManuallyDrop, MaybeUninit},
    ptr, slice,
};

use strata_common::{LOG_TARGET, Result, error::Error, verify_arg};

use super::allocator::{ArrayAllocator, growable_deleter};
use crate::{array::Array, sanitizer};

/// Growth operations on [`Array`], implemented for every [`ArrayAllocator`].
///
/// An array that is not growable with this allocator (any other deleter,
/// including none) is first moved into a fresh growable block. The elements
/// are relocated bitwise; the old storage is released without dropping them.
///
/// Every operation that fails leaves the array at its previous length. A panic
/// while constructing new elements drops whatever was constructed so far and
/// also restores the previous length.
pub trait ArrayGrowth: ArrayAllocator + Sized {
    /// Whether the array's deleter is this allocator's deleter.
    fn is_growable<T>(array: &Array<T>) -> bool {
        is_growable_with::<Self, T>(array)
    }

    /// Capacity of a growable array, or its length otherwise.
    fn capacity_of<T>(array: &Array<T>) -> usize {
        capacity_with::<Self, T>(array)
    }

    /// Makes room for at least `capacity` elements and returns the resulting
    /// capacity. Never shrinks.
    fn reserve<T>(array: &mut Array<T>, capacity: usize) -> Result<usize> {
        reserve_with::<Self, T>(array, capacity)
    }

    /// Resizes to `len`, filling new slots with `T::default()`.
    fn resize<T: Default>(array: &mut Array<T>, len: usize) -> Result<()> {
        resize_by::<Self, T>(array, len, T::default)
    }

    /// Resizes to `len`, filling new slots with values returned by `f`.
    fn resize_with<T>(array: &mut Array<T>, len: usize, f: impl FnMut() -> T) -> Result<()> {
        resize_by::<Self, T>(array, len, f)
    }

    /// Resizes to `len`, filling new slots with clones of `value`.
    fn resize_value<T: Clone>(array: &mut Array<T>, len: usize, value: T) -> Result<()> {
        resize_by::<Self, T>(array, len, || value.clone())
    }

    /// Resizes to `len` without initializing new slots.
    ///
    /// # Safety
    ///
    /// The new elements must be initialized before the array is read or
    /// dropped.
    unsafe fn resize_no_init<T>(array: &mut Array<T>, len: usize) -> Result<()> {
        let current = array.len;
        if len <= current {
            return remove_suffix_with::<Self, T>(array, current - len);
        }
        reserve_with::<Self, T>(array, len)?;
        let gap = open_gap::<Self, T>(array, current, len - current)?;
        unsafe { gap.commit() };
        Ok(())
    }

    /// Appends one element and returns it.
    fn append<T>(array: &mut Array<T>, value: T) -> Result<&mut T> {
        let len = array.len;
        let mut gap = open_gap::<Self, T>(array, len, 1)?;
        gap.write(value);
        Ok(&mut gap.finish()[0])
    }

    /// Appends the element returned by `f`, which runs once the storage has
    /// grown.
    fn append_with<T>(array: &mut Array<T>, f: impl FnOnce() -> T) -> Result<&mut T> {
        let len = array.len;
        let mut gap = open_gap::<Self, T>(array, len, 1)?;
        gap.write(f());
        Ok(&mut gap.finish()[0])
    }

    /// Appends clones of `values`.
    fn append_slice<'a, T: Clone>(array: &'a mut Array<T>, values: &[T]) -> Result<&'a mut [T]> {
        let len = array.len;
        let mut gap = open_gap::<Self, T>(array, len, values.len())?;
        for value in values {
            gap.write(value.clone());
        }
        Ok(gap.finish())
    }

    /// Appends `count` clones of `value`.
    fn append_value<T: Clone>(array: &mut Array<T>, count: usize, value: T) -> Result<&mut [T]> {
        let len = array.len;
        let mut gap = open_gap::<Self, T>(array, len, count)?;
        gap.fill_with(|| value.clone());
        Ok(gap.finish())
    }

    /// Appends `count` default values.
    fn append_default<T: Default>(array: &mut Array<T>, count: usize) -> Result<&mut [T]> {
        let len = array.len;
        let mut gap = open_gap::<Self, T>(array, len, count)?;
        gap.fill_with(T::default);
        Ok(gap.finish())
    }

    /// Appends `count` uninitialized slots.
    ///
    /// # Safety
    ///
    /// The returned slots are already part of the array. They must be
    /// initialized before the array is read or dropped.
    unsafe fn append_no_init<T>(array: &mut Array<T>, count: usize) -> Result<&mut [MaybeUninit<T>]> {
        let len = array.len;
        let gap = open_gap::<Self, T>(array, len, count)?;
        Ok(uninit_slice(unsafe { gap.commit() }))
    }

    /// Inserts `value` at `index`, shifting later elements up.
    fn insert<T>(array: &mut Array<T>, index: usize, value: T) -> Result<&mut T> {
        let mut gap = open_gap::<Self, T>(array, index, 1)?;
        gap.write(value);
        Ok(&mut gap.finish()[0])
    }

    /// Inserts clones of `values` at `index`, shifting later elements up.
    fn insert_slice<'a, T: Clone>(
        array: &'a mut Array<T>,
        index: usize,
        values: &[T],
    ) -> Result<&'a mut [T]> {
        let mut gap = open_gap::<Self, T>(array, index, values.len())?;
        for value in values {
            gap.write(value.clone());
        }
        Ok(gap.finish())
    }

    /// Inserts `count` uninitialized slots at `index`.
    ///
    /// # Safety
    ///
    /// Same as [`append_no_init`](Self::append_no_init).
    unsafe fn insert_no_init<T>(
        array: &mut Array<T>,
        index: usize,
        count: usize,
    ) -> Result<&mut [MaybeUninit<T>]> {
        let gap = open_gap::<Self, T>(array, index, count)?;
        Ok(uninit_slice(unsafe { gap.commit() }))
    }

    /// Removes `count` elements starting at `index`, preserving the order of
    /// the rest.
    fn remove<T>(array: &mut Array<T>, index: usize, count: usize) -> Result<()> {
        let len = array.len;
        let end = removal_end(len, index, count)?;
        if count == 0 {
            return Ok(());
        }
        if !is_growable_with::<Self, T>(array) {
            return remove_relocating::<Self, T>(array, index, count);
        }
        unsafe {
            let data = array.data;
            array.len = index;
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(data.add(index), count));
            ptr::copy(data.add(end), data.add(index), len - end);
            annotate::<Self, T>(data, Self::capacity(data), len, len - count);
        }
        array.len = len - count;
        Ok(())
    }

    /// Removes `count` elements starting at `index`, filling the hole with
    /// elements from the end.
    fn remove_unordered<T>(array: &mut Array<T>, index: usize, count: usize) -> Result<()> {
        let len = array.len;
        let end = removal_end(len, index, count)?;
        if count == 0 {
            return Ok(());
        }
        if !is_growable_with::<Self, T>(array) {
            return remove_relocating::<Self, T>(array, index, count);
        }
        let moved = count.min(len - end);
        unsafe {
            let data = array.data;
            array.len = index;
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(data.add(index), count));
            ptr::copy_nonoverlapping(data.add(len - moved), data.add(index), moved);
            annotate::<Self, T>(data, Self::capacity(data), len, len - count);
        }
        array.len = len - count;
        Ok(())
    }

    /// Removes the last `count` elements. The capacity stays.
    fn remove_suffix<T>(array: &mut Array<T>, count: usize) -> Result<()> {
        remove_suffix_with::<Self, T>(array, count)
    }

    /// Drops all elements. A growable array keeps its capacity; any other
    /// array is released.
    fn clear<T>(array: &mut Array<T>) {
        if !is_growable_with::<Self, T>(array) {
            *array = Array::new();
            return;
        }
        let len = mem::replace(&mut array.len, 0);
        unsafe {
            let data = array.data;
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(data, len));
            annotate::<Self, T>(data, Self::capacity(data), len, 0);
        }
    }

    /// Moves a growable array into exactly-sized storage with no custom
    /// deleter, so it is no longer growable. Other arrays are left alone.
    fn shrink<T>(array: &mut Array<T>) -> Result<()> {
        if !is_growable_with::<Self, T>(array) {
            return Ok(());
        }
        array.relocate_to_boxed()
    }
}

impl<A: ArrayAllocator> ArrayGrowth for A {}

fn is_growable_with<A: ArrayAllocator, T>(array: &Array<T>) -> bool {
    array
        .deleter
        .is_some_and(|deleter| ptr::fn_addr_eq(deleter, growable_deleter::<A, T>()))
}

fn capacity_with<A: ArrayAllocator, T>(array: &Array<T>) -> usize {
    if is_growable_with::<A, T>(array) {
        unsafe { A::capacity(array.data) }
    } else {
        array.len
    }
}

fn reserve_with<A: ArrayAllocator, T>(array: &mut Array<T>, capacity: usize) -> Result<usize> {
    let current = capacity_with::<A, T>(array);
    if capacity <= current {
        return Ok(current);
    }
    if is_growable_with::<A, T>(array) {
        reallocate::<A, T>(array, capacity)?;
    } else {
        let len = array.len;
        relocate_to_growable::<A, T>(array, capacity, len, 0)?;
    }
    Ok(capacity)
}

fn resize_by<A: ArrayAllocator, T>(
    array: &mut Array<T>,
    len: usize,
    fill: impl FnMut() -> T,
) -> Result<()> {
    let current = array.len;
    if len <= current {
        return remove_suffix_with::<A, T>(array, current - len);
    }
    reserve_with::<A, T>(array, len)?;
    let mut gap = open_gap::<A, T>(array, current, len - current)?;
    gap.fill_with(fill);
    gap.finish();
    Ok(())
}

fn remove_suffix_with<A: ArrayAllocator, T>(array: &mut Array<T>, count: usize) -> Result<()> {
    let len = array.len;
    verify_arg!(count, count <= len);
    if count == 0 {
        return Ok(());
    }
    if !is_growable_with::<A, T>(array) {
        return remove_relocating::<A, T>(array, len - count, count);
    }
    let new_len = len - count;
    array.len = new_len;
    unsafe {
        let data = array.data;
        ptr::drop_in_place(ptr::slice_from_raw_parts_mut(data.add(new_len), count));
        annotate::<A, T>(data, A::capacity(data), len, new_len);
    }
    Ok(())
}

fn removal_end(len: usize, index: usize, count: usize) -> Result<usize> {
    verify_arg!(count, index.checked_add(count).is_some_and(|end| end <= len));
    Ok(index + count)
}

/// Moves the container-overflow boundary of a growable block from `old_len`
/// to `new_len`.
unsafe fn annotate<A: ArrayAllocator, T>(
    data: *const T,
    capacity: usize,
    old_len: usize,
    new_len: usize,
) {
    unsafe {
        sanitizer::annotate_contiguous_container(
            A::base(data),
            data.add(capacity),
            data.add(old_len),
            data.add(new_len),
        )
    }
}

/// Grows a growable array's block to `capacity`.
fn reallocate<A: ArrayAllocator, T>(array: &mut Array<T>, capacity: usize) -> Result<()> {
    let mut data = array.data;
    unsafe {
        A::reallocate(&mut data, array.len, capacity)?;
        annotate::<A, T>(data, capacity, capacity, array.len);
    }
    array.data = data;
    Ok(())
}

/// Moves a non-growable array into a fresh growable block of `capacity`,
/// leaving `gap` slots at `index` uninitialized. The length does not include
/// the gap.
fn relocate_to_growable<A: ArrayAllocator, T>(
    array: &mut Array<T>,
    capacity: usize,
    index: usize,
    gap: usize,
) -> Result<()> {
    let len = array.len;
    debug_assert!(index <= len && len + gap <= capacity);
    let data = A::allocate::<T>(capacity)?;
    unsafe {
        ptr::copy_nonoverlapping(array.data, data, index);
        ptr::copy_nonoverlapping(array.data.add(index), data.add(index + gap), len - index);
        annotate::<A, T>(data, capacity, capacity, len);
    }
    let old = mem::replace(
        array,
        Array {
            data,
            len,
            deleter: Some(growable_deleter::<A, T>()),
        },
    );
    unsafe { old.free_storage() };
    log::trace!(
        target: LOG_TARGET,
        "moved {len} elements into a growable block of {capacity} at {data:p}"
    );
    Ok(())
}

/// Removal from a non-growable array: the survivors go into an exactly sized
/// growable block, the removed elements are dropped in the old storage.
fn remove_relocating<A: ArrayAllocator, T>(
    array: &mut Array<T>,
    index: usize,
    count: usize,
) -> Result<()> {
    let len = array.len;
    let new_len = len - count;
    let data = A::allocate::<T>(new_len)?;
    unsafe {
        ptr::copy_nonoverlapping(array.data, data, index);
        ptr::copy_nonoverlapping(array.data.add(index + count), data.add(index), new_len - index);
    }
    let old = mem::replace(
        array,
        Array {
            data,
            len: new_len,
            deleter: Some(growable_deleter::<A, T>()),
        },
    );
    unsafe {
        ptr::drop_in_place(ptr::slice_from_raw_parts_mut(old.data.add(index), count));
        old.free_storage();
    }
    Ok(())
}

/// Opens `count` uninitialized slots at `index`, growing the storage as
/// needed. Elements from `index` on move up by `count`.
fn open_gap<A: ArrayAllocator, T>(
    array: &mut Array<T>,
    index: usize,
    count: usize,
) -> Result<Gap<'_, A, T>> {
    let len = array.len;
    if index > len {
        return Err(Error::invalid_arg(
            "index",
            format!("can't insert at index {index} into an array of {len}"),
        )
        .report());
    }
    let desired = len.checked_add(count).ok_or_else(|| {
        Error::invalid_arg("count", format!("{len} + {count} elements overflow")).report()
    })?;
    if count != 0 {
        if is_growable_with::<A, T>(array) {
            let mut capacity = unsafe { A::capacity(array.data) };
            if desired > capacity {
                capacity = A::grow::<T>(capacity, desired);
                reallocate::<A, T>(array, capacity)?;
            }
            unsafe {
                annotate::<A, T>(array.data, capacity, len, desired);
                ptr::copy(array.data.add(index), array.data.add(index + count), len - index);
            }
        } else {
            let capacity = A::grow::<T>(0, desired);
            relocate_to_growable::<A, T>(array, capacity, index, count)?;
            unsafe { annotate::<A, T>(array.data, capacity, len, desired) };
        }
    }
    Ok(Gap {
        array,
        index,
        count,
        written: 0,
        _allocator: PhantomData,
    })
}

/// Uninitialized slots inside a growable array, not yet counted in its length.
///
/// Dropping an unfinished gap drops what was written and closes the gap again.
struct Gap<'a, A: ArrayAllocator, T> {
    array: &'a mut Array<T>,
    index: usize,
    count: usize,
    written: usize,
    _allocator: PhantomData<A>,
}

impl<'a, A: ArrayAllocator, T> Gap<'a, A, T> {
    fn write(&mut self, value: T) {
        assert!(self.written < self.count, "gap of {} is full", self.count);
        unsafe {
            self.array
                .data
                .add(self.index + self.written)
                .write(value)
        };
        self.written += 1;
    }

    fn fill_with(&mut self, mut f: impl FnMut() -> T) {
        while self.written < self.count {
            self.write(f());
        }
    }

    fn finish(self) -> &'a mut [T] {
        debug_assert_eq!(self.written, self.count);
        unsafe { self.commit() }
    }

    /// Counts the gap into the array length.
    ///
    /// # Safety
    ///
    /// Slots not written through the gap must be initialized by the caller.
    unsafe fn commit(self) -> &'a mut [T] {
        let this = ManuallyDrop::new(self);
        let array = unsafe { ptr::read(&this.array) };
        array.len += this.count;
        unsafe { slice::from_raw_parts_mut(array.data.add(this.index), this.count) }
    }
}

impl<A: ArrayAllocator, T> Drop for Gap<'_, A, T> {
    fn drop(&mut self) {
        if self.count == 0 {
            return;
        }
        let len = self.array.len;
        log::debug!(
            target: LOG_TARGET,
            "rolling back {} of {} new elements at index {}",
            self.written,
            self.count,
            self.index
        );
        unsafe {
            let data = self.array.data;
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(
                data.add(self.index),
                self.written,
            ));
            ptr::copy(
                data.add(self.index + self.count),
                data.add(self.index),
                len - self.index,
            );
            annotate::<A, T>(data, A::capacity(data), len + self.count, len);
        }
    }
}

fn uninit_slice<T>(values: &mut [T]) -> &mut [MaybeUninit<T>] {
    unsafe { slice::from_raw_parts_mut(values.as_mut_ptr().cast(), values.len()) }
}
