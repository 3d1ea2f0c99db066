use std::{
    alloc::{self, Layout},
    ptr,
};

use strata_common::{LOG_TARGET, Result, error::Error};

use crate::{DEFAULT_ALLOCATION_ALIGNMENT, array::ArrayDeleter, sanitizer};

/// Allocation strategy for growable arrays.
///
/// A growable array is an ordinary [`Array`](crate::Array) whose deleter is the
/// allocator's [`deleter`](ArrayAllocator::deleter). The allocation starts with a
/// small header that records the capacity, followed by the elements. The array
/// data pointer points past the header, so the handle itself stays unchanged.
///
/// All methods are generic over the element type; implementations are unit
/// types used purely at the type level.
pub trait ArrayAllocator {
    /// Bytes between the start of the allocation and the first element.
    fn allocation_offset<T>() -> usize;

    /// Allocates room for `capacity` elements and returns the data pointer. The
    /// elements are left uninitialized.
    fn allocate<T>(capacity: usize) -> Result<*mut T>;

    /// Changes the capacity to `new_capacity`, relocating the first `prev_size`
    /// elements if the block moves. On failure `array` is left untouched.
    ///
    /// # Safety
    ///
    /// `array` must come from [`allocate`](Self::allocate) of this allocator with
    /// the same `T`, and `prev_size <= new_capacity`.
    unsafe fn reallocate<T>(array: &mut *mut T, prev_size: usize, new_capacity: usize)
    -> Result<()>;

    /// Frees the allocation without touching the elements.
    ///
    /// # Safety
    ///
    /// `array` must come from [`allocate`](Self::allocate) of this allocator with
    /// the same `T`.
    unsafe fn deallocate<T>(array: *mut T);

    /// New capacity for an array of `current_capacity` that needs room for at
    /// least `desired_capacity` elements.
    fn grow<T>(current_capacity: usize, desired_capacity: usize) -> usize {
        array_growth::<T>(
            Self::allocation_offset::<T>(),
            current_capacity,
            desired_capacity,
        )
    }

    /// Capacity stored in the allocation header.
    ///
    /// # Safety
    ///
    /// Same as [`deallocate`](Self::deallocate).
    unsafe fn capacity<T>(array: *const T) -> usize;

    /// Start of the allocation, including the header.
    ///
    /// # Safety
    ///
    /// Same as [`deallocate`](Self::deallocate).
    unsafe fn base<T>(array: *const T) -> *const u8 {
        unsafe { array.cast::<u8>().sub(Self::allocation_offset::<T>()) }
    }

    /// The deleter marking arrays owned by this allocator. Elements are dropped
    /// by [`Array`](crate::Array) before the deleter runs; the deleter releases the
    /// allocation.
    ///
    /// # Safety
    ///
    /// Same as [`deallocate`](Self::deallocate), with `size` the array length.
    unsafe fn deleter<T>(array: *mut T, size: usize) {
        unsafe {
            let capacity = Self::capacity(array);
            sanitizer::annotate_contiguous_container(
                Self::base(array),
                array.add(capacity),
                array.add(size),
                array.add(capacity),
            );
            Self::deallocate(array);
        }
    }
}

/// The deleter of `A` for `T` as a function pointer.
#[inline]
pub(crate) fn growable_deleter<A: ArrayAllocator, T>() -> ArrayDeleter<T> {
    A::deleter::<T>
}

/// Growth policy shared by the allocators.
///
/// The allocation size, header included, grows to `DEFAULT_ALLOCATION_ALIGNMENT`
/// first, then doubles until it reaches 64 bytes, then grows by half. The result
/// never goes below `desired_capacity`.
pub fn array_growth<T>(offset: usize, current_capacity: usize, desired_capacity: usize) -> usize {
    let element_size = size_of::<T>();
    if element_size == 0 {
        return desired_capacity.max(current_capacity);
    }
    let current_bytes = element_size
        .saturating_mul(current_capacity)
        .saturating_add(offset);
    let grown_bytes = if current_bytes < DEFAULT_ALLOCATION_ALIGNMENT {
        DEFAULT_ALLOCATION_ALIGNMENT
    } else if current_bytes < 64 {
        current_bytes * 2
    } else {
        current_bytes.saturating_add(current_bytes / 2)
    };
    let candidate = (grown_bytes - offset) / element_size;
    candidate.max(desired_capacity)
}

fn capacity_overflow(capacity: usize) -> Error {
    Error::invalid_arg("capacity", format!("{capacity} elements overflow")).report()
}

/// Allocates through the global allocator, relocating into a fresh block on
/// every reallocation. The header stores the capacity in elements.
///
/// Works with any element type, including zero-sized and over-aligned ones.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArrayNewAllocator;

impl ArrayNewAllocator {
    fn layout<T>(capacity: usize) -> Result<Layout> {
        let size = size_of::<T>()
            .checked_mul(capacity)
            .and_then(|bytes| bytes.checked_add(Self::allocation_offset::<T>()))
            .ok_or_else(|| capacity_overflow(capacity))?;
        Layout::from_size_align(size, align_of::<T>().max(align_of::<usize>()))
            .map_err(|_| capacity_overflow(capacity))
    }
}

impl ArrayAllocator for ArrayNewAllocator {
    #[inline]
    fn allocation_offset<T>() -> usize {
        size_of::<usize>().max(align_of::<T>())
    }

    fn allocate<T>(capacity: usize) -> Result<*mut T> {
        let layout = Self::layout::<T>(capacity)?;
        let memory = unsafe { alloc::alloc(layout) };
        if memory.is_null() {
            return Err(Error::allocation_failed(layout.size(), layout.align()).report());
        }
        unsafe {
            memory.cast::<usize>().write(capacity);
            Ok(memory.add(Self::allocation_offset::<T>()).cast())
        }
    }

    unsafe fn reallocate<T>(
        array: &mut *mut T,
        prev_size: usize,
        new_capacity: usize,
    ) -> Result<()> {
        let data = Self::allocate::<T>(new_capacity)?;
        let old = *array;
        unsafe {
            ptr::copy_nonoverlapping(old, data, prev_size);
            let capacity = Self::capacity(old);
            sanitizer::annotate_contiguous_container(
                Self::base(old),
                old.add(capacity),
                old.add(prev_size),
                old.add(capacity),
            );
            Self::deallocate(old);
        }
        log::trace!(
            target: LOG_TARGET,
            "relocated {prev_size} elements to a block of {new_capacity} at {data:p}"
        );
        *array = data;
        Ok(())
    }

    unsafe fn deallocate<T>(array: *mut T) {
        unsafe {
            let capacity = Self::capacity(array);
            let layout = Layout::from_size_align_unchecked(
                size_of::<T>() * capacity + Self::allocation_offset::<T>(),
                align_of::<T>().max(align_of::<usize>()),
            );
            alloc::dealloc(Self::base(array).cast_mut(), layout);
        }
    }

    #[inline]
    unsafe fn capacity<T>(array: *const T) -> usize {
        unsafe { Self::base(array).cast::<usize>().read() }
    }
}

/// Allocates through the global allocator at a fixed alignment and grows with
/// `realloc`, which can extend the block in place. The header stores the
/// allocation size in bytes, header included, so the block can be
/// reinterpreted as an array of another element type (see
/// [`array_allocator_cast`](super::array_allocator_cast)).
///
/// Elements must not be zero-sized, and their alignment must not exceed
/// [`DEFAULT_ALLOCATION_ALIGNMENT`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ArrayMallocAllocator;

impl ArrayMallocAllocator {
    fn byte_size<T>(capacity: usize) -> Result<usize> {
        size_of::<T>()
            .checked_mul(capacity)
            .and_then(|bytes| bytes.checked_add(Self::allocation_offset::<T>()))
            .filter(|&bytes| Layout::from_size_align(bytes, DEFAULT_ALLOCATION_ALIGNMENT).is_ok())
            .ok_or_else(|| capacity_overflow(capacity))
    }

    fn check_element<T>() -> Result<()> {
        if size_of::<T>() == 0 || align_of::<T>() > DEFAULT_ALLOCATION_ALIGNMENT {
            return Err(Error::invalid_arg(
                "T",
                format!(
                    "{} (size {}, alignment {}) is not supported by the malloc allocator",
                    std::any::type_name::<T>(),
                    size_of::<T>(),
                    align_of::<T>()
                ),
            )
            .report());
        }
        Ok(())
    }

    /// Size of the allocation in bytes, as stored in the header.
    ///
    /// # Safety
    ///
    /// `array` must come from this allocator.
    unsafe fn stored_bytes<T>(array: *const T) -> usize {
        unsafe { Self::base(array).cast::<usize>().read() }
    }
}

impl ArrayAllocator for ArrayMallocAllocator {
    #[inline]
    fn allocation_offset<T>() -> usize {
        if align_of::<T>() < size_of::<usize>() {
            size_of::<usize>()
        } else {
            align_of::<T>().min(DEFAULT_ALLOCATION_ALIGNMENT)
        }
    }

    fn allocate<T>(capacity: usize) -> Result<*mut T> {
        Self::check_element::<T>()?;
        let bytes = Self::byte_size::<T>(capacity)?;
        let memory = unsafe {
            alloc::alloc(Layout::from_size_align_unchecked(
                bytes,
                DEFAULT_ALLOCATION_ALIGNMENT,
            ))
        };
        if memory.is_null() {
            return Err(Error::allocation_failed(bytes, DEFAULT_ALLOCATION_ALIGNMENT).report());
        }
        unsafe {
            memory.cast::<usize>().write(bytes);
            Ok(memory.add(Self::allocation_offset::<T>()).cast())
        }
    }

    unsafe fn reallocate<T>(
        array: &mut *mut T,
        prev_size: usize,
        new_capacity: usize,
    ) -> Result<()> {
        let bytes = Self::byte_size::<T>(new_capacity)?;
        let old = *array;
        unsafe {
            let capacity = Self::capacity(old);
            sanitizer::annotate_contiguous_container(
                Self::base(old),
                old.add(capacity),
                old.add(prev_size),
                old.add(capacity),
            );
            let base = Self::base(old).cast_mut();
            let old_layout = Layout::from_size_align_unchecked(
                Self::stored_bytes(old),
                DEFAULT_ALLOCATION_ALIGNMENT,
            );
            let memory = alloc::realloc(base, old_layout, bytes);
            if memory.is_null() {
                sanitizer::annotate_contiguous_container(
                    Self::base(old),
                    old.add(capacity),
                    old.add(capacity),
                    old.add(prev_size),
                );
                return Err(Error::allocation_failed(bytes, DEFAULT_ALLOCATION_ALIGNMENT).report());
            }
            memory.cast::<usize>().write(bytes);
            *array = memory.add(Self::allocation_offset::<T>()).cast();
        }
        log::trace!(
            target: LOG_TARGET,
            "reallocated {prev_size} elements to {bytes} bytes at {:p}",
            *array
        );
        Ok(())
    }

    unsafe fn deallocate<T>(array: *mut T) {
        unsafe {
            let layout = Layout::from_size_align_unchecked(
                Self::stored_bytes(array),
                DEFAULT_ALLOCATION_ALIGNMENT,
            );
            alloc::dealloc(Self::base(array).cast_mut(), layout);
        }
    }

    #[inline]
    unsafe fn capacity<T>(array: *const T) -> usize {
        unsafe { (Self::stored_bytes(array) - Self::allocation_offset::<T>()) / size_of::<T>() }
    }
}

/// Allocator used by the `array_*` free functions.
pub type DefaultArrayAllocator = ArrayNewAllocator;
