//! Non-owning pointer/length views.
//!
//! Views do not borrow the memory they describe: they are plain `Copy` handles,
//! published by [`ArrayTuple`](crate::ArrayTuple) and growable arrays, and they
//! stay valid only as long as the owner keeps the storage alive. Turning a view
//! into a slice is therefore `unsafe`, also through the owner
//! ([`ArrayTuple::slice`](crate::ArrayTuple::slice)), which adds a range check.

use std::{fmt, marker::PhantomData, ptr::NonNull};

/// Immutable view of `len` contiguous elements of `T`.
#[repr(C)]
pub struct ArrayView<T> {
    data: *const T,
    len: usize,
    _p: PhantomData<*const T>,
}

/// Mutable view of `len` contiguous elements of `T`.
#[repr(C)]
pub struct ArrayViewMut<T> {
    data: *mut T,
    len: usize,
    _p: PhantomData<*mut T>,
}

macro_rules! impl_view_common {
    ($view:ident, $ptr:ty) => {
        impl<T> $view<T> {
            /// Returns an empty view with a dangling, well-aligned pointer.
            #[inline]
            pub const fn empty() -> Self {
                Self {
                    data: NonNull::<T>::dangling().as_ptr(),
                    len: 0,
                    _p: PhantomData,
                }
            }

            /// Creates a view over `len` elements starting at `data`.
            ///
            /// A null `data` is accepted only for an empty view.
            ///
            /// # Safety
            ///
            /// Element access through the view requires `data` to be valid for `len`
            /// elements for as long as the view is used.
            #[inline]
            pub unsafe fn from_raw_parts(data: $ptr, len: usize) -> Self {
                if data.is_null() {
                    debug_assert_eq!(len, 0, "null view must be empty");
                    return Self::empty();
                }
                Self {
                    data,
                    len,
                    _p: PhantomData,
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
                self.data as *const T
            }

            /// Returns a reference to the element at `index`, or `None` if out of range.
            ///
            /// # Safety
            ///
            /// The memory the view describes must be alive and initialized.
            #[inline]
            pub unsafe fn get<'a>(self, index: usize) -> Option<&'a T> {
                if index < self.len {
                    Some(unsafe { &*self.data.add(index) })
                } else {
                    None
                }
            }

            /// # Safety
            ///
            /// The memory the view describes must be alive and initialized, and must
            /// not be mutated for the lifetime `'a`.
            #[inline]
            pub unsafe fn as_slice<'a>(self) -> &'a [T] {
                unsafe { std::slice::from_raw_parts(self.data as *const T, self.len) }
            }

            /// Sub-view of elements `[begin, end)`.
            ///
            /// # Panics
            ///
            /// Panics if `begin > end` or `end > len`.
            #[inline]
            pub fn slice(self, begin: usize, end: usize) -> Self {
                assert!(
                    begin <= end && end <= self.len,
                    "slice [{begin}, {end}) out of range for view of size {}",
                    self.len
                );
                Self {
                    // SAFETY: begin <= len keeps the pointer within (or one past) the range.
                    data: unsafe { self.data.add(begin) },
                    len: end - begin,
                    _p: PhantomData,
                }
            }

            /// Sub-view of `size` elements starting at `begin`.
            #[inline]
            pub fn slice_size(self, begin: usize, size: usize) -> Self {
                let end = begin.checked_add(size).unwrap_or(usize::MAX);
                self.slice(begin, end)
            }

            /// The first `count` elements.
            #[inline]
            pub fn prefix(self, count: usize) -> Self {
                self.slice(0, count)
            }

            /// The last `count` elements.
            #[inline]
            pub fn suffix(self, count: usize) -> Self {
                assert!(
                    count <= self.len,
                    "suffix of {count} out of range for view of size {}",
                    self.len
                );
                self.slice(self.len - count, self.len)
            }

            /// Everything except the first `count` elements.
            #[inline]
            pub fn except_prefix(self, count: usize) -> Self {
                self.slice(count, self.len)
            }

            /// Everything except the last `count` elements.
            #[inline]
            pub fn except_suffix(self, count: usize) -> Self {
                assert!(
                    count <= self.len,
                    "suffix of {count} out of range for view of size {}",
                    self.len
                );
                self.slice(0, self.len - count)
            }
        }

        impl<T> Clone for $view<T> {
            #[inline]
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $view<T> {}

        impl<T> Default for $view<T> {
            #[inline]
            fn default() -> Self {
                Self::empty()
            }
        }

        impl<T> fmt::Debug for $view<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($view))
                    .field("data", &self.data)
                    .field("len", &self.len)
                    .finish()
            }
        }

        impl<T> PartialEq for $view<T> {
            /// Views compare equal when they describe the same memory range.
            #[inline]
            fn eq(&self, other: &Self) -> bool {
                std::ptr::eq(self.data, other.data) && self.len == other.len
            }
        }

        impl<T> Eq for $view<T> {}
    };
}

impl_view_common!(ArrayView, *const T);
impl_view_common!(ArrayViewMut, *mut T);

impl<T> ArrayViewMut<T> {
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut T {
        self.data
    }

    /// # Safety
    ///
    /// The memory the view describes must be alive and initialized, and no other
    /// reference to it may exist for the lifetime `'a`.
    #[inline]
    pub unsafe fn as_mut_slice<'a>(self) -> &'a mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.data, self.len) }
    }

    /// Mutable reference to the element at `index`, or `None` if out of range.
    ///
    /// # Safety
    ///
    /// Same as [`as_mut_slice`](Self::as_mut_slice).
    #[inline]
    pub unsafe fn get_mut<'a>(self, index: usize) -> Option<&'a mut T> {
        if index < self.len {
            Some(unsafe { &mut *self.data.add(index) })
        } else {
            None
        }
    }

    #[inline]
    pub fn as_const(self) -> ArrayView<T> {
        self.into()
    }
}

impl<T> From<ArrayViewMut<T>> for ArrayView<T> {
    #[inline]
    fn from(view: ArrayViewMut<T>) -> Self {
        ArrayView {
            data: view.data,
            len: view.len,
            _p: PhantomData,
        }
    }
}

impl<T> From<&[T]> for ArrayView<T> {
    #[inline]
    fn from(slice: &[T]) -> Self {
        ArrayView {
            data: slice.as_ptr(),
            len: slice.len(),
            _p: PhantomData,
        }
    }
}

impl<T> From<&mut [T]> for ArrayView<T> {
    #[inline]
    fn from(slice: &mut [T]) -> Self {
        ArrayView::from(&*slice)
    }
}

impl<T, const N: usize> From<&[T; N]> for ArrayView<T> {
    #[inline]
    fn from(array: &[T; N]) -> Self {
        ArrayView::from(array.as_slice())
    }
}

impl<T> From<&mut [T]> for ArrayViewMut<T> {
    #[inline]
    fn from(slice: &mut [T]) -> Self {
        ArrayViewMut {
            data: slice.as_mut_ptr(),
            len: slice.len(),
            _p: PhantomData,
        }
    }
}

impl<T, const N: usize> From<&mut [T; N]> for ArrayViewMut<T> {
    #[inline]
    fn from(array: &mut [T; N]) -> Self {
        ArrayViewMut::from(array.as_mut_slice())
    }
}
