//! AddressSanitizer contiguous-container annotations.
//!
//! With the `sanitizer-annotations` feature enabled, the unused capacity of a
//! growable array is poisoned so that reads and writes past the array size, but
//! still inside the allocation, are reported. Without the feature the hook
//! compiles to nothing.

#[cfg(feature = "sanitizer-annotations")]
unsafe extern "C" {
    fn __sanitizer_annotate_contiguous_container(
        beg: *const std::ffi::c_void,
        end: *const std::ffi::c_void,
        old_mid: *const std::ffi::c_void,
        new_mid: *const std::ffi::c_void,
    );
}

/// Moves the boundary between the accessible and the poisoned part of
/// `[beg, end)` from `old_mid` to `new_mid`.
///
/// # Safety
///
/// `beg <= old_mid <= end` and `beg <= new_mid <= end` must hold, all within a
/// single live allocation.
#[inline]
pub unsafe fn annotate_contiguous_container<T>(
    beg: *const u8,
    end: *const T,
    old_mid: *const T,
    new_mid: *const T,
) {
    debug_assert!(beg.addr() <= old_mid.addr() && old_mid.addr() <= end.addr());
    debug_assert!(beg.addr() <= new_mid.addr() && new_mid.addr() <= end.addr());

    #[cfg(feature = "sanitizer-annotations")]
    if old_mid != new_mid {
        unsafe {
            __sanitizer_annotate_contiguous_container(
                beg.cast(),
                end.cast(),
                old_mid.cast(),
                new_mid.cast(),
            )
        };
    }

    #[cfg(not(feature = "sanitizer-annotations"))]
    let _ = (beg, end, old_mid, new_mid);
}
