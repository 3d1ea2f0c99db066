//! Page emulation on top of the global allocator, for targets without a native
//! mapping backend. Memory comes back zeroed and page-aligned; files cannot be
//! mapped.

use std::{
    alloc::{self, Layout},
    ffi::c_void,
    fs::File,
    io,
};

const PAGE_SIZE: usize = 4 * 1024;

/// Whole-page layout covering `size` bytes, at least one page.
fn page_layout(size: usize) -> io::Result<Layout> {
    size.max(1)
        .checked_next_multiple_of(PAGE_SIZE)
        .and_then(|capacity| Layout::from_size_align(capacity, PAGE_SIZE).ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{size} bytes cannot be laid out in pages"),
            )
        })
}

/// Allocates `size` zeroed bytes rounded up to whole pages.
///
/// Returns the start and the capacity; pass both to [`free`].
pub fn allocate(size: usize) -> io::Result<(*mut c_void, usize)> {
    let layout = page_layout(size)?;
    let ptr = unsafe { alloc::alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(io::ErrorKind::OutOfMemory.into());
    }
    Ok((ptr.cast(), layout.size()))
}

pub fn map_file(_file: &File, _size: usize) -> io::Result<(*mut c_void, usize)> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "file mappings are not supported on this platform",
    ))
}

/// Frees memory returned by [`allocate`].
///
/// Fails without freeing anything if `capacity` is not a whole number of pages.
///
/// # Safety
///
/// `ptr` and `capacity` must be exactly what [`allocate`] returned.
pub unsafe fn free(ptr: *mut c_void, capacity: usize) -> io::Result<()> {
    let layout = page_layout(capacity)?;
    if layout.size() != capacity {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{capacity} bytes is not a whole number of pages"),
        ));
    }
    unsafe { alloc::dealloc(ptr.cast(), layout) };
    Ok(())
}

pub fn get_page_size() -> usize {
    PAGE_SIZE
}
