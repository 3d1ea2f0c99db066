//! Page mappings and the tuple allocators built on them.

use std::fs::File;

use strata_common::{LOG_TARGET, Result, error::Error};
use strata_containers::StatefulDeleter;

use crate::mmap;

/// An owned memory mapping, unmapped on drop.
///
/// A file-backed mapping keeps its [`File`] open for as long as the mapping
/// lives.
pub struct Mapping {
    ptr: *mut u8,
    /// Length passed to the unmap call: whole pages for anonymous memory, the
    /// mapped length for files.
    capacity: usize,
    file: Option<File>,
}

impl Mapping {
    /// Maps at least `size` bytes of zeroed anonymous memory.
    pub fn anonymous(size: usize) -> Result<Mapping> {
        let (ptr, capacity) = mmap::allocate(size)
            .map_err(|e| Error::io(format!("mapping {size} anonymous bytes"), e).report())?;
        log::trace!(target: LOG_TARGET, "mapped {capacity} anonymous bytes at {ptr:p}");
        Ok(Mapping {
            ptr: ptr.cast(),
            capacity,
            file: None,
        })
    }

    /// Maps the first `size` bytes of `file`, growing the file if needed.
    pub fn file(file: File, size: usize) -> Result<Mapping> {
        let (ptr, capacity) = mmap::map_file(&file, size)
            .map_err(|e| Error::io(format!("mapping {size} bytes of a file"), e).report())?;
        log::trace!(target: LOG_TARGET, "mapped {capacity} file bytes at {ptr:p}");
        Ok(Mapping {
            ptr: ptr.cast(),
            capacity,
            file: Some(file),
        })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The backing file, if any.
    pub fn file_ref(&self) -> Option<&File> {
        self.file.as_ref()
    }

    /// Page size of the mappings created here.
    pub fn page_size() -> usize {
        mmap::get_page_size()
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        log::trace!(target: LOG_TARGET, "unmapping {} bytes at {:p}", self.capacity, self.ptr);
        if let Err(e) = unsafe { mmap::free(self.ptr.cast(), self.capacity) } {
            log::error!(target: LOG_TARGET, "failed to unmap {:p}: {e}", self.ptr);
        }
    }
}

// SAFETY: Mapping exclusively owns the mapped region and the file handle.
unsafe impl Send for Mapping {}

fn check_alignment(alignment: usize) -> Result<()> {
    let page_size = Mapping::page_size();
    if alignment > page_size {
        return Err(Error::invalid_arg(
            "alignment",
            format!("{alignment} exceeds the page size of {page_size}"),
        )
        .report());
    }
    Ok(())
}

/// Deleter that consumes the mapping it is handed along with.
fn unmap_with(mapping: Mapping) -> StatefulDeleter<impl FnOnce(*mut u8, usize) + Send + 'static> {
    StatefulDeleter(move |data: *mut u8, size: usize| {
        debug_assert_eq!(data, mapping.as_ptr());
        debug_assert!(size <= mapping.capacity());
        drop(mapping);
    })
}

/// Tuple allocator mapping anonymous pages.
///
/// Use as `ArrayTuple::with_allocator(items, anonymous_pages)`. Fails with
/// `InvalidArgument` if `alignment` exceeds the page size.
pub fn anonymous_pages(
    size: usize,
    alignment: usize,
) -> Result<(*mut u8, StatefulDeleter<impl FnOnce(*mut u8, usize) + Send + 'static>)> {
    check_alignment(alignment)?;
    let mapping = Mapping::anonymous(size)?;
    Ok((mapping.as_ptr(), unmap_with(mapping)))
}

/// Tuple allocator mapping the start of `file`.
///
/// Use as `ArrayTuple::with_allocator(items, |size, alignment| file_pages(file,
/// size, alignment))`. The file is extended to `size` bytes if it is shorter,
/// and stays open until the tuple releases its buffer.
pub fn file_pages(
    file: File,
    size: usize,
    alignment: usize,
) -> Result<(*mut u8, StatefulDeleter<impl FnOnce(*mut u8, usize) + Send + 'static>)> {
    check_alignment(alignment)?;
    let mapping = Mapping::file(file, size)?;
    Ok((mapping.as_ptr(), unmap_with(mapping)))
}
