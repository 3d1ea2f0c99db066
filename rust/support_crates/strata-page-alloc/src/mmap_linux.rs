use std::{fs::File, os::fd::AsRawFd, sync::OnceLock};

/// Maps `size` bytes of zeroed anonymous memory.
///
/// The mapping is rounded up to whole pages; a zero `size` maps one page.
///
/// # Returns
///
/// The start of the mapping and its capacity in bytes. Pass both to [`free`].
pub fn allocate(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let page_size = get_page_size();
    assert!(page_size.is_power_of_two());
    let capacity = size
        .max(1)
        .checked_next_multiple_of(page_size)
        .ok_or_else(|| std::io::Error::other(format!("{size} bytes overflow")))?;
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr.is_null() || ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    Ok((ptr, capacity))
}

/// Maps the first `size` bytes of `file` read-write and shared, extending the
/// file first if it is shorter.
///
/// The returned capacity is `size` itself; the kernel rounds the mapping to
/// whole pages.
pub fn map_file(file: &File, size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let size = size.max(1);
    if file.metadata()?.len() < size as u64 {
        file.set_len(size as u64)?;
    }
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        )
    };
    if ptr.is_null() || ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    Ok((ptr, size))
}

/// Unmaps memory returned by [`allocate`] or [`map_file`].
///
/// # Safety
///
/// `ptr` and `size` must be exactly what the mapping call returned, and the
/// memory must not be used afterwards.
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let res = unsafe { libc::munmap(ptr, size) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// The system page size, cached after the first call. Falls back to 4 KiB if
/// `sysconf` fails.
pub fn get_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    if let Some(&size) = SIZE.get() {
        size
    } else {
        match read_page_size() {
            Ok(size) => {
                let _ = SIZE.set(size);
                size
            }
            Err(_) => 4 * 1024,
        }
    }
}

fn read_page_size() -> std::io::Result<usize> {
    let res = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    assert!(res < i32::MAX as _);
    Ok(res as usize)
}
