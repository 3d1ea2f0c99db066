//! Deleter kinds an [`ArrayTuple`](super::ArrayTuple) allocator can hand back.

use std::{
    alloc::{self, Layout},
    fmt,
    ptr,
};

use strata_common::{LOG_TARGET, Result, error::Error};

use crate::DEFAULT_ALLOCATION_ALIGNMENT;

/// Type-erased release function: buffer pointer and total buffer size in bytes.
pub type RawDeleter = unsafe fn(*mut u8, usize);

/// How a deleter is stored alongside the buffer it releases.
#[derive(Clone, Copy)]
pub enum DeleterStorage {
    /// Released by [`default_release`]; nothing is stored.
    Default,
    /// A plain function pointer, stored in the tuple itself or in the last
    /// destructor record.
    Stateless,
    /// State of the given layout, stored at the aligned end of the buffer and
    /// invoked through `release`, which receives the address of the state.
    Stateful { layout: Layout, release: RawDeleter },
}

impl fmt::Debug for DeleterStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleterStorage::Default => f.write_str("Default"),
            DeleterStorage::Stateless => f.write_str("Stateless"),
            DeleterStorage::Stateful { layout, .. } => {
                f.debug_struct("Stateful").field("layout", layout).finish()
            }
        }
    }
}

/// A deleter returned by a custom [`ArrayTuple`](super::ArrayTuple) allocator
/// together with the memory it releases.
///
/// # Safety
///
/// `storage()` must describe `install` truthfully: for
/// [`DeleterStorage::Stateless`] `install` writes `Some(fn)` into the
/// `Option<RawDeleter>` slot it is given; for [`DeleterStorage::Stateful`] it
/// moves a value of exactly `layout` into the given address, and `release` must
/// consume that value, locating the buffer start as
/// `state + layout.size() - size`. Whatever is installed, as well as
/// [`release`](TupleDeleter::release), must free the memory handed out by the
/// allocator it came from.
pub unsafe trait TupleDeleter: Sized {
    fn storage() -> DeleterStorage;

    /// Moves the deleter into the slot prepared for it in the finished tuple.
    ///
    /// # Safety
    ///
    /// `destination` is null for [`DeleterStorage::Default`], points to an
    /// `Option<RawDeleter>` for [`DeleterStorage::Stateless`] and to suitably
    /// aligned state storage for [`DeleterStorage::Stateful`].
    unsafe fn install(self, destination: *mut u8);

    /// Releases `size` bytes at `data` directly. Used when construction fails
    /// before the deleter is installed.
    ///
    /// # Safety
    ///
    /// `data` and `size` must be exactly what the paired allocator returned.
    unsafe fn release(self, data: *mut u8, size: usize);
}

/// Releases memory obtained from [`default_allocate`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DefaultDeleter;

unsafe impl TupleDeleter for DefaultDeleter {
    fn storage() -> DeleterStorage {
        DeleterStorage::Default
    }

    unsafe fn install(self, _destination: *mut u8) {}

    unsafe fn release(self, data: *mut u8, size: usize) {
        unsafe { default_release(data, size) }
    }
}

unsafe impl TupleDeleter for RawDeleter {
    fn storage() -> DeleterStorage {
        DeleterStorage::Stateless
    }

    unsafe fn install(self, destination: *mut u8) {
        unsafe { destination.cast::<Option<RawDeleter>>().write(Some(self)) }
    }

    unsafe fn release(self, data: *mut u8, size: usize) {
        unsafe { self(data, size) }
    }
}

/// A deleter carrying state (a file descriptor, a pool handle, a mapping
/// length), stored at the end of the buffer it releases.
///
/// The closure receives the buffer start and total size. The state is moved out
/// of the buffer before the call, so the closure is free to unmap or free the
/// memory that held it.
pub struct StatefulDeleter<F>(pub F);

impl<F> fmt::Debug for StatefulDeleter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StatefulDeleter")
            .field(&std::any::type_name::<F>())
            .finish()
    }
}

unsafe impl<F> TupleDeleter for StatefulDeleter<F>
where
    F: FnOnce(*mut u8, usize) + 'static,
{
    fn storage() -> DeleterStorage {
        DeleterStorage::Stateful {
            layout: Layout::new::<F>(),
            release: release_stateful::<F>,
        }
    }

    unsafe fn install(self, destination: *mut u8) {
        unsafe { destination.cast::<F>().write(self.0) }
    }

    unsafe fn release(self, data: *mut u8, size: usize) {
        (self.0)(data, size)
    }
}

unsafe fn release_stateful<F>(state: *mut u8, size: usize)
where
    F: FnOnce(*mut u8, usize),
{
    unsafe {
        // The state sits at the very end of the buffer.
        let deleter = state.cast::<F>().read();
        let data = state.add(size_of::<F>()).sub(size);
        deleter(data, size);
    }
}

/// Allocation routine behind [`ArrayTuple::new`](super::ArrayTuple::new).
///
/// Custom allocators can forward to it and hand back [`DefaultDeleter`].
/// A zero `size` yields a null pointer without allocating.
pub fn default_allocate(size: usize, alignment: usize) -> Result<(*mut u8, DefaultDeleter)> {
    if alignment > DEFAULT_ALLOCATION_ALIGNMENT {
        return Err(Error::invalid_arg(
            "alignment",
            format!(
                "{alignment} exceeds the default allocation alignment of \
                 {DEFAULT_ALLOCATION_ALIGNMENT}, use a custom allocator"
            ),
        )
        .report());
    }
    if size == 0 {
        return Ok((ptr::null_mut(), DefaultDeleter));
    }
    let layout = Layout::from_size_align(size, DEFAULT_ALLOCATION_ALIGNMENT)
        .map_err(|_| Error::invalid_arg("size", format!("{size} bytes overflow")).report())?;
    let data = unsafe { alloc::alloc(layout) };
    if data.is_null() {
        return Err(Error::allocation_failed(size, DEFAULT_ALLOCATION_ALIGNMENT).report());
    }
    log::trace!(target: LOG_TARGET, "allocated {size} bytes at {data:p}");
    Ok((data, DefaultDeleter))
}

/// Releases a buffer obtained from [`default_allocate`].
///
/// # Safety
///
/// `data` must be null or come from `default_allocate(size, _)`.
pub unsafe fn default_release(data: *mut u8, size: usize) {
    if data.is_null() || size == 0 {
        return;
    }
    log::trace!(target: LOG_TARGET, "releasing {size} bytes at {data:p}");
    unsafe {
        alloc::dealloc(
            data,
            Layout::from_size_align_unchecked(size, DEFAULT_ALLOCATION_ALIGNMENT),
        )
    };
}
