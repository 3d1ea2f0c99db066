//! Page-backed buffers for [`ArrayTuple`](strata_containers::ArrayTuple).
//!
//! [`anonymous_pages`] and [`file_pages`] are tuple allocators: they map memory
//! with the OS page allocator and hand it back together with a stateful deleter
//! that owns the mapping. The deleter lives at the end of the mapped buffer
//! itself and unmaps it on release.

#[cfg_attr(target_os = "linux", path = "mmap_linux.rs")]
#[cfg_attr(not(target_os = "linux"), path = "mmap_fallback.rs")]
pub mod mmap;

pub mod mapping;

// Also built for Linux tests.
#[cfg(all(test, target_os = "linux"))]
#[path = "mmap_fallback.rs"]
mod mmap_fallback;


pub use mapping::{Mapping, anonymous_pages, file_pages};
