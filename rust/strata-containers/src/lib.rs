//! Packed multi-array allocation and growable arrays.
//!
//! - [`ArrayTuple`] packs several typed arrays into one allocation and releases
//!   them, element destructors included, through a single deleter.
//! - [`Array`] is an owning pointer/length/deleter handle; the functions in
//!   [`growable`] turn it into an amortized-growth container while keeping the
//!   handle layout unchanged.
//! - [`ArrayView`] and [`ArrayViewMut`] are the non-owning pointer/length pairs
//!   both of the above publish.

pub mod align;
pub mod array;
pub mod growable;
pub mod sanitizer;
pub mod tuple;
pub mod view;

#[cfg(test)]
mod tracked;

pub use array::{Array, ArrayDeleter};
pub use growable::{
    ArrayAllocator, ArrayGrowth, ArrayMallocAllocator, ArrayNewAllocator, DefaultArrayAllocator,
};
pub use tuple::{
    ArrayTuple, DefaultDeleter, DeleterStorage, Item, RawDeleter, StatefulDeleter, TupleDeleter,
};
pub use view::{ArrayView, ArrayViewMut};

/// Alignment guaranteed by the default allocation routines, matching what the
/// platform `malloc` provides.
pub const DEFAULT_ALLOCATION_ALIGNMENT: usize = 2 * std::mem::size_of::<usize>();
