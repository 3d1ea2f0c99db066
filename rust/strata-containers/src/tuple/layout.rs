//! Buffer layout of an [`ArrayTuple`](super::ArrayTuple).
//!
//! ```text
//! +-------+----------+-----+----------+---------+-----+---------+--------------+
//! | count | record 0 | ... | record N | items 0 | ... | items M | deleter state|
//! +-------+----------+-----+----------+---------+-----+---------+--------------+
//! ```
//!
//! The record count and the records are present only when at least one item
//! needs destructing or the deleter is stateful. Each record names a run of
//! elements and the function to call on each of them. The last record always
//! belongs to the deleter itself, so walking the records in order destructs all
//! elements and then releases the buffer. Deleter state, if any, sits at the
//! aligned end of the buffer.

use std::ptr;

use strata_common::{Result, error::Error};

use super::{
    deleter::{DeleterStorage, RawDeleter, default_release},
    item::Item,
};
use crate::align::checked_align_up;

/// A run of `count` elements `element_size` bytes apart, each passed to
/// `destructor` along with the total buffer size.
#[repr(C)]
#[derive(Clone, Copy)]
pub(super) struct DestructibleRecord {
    data: *mut u8,
    count: usize,
    element_size: usize,
    destructor: Option<RawDeleter>,
}

/// Offset of the first record, right after the record count.
pub(super) const RECORDS_OFFSET: usize = size_of::<usize>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Sizing {
    pub size: usize,
    pub alignment: usize,
    /// Destructible items plus the deleter record; zero if no records are needed.
    pub record_count: usize,
}

/// Computes the total buffer size and alignment for `items` released by a
/// deleter stored as `storage`.
pub(super) fn size_alignment_for(items: &[Item], storage: &DeleterStorage) -> Result<Sizing> {
    let overflow = || Error::invalid_arg("items", "total tuple size overflows usize").report();

    let mut alignment: usize = 1;
    let mut destructible: usize = 0;
    for item in items {
        alignment = alignment.max(item.element_alignment);
        if item.destructor.is_some() && item.element_count != 0 {
            destructible += 1;
        }
    }

    let stateful = matches!(storage, DeleterStorage::Stateful { .. });
    let record_count = if destructible != 0 || stateful {
        destructible + 1
    } else {
        0
    };

    let mut size = 0usize;
    if record_count != 0 {
        size = record_count
            .checked_mul(size_of::<DestructibleRecord>())
            .and_then(|records| records.checked_add(RECORDS_OFFSET))
            .ok_or_else(overflow)?;
        alignment = alignment.max(align_of::<DestructibleRecord>());
    }

    for item in items {
        size = item
            .element_size
            .checked_mul(item.element_count)
            .and_then(|bytes| checked_align_up(size, item.element_alignment)?.checked_add(bytes))
            .ok_or_else(overflow)?;
    }

    if let DeleterStorage::Stateful { layout, .. } = storage {
        alignment = alignment.max(layout.align());
        size = checked_align_up(size, layout.align())
            .and_then(|size| size.checked_add(layout.size()))
            .ok_or_else(overflow)?;
    }

    Ok(Sizing {
        size,
        alignment,
        record_count,
    })
}

/// Where an item's elements live inside the buffer.
#[derive(Debug, Clone, Copy)]
pub(super) struct PlacedItem {
    pub data: *mut u8,
    pub count: usize,
    pub element_size: usize,
    pub destructor: Option<RawDeleter>,
    /// Whether the elements are constructed during the build (as opposed to
    /// left uninitialized for the caller).
    pub constructed: bool,
}

impl PlacedItem {
    /// Destructs the first `count` elements, last to first.
    pub unsafe fn destruct(&self, count: usize, buffer_size: usize) {
        if let Some(destructor) = self.destructor {
            for index in (0..count).rev() {
                unsafe { destructor(self.data.add(index * self.element_size), buffer_size) };
            }
        }
    }
}

/// Where the deleter goes once construction succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DeleterDestination {
    /// Nothing to store: the default deleter with no records.
    None,
    /// The tuple's own deleter field.
    TopLevel,
    /// A slot inside the buffer (the last record's destructor, or the state area).
    Buffer(*mut u8),
}

pub(super) struct Placement {
    pub items: Vec<PlacedItem>,
    pub deleter_destination: DeleterDestination,
}

/// Writes the record count and all records for a freshly allocated buffer, and
/// computes where every item and the deleter go.
///
/// # Safety
///
/// `data` must be valid for `sizing.size` bytes and aligned to `sizing.alignment`,
/// with `sizing` computed by [`size_alignment_for`] for the same `items` and
/// `storage`.
pub(super) unsafe fn place(
    data: *mut u8,
    sizing: &Sizing,
    items: &[Item],
    storage: &DeleterStorage,
) -> Placement {
    let mut offset = 0;
    let mut next_record = ptr::null_mut::<DestructibleRecord>();
    if sizing.record_count != 0 {
        unsafe {
            data.cast::<usize>().write(sizing.record_count);
            next_record = data.add(RECORDS_OFFSET).cast();
        }
        offset = RECORDS_OFFSET + sizing.record_count * size_of::<DestructibleRecord>();
    }

    let mut placed = Vec::with_capacity(items.len());
    for item in items {
        offset = crate::align::align_up(offset, item.element_alignment);
        let item_data = unsafe { data.add(offset) };
        if let Some(destructor) = item.destructor.filter(|_| item.element_count != 0) {
            unsafe {
                next_record.write(DestructibleRecord {
                    data: item_data,
                    count: item.element_count,
                    element_size: item.element_size,
                    destructor: Some(destructor),
                });
                next_record = next_record.add(1);
            }
        }
        placed.push(PlacedItem {
            data: item_data,
            count: item.element_count,
            element_size: item.element_size,
            destructor: item.destructor,
            constructed: item.constructor.is_some(),
        });
        offset += item.element_size * item.element_count;
    }

    let deleter_destination = match storage {
        DeleterStorage::Default if sizing.record_count != 0 => {
            unsafe {
                next_record.write(DestructibleRecord {
                    data,
                    count: 1,
                    element_size: 0,
                    destructor: Some(default_release),
                })
            };
            DeleterDestination::None
        }
        DeleterStorage::Default => DeleterDestination::None,
        DeleterStorage::Stateless if sizing.record_count != 0 => unsafe {
            next_record.write(DestructibleRecord {
                data,
                count: 1,
                element_size: 0,
                destructor: None,
            });
            DeleterDestination::Buffer((&raw mut (*next_record).destructor).cast())
        },
        DeleterStorage::Stateless => DeleterDestination::TopLevel,
        DeleterStorage::Stateful { layout, release } => {
            offset = crate::align::align_up(offset, layout.align());
            let state = unsafe { data.add(offset) };
            unsafe {
                next_record.write(DestructibleRecord {
                    data: state,
                    count: 1,
                    element_size: 0,
                    destructor: Some(*release),
                })
            };
            offset += layout.size();
            DeleterDestination::Buffer(state)
        }
    };
    debug_assert_eq!(offset, sizing.size);

    Placement {
        items: placed,
        deleter_destination,
    }
}

/// Top-level deleter of a tuple with records: destructs every element and then
/// releases the buffer through the last record.
pub(super) unsafe fn dispatch_records(data: *mut u8, size: usize) {
    unsafe {
        let count = data.cast::<usize>().read();
        let records = data.add(RECORDS_OFFSET).cast::<DestructibleRecord>();
        for index in 0..count {
            // Copied out: the last record frees the memory holding it.
            let record = records.add(index).read();
            if let Some(destructor) = record.destructor {
                for element in 0..record.count {
                    destructor(record.data.add(element * record.element_size), size);
                }
            }
        }
    }
}
