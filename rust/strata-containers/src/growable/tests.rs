use std::{
    cell::Cell,
    mem::MaybeUninit,
    panic::{self, AssertUnwindSafe},
    ptr,
};

use strata_common::error::ErrorKind;

use super::*;
use crate::tracked::{self, Fragile, Tracked};

thread_local! {
    static RELEASED: Cell<usize> = const { Cell::new(0) };
}

unsafe fn release_boxed<T>(data: *mut T, len: usize) {
    RELEASED.set(RELEASED.get() + 1);
    unsafe {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
            data as *mut MaybeUninit<T>,
            len,
        )))
    };
}

/// Boxed storage behind a custom deleter, so the array is not growable.
fn custom_array<T>(values: Vec<T>) -> Array<T> {
    let len = values.len();
    let data = Box::into_raw(values.into_boxed_slice()) as *mut T;
    unsafe { Array::from_raw_parts(data, len, release_boxed::<T>) }
}

fn growable_from<T: Clone>(values: &[T]) -> Array<T> {
    let mut array = Array::new();
    array_append_slice(&mut array, values).unwrap();
    array
}

#[derive(Debug, PartialEq)]
struct Flaky(i32);

impl Clone for Flaky {
    fn clone(&self) -> Self {
        assert!(self.0 >= 0, "cloning a negative value");
        Flaky(self.0)
    }
}

#[cfg(target_pointer_width = "64")]
#[test]
fn test_growth_sequence() {
    let mut array = Array::<i32>::new();
    let mut capacities = Vec::new();
    for i in 1..=24 {
        array_append(&mut array, i).unwrap();
        capacities.push(array_capacity(&array));
    }
    assert_eq!(
        capacities,
        [
            2, 2, 6, 6, 6, 6, 14, 14, 14, 14, 14, 14, 14, 14, 22, 22, 22, 22, 22, 22, 22, 22, 34,
            34
        ]
    );
    assert_eq!(array.len(), 24);
    assert_eq!(array[0], 1);
    assert_eq!(array[23], 24);
}

#[test]
fn test_remove_suffix_then_append_keeps_capacity() {
    tracked::reset();
    let mut array = Array::from_fn(4, |i| Tracked::new(i as i32));
    assert_eq!(array_reserve(&mut array, 10).unwrap(), 10);
    assert_eq!(tracked::destructed(), 0);
    let data = array.as_ptr();

    array_remove_suffix(&mut array, 2).unwrap();
    assert_eq!(tracked::destructed(), 2);
    array_append(&mut array, Tracked::new(10)).unwrap();
    array_append(&mut array, Tracked::new(11)).unwrap();

    assert_eq!(array.len(), 4);
    assert_eq!(array_capacity(&array), 10);
    assert_eq!(array.as_ptr(), data);
    assert_eq!(tracked::destructed(), 2);
    assert_eq!(
        array.iter().map(Tracked::value).collect::<Vec<_>>(),
        [0, 1, 10, 11]
    );

    drop(array);
    assert_eq!(tracked::destructed(), 6);
    assert_eq!(tracked::alive(), 0);
}

#[test]
fn test_append_then_remove_suffix() {
    tracked::reset();
    let mut array = Array::<Tracked>::new();
    array_reserve(&mut array, 4).unwrap();
    array_append(&mut array, Tracked::new(1)).unwrap();
    array_remove_suffix(&mut array, 1).unwrap();
    assert!(array.is_empty());
    assert_eq!(array_capacity(&array), 4);
    assert_eq!(tracked::destructed(), 1);
    drop(array);
    assert_eq!(tracked::destructed(), 1);
}

#[test]
fn test_reserve() {
    let mut array = Array::from_vec(vec![1, 2, 3]);
    assert!(!array_is_growable(&array));
    assert_eq!(array_capacity(&array), 3);

    assert_eq!(array_reserve(&mut array, 2).unwrap(), 3);
    assert!(!array_is_growable(&array));

    assert_eq!(array_reserve(&mut array, 10).unwrap(), 10);
    assert!(array_is_growable(&array));
    assert_eq!(array, [1, 2, 3]);

    assert_eq!(array_reserve(&mut array, 5).unwrap(), 10);
    assert_eq!(array_reserve(&mut array, 20).unwrap(), 20);
    assert_eq!(array, [1, 2, 3]);
}

#[test]
fn test_resize() {
    let mut array = Array::<i32>::new();
    array_resize(&mut array, 0).unwrap();
    assert!(!array_is_growable(&array));

    let mut array = Array::from_vec(vec![1, 2, 3]);
    array_resize(&mut array, 5).unwrap();
    assert_eq!(array, [1, 2, 3, 0, 0]);
    assert_eq!(array_capacity(&array), 5);

    array_resize(&mut array, 2).unwrap();
    assert_eq!(array, [1, 2]);
    assert_eq!(array_capacity(&array), 5);

    array_resize_value(&mut array, 4, 7).unwrap();
    assert_eq!(array, [1, 2, 7, 7]);

    let mut next = 100;
    array_resize_with(&mut array, 6, || {
        next += 1;
        next
    })
    .unwrap();
    assert_eq!(array, [1, 2, 7, 7, 101, 102]);
    assert!(array_capacity(&array) >= 6);
}

#[test]
fn test_resize_no_init() {
    let mut array = growable_from(&[5u16]);
    unsafe { array_resize_no_init(&mut array, 3).unwrap() };
    array[1] = 6;
    array[2] = 7;
    assert_eq!(array, [5, 6, 7]);
    unsafe { array_resize_no_init(&mut array, 1).unwrap() };
    assert_eq!(array, [5]);
}

#[test]
fn test_resize_drop_counts() {
    tracked::reset();
    let mut array = Array::<Tracked>::new();
    array_resize(&mut array, 5).unwrap();
    assert_eq!(tracked::constructed(), 5);
    array_resize(&mut array, 2).unwrap();
    assert_eq!(tracked::destructed(), 3);
    array_resize(&mut array, 2).unwrap();
    assert_eq!(tracked::destructed(), 3);
    drop(array);
    assert_eq!(tracked::alive(), 0);
}

#[test]
fn test_append_variants() {
    let mut array = Array::<String>::new();
    array_append(&mut array, "a".to_string()).unwrap().push('!');
    array_append_with(&mut array, || "b".repeat(2)).unwrap();
    let added = array_append_value(&mut array, 2, "c".to_string()).unwrap();
    assert_eq!(added.len(), 2);
    added[1].push('2');
    array_append_default(&mut array, 1).unwrap();
    array_append_slice(&mut array, &["d".to_string(), "e".to_string()]).unwrap();
    assert_eq!(array, ["a!", "bb", "c", "c2", "", "d", "e"].map(String::from));
}

#[test]
fn test_append_no_init() {
    let mut array = growable_from(&[1u32, 2]);
    unsafe {
        let slots = array_append_no_init(&mut array, 3).unwrap();
        assert_eq!(slots.len(), 3);
        for (i, slot) in slots.iter_mut().enumerate() {
            slot.write(10 + i as u32);
        }
    }
    assert_eq!(array, [1, 2, 10, 11, 12]);
}

#[test]
fn test_append_nothing_keeps_array() {
    let mut array = Array::from_vec(vec![1, 2]);
    array_append_slice(&mut array, &[]).unwrap();
    assert!(!array_is_growable(&array));
    assert_eq!(array, [1, 2]);
}

#[test]
fn test_insert() {
    let mut array = Array::from_vec(vec![1, 2, 3]);
    assert_eq!(*array_insert(&mut array, 1, 9).unwrap(), 9);
    assert!(array_is_growable(&array));
    assert_eq!(array, [1, 9, 2, 3]);

    array_insert_slice(&mut array, 4, &[5, 6]).unwrap();
    assert_eq!(array, [1, 9, 2, 3, 5, 6]);
    array_insert_slice(&mut array, 0, &[-1]).unwrap();
    assert_eq!(array, [-1, 1, 9, 2, 3, 5, 6]);

    unsafe {
        let slots = array_insert_no_init(&mut array, 2, 2).unwrap();
        slots[0].write(40);
        slots[1].write(41);
    }
    assert_eq!(array, [-1, 1, 40, 41, 9, 2, 3, 5, 6]);

    let err = array_insert(&mut array, 10, 0).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    assert_eq!(array.len(), 9);
}

#[test]
fn test_insert_into_custom_deleter_array() {
    tracked::reset();
    RELEASED.set(0);
    let mut array = custom_array(vec![Tracked::new(1), Tracked::new(3)]);
    array_insert(&mut array, 1, Tracked::new(2)).unwrap();
    assert!(array_is_growable(&array));
    assert_eq!(RELEASED.get(), 1);
    assert_eq!(tracked::destructed(), 0);
    assert_eq!(
        array.iter().map(Tracked::value).collect::<Vec<_>>(),
        [1, 2, 3]
    );
    drop(array);
    assert_eq!(tracked::destructed(), 3);
    assert_eq!(RELEASED.get(), 1);
}

#[test]
fn test_remove() {
    let mut array = growable_from(&(0..10).collect::<Vec<i32>>());
    let capacity = array_capacity(&array);
    array_remove(&mut array, 2, 3).unwrap();
    assert_eq!(array, [0, 1, 5, 6, 7, 8, 9]);
    assert_eq!(array_capacity(&array), capacity);

    array_remove(&mut array, 6, 1).unwrap();
    assert_eq!(array, [0, 1, 5, 6, 7, 8]);
    array_remove(&mut array, 0, 0).unwrap();
    assert_eq!(array.len(), 6);

    let err = array_remove(&mut array, 5, 2).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    assert!(array_remove(&mut array, usize::MAX, 2).is_err());
    assert_eq!(array, [0, 1, 5, 6, 7, 8]);
}

#[test]
fn test_remove_from_non_growable() {
    tracked::reset();
    let mut array = Array::from_fn(4, |i| Tracked::new(i as i32));
    array_remove(&mut array, 1, 1).unwrap();
    assert!(array_is_growable(&array));
    assert_eq!(array_capacity(&array), 3);
    assert_eq!(tracked::destructed(), 1);
    assert_eq!(
        array.iter().map(Tracked::value).collect::<Vec<_>>(),
        [0, 2, 3]
    );
    drop(array);
    assert_eq!(tracked::alive(), 0);
}

#[test]
fn test_remove_unordered() {
    let mut array = growable_from(&(0..8).collect::<Vec<i32>>());
    array_remove_unordered(&mut array, 1, 2).unwrap();
    assert_eq!(array, [0, 6, 7, 3, 4, 5]);

    let mut array = growable_from(&[0, 1, 2, 3]);
    array_remove_unordered(&mut array, 2, 1).unwrap();
    assert_eq!(array, [0, 1, 3]);

    let mut array = growable_from(&[0, 1, 2, 3, 4]);
    array_remove_unordered(&mut array, 1, 3).unwrap();
    assert_eq!(array, [0, 4]);

    let mut array = growable_from(&[0, 1, 2]);
    array_remove_unordered(&mut array, 0, 3).unwrap();
    assert!(array.is_empty());
    assert!(array_remove_unordered(&mut array, 0, 1).is_err());
}

#[test]
fn test_remove_drop_counts() {
    tracked::reset();
    let mut array = Array::new();
    for i in 0..6 {
        array_append(&mut array, Tracked::new(i)).unwrap();
    }
    array_remove(&mut array, 1, 2).unwrap();
    assert_eq!(tracked::destructed(), 2);
    array_remove_unordered(&mut array, 0, 1).unwrap();
    assert_eq!(tracked::destructed(), 3);
    assert_eq!(
        array.iter().map(Tracked::value).collect::<Vec<_>>(),
        [5, 3, 4]
    );
    drop(array);
    assert_eq!(tracked::alive(), 0);
}

#[test]
fn test_remove_suffix_errors() {
    let mut array = growable_from(&[1, 2, 3]);
    let err = array_remove_suffix(&mut array, 4).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    assert_eq!(array, [1, 2, 3]);

    let mut array = Array::from_vec(vec![1, 2, 3]);
    array_remove_suffix(&mut array, 0).unwrap();
    assert!(!array_is_growable(&array));
    array_remove_suffix(&mut array, 1).unwrap();
    assert!(array_is_growable(&array));
    assert_eq!(array_capacity(&array), 2);
    assert_eq!(array, [1, 2]);
}

#[test]
fn test_clear() {
    tracked::reset();
    let mut array = Array::new();
    array_append_value(&mut array, 3, Tracked::new(1)).unwrap();
    // The value passed in is dropped after being cloned three times.
    assert_eq!(tracked::destructed(), 1);
    let capacity = array_capacity(&array);
    array_clear(&mut array);
    assert!(array.is_empty());
    assert!(array_is_growable(&array));
    assert_eq!(array_capacity(&array), capacity);
    assert_eq!(tracked::destructed(), 4);

    let mut array = Array::from_fn(2, |_| Tracked::new(0));
    array_clear(&mut array);
    assert!(array.is_empty());
    assert!(!array_is_growable(&array));
    assert_eq!(tracked::alive(), 0);
}

#[test]
fn test_shrink() {
    let mut array = growable_from(&[1, 2, 3]);
    array_reserve(&mut array, 8).unwrap();
    array_shrink(&mut array).unwrap();
    assert!(!array_is_growable(&array));
    assert!(array.deleter().is_none());
    assert_eq!(array_capacity(&array), 3);
    assert_eq!(array, [1, 2, 3]);

    array_shrink(&mut array).unwrap();
    assert_eq!(array, [1, 2, 3]);

    tracked::reset();
    let mut array = Array::<Tracked>::new();
    array_resize(&mut array, 3).unwrap();
    array_shrink(&mut array).unwrap();
    assert_eq!(tracked::constructed(), 3);
    assert_eq!(tracked::destructed(), 0);
    drop(array);
    assert_eq!(tracked::destructed(), 3);
}

#[test]
fn test_zero_sized_elements() {
    let mut array = Array::<()>::new();
    for _ in 0..5 {
        array_append(&mut array, ()).unwrap();
    }
    assert_eq!(array.len(), 5);
    assert!(array_capacity(&array) >= 5);
    array_remove(&mut array, 1, 2).unwrap();
    assert_eq!(array.len(), 3);
    array_shrink(&mut array).unwrap();
    assert_eq!(array.len(), 3);
}

#[test]
fn test_overaligned_elements() {
    #[repr(align(64))]
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Wide(u8);

    let mut array = Array::new();
    for i in 0..9 {
        array_append(&mut array, Wide(i)).unwrap();
        assert_eq!(array.as_ptr().addr() % 64, 0);
    }
    assert_eq!(array[8], Wide(8));
}

#[test]
fn test_construction_panic_restores_length() {
    tracked::reset();
    Fragile::fail_after(usize::MAX);
    let mut array = Array::<Fragile>::new();
    array_append_default(&mut array, 1).unwrap();

    Fragile::fail_after(2);
    let result = panic::catch_unwind(AssertUnwindSafe(|| array_resize(&mut array, 5)));
    assert!(result.is_err());
    assert_eq!(array.len(), 1);
    assert!(array_capacity(&array) >= 5);
    assert_eq!(tracked::constructed(), 3);
    assert_eq!(tracked::destructed(), 2);

    Fragile::fail_after(usize::MAX);
    drop(array);
    assert_eq!(tracked::alive(), 0);
}

#[test]
fn test_insert_panic_closes_gap() {
    let mut array = growable_from(&[Flaky(0), Flaky(1), Flaky(2)]);
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        array_insert_slice(&mut array, 1, &[Flaky(10), Flaky(-1)]).map(|_| ())
    }));
    assert!(result.is_err());
    assert_eq!(array, [Flaky(0), Flaky(1), Flaky(2)]);

    array_insert_slice(&mut array, 1, &[Flaky(10)]).unwrap();
    assert_eq!(array, [Flaky(0), Flaky(10), Flaky(1), Flaky(2)]);
}

#[test]
fn test_malloc_allocator() {
    let mut array = Array::<u32>::new();
    for i in 0..100 {
        ArrayMallocAllocator::append(&mut array, i).unwrap();
    }
    assert!(ArrayMallocAllocator::is_growable(&array));
    assert!(!array_is_growable(&array));
    assert!(ArrayMallocAllocator::capacity_of(&array) >= 100);
    assert_eq!(array.iter().copied().sum::<u32>(), 4950);

    ArrayMallocAllocator::remove_suffix(&mut array, 90).unwrap();
    ArrayMallocAllocator::insert(&mut array, 0, 1000).unwrap();
    assert_eq!(array.len(), 11);
    assert_eq!(array[0], 1000);

    // Growing with another allocator relocates into that allocator's block.
    array_append(&mut array, 7).unwrap();
    assert!(array_is_growable(&array));
    assert!(!ArrayMallocAllocator::is_growable(&array));
    assert_eq!(array[11], 7);
    assert_eq!(array[1], 0);

    let mut empty = Array::<()>::new();
    assert!(ArrayMallocAllocator::append(&mut empty, ()).is_err());
    assert!(empty.is_empty());
}

#[test]
fn test_malloc_reserve_keeps_contents() {
    let mut array = Array::<u64>::new();
    ArrayMallocAllocator::append_slice(&mut array, &[1, 2, 3]).unwrap();
    ArrayMallocAllocator::reserve(&mut array, 1000).unwrap();
    assert_eq!(ArrayMallocAllocator::capacity_of(&array), 1000);
    assert_eq!(array, [1, 2, 3]);
    ArrayMallocAllocator::shrink(&mut array).unwrap();
    assert!(array.deleter().is_none());
    assert_eq!(array, [1, 2, 3]);
}

#[test]
fn test_malloc_growth_keeps_block_when_extended() {
    let mut array = Array::<u64>::new();
    ArrayMallocAllocator::reserve(&mut array, 512).unwrap();
    ArrayMallocAllocator::append_slice(&mut array, &(0..512).collect::<Vec<u64>>()).unwrap();

    for capacity in 513..=576 {
        let before = array.as_ptr();
        let base_before = unsafe { ArrayMallocAllocator::base(before) };
        ArrayMallocAllocator::reserve(&mut array, capacity).unwrap();
        let base_after = unsafe { ArrayMallocAllocator::base(array.as_ptr()) };
        // The element pointer moves exactly when the host moved the block.
        assert_eq!(array.as_ptr() == before, base_after == base_before);
        assert_eq!(ArrayMallocAllocator::capacity_of(&array), capacity);
        assert_eq!(array.len(), 512);
        assert_eq!(array[511], 511);
    }
    assert!(array.iter().copied().eq(0..512u64));
}

#[test]
fn test_allocator_cast() {
    let mut bytes = Array::<u8>::new();
    ArrayMallocAllocator::append_slice(&mut bytes, &[1, 0, 0, 0, 2, 0, 0, 0]).unwrap();
    let mut ints = array_allocator_cast::<u32, u8>(&mut bytes).unwrap();
    assert!(bytes.is_empty());
    assert_eq!(
        ints,
        [
            u32::from_ne_bytes([1, 0, 0, 0]),
            u32::from_ne_bytes([2, 0, 0, 0])
        ]
    );
    assert!(ArrayMallocAllocator::is_growable(&ints));
    assert_eq!(ArrayMallocAllocator::capacity_of(&ints), 2);

    ArrayMallocAllocator::append(&mut ints, 3).unwrap();
    assert_eq!(ints.len(), 3);
    assert_eq!(ints[2], 3);
}

#[test]
fn test_allocator_cast_errors() {
    let mut empty = Array::<u8>::new();
    assert!(array_allocator_cast::<u32, u8>(&mut empty).unwrap().is_empty());

    let mut odd = Array::<u8>::new();
    ArrayMallocAllocator::append_slice(&mut odd, &[1, 2, 3]).unwrap();
    let err = array_allocator_cast::<u32, u8>(&mut odd).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    assert_eq!(odd, [1, 2, 3]);

    let mut other = growable_from(&[0u8; 4]);
    assert!(array_allocator_cast::<u32, u8>(&mut other).is_err());
    assert_eq!(other.len(), 4);

    let mut boxed = Array::from_vec(vec![0u8; 4]);
    assert!(array_allocator_cast::<u32, u8>(&mut boxed).is_err());
}

#[test]
fn test_random_operations_match_vec() {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    let mut array = Array::<i32>::new();
    let mut model = Vec::<i32>::new();

    for _ in 0..2000 {
        match rng.u8(0..7) {
            0 | 1 => {
                let value = rng.i32(..);
                array_append(&mut array, value).unwrap();
                model.push(value);
            }
            2 => {
                let index = rng.usize(0..=model.len());
                let values = [rng.i32(..), rng.i32(..)];
                array_insert_slice(&mut array, index, &values).unwrap();
                model.splice(index..index, values);
            }
            3 if !model.is_empty() => {
                let index = rng.usize(0..model.len());
                let count = rng.usize(0..=model.len() - index);
                array_remove(&mut array, index, count).unwrap();
                model.drain(index..index + count);
            }
            4 if !model.is_empty() => {
                let count = rng.usize(0..=model.len().min(3));
                array_remove_suffix(&mut array, count).unwrap();
                model.truncate(model.len() - count);
            }
            5 => {
                let len = rng.usize(0..64);
                array_resize(&mut array, len).unwrap();
                model.resize(len, 0);
            }
            _ => {
                let capacity = rng.usize(0..128);
                let result = array_reserve(&mut array, capacity).unwrap();
                assert!(result >= capacity);
            }
        }
        assert_eq!(array.as_slice(), model.as_slice());
        assert!(array.len() <= array_capacity(&array));
    }
}
