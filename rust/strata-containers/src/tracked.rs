//! Instance-counting element types for tests.
//!
//! Counters are thread-local: every test runs on its own thread, so tests can
//! assert exact counts without interfering with each other.

use std::cell::Cell;

thread_local! {
    static CONSTRUCTED: Cell<usize> = const { Cell::new(0) };
    static DESTRUCTED: Cell<usize> = const { Cell::new(0) };
}

pub fn reset() {
    CONSTRUCTED.set(0);
    DESTRUCTED.set(0);
}

pub fn constructed() -> usize {
    CONSTRUCTED.get()
}

pub fn destructed() -> usize {
    DESTRUCTED.get()
}

/// Live instances: constructed minus destructed.
pub fn alive() -> usize {
    constructed() - destructed()
}

/// Counts constructions (including clones) and drops.
#[derive(Debug, PartialEq)]
pub struct Tracked {
    value: i32,
}

impl Tracked {
    pub fn new(value: i32) -> Tracked {
        CONSTRUCTED.set(CONSTRUCTED.get() + 1);
        Tracked { value }
    }

    pub fn value(&self) -> i32 {
        self.value
    }
}

impl Default for Tracked {
    fn default() -> Self {
        Tracked::new(0)
    }
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        Tracked::new(self.value)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        DESTRUCTED.set(DESTRUCTED.get() + 1);
    }
}

/// Move-only one-byte type with a destructor.
#[derive(Debug)]
pub struct NonCopyable(u8);

impl Default for NonCopyable {
    fn default() -> Self {
        CONSTRUCTED.set(CONSTRUCTED.get() + 1);
        NonCopyable(0)
    }
}

impl Drop for NonCopyable {
    fn drop(&mut self) {
        DESTRUCTED.set(DESTRUCTED.get() + 1);
        self.0 = 0xff;
    }
}

/// Type whose default constructor panics once the given number of instances
/// has been constructed.
#[derive(Debug)]
pub struct Fragile(#[allow(dead_code)] u32);

thread_local! {
    static FRAGILE_BUDGET: Cell<usize> = const { Cell::new(usize::MAX) };
}

impl Fragile {
    pub fn fail_after(count: usize) {
        FRAGILE_BUDGET.set(count);
    }
}

impl Default for Fragile {
    fn default() -> Self {
        let budget = FRAGILE_BUDGET.get();
        if budget == 0 {
            panic!("Fragile construction failed");
        }
        FRAGILE_BUDGET.set(budget - 1);
        CONSTRUCTED.set(CONSTRUCTED.get() + 1);
        Fragile(0xdead)
    }
}

impl Drop for Fragile {
    fn drop(&mut self) {
        DESTRUCTED.set(DESTRUCTED.get() + 1);
    }
}
