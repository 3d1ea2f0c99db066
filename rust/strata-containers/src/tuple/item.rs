use std::{fmt, marker::PhantomData, mem::MaybeUninit, ptr};

use bytemuck::Zeroable;

use super::deleter::RawDeleter;
use crate::view::ArrayViewMut;

type Constructor<'a> = Box<dyn FnMut(*mut u8, usize) + 'a>;

/// One typed sub-array of an [`ArrayTuple`](super::ArrayTuple).
///
/// An item describes the element type (size, alignment, destructor), the count,
/// how to construct the elements, and the view that receives the sub-array once
/// the whole tuple has been built. The view is left untouched if construction
/// fails.
pub struct Item<'a> {
    pub(super) element_size: usize,
    pub(super) element_alignment: usize,
    pub(super) element_count: usize,
    pub(super) constructor: Option<Constructor<'a>>,
    pub(super) destructor: Option<RawDeleter>,
    destination: *mut (),
    publish: unsafe fn(*mut (), *mut u8, usize),
    _destination: PhantomData<&'a mut ()>,
}

impl<'a> Item<'a> {
    /// `count` elements constructed with `T::default()`.
    pub fn value_init<T: Default>(count: usize, destination: &'a mut ArrayViewMut<T>) -> Item<'a> {
        Self::with_constructor::<T, T>(
            count,
            destination,
            Some(Box::new(|element: *mut u8, _: usize| unsafe {
                element.cast::<T>().write(T::default())
            })),
        )
    }

    /// `count` elements with every byte set to zero.
    pub fn zeroed<T: Zeroable>(count: usize, destination: &'a mut ArrayViewMut<T>) -> Item<'a> {
        Self::with_constructor::<T, T>(
            count,
            destination,
            Some(Box::new(|element: *mut u8, _: usize| unsafe {
                ptr::write_bytes(element.cast::<T>(), 0, 1)
            })),
        )
    }

    /// `count` clones of `value`.
    pub fn from_value<T: Clone + 'a>(
        count: usize,
        destination: &'a mut ArrayViewMut<T>,
        value: T,
    ) -> Item<'a> {
        Self::with_constructor::<T, T>(
            count,
            destination,
            Some(Box::new(move |element: *mut u8, _: usize| unsafe {
                element.cast::<T>().write(value.clone())
            })),
        )
    }

    /// `count` elements, the element at index `i` produced by `f(i)`.
    pub fn from_fn<T, F>(count: usize, destination: &'a mut ArrayViewMut<T>, mut f: F) -> Item<'a>
    where
        F: FnMut(usize) -> T + 'a,
    {
        Self::with_constructor::<T, T>(
            count,
            destination,
            Some(Box::new(move |element: *mut u8, index: usize| unsafe {
                element.cast::<T>().write(f(index))
            })),
        )
    }

    /// `count` elements left uninitialized.
    ///
    /// # Safety
    ///
    /// The destructor of `T` still runs for every element when the tuple is
    /// dropped. The caller must initialize all elements through the published view
    /// before the tuple is dropped (or never drop it).
    pub unsafe fn no_init<T>(
        count: usize,
        destination: &'a mut ArrayViewMut<MaybeUninit<T>>,
    ) -> Item<'a> {
        Self::with_constructor::<T, MaybeUninit<T>>(count, destination, None)
    }

    /// `T` is the element type that gets destructed, `V` the type the view sees.
    fn with_constructor<T, V>(
        count: usize,
        destination: &'a mut ArrayViewMut<V>,
        constructor: Option<Constructor<'a>>,
    ) -> Item<'a> {
        debug_assert_eq!(size_of::<T>(), size_of::<V>());
        debug_assert_eq!(align_of::<T>(), align_of::<V>());
        Item {
            element_size: size_of::<T>(),
            element_alignment: align_of::<T>(),
            element_count: count,
            constructor,
            destructor: destructor_for::<T>(),
            destination: (destination as *mut ArrayViewMut<V>).cast(),
            publish: publish_view::<V>,
            _destination: PhantomData,
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.element_count
    }

    #[inline]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    #[inline]
    pub fn element_alignment(&self) -> usize {
        self.element_alignment
    }

    /// Whether the elements need their destructor called.
    #[inline]
    pub fn is_destructible(&self) -> bool {
        self.destructor.is_some()
    }

    /// Writes `(data, count)` to the destination view.
    ///
    /// # Safety
    ///
    /// `data` must be non-null and aligned for the element type.
    pub(super) unsafe fn publish(&mut self, data: *mut u8) {
        unsafe { (self.publish)(self.destination, data, self.element_count) }
    }
}

impl fmt::Debug for Item<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("element_size", &self.element_size)
            .field("element_alignment", &self.element_alignment)
            .field("element_count", &self.element_count)
            .field("constructed", &self.constructor.is_some())
            .field("destructible", &self.destructor.is_some())
            .finish()
    }
}

fn destructor_for<T>() -> Option<RawDeleter> {
    if std::mem::needs_drop::<T>() {
        Some(drop_element::<T>)
    } else {
        None
    }
}

unsafe fn drop_element<T>(element: *mut u8, _size: usize) {
    unsafe { ptr::drop_in_place(element.cast::<T>()) }
}

unsafe fn publish_view<V>(destination: *mut (), data: *mut u8, len: usize) {
    unsafe {
        let view = ArrayViewMut::from_raw_parts(data.cast::<V>(), len);
        destination.cast::<ArrayViewMut<V>>().write(view);
    }
}
