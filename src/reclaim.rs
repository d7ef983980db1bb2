//! Thin typed wrappers around `seize` pointers.
//!
//! Everything a [`HashMap`](crate::HashMap) shares between threads (bin entries, values, and
//! tables) is allocated through the map's [`Collector`] so that it carries the bookkeeping
//! `seize` needs, and is only ever read through a [`Guard`]. A [`Shared`] is a pointer loaded
//! under a guard and may be dereferenced for as long as that guard lives.

pub(crate) use seize::{Collector, Guard, Linked};

use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::{fmt, ptr};

/// An atomic pointer to a collector-linked `T`.
///
/// Dropping an `Atomic` never frees what it points to.
pub(crate) struct Atomic<T>(AtomicPtr<Linked<T>>);

impl<T> Atomic<T> {
    pub(crate) fn null() -> Self {
        Self(AtomicPtr::default())
    }

    #[inline]
    pub(crate) fn load<'g>(&self, ordering: Ordering, guard: &'g Guard<'_>) -> Shared<'g, T> {
        guard.protect(&self.0, ordering).into()
    }

    #[inline]
    pub(crate) fn store(&self, new: Shared<'_, T>, ordering: Ordering) {
        self.0.store(new.ptr, ordering);
    }

    pub(crate) fn swap<'g>(
        &self,
        new: Shared<'_, T>,
        ordering: Ordering,
        _: &'g Guard<'_>,
    ) -> Shared<'g, T> {
        self.0.swap(new.ptr, ordering).into()
    }

    pub(crate) fn compare_exchange<'g>(
        &self,
        current: Shared<'_, T>,
        new: Shared<'g, T>,
        success: Ordering,
        failure: Ordering,
        _: &'g Guard<'_>,
    ) -> Result<Shared<'g, T>, Shared<'g, T>> {
        self.0
            .compare_exchange(current.ptr, new.ptr, success, failure)
            .map(Shared::from)
            .map_err(Shared::from)
    }

    /// Reads the pointer without protecting it. Only for use when no other thread can reach
    /// `self`.
    pub(crate) fn load_unprotected(&self) -> *mut Linked<T> {
        self.0.load(Ordering::Acquire)
    }
}

impl<T> From<Shared<'_, T>> for Atomic<T> {
    fn from(shared: Shared<'_, T>) -> Self {
        Atomic(AtomicPtr::new(shared.ptr))
    }
}

impl<T> fmt::Debug for Atomic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.0.load(Ordering::Relaxed))
    }
}

/// A pointer loaded under a guard that lives for `'g`.
pub(crate) struct Shared<'g, T> {
    ptr: *mut Linked<T>,
    _g: PhantomData<&'g ()>,
}

impl<'g, T> Shared<'g, T> {
    pub(crate) fn null() -> Self {
        Shared::from(ptr::null_mut())
    }

    /// Allocates `value` and links it to `collector`.
    pub(crate) fn boxed(value: T, collector: &Collector) -> Self {
        Shared::from(collector.link_boxed(value))
    }

    #[inline]
    pub(crate) fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// # Safety
    ///
    /// The pointer must be null or point to a live `T` that stays alive for `'g`.
    #[inline]
    pub(crate) unsafe fn as_ref(&self) -> Option<&'g Linked<T>> {
        unsafe { self.ptr.as_ref() }
    }

    /// # Safety
    ///
    /// The pointer must point to a live `T` that stays alive for `'g`.
    #[inline]
    pub(crate) unsafe fn deref(&self) -> &'g Linked<T> {
        unsafe { &*self.ptr }
    }

    /// Takes ownership of the allocation.
    ///
    /// # Safety
    ///
    /// The pointer must be non-null, and no other thread may be able to reach it.
    pub(crate) unsafe fn into_box(self) -> Box<Linked<T>> {
        unsafe { Box::from_raw(self.ptr) }
    }

    /// Frees the allocation once no guard that may have observed it is alive.
    ///
    /// # Safety
    ///
    /// The pointer must be non-null and already unreachable for any thread that loads from
    /// the map after this call. It must not be retired twice.
    pub(crate) unsafe fn retire(self, guard: &Guard<'_>) {
        unsafe { guard.defer_retire(self.ptr, seize::reclaim::boxed::<Linked<T>>) }
    }
}

impl<T> PartialEq for Shared<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for Shared<'_, T> {}

impl<T> Clone for Shared<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Shared<'_, T> {}

impl<T> From<*mut Linked<T>> for Shared<'_, T> {
    fn from(ptr: *mut Linked<T>) -> Self {
        Shared {
            ptr,
            _g: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Shared<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.ptr)
    }
}

/// A guard that is either owned by its holder or borrowed from somewhere else.
pub(crate) enum GuardRef<'g> {
    Owned(Guard<'g>),
    Ref(&'g Guard<'g>),
}

impl<'g> Deref for GuardRef<'g> {
    type Target = Guard<'g>;

    #[inline]
    fn deref(&self) -> &Guard<'g> {
        match self {
            GuardRef::Owned(guard) => guard,
            GuardRef::Ref(guard) => guard,
        }
    }
}

impl fmt::Debug for GuardRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardRef::Owned(_) => f.write_str("GuardRef::Owned"),
            GuardRef::Ref(_) => f.write_str("GuardRef::Ref"),
        }
    }
}
