use std::sync::atomic::AtomicPtr;
use std::sync::atomic::Ordering::{self, Acquire, SeqCst};

pub fn is_marked<T>(ptr: *mut T) -> bool {
    let ptr_usize = ptr as usize;
    match ptr_usize & 0x1 {
        0 => false,
        _ => true,
    }
}

pub fn unmark<T>(ptr: *mut T) -> *mut T {
    let ptr_usize = ptr as usize;
    (ptr_usize & !(0x1)) as *mut T
}

pub fn mark<T>(ptr: *mut T) -> *mut T {
    let ptr_usize = ptr as usize;
    (ptr_usize | 0x1) as *mut T
}

/// An atomic pointer whose lowest bit can be set to flag the owner of the field.
///
/// `T` must be aligned to at least two bytes. Once marked, a pointer is never unmarked again.
pub struct AtomicMarkablePtr<T> {
    ptr: AtomicPtr<T>
}

impl<T> AtomicMarkablePtr<T> {
    pub fn new(ptr: *mut T) -> Self {
        AtomicMarkablePtr {
            ptr: AtomicPtr::new(ptr)
        }
    }

    /// Load the raw value, mark bit included.
    pub fn load(&self, ordering: Ordering) -> *mut T {
        self.ptr.load(ordering)
    }

    /// Set the mark bit, provided the field still holds the unmarked `old`.
    pub fn compare_and_mark(&self, old: *mut T) -> Result<*mut T, *mut T> {
        debug_assert!(!is_marked(old));
        self.ptr.compare_exchange(old, mark(old), SeqCst, Acquire)
    }

    pub fn compare_exchange(&self, current: *mut T, new: *mut T) -> Result<*mut T, *mut T> {
        self.ptr.compare_exchange(current, new, SeqCst, Acquire)
    }
}

impl<T> Default for AtomicMarkablePtr<T> {
    fn default() -> Self {
        AtomicMarkablePtr {
            ptr: AtomicPtr::default()
        }
    }
}
