use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::fmt;
use std::ptr;
use std::sync::atomic::{fence, AtomicPtr, Ordering};
use thread_local::ThreadLocal;
use tracing::trace;

/// Hazard pointer based reclamation for the records of one data structure.
///
/// Every thread owns `num_hp_per_thread` hazard pointers, allocated on its first access and
/// linked into a global list. A record handed to [`retire`](HPBRManager::retire) is only freed
/// by a scan that finds no hazard pointer naming it.
pub struct HPBRManager<T: Send> {
    thread_info: ThreadLocal<UnsafeCell<ThreadLocalInfo<T>>>,
    head: AtomicPtr<HazardPointer<T>>,
    max_retired: usize,
    num_hp_per_thread: usize
}

impl<T: Send> fmt::Debug for HPBRManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut hazards = 0;
        let mut current = self.head.load(Ordering::Acquire);
        while !current.is_null() {
            hazards += 1;
            current = unsafe { (*current).next.load(Ordering::Acquire) };
        }
        f.debug_struct("HPBRManager")
            .field("hazard_pointers", &hazards)
            .field("max_retired", &self.max_retired)
            .field("num_hp_per_thread", &self.num_hp_per_thread)
            .finish()
    }
}

impl<T: Send> HPBRManager<T> {
    pub fn new(max_retired: usize, num_hp_per_thread: usize) -> Self {
        HPBRManager {
            thread_info: ThreadLocal::new(),
            head: AtomicPtr::default(),
            max_retired,
            num_hp_per_thread
        }
    }

    fn allocate_hp(&self) -> *mut HazardPointer<T> {
        let new_hp_ptr = Box::into_raw(Box::new(HazardPointer::new()));

        // CAS push the new hazard pointer onto the global list.
        // Hazard pointers live until the manager is dropped.
        loop {
            let old_head = self.head.load(Ordering::Acquire);
            unsafe {
                (*new_hp_ptr).next.store(old_head, Ordering::Relaxed);
            }
            if self.head.compare_exchange_weak(old_head, new_hp_ptr, Ordering::AcqRel, Ordering::Relaxed).is_ok() {
                return new_hp_ptr;
            }
        }
    }

    /// Publish `record` in this thread's hazard slot `hazard_num`.
    ///
    /// The caller must re-read the location it loaded `record` from after this returns; only if
    /// it still holds `record` is the record guaranteed not to be freed until unprotected.
    pub fn protect(&self, record: *mut T, hazard_num: usize) {
        self.hazard_pointer(hazard_num).protected.store(record, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    pub fn unprotect(&self, hazard_num: usize) {
        self.hazard_pointer(hazard_num).protected.store(ptr::null_mut(), Ordering::Release);
    }

    /// Hand over a record that is no longer reachable from the data structure.
    pub fn retire(&self, record: *mut T, hazard_num: usize) {
        self.unprotect(hazard_num);
        let should_scan = unsafe {
            let thread_info = self.get_mut_thread_info();
            thread_info.retired_list.push(record);
            thread_info.retired_list.len() > self.max_retired
        };
        if should_scan {
            self.scan();
        }
    }

    /// Free every record retired by this thread which no hazard pointer protects.
    pub fn scan(&self) {
        // Pairs with the fence in protect
        fence(Ordering::SeqCst);
        let mut hazard_set: HashSet<*mut T> = HashSet::new();
        let mut current = self.head.load(Ordering::Acquire);
        while !current.is_null() {
            unsafe {
                let hazard_pointer = &*current;
                let protected = hazard_pointer.protected.load(Ordering::Acquire);
                if !protected.is_null() {
                    hazard_set.insert(protected);
                }
                current = hazard_pointer.next.load(Ordering::Acquire);
            }
        }

        let thread_info = unsafe { self.get_mut_thread_info() };
        let before = thread_info.retired_list.len();
        thread_info.retired_list.retain(|&record| {
            if hazard_set.contains(&record) {
                true
            } else {
                unsafe { Self::free(record) };
                false
            }
        });
        trace!(
            freed = before - thread_info.retired_list.len(),
            remaining = thread_info.retired_list.len(),
            "hazard pointer scan"
        );
    }

    unsafe fn free(garbage: *mut T) {
        drop(Box::from_raw(garbage));
    }

    fn hazard_pointer(&self, hazard_num: usize) -> &HazardPointer<T> {
        unsafe { &*self.get_mut_thread_info().local_hazards[hazard_num] }
    }

    /// Get this thread's info, allocating its hazard pointers on first access.
    ///
    /// The returned reference must not outlive the call that requested it, so that no two
    /// mutable references to the same thread's info exist at once.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get_mut_thread_info(&self) -> &mut ThreadLocalInfo<T> {
        let thread_info_ptr = self.thread_info.get_or(|| {
            let starting_hp = (0..self.num_hp_per_thread)
                .map(|_| self.allocate_hp())
                .collect();
            UnsafeCell::new(ThreadLocalInfo::new(starting_hp))
        }).get();

        &mut *thread_info_ptr
    }
}

impl<T: Send> Drop for HPBRManager<T> {
    fn drop(&mut self) {
        for cell in self.thread_info.iter_mut() {
            for record in cell.get_mut().retired_list.drain(..) {
                unsafe { Self::free(record) };
            }
        }

        let mut current = *self.head.get_mut();
        while !current.is_null() {
            let hazard_pointer = unsafe { Box::from_raw(current) };
            current = hazard_pointer.next.load(Ordering::Relaxed);
        }
    }
}

struct HazardPointer<T> {
    protected: AtomicPtr<T>,
    next: AtomicPtr<HazardPointer<T>>
}

impl<T> HazardPointer<T> {
    fn new() -> Self {
        HazardPointer {
            protected: AtomicPtr::default(),
            next: AtomicPtr::default()
        }
    }
}

unsafe impl<T: Send> Send for ThreadLocalInfo<T> {}

struct ThreadLocalInfo<T> {
    local_hazards: Vec<*mut HazardPointer<T>>,
    retired_list: Vec<*mut T>
}

impl<T> ThreadLocalInfo<T> {
    fn new(starting_hazards: Vec<*mut HazardPointer<T>>) -> Self {
        ThreadLocalInfo {
            local_hazards: starting_hazards,
            retired_list: Vec::new()
        }
    }
}
