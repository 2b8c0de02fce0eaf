//! Priority-inheriting mutex over the image tables.
//!
//! The scan thread runs at a `SCHED_FIFO` priority while plugin threads run
//! at normal priority; guarding the image tables with an ordinary mutex
//! would let a preempted plugin thread hold the scan thread past its
//! deadline. `PiMutex` is a `pthread_mutex_t` created with
//! `PTHREAD_PRIO_INHERIT`, so a holder temporarily inherits the priority of
//! the highest waiter.

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ops::{Deref, DerefMut};

/// Mutex with the priority-inheritance protocol.
pub struct PiMutex<T> {
    // Boxed so the raw mutex address stays stable for the plugin ABI.
    raw: Box<UnsafeCell<libc::pthread_mutex_t>>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for PiMutex<T> {}
unsafe impl<T: Send> Sync for PiMutex<T> {}

impl<T> PiMutex<T> {
    /// Create a priority-inheriting mutex around `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        let raw = Box::new(UnsafeCell::new(unsafe {
            MaybeUninit::<libc::pthread_mutex_t>::zeroed().assume_init()
        }));
        unsafe {
            let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            // These calls only fail on invalid arguments.
            libc::pthread_mutexattr_init(attr.as_mut_ptr());
            libc::pthread_mutexattr_setprotocol(attr.as_mut_ptr(), libc::PTHREAD_PRIO_INHERIT);
            libc::pthread_mutex_init(raw.get(), attr.as_ptr());
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
        }
        Self {
            raw,
            data: UnsafeCell::new(value),
        }
    }

    /// Lock, blocking until the mutex is available.
    pub fn lock(&self) -> PiGuard<'_, T> {
        let rc = unsafe { libc::pthread_mutex_lock(self.raw.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_lock failed");
        PiGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    /// Raw mutex handle for the plugin ABI ([`pi_mutex_take`] operand).
    #[must_use]
    pub fn raw_handle(&self) -> *mut c_void {
        self.raw.get().cast()
    }

    /// Pointer to the protected value without locking. Callers dereference
    /// only to compute stable field addresses, never to read or write cells.
    #[must_use]
    pub fn data_ptr(&self) -> *mut T {
        self.data.get()
    }
}

impl<T> Drop for PiMutex<T> {
    fn drop(&mut self) {
        unsafe { libc::pthread_mutex_destroy(self.raw.get()) };
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PiMutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiMutex").finish_non_exhaustive()
    }
}

/// Guard for a locked [`PiMutex`]; unlocks on drop.
pub struct PiGuard<'a, T> {
    mutex: &'a PiMutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for PiGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for PiGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for PiGuard<'_, T> {
    fn drop(&mut self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.mutex.raw.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_unlock failed");
    }
}

/// `mutex_take` shim handed to plugins.
///
/// # Safety
/// `raw` must be the handle obtained from [`PiMutex::raw_handle`] of a live
/// mutex.
pub unsafe extern "C" fn pi_mutex_take(raw: *mut c_void) -> libc::c_int {
    libc::pthread_mutex_lock(raw.cast())
}

/// `mutex_give` shim handed to plugins.
///
/// # Safety
/// `raw` must be the handle obtained from [`PiMutex::raw_handle`] of a live
/// mutex currently held by the calling thread.
pub unsafe extern "C" fn pi_mutex_give(raw: *mut c_void) -> libc::c_int {
    libc::pthread_mutex_unlock(raw.cast())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn guard_gives_mutual_exclusion() {
        let mutex = Arc::new(PiMutex::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let mutex = mutex.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..10_000 {
                    *mutex.lock() += 1;
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*mutex.lock(), 40_000);
    }

    #[test]
    fn raw_shims_pair_with_guard() {
        let mutex = PiMutex::new(7u32);
        unsafe {
            assert_eq!(pi_mutex_take(mutex.raw_handle()), 0);
            assert_eq!(pi_mutex_give(mutex.raw_handle()), 0);
        }
        assert_eq!(*mutex.lock(), 7);
    }
}
