// Synchronization primitive shim.
//
// Under `cfg(loom)`, re-exports from the `loom` crate. Otherwise, re-exports
// from `std`.
//
// Files in the crate import atomics, `Arc`, `Mutex` and `thread` through this
// module. A direct `use std::sync::atomic::*` would bypass loom's scheduler
// and silently break the model-checked statistics tests.
#![allow(unused_imports)]

// ---------------------------------------------------------------------------
// atomic
// ---------------------------------------------------------------------------
pub(crate) mod atomic {
    #[cfg(loom)]
    pub(crate) use loom::sync::atomic::{AtomicU64, Ordering};

    #[cfg(not(loom))]
    pub(crate) use std::sync::atomic::{AtomicU64, Ordering};
}

// ---------------------------------------------------------------------------
// sync (Mutex, Arc)
// ---------------------------------------------------------------------------
#[cfg(loom)]
pub(crate) use loom::sync::{Arc, Mutex};

#[cfg(not(loom))]
pub(crate) use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// thread
// ---------------------------------------------------------------------------
pub(crate) mod thread {
    #[cfg(loom)]
    pub(crate) use loom::thread::{spawn, JoinHandle};

    #[cfg(not(loom))]
    pub(crate) use std::thread::{spawn, JoinHandle};
}

// ---------------------------------------------------------------------------
// OnceLock shim
//
// loom does not provide OnceLock. Under cfg(loom) we use a std
// Mutex<Option<T>> (not a loom Mutex) because OnceLock is used in `static`
// items and loom's Mutex::new() is not const. The page-size caches are
// init-once and not a synchronization point loom needs to explore.
// ---------------------------------------------------------------------------
#[cfg(not(loom))]
pub(crate) use std::sync::OnceLock;

#[cfg(loom)]
#[allow(dead_code)]
pub(crate) struct OnceLock<T> {
    inner: std::sync::Mutex<Option<T>>,
}

#[cfg(loom)]
#[allow(dead_code)]
impl<T> OnceLock<T> {
    pub(crate) const fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(None),
        }
    }

    pub(crate) fn get_or_init<F: FnOnce() -> T>(&self, f: F) -> &T {
        let mut guard = self.inner.lock().unwrap();
        if guard.is_none() {
            *guard = Some(f());
        }
        let ptr: *const T = guard.as_ref().unwrap();
        // Safety: the value is never moved or dropped while &self is live.
        unsafe { &*ptr }
    }
}

#[cfg(loom)]
// Safety: access is serialised by the inner Mutex.
unsafe impl<T: Send> Sync for OnceLock<T> {}
