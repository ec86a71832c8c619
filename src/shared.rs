//! Driver behind a mutex, for firmware where more than one task talks to the
//! AFE. A whole operation runs under the lock, so read-modify-write sequences
//! from different callers never interleave.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::Ml5238;

#[cfg(not(feature = "async"))]
use core::cell::RefCell;
#[cfg(not(feature = "async"))]
use embassy_sync::blocking_mutex::Mutex;
#[cfg(feature = "async")]
use embassy_sync::mutex::{Mutex, MutexGuard};

#[cfg(not(feature = "async"))]
pub struct SharedMl5238<M: RawMutex, T> {
    inner: Mutex<M, RefCell<Ml5238<T>>>,
}

#[cfg(not(feature = "async"))]
impl<M: RawMutex, T> SharedMl5238<M, T> {
    pub fn new(driver: Ml5238<T>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(driver)),
        }
    }

    /// Runs `f` with exclusive access to the driver. `f` must not call back
    /// into the same `SharedMl5238`.
    pub fn with<R>(&self, f: impl FnOnce(&mut Ml5238<T>) -> R) -> R {
        self.inner.lock(|driver| f(&mut driver.borrow_mut()))
    }

    pub fn into_inner(self) -> Ml5238<T> {
        self.inner.into_inner().into_inner()
    }
}

#[cfg(feature = "async")]
pub struct SharedMl5238<M: RawMutex, T> {
    inner: Mutex<M, Ml5238<T>>,
}

#[cfg(feature = "async")]
impl<M: RawMutex, T> SharedMl5238<M, T> {
    pub fn new(driver: Ml5238<T>) -> Self {
        Self {
            inner: Mutex::new(driver),
        }
    }

    /// Waits for exclusive access. Hold the guard for the whole operation.
    pub async fn lock(&self) -> MutexGuard<'_, M, Ml5238<T>> {
        self.inner.lock().await
    }

    pub fn into_inner(self) -> Ml5238<T> {
        self.inner.into_inner()
    }
}
