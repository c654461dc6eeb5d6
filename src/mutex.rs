//! A common Mutex interface (§5 CONCURRENCY & RESOURCE MODEL).
//!
//! The teacher crate picked between three backings (std, an FFI semaphore,
//! cortex-m critical sections) via `cfg_if!`, for bare-metal targets this
//! driver no longer builds for. We keep the `MutexInterface` seam — every
//! volume is guarded by exactly one of these, per §5's "single mutex per
//! mounted volume" rule — but only the `std::sync::Mutex` backing remains.
//!
//! Nothing here implements poisoning recovery: a panic while holding the
//! lock poisons it and every subsequent `cs` call panics too. That matches
//! §5's stance that a panic mid-mutation leaves the volume's in-memory
//! state unspecified rather than trying to paper over it.

pub trait MutexInterface<T>: Sync {
    fn new(inner: T) -> Self;

    /// Run a function in a critical section.
    fn cs<F: FnOnce(&mut T) -> R, R>(&self, func: F) -> R;

    /// Get mutable access to the inner data using a mutable reference.
    /// Since Rust can statically prove exclusive access here, no locking
    /// occurs.
    fn get_mut(&mut self) -> &mut T;
}

impl<T: Send> MutexInterface<T> for std::sync::Mutex<T> {
    fn new(inner: T) -> Self {
        std::sync::Mutex::new(inner)
    }

    #[inline]
    fn cs<F: FnOnce(&mut T) -> R, R>(&self, func: F) -> R {
        let mut inner = self.lock().unwrap();
        func(&mut *inner)
    }

    #[inline]
    fn get_mut(&mut self) -> &mut T {
        std::sync::Mutex::get_mut(self).unwrap()
    }
}

pub type Mutex<T> = std::sync::Mutex<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cs_serializes_mutation() {
        let m = Mutex::new(0u32);
        m.cs(|v| *v += 1);
        m.cs(|v| *v += 1);
        assert_eq!(*m.lock().unwrap(), 2);
    }

    #[test]
    fn get_mut_avoids_locking() {
        let mut m = Mutex::new(41u32);
        *m.get_mut() += 1;
        assert_eq!(*m.lock().unwrap(), 42);
    }
}
