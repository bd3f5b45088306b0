use std::sync::{Mutex, MutexGuard};

/// Lock helper that recovers the guard of a poisoned mutex instead of panicking.
pub(crate) trait MutexExt<T> {
    fn lock_or_recover(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    #[track_caller]
    fn lock_or_recover(&self) -> MutexGuard<'_, T> {
        match self.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let loc = std::panic::Location::caller();
                tracing::error!(
                    state = std::any::type_name::<T>(),
                    file = loc.file(),
                    line = loc.line(),
                    "mutex poisoned; continuing with recovered state"
                );
                poisoned.into_inner()
            }
        }
    }
}
