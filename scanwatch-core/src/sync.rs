use std::sync::{Mutex, MutexGuard};

pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::error!("Mutex poisoned, recovering");
        poisoned.into_inner()
    })
}
