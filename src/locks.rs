//! Lock helpers


/// Acquires a `Mutex`, recovering the guard if a previous holder panicked
///
/// The guarded data is plain bookkeeping, so a poisoned lock is logged and
/// then used as-is.
#[macro_export]
macro_rules! do_lock {
    ($mutex:expr) => {
        match $mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("recovering poisoned lock {}", stringify!($mutex));
                poisoned.into_inner()
            },
        }
    };
}
