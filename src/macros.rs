#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut record = lock!(module_record);
///  record.wrapper_refs.clear();
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Helper macro for locking items, mapping a poisoned lock to [`crate::Error::LockError`]
///
/// ```rust, ignore
///  let record = try_lock!(module_record)?;
/// ```
macro_rules! try_lock {
    ($lock:expr) => {
        $lock.lock().map_err(|_| crate::Error::LockError)
    };
}
