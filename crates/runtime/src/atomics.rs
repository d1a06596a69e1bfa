//! Opaque 64-bit atomic integers.
//!
//! Atomic cells live outside the GC heap (they hold no references and are
//! shared across threads with their own lifetime).

use std::sync::atomic::{AtomicI64, Ordering};

#[unsafe(no_mangle)]
pub extern "C" fn pycc_atomic_new(initial: i64) -> *mut u8 {
    Box::into_raw(Box::new(AtomicI64::new(initial))) as *mut u8
}

/// # Safety
/// `cell` must come from `pycc_atomic_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_atomic_load(cell: *mut u8) -> i64 {
    if cell.is_null() {
        return 0;
    }
    unsafe { (*(cell as *const AtomicI64)).load(Ordering::SeqCst) }
}

/// # Safety
/// `cell` must come from `pycc_atomic_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_atomic_store(cell: *mut u8, value: i64) {
    if cell.is_null() {
        return;
    }
    unsafe { (*(cell as *const AtomicI64)).store(value, Ordering::SeqCst) }
}

/// Sequentially consistent add; returns the new value.
///
/// # Safety
/// `cell` must come from `pycc_atomic_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_atomic_add_fetch(cell: *mut u8, delta: i64) -> i64 {
    if cell.is_null() {
        return 0;
    }
    unsafe { (*(cell as *const AtomicI64)).fetch_add(delta, Ordering::SeqCst) + delta }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_ops() {
        unsafe {
            let cell = pycc_atomic_new(10);
            assert_eq!(pycc_atomic_load(cell), 10);
            pycc_atomic_store(cell, 3);
            assert_eq!(pycc_atomic_add_fetch(cell, 4), 7);
            assert_eq!(pycc_atomic_load(cell), 7);
            drop(Box::from_raw(cell as *mut AtomicI64));
        }
    }

    #[test]
    fn test_add_fetch_across_threads() {
        unsafe {
            let cell = pycc_atomic_new(0);
            let addr = cell as usize;
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    std::thread::spawn(move || {
                        for _ in 0..1000 {
                            pycc_atomic_add_fetch(addr as *mut u8, 1);
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(pycc_atomic_load(cell), 4000);
            drop(Box::from_raw(cell as *mut AtomicI64));
        }
    }
}
