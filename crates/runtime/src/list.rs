//! List objects.
//!
//! Payload layout: `{ len: usize, cap: usize, items[cap]: ptr }` with the
//! element array inline. Growth allocates a doubled copy and updates the
//! caller's slot, invoking the pre- and post-barriers on the slot; the old
//! object becomes garbage. Negative indices wrap; out-of-range access
//! returns null without raising.

use crate::gc::{alloc_raw, TypeTag};

const DEFAULT_CAPACITY: usize = 4;
const WORD: usize = std::mem::size_of::<usize>();

pub(crate) unsafe fn list_len_of(list: *mut u8) -> usize {
    unsafe { *(list as *const usize) }
}

unsafe fn list_cap_of(list: *mut u8) -> usize {
    unsafe { *(list as *const usize).add(1) }
}

pub(crate) unsafe fn list_items(list: *mut u8) -> *mut *mut u8 {
    unsafe { list.add(2 * WORD) as *mut *mut u8 }
}

pub(crate) fn make_list(capacity: usize) -> *mut u8 {
    let cap = capacity.max(DEFAULT_CAPACITY);
    let p = alloc_raw(2 * WORD + cap * WORD, TypeTag::List);
    // SAFETY: freshly allocated payload; items are zeroed by alloc_raw.
    unsafe {
        *(p as *mut usize) = 0;
        *(p as *mut usize).add(1) = cap;
    }
    p
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_list_new(capacity: u64) -> *mut u8 {
    make_list(capacity as usize)
}

/// Append through the owning slot, reallocating on overflow.
///
/// # Safety
/// `slot` must point at a rooted slot holding a live list payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_list_push(slot: *mut *mut u8, elem: *mut u8) {
    unsafe {
        let mut list = *slot;
        if list.is_null() {
            crate::gc::pycc_gc_pre_barrier(slot);
            list = make_list(DEFAULT_CAPACITY);
            *slot = list;
            crate::gc::pycc_gc_write_barrier(slot, list);
        }
        let len = list_len_of(list);
        let cap = list_cap_of(list);
        if len == cap {
            let bigger = make_list(cap * 2);
            std::ptr::copy_nonoverlapping(list_items(list), list_items(bigger), len);
            *(bigger as *mut usize) = len;
            crate::gc::pycc_gc_pre_barrier(slot);
            *slot = bigger;
            crate::gc::pycc_gc_write_barrier(slot, bigger);
            list = bigger;
        }
        *list_items(list).add(len) = elem;
        *(list as *mut usize) = len + 1;
        crate::gc::pycc_gc_write_barrier(slot, elem);
    }
}

/// # Safety
/// `list` must be a live list payload or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_list_len(list: *mut u8) -> u64 {
    if list.is_null() {
        return 0;
    }
    unsafe { list_len_of(list) as u64 }
}

/// Negative indices wrap around; out-of-range returns null.
///
/// # Safety
/// `list` must be a live list payload or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_list_get(list: *mut u8, index: i64) -> *mut u8 {
    if list.is_null() {
        return std::ptr::null_mut();
    }
    unsafe {
        let len = list_len_of(list) as i64;
        let idx = if index < 0 { index + len } else { index };
        if idx < 0 || idx >= len {
            return std::ptr::null_mut();
        }
        *list_items(list).add(idx as usize)
    }
}

/// # Safety
/// `list` must be a live list payload or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_list_set(list: *mut u8, index: i64, value: *mut u8) {
    if list.is_null() {
        return;
    }
    unsafe {
        let len = list_len_of(list) as i64;
        let idx = if index < 0 { index + len } else { index };
        if idx < 0 || idx >= len {
            return;
        }
        let item_slot = list_items(list).add(idx as usize);
        crate::gc::pycc_gc_pre_barrier(item_slot);
        *item_slot = value;
        crate::gc::pycc_gc_write_barrier(item_slot, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxed::{pycc_box_int, pycc_box_int_value};
    use crate::gc::{pycc_gc_register_root, pycc_gc_reset_for_tests, pycc_gc_unregister_root};
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_push_len_get_in_order() {
        pycc_gc_reset_for_tests();
        let mut list = make_list(2);
        unsafe {
            pycc_gc_register_root(&mut list);
            for i in 0..10 {
                pycc_list_push(&mut list, pycc_box_int(i));
            }
            assert_eq!(pycc_list_len(list), 10);
            for i in 0..10 {
                let v = pycc_list_get(list, i);
                assert_eq!(pycc_box_int_value(v), i);
            }
            pycc_gc_unregister_root(&mut list);
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_growth_updates_slot() {
        pycc_gc_reset_for_tests();
        let mut list = make_list(4);
        let before = list;
        unsafe {
            pycc_gc_register_root(&mut list);
            for i in 0..32 {
                pycc_list_push(&mut list, pycc_box_int(i));
            }
            assert_ne!(list, before, "growth reallocates and rewrites the slot");
            assert_eq!(pycc_list_len(list), 32);
            pycc_gc_unregister_root(&mut list);
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_negative_index_wraps_and_oob_is_null() {
        pycc_gc_reset_for_tests();
        let mut list = make_list(4);
        unsafe {
            pycc_gc_register_root(&mut list);
            pycc_list_push(&mut list, pycc_box_int(1));
            pycc_list_push(&mut list, pycc_box_int(2));
            assert_eq!(pycc_box_int_value(pycc_list_get(list, -1)), 2);
            assert!(pycc_list_get(list, 5).is_null());
            assert!(pycc_list_get(list, -3).is_null());
            pycc_gc_unregister_root(&mut list);
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_set_replaces_element() {
        pycc_gc_reset_for_tests();
        let mut list = make_list(4);
        unsafe {
            pycc_gc_register_root(&mut list);
            pycc_list_push(&mut list, pycc_box_int(1));
            pycc_list_set(list, 0, pycc_box_int(9));
            assert_eq!(pycc_box_int_value(pycc_list_get(list, 0)), 9);
            pycc_gc_unregister_root(&mut list);
        }
        pycc_gc_reset_for_tests();
    }
}
