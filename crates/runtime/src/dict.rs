//! Dict objects: open-addressed hash tables keyed by string objects.
//!
//! Payload layout: `{ len, cap, seed, keys[cap], values[cap] }`. Linear
//! probing; rehash at load > 0.7 allocates a doubled table and updates the
//! caller's slot. Iteration yields keys in storage order, which is stable
//! for a given instance; rehash re-inserts in slot order of the old array,
//! preserving first-insertion order for live keys. Non-string keys raise a
//! type error on `set`.

use crate::gc::{alloc_raw, object_tag, TypeTag};
use crate::string::str_bytes;

const WORD: usize = std::mem::size_of::<usize>();
const INITIAL_CAPACITY: usize = 8;
const MAX_LOAD_NUM: usize = 7;
const MAX_LOAD_DEN: usize = 10;

unsafe fn dict_len_of(d: *mut u8) -> usize {
    unsafe { *(d as *const usize) }
}

pub(crate) unsafe fn dict_cap_of(d: *mut u8) -> usize {
    unsafe { *(d as *const usize).add(1) }
}

unsafe fn dict_seed_of(d: *mut u8) -> usize {
    unsafe { *(d as *const usize).add(2) }
}

pub(crate) unsafe fn dict_keys(d: *mut u8) -> *mut *mut u8 {
    unsafe { d.add(3 * WORD) as *mut *mut u8 }
}

pub(crate) unsafe fn dict_values(d: *mut u8) -> *mut *mut u8 {
    unsafe { dict_keys(d).add(dict_cap_of(d)) }
}

fn fnv1a(bytes: &[u8], seed: usize) -> usize {
    let mut hash = 0xcbf2_9ce4_8422_2325u64 ^ seed as u64;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash as usize
}

pub(crate) fn make_dict(capacity: usize) -> *mut u8 {
    let cap = capacity.max(INITIAL_CAPACITY).next_power_of_two();
    let p = alloc_raw(3 * WORD + 2 * cap * WORD, TypeTag::Dict);
    // SAFETY: fresh zeroed payload.
    unsafe {
        *(p as *mut usize) = 0;
        *(p as *mut usize).add(1) = cap;
        *(p as *mut usize).add(2) = 0x9e37_79b9;
    }
    p
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_dict_new(capacity: u64) -> *mut u8 {
    make_dict(capacity as usize)
}

/// Probe for `key`; returns the slot index holding it or the first free
/// slot.
unsafe fn probe(d: *mut u8, key_bytes: &[u8]) -> usize {
    unsafe {
        let cap = dict_cap_of(d);
        let seed = dict_seed_of(d);
        let keys = dict_keys(d);
        let mut idx = fnv1a(key_bytes, seed) & (cap - 1);
        loop {
            let k = *keys.add(idx);
            if k.is_null() || str_bytes(k) == key_bytes {
                return idx;
            }
            idx = (idx + 1) & (cap - 1);
        }
    }
}

/// Insert or update through the owning slot; the first set on a null slot
/// initializes a small table.
///
/// # Safety
/// `slot` must point at a rooted slot holding a live dict payload or null;
/// `key` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_dict_set(slot: *mut *mut u8, key: *mut u8, value: *mut u8) {
    if object_tag(key) != Some(TypeTag::String) {
        crate::exceptions::raise_str("TypeError", "dict keys must be strings");
        return;
    }
    unsafe {
        let mut d = *slot;
        if d.is_null() {
            crate::gc::pycc_gc_pre_barrier(slot);
            d = make_dict(INITIAL_CAPACITY);
            *slot = d;
            crate::gc::pycc_gc_write_barrier(slot, d);
        }

        let len = dict_len_of(d);
        let cap = dict_cap_of(d);
        if (len + 1) * MAX_LOAD_DEN > cap * MAX_LOAD_NUM {
            let bigger = make_dict(cap * 2);
            // Re-insert in slot order of the old array.
            let keys = dict_keys(d);
            let values = dict_values(d);
            for i in 0..cap {
                let k = *keys.add(i);
                if !k.is_null() {
                    let idx = probe(bigger, str_bytes(k));
                    *dict_keys(bigger).add(idx) = k;
                    *dict_values(bigger).add(idx) = *values.add(i);
                    *(bigger as *mut usize) += 1;
                }
            }
            crate::gc::pycc_gc_pre_barrier(slot);
            *slot = bigger;
            crate::gc::pycc_gc_write_barrier(slot, bigger);
            d = bigger;
        }

        let idx = probe(d, str_bytes(key));
        let keys = dict_keys(d);
        let values = dict_values(d);
        if (*keys.add(idx)).is_null() {
            *keys.add(idx) = key;
            *(d as *mut usize) = dict_len_of(d) + 1;
            crate::gc::pycc_gc_write_barrier(slot, key);
        }
        let value_slot = values.add(idx);
        crate::gc::pycc_gc_pre_barrier(value_slot);
        *value_slot = value;
        crate::gc::pycc_gc_write_barrier(value_slot, value);
    }
}

/// # Safety
/// `d` must be a live dict payload or null; `key` a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_dict_get(d: *mut u8, key: *mut u8) -> *mut u8 {
    if d.is_null() || key.is_null() {
        return std::ptr::null_mut();
    }
    unsafe {
        let idx = probe(d, str_bytes(key));
        let k = *dict_keys(d).add(idx);
        if k.is_null() {
            return std::ptr::null_mut();
        }
        *dict_values(d).add(idx)
    }
}

/// # Safety
/// `d` must be a live dict payload or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_dict_len(d: *mut u8) -> u64 {
    if d.is_null() {
        return 0;
    }
    unsafe { dict_len_of(d) as u64 }
}

/// Iterator object: a two-field object with `[0]` = dict, `[1]` = boxed
/// cursor index.
///
/// # Safety
/// `d` must be a live dict payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_dict_iter_new(d: *mut u8) -> *mut u8 {
    let it = crate::object::make_object(2);
    unsafe {
        crate::object::object_set_field(it, 0, d);
        crate::object::object_set_field(it, 1, crate::boxed::pycc_box_int(0));
    }
    it
}

/// Next key in storage order, or null when exhausted.
///
/// # Safety
/// `it` must come from `pycc_dict_iter_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_dict_iter_next(it: *mut u8) -> *mut u8 {
    unsafe {
        let d = crate::object::object_get_field(it, 0);
        let idx_box = crate::object::object_get_field(it, 1);
        if d.is_null() || idx_box.is_null() {
            return std::ptr::null_mut();
        }
        let mut idx = crate::boxed::pycc_box_int_value(idx_box) as usize;
        let cap = dict_cap_of(d);
        let keys = dict_keys(d);
        while idx < cap {
            let k = *keys.add(idx);
            idx += 1;
            if !k.is_null() {
                crate::object::object_set_field(it, 1, crate::boxed::pycc_box_int(idx as i64));
                return k;
            }
        }
        crate::object::object_set_field(it, 1, crate::boxed::pycc_box_int(idx as i64));
        std::ptr::null_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxed::{pycc_box_int, pycc_box_int_value};
    use crate::gc::{pycc_gc_register_root, pycc_gc_reset_for_tests, pycc_gc_unregister_root};
    use crate::string::make_string;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_set_get_round_trip() {
        pycc_gc_reset_for_tests();
        let mut d: *mut u8 = std::ptr::null_mut();
        unsafe {
            pycc_gc_register_root(&mut d);
            // First set on a null slot initializes the table.
            pycc_dict_set(&mut d, make_string(b"alpha"), pycc_box_int(1));
            pycc_dict_set(&mut d, make_string(b"beta"), pycc_box_int(2));
            assert_eq!(pycc_dict_len(d), 2);
            let v = pycc_dict_get(d, make_string(b"alpha"));
            assert_eq!(pycc_box_int_value(v), 1);
            assert!(pycc_dict_get(d, make_string(b"missing")).is_null());
            pycc_gc_unregister_root(&mut d);
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_update_existing_key() {
        pycc_gc_reset_for_tests();
        let mut d: *mut u8 = std::ptr::null_mut();
        unsafe {
            pycc_gc_register_root(&mut d);
            pycc_dict_set(&mut d, make_string(b"k"), pycc_box_int(1));
            pycc_dict_set(&mut d, make_string(b"k"), pycc_box_int(5));
            assert_eq!(pycc_dict_len(d), 1);
            assert_eq!(pycc_box_int_value(pycc_dict_get(d, make_string(b"k"))), 5);
            pycc_gc_unregister_root(&mut d);
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_rehash_preserves_entries() {
        pycc_gc_reset_for_tests();
        let mut d: *mut u8 = std::ptr::null_mut();
        unsafe {
            pycc_gc_register_root(&mut d);
            for i in 0..50 {
                let key = make_string(format!("key{}", i).as_bytes());
                pycc_dict_set(&mut d, key, pycc_box_int(i));
            }
            assert_eq!(pycc_dict_len(d), 50);
            assert!(dict_cap_of(d) > INITIAL_CAPACITY);
            for i in 0..50 {
                let key = make_string(format!("key{}", i).as_bytes());
                assert_eq!(pycc_box_int_value(pycc_dict_get(d, key)), i);
            }
            pycc_gc_unregister_root(&mut d);
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_non_string_key_raises() {
        pycc_gc_reset_for_tests();
        let mut d: *mut u8 = std::ptr::null_mut();
        unsafe {
            pycc_gc_register_root(&mut d);
            pycc_dict_set(&mut d, pycc_box_int(3), pycc_box_int(1));
            assert!(crate::exceptions::pycc_rt_has_exception());
            crate::exceptions::pycc_rt_clear_exception();
            pycc_gc_unregister_root(&mut d);
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_iteration_stable_order() {
        pycc_gc_reset_for_tests();
        let mut d: *mut u8 = std::ptr::null_mut();
        unsafe {
            pycc_gc_register_root(&mut d);
            for key in ["one", "two", "three"] {
                pycc_dict_set(&mut d, make_string(key.as_bytes()), pycc_box_int(0));
            }
            let collect = |d: *mut u8| unsafe {
                let mut out = Vec::new();
                let it = pycc_dict_iter_new(d);
                loop {
                    let k = pycc_dict_iter_next(it);
                    if k.is_null() {
                        break;
                    }
                    out.push(String::from_utf8_lossy(str_bytes(k)).into_owned());
                }
                out
            };
            let first = collect(d);
            let second = collect(d);
            assert_eq!(first.len(), 3);
            assert_eq!(first, second, "iteration order is stable per instance");
            pycc_gc_unregister_root(&mut d);
        }
        pycc_gc_reset_for_tests();
    }
}
