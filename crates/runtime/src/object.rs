//! Object instances: a fixed-size field table set at allocation, plus a
//! lazily created per-instance attribute dict in the auxiliary slot.
//!
//! Payload layout: `{ nfields: usize, attr_dict: ptr, values[nfields] }`.

use crate::gc::{alloc_raw, TypeTag};

const WORD: usize = std::mem::size_of::<usize>();

pub(crate) fn make_object(field_count: usize) -> *mut u8 {
    let p = alloc_raw(2 * WORD + field_count * WORD, TypeTag::Object);
    // SAFETY: fresh zeroed payload.
    unsafe {
        *(p as *mut usize) = field_count;
    }
    p
}

pub(crate) unsafe fn object_field_count_of(obj: *mut u8) -> usize {
    unsafe { *(obj as *const usize) }
}

unsafe fn attr_dict_slot(obj: *mut u8) -> *mut *mut u8 {
    unsafe { (obj as *mut *mut u8).add(1) }
}

unsafe fn fields(obj: *mut u8) -> *mut *mut u8 {
    unsafe { (obj as *mut *mut u8).add(2) }
}

pub(crate) unsafe fn object_set_field(obj: *mut u8, index: usize, value: *mut u8) {
    unsafe {
        if index >= object_field_count_of(obj) {
            return;
        }
        let slot = fields(obj).add(index);
        crate::gc::pycc_gc_pre_barrier(slot);
        *slot = value;
        crate::gc::pycc_gc_write_barrier(slot, value);
    }
}

pub(crate) unsafe fn object_get_field(obj: *mut u8, index: usize) -> *mut u8 {
    unsafe {
        if index >= object_field_count_of(obj) {
            return std::ptr::null_mut();
        }
        *fields(obj).add(index)
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_object_new(field_count: u64) -> *mut u8 {
    make_object(field_count as usize)
}

/// # Safety
/// `obj` must be a live object payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_object_set(obj: *mut u8, index: u64, value: *mut u8) {
    if obj.is_null() {
        return;
    }
    unsafe { object_set_field(obj, index as usize, value) }
}

/// # Safety
/// `obj` must be a live object payload or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_object_get(obj: *mut u8, index: u64) -> *mut u8 {
    if obj.is_null() {
        return std::ptr::null_mut();
    }
    unsafe { object_get_field(obj, index as usize) }
}

/// # Safety
/// `obj` must be a live object payload or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_object_field_count(obj: *mut u8) -> u64 {
    if obj.is_null() {
        return 0;
    }
    unsafe { object_field_count_of(obj) as u64 }
}

/// Per-instance attribute store; the internal dict is created on first
/// set.
///
/// # Safety
/// `obj` must be a live object payload; `key` a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_object_set_attr(obj: *mut u8, key: *mut u8, value: *mut u8) {
    if obj.is_null() {
        return;
    }
    unsafe {
        let slot = attr_dict_slot(obj);
        crate::dict::pycc_dict_set(slot, key, value);
    }
}

/// # Safety
/// `obj` must be a live object payload or null; `key` a live string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_object_get_attr(obj: *mut u8, key: *mut u8) -> *mut u8 {
    if obj.is_null() {
        return std::ptr::null_mut();
    }
    unsafe { crate::dict::pycc_dict_get(*attr_dict_slot(obj), key) }
}

/// The internal attribute dict; null before the first `set_attr`.
///
/// # Safety
/// `obj` must be a live object payload or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_object_get_attr_dict(obj: *mut u8) -> *mut u8 {
    if obj.is_null() {
        return std::ptr::null_mut();
    }
    unsafe { *attr_dict_slot(obj) }
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
    fn test_fields() {
        pycc_gc_reset_for_tests();
        let mut obj = make_object(3);
        unsafe {
            pycc_gc_register_root(&mut obj);
            assert_eq!(pycc_object_field_count(obj), 3);
            pycc_object_set(obj, 1, pycc_box_int(11));
            assert_eq!(pycc_box_int_value(pycc_object_get(obj, 1)), 11);
            assert!(pycc_object_get(obj, 0).is_null());
            // Out of range is ignored / null.
            pycc_object_set(obj, 9, pycc_box_int(1));
            assert!(pycc_object_get(obj, 9).is_null());
            pycc_gc_unregister_root(&mut obj);
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_attr_dict_lazily_created() {
        pycc_gc_reset_for_tests();
        let mut obj = make_object(0);
        unsafe {
            pycc_gc_register_root(&mut obj);
            assert!(pycc_object_get_attr_dict(obj).is_null());
            pycc_object_set_attr(obj, make_string(b"name"), pycc_box_int(1));
            assert!(!pycc_object_get_attr_dict(obj).is_null());
            let v = pycc_object_get_attr(obj, make_string(b"name"));
            assert_eq!(pycc_box_int_value(v), 1);
            assert!(pycc_object_get_attr(obj, make_string(b"other")).is_null());
            pycc_gc_unregister_root(&mut obj);
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_attr_dict_reachable_through_object() {
        pycc_gc_reset_for_tests();
        let mut obj = make_object(0);
        unsafe {
            pycc_gc_register_root(&mut obj);
            pycc_object_set_attr(obj, make_string(b"k"), pycc_box_int(5));
            crate::gc::pycc_gc_collect();
            // The attribute dict and its contents survive through the
            // object's aux slot.
            let v = pycc_object_get_attr(obj, make_string(b"k"));
            assert_eq!(pycc_box_int_value(v), 5);
            pycc_gc_unregister_root(&mut obj);
        }
        pycc_gc_reset_for_tests();
    }
}
