//! Thread-local exception state.
//!
//! The current exception is a four-field object: `[0]` type string,
//! `[1]` message string, `[2]` cause, `[3]` context. `raise` stores the
//! pointer, handlers test and clear it. The object stays pinned (marked
//! every cycle) until cleared, because thread-local slots are invisible to
//! the marker.

use crate::object::{make_object, object_get_field, object_set_field};
use crate::string::{cstr_bytes, make_string};
use std::cell::Cell;

const FIELD_TYPE: usize = 0;
const FIELD_MESSAGE: usize = 1;
const FIELD_CAUSE: usize = 2;
const FIELD_CONTEXT: usize = 3;

thread_local! {
    static CURRENT: Cell<*mut u8> = const { Cell::new(std::ptr::null_mut()) };
}

/// Raise from Rust code inside the runtime.
pub(crate) fn raise_str(type_name: &str, message: &str) {
    let exc = make_object(4);
    // SAFETY: exc is a live 4-field object.
    unsafe {
        object_set_field(exc, FIELD_TYPE, make_string(type_name.as_bytes()));
        object_set_field(exc, FIELD_MESSAGE, make_string(message.as_bytes()));
    }
    set_current(exc);
}

fn set_current(exc: *mut u8) {
    CURRENT.with(|c| {
        let old = c.get();
        if !old.is_null() {
            crate::gc::unpin_object(old);
        }
        if !exc.is_null() {
            crate::gc::pin_object(exc);
        }
        c.set(exc);
    });
}

/// Test-reset hook: drop the current thread's exception without touching
/// the pin registry (the caller clears it wholesale).
pub(crate) fn clear_for_reset() {
    CURRENT.with(|c| c.set(std::ptr::null_mut()));
}

/// # Safety
/// `type_name` and `message` must be NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_rt_raise(type_name: *const u8, message: *const u8) {
    let t = unsafe { cstr_bytes(type_name) }.to_vec();
    let m = unsafe { cstr_bytes(message) }.to_vec();
    let exc = make_object(4);
    // SAFETY: exc is a live 4-field object.
    unsafe {
        object_set_field(exc, FIELD_TYPE, make_string(&t));
        object_set_field(exc, FIELD_MESSAGE, make_string(&m));
    }
    set_current(exc);
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_rt_has_exception() -> bool {
    CURRENT.with(|c| !c.get().is_null())
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_rt_current_exception() -> *mut u8 {
    CURRENT.with(Cell::get)
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_rt_clear_exception() {
    set_current(std::ptr::null_mut());
}

/// # Safety
/// `exc` must be a live exception object or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_rt_exception_type(exc: *mut u8) -> *mut u8 {
    if exc.is_null() {
        return std::ptr::null_mut();
    }
    unsafe { object_get_field(exc, FIELD_TYPE) }
}

/// # Safety
/// `exc` must be a live exception object or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_rt_exception_message(exc: *mut u8) -> *mut u8 {
    if exc.is_null() {
        return std::ptr::null_mut();
    }
    unsafe { object_get_field(exc, FIELD_MESSAGE) }
}

/// # Safety
/// Both operands must be live exception objects (or null `cause`).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_rt_exception_set_cause(exc: *mut u8, cause: *mut u8) {
    if exc.is_null() {
        return;
    }
    unsafe { object_set_field(exc, FIELD_CAUSE, cause) }
}

/// # Safety
/// `exc` must be a live exception object or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_rt_exception_cause(exc: *mut u8) -> *mut u8 {
    if exc.is_null() {
        return std::ptr::null_mut();
    }
    unsafe { object_get_field(exc, FIELD_CAUSE) }
}

/// # Safety
/// Both operands must be live exception objects (or null `ctx`).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_rt_exception_set_context(exc: *mut u8, ctx: *mut u8) {
    if exc.is_null() {
        return;
    }
    unsafe { object_set_field(exc, FIELD_CONTEXT, ctx) }
}

/// # Safety
/// `exc` must be a live exception object or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_rt_exception_context(exc: *mut u8) -> *mut u8 {
    if exc.is_null() {
        return std::ptr::null_mut();
    }
    unsafe { object_get_field(exc, FIELD_CONTEXT) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::pycc_gc_reset_for_tests;
    use crate::string::str_bytes;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_raise_check_clear() {
        pycc_gc_reset_for_tests();
        unsafe {
            assert!(!pycc_rt_has_exception());
            pycc_rt_raise(c"ValueError".as_ptr().cast(), c"bad input".as_ptr().cast());
            assert!(pycc_rt_has_exception());
            let exc = pycc_rt_current_exception();
            assert_eq!(str_bytes(pycc_rt_exception_type(exc)), b"ValueError");
            assert_eq!(str_bytes(pycc_rt_exception_message(exc)), b"bad input");
            pycc_rt_clear_exception();
            assert!(!pycc_rt_has_exception());
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_exception_survives_collection_until_cleared() {
        pycc_gc_reset_for_tests();
        unsafe {
            pycc_rt_raise(c"KeyError".as_ptr().cast(), c"k".as_ptr().cast());
            crate::gc::pycc_gc_collect();
            let exc = pycc_rt_current_exception();
            assert_eq!(str_bytes(pycc_rt_exception_type(exc)), b"KeyError");
            pycc_rt_clear_exception();
            crate::gc::pycc_gc_collect();
            assert!(!pycc_rt_has_exception());
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_cause_and_context_chain() {
        pycc_gc_reset_for_tests();
        unsafe {
            pycc_rt_raise(c"OSError".as_ptr().cast(), c"io".as_ptr().cast());
            let original = pycc_rt_current_exception();
            pycc_rt_clear_exception();
            pycc_rt_raise(c"RuntimeError".as_ptr().cast(), c"wrap".as_ptr().cast());
            let wrapper = pycc_rt_current_exception();
            pycc_rt_exception_set_cause(wrapper, original);
            pycc_rt_exception_set_context(wrapper, original);
            assert_eq!(pycc_rt_exception_cause(wrapper), original);
            assert_eq!(pycc_rt_exception_context(wrapper), original);
            pycc_rt_clear_exception();
        }
        pycc_gc_reset_for_tests();
    }
}
