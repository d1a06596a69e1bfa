//! pycc runtime: managed heap and C-ABI surface for generated code.
//!
//! Key pieces:
//! - `gc`: concurrent mark-sweep collector with precise roots, a
//!   remembered set fed by write/pre barriers, optional conservative
//!   stack scanning, and a background thread with an adaptive controller
//! - heap object layouts: strings, lists, dicts, objects, boxed
//!   primitives, bytes/bytearrays
//! - `exceptions`: thread-local current-exception slot with cause/context
//! - `channel`/`thread`/`atomics`: the concurrency surface
//! - `io` and `shims`: OS interop and the implemented stdlib shims
//!
//! Built as a staticlib for linking into emitted binaries, and as an rlib
//! so the same entry points are testable from Rust.

pub mod atomics;
pub mod boxed;
pub mod bytes;
pub mod channel;
pub mod dict;
pub mod exceptions;
pub mod gc;
pub mod io;
pub mod list;
pub mod object;
pub mod report;
pub mod shims;
pub mod string;
pub mod thread;

// Re-export the C-ABI entry points under their interface names.
pub use gc::{
    pycc_gc_collect as gc_collect, pycc_gc_pre_barrier as gc_pre_barrier,
    pycc_gc_register_root as gc_register_root, pycc_gc_reset_for_tests as gc_reset_for_tests,
    pycc_gc_set_background as gc_set_background, pycc_gc_set_barrier_mode as gc_set_barrier_mode,
    pycc_gc_set_conservative as gc_set_conservative, pycc_gc_set_threshold as gc_set_threshold,
    pycc_gc_stats as gc_stats, pycc_gc_telemetry as gc_telemetry,
    pycc_gc_unregister_root as gc_unregister_root, pycc_gc_write_barrier as gc_write_barrier,
    GcTelemetry, ObjectHeader, RuntimeStats, TypeTag,
};

pub use boxed::{
    pycc_box_bool as box_bool, pycc_box_bool_value as box_bool_value, pycc_box_float as box_float,
    pycc_box_float_value as box_float_value, pycc_box_int as box_int,
    pycc_box_int_value as box_int_value,
};

pub use string::{
    pycc_bytes_decode as bytes_decode, pycc_string_casefold as string_casefold,
    pycc_string_charlen as string_charlen, pycc_string_concat as string_concat,
    pycc_string_contains as string_contains, pycc_string_data as string_data,
    pycc_string_eq as string_eq, pycc_string_from_cstr as string_from_cstr,
    pycc_string_len as string_len, pycc_string_new as string_new,
    pycc_string_normalize as string_normalize, pycc_string_repeat as string_repeat,
    pycc_string_slice as string_slice, pycc_utf8_is_valid as utf8_is_valid,
};

pub use bytes::{
    pycc_bytearray_append as bytearray_append, pycc_bytearray_extend_from_bytes
        as bytearray_extend_from_bytes, pycc_bytearray_from_bytes as bytearray_from_bytes,
    pycc_bytearray_get as bytearray_get, pycc_bytearray_len as bytearray_len,
    pycc_bytearray_new as bytearray_new, pycc_bytearray_set as bytearray_set,
    pycc_bytes_concat as bytes_concat, pycc_bytes_data as bytes_data,
    pycc_bytes_find as bytes_find, pycc_bytes_len as bytes_len, pycc_bytes_new as bytes_new,
    pycc_bytes_slice as bytes_slice,
};

pub use list::{
    pycc_list_get as list_get, pycc_list_len as list_len, pycc_list_new as list_new,
    pycc_list_push as list_push_slot, pycc_list_set as list_set,
};

pub use dict::{
    pycc_dict_get as dict_get, pycc_dict_iter_new as dict_iter_new,
    pycc_dict_iter_next as dict_iter_next, pycc_dict_len as dict_len, pycc_dict_new as dict_new,
    pycc_dict_set as dict_set,
};

pub use object::{
    pycc_object_field_count as object_field_count, pycc_object_get as object_get,
    pycc_object_get_attr as object_get_attr, pycc_object_get_attr_dict as object_get_attr_dict,
    pycc_object_new as object_new, pycc_object_set as object_set,
    pycc_object_set_attr as object_set_attr,
};

pub use exceptions::{
    pycc_rt_clear_exception as rt_clear_exception,
    pycc_rt_current_exception as rt_current_exception, pycc_rt_exception_cause as rt_exception_cause,
    pycc_rt_exception_context as rt_exception_context,
    pycc_rt_exception_message as rt_exception_message,
    pycc_rt_exception_set_cause as rt_exception_set_cause,
    pycc_rt_exception_set_context as rt_exception_set_context,
    pycc_rt_exception_type as rt_exception_type, pycc_rt_has_exception as rt_has_exception,
    pycc_rt_raise as rt_raise,
};

pub use channel::{
    pycc_chan_close as chan_close, pycc_chan_new as chan_new, pycc_chan_recv as chan_recv,
    pycc_chan_send as chan_send,
};

pub use thread::{pycc_rt_join as rt_join, pycc_rt_spawn as rt_spawn, RtBuf};

pub use atomics::{
    pycc_atomic_add_fetch as atomic_add_fetch, pycc_atomic_load as atomic_load,
    pycc_atomic_new as atomic_new, pycc_atomic_store as atomic_store,
};

pub use io::{
    pycc_io_read_file as io_read_file, pycc_io_write_file as io_write_file,
    pycc_io_write_stderr as io_write_stderr, pycc_io_write_stdout as io_write_stdout,
    pycc_os_getcwd as os_getcwd, pycc_os_getenv as os_getenv, pycc_os_mkdir as os_mkdir,
    pycc_os_remove as os_remove, pycc_os_rename as os_rename, pycc_os_time_ms as os_time_ms,
};
