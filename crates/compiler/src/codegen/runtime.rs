//! Runtime C-ABI declarations emitted at the top of every module.
//!
//! The emitter declares these verbatim; the linker resolves them against
//! `pycc-runtime`. Pointer-typed arguments and returns carry heap objects,
//! `i32`/`i1`/`double` carry unboxed primitives, `i64` carries lengths.

use std::fmt::Write as _;

/// Every external declaration the generated IR may reference.
pub const RUNTIME_DECLARATIONS: &[&str] = &[
    // GC and barriers
    "declare void @pycc_gc_write_barrier(ptr, ptr)",
    "declare void @pycc_gc_pre_barrier(ptr)",
    "declare void @pycc_gc_register_root(ptr)",
    "declare void @pycc_gc_unregister_root(ptr)",
    "declare void @pycc_gc_collect()",
    "declare void @pycc_gc_set_threshold(i64)",
    "declare void @pycc_gc_set_conservative(i1)",
    "declare void @pycc_gc_set_background(i1)",
    "declare void @pycc_gc_set_barrier_mode(i32)",
    // Boxed primitives
    "declare ptr @pycc_box_int(i64)",
    "declare i64 @pycc_box_int_value(ptr)",
    "declare ptr @pycc_box_float(double)",
    "declare double @pycc_box_float_value(ptr)",
    "declare ptr @pycc_box_bool(i1)",
    "declare i1 @pycc_box_bool_value(ptr)",
    // Strings
    "declare ptr @pycc_string_new(ptr, i64)",
    "declare i64 @pycc_string_len(ptr)",
    "declare ptr @pycc_string_data(ptr)",
    "declare ptr @pycc_string_from_cstr(ptr)",
    "declare ptr @pycc_string_concat(ptr, ptr)",
    "declare ptr @pycc_string_slice(ptr, i64, i64)",
    "declare ptr @pycc_string_repeat(ptr, i64)",
    "declare i1 @pycc_string_contains(ptr, ptr)",
    "declare i64 @pycc_string_charlen(ptr)",
    "declare i1 @pycc_string_eq(ptr, ptr)",
    "declare ptr @pycc_string_normalize(ptr, i32)",
    "declare ptr @pycc_string_casefold(ptr)",
    "declare ptr @pycc_string_encode(ptr, ptr, ptr)",
    "declare ptr @pycc_bytes_decode(ptr, ptr, ptr)",
    "declare i1 @pycc_utf8_is_valid(ptr, i64)",
    "declare ptr @pycc_int_to_string(i64)",
    "declare ptr @pycc_float_to_string(double)",
    "declare i64 @pycc_string_to_int(ptr)",
    // Bytes and bytearrays
    "declare ptr @pycc_bytes_new(ptr, i64)",
    "declare i64 @pycc_bytes_len(ptr)",
    "declare ptr @pycc_bytes_data(ptr)",
    "declare ptr @pycc_bytes_slice(ptr, i64, i64)",
    "declare ptr @pycc_bytes_concat(ptr, ptr)",
    "declare i64 @pycc_bytes_find(ptr, ptr)",
    "declare ptr @pycc_bytearray_new(i64)",
    "declare ptr @pycc_bytearray_from_bytes(ptr)",
    "declare i64 @pycc_bytearray_len(ptr)",
    "declare i32 @pycc_bytearray_get(ptr, i64)",
    "declare void @pycc_bytearray_set(ptr, i64, i32)",
    "declare void @pycc_bytearray_append(ptr, i32)",
    "declare void @pycc_bytearray_extend_from_bytes(ptr, ptr)",
    // Lists
    "declare ptr @pycc_list_new(i64)",
    "declare void @pycc_list_push(ptr, ptr)",
    "declare i64 @pycc_list_len(ptr)",
    "declare ptr @pycc_list_get(ptr, i64)",
    "declare void @pycc_list_set(ptr, i64, ptr)",
    // Dicts
    "declare ptr @pycc_dict_new(i64)",
    "declare void @pycc_dict_set(ptr, ptr, ptr)",
    "declare ptr @pycc_dict_get(ptr, ptr)",
    "declare i64 @pycc_dict_len(ptr)",
    "declare ptr @pycc_dict_iter_new(ptr)",
    "declare ptr @pycc_dict_iter_next(ptr)",
    // Objects
    "declare ptr @pycc_object_new(i64)",
    "declare void @pycc_object_set(ptr, i64, ptr)",
    "declare ptr @pycc_object_get(ptr, i64)",
    "declare i64 @pycc_object_field_count(ptr)",
    "declare void @pycc_object_set_attr(ptr, ptr, ptr)",
    "declare ptr @pycc_object_get_attr(ptr, ptr)",
    "declare ptr @pycc_object_get_attr_dict(ptr)",
    // Exceptions
    "declare void @pycc_rt_raise(ptr, ptr)",
    "declare i1 @pycc_rt_has_exception()",
    "declare ptr @pycc_rt_current_exception()",
    "declare void @pycc_rt_clear_exception()",
    "declare ptr @pycc_rt_exception_type(ptr)",
    "declare ptr @pycc_rt_exception_message(ptr)",
    "declare ptr @pycc_rt_exception_cause(ptr)",
    "declare ptr @pycc_rt_exception_context(ptr)",
    "declare void @pycc_rt_exception_set_cause(ptr, ptr)",
    "declare void @pycc_rt_exception_set_context(ptr, ptr)",
    // I/O and OS
    "declare void @pycc_io_write_stdout(ptr)",
    "declare void @pycc_io_write_stderr(ptr)",
    "declare ptr @pycc_io_read_file(ptr)",
    "declare i1 @pycc_io_write_file(ptr, ptr)",
    "declare ptr @pycc_os_getenv(ptr)",
    "declare i64 @pycc_os_time_ms()",
    "declare ptr @pycc_os_getcwd()",
    "declare i1 @pycc_os_mkdir(ptr, i32)",
    "declare i1 @pycc_os_remove(ptr)",
    "declare i1 @pycc_os_rename(ptr, ptr)",
    // Concurrency
    "declare i64 @pycc_rt_spawn(ptr, ptr, i64)",
    "declare ptr @pycc_rt_join(i64)",
    "declare i64 @pycc_chan_new(i64)",
    "declare void @pycc_chan_send(i64, ptr)",
    "declare ptr @pycc_chan_recv(i64)",
    "declare void @pycc_chan_close(i64)",
    "declare ptr @pycc_atomic_new(i64)",
    "declare i64 @pycc_atomic_load(ptr)",
    "declare void @pycc_atomic_store(ptr, i64)",
    "declare i64 @pycc_atomic_add_fetch(ptr, i64)",
    // Stdlib shims (thin wrappers; see runtime crate)
    "declare i32 @pycc_subprocess_run(ptr)",
    "declare i32 @pycc_subprocess_call(ptr)",
    "declare i32 @pycc_subprocess_check_call(ptr)",
    "declare ptr @pycc_sys_platform()",
    "declare ptr @pycc_sys_version()",
    "declare i64 @pycc_sys_maxsize()",
    "declare void @pycc_sys_exit(i32)",
    "declare void @pycc_time_sleep(double)",
    "declare ptr @pycc_base64_b64encode(ptr)",
    "declare ptr @pycc_base64_b64decode(ptr)",
    "declare ptr @pycc_binascii_hexlify(ptr)",
    "declare ptr @pycc_binascii_unhexlify(ptr)",
    "declare ptr @pycc_hashlib_sha256(ptr)",
    "declare ptr @pycc_hashlib_sha512(ptr)",
    "declare ptr @pycc_hmac_digest(ptr, ptr, ptr)",
    "declare ptr @pycc_uuid_uuid4()",
    "declare double @pycc_random_random()",
    "declare i64 @pycc_random_randint(i64, i64)",
    "declare void @pycc_random_seed(i64)",
    "declare ptr @pycc_secrets_token_hex(i64)",
    "declare ptr @pycc_os_path_join(ptr, ptr)",
    "declare ptr @pycc_os_path_basename(ptr)",
    "declare ptr @pycc_os_path_dirname(ptr)",
    "declare i1 @pycc_os_path_exists(ptr)",
    "declare ptr @pycc_json_dump_list(ptr)",
    "declare ptr @pycc_json_dump_dict(ptr)",
    "declare i64 @pycc_struct_calcsize(ptr)",
    "declare ptr @pycc_struct_pack(ptr, ptr)",
    "declare ptr @pycc_struct_unpack(ptr, ptr)",
    // LLVM intrinsics and EH personality
    "declare void @llvm.gcroot(ptr, ptr)",
    "declare void @llvm.donothing()",
    "declare void @llvm.dbg.declare(metadata, metadata, metadata)",
    "declare double @llvm.pow.f64(double, double)",
    "declare double @llvm.sqrt.f64(double)",
    "declare double @llvm.powi.f64.i32(double, i32)",
    "declare double @llvm.floor.f64(double)",
    "declare double @llvm.ceil.f64(double)",
    "declare i32 @__gxx_personality_v0(...)",
];

/// Write the declaration block into `ir`.
pub fn emit_runtime_decls(ir: &mut String) -> std::fmt::Result {
    for decl in RUNTIME_DECLARATIONS {
        writeln!(ir, "{}", decl)?;
    }
    writeln!(ir)
}
