//! String objects.
//!
//! Payload layout: `{ len: usize, bytes..., NUL }`. Strings are immutable;
//! every operation allocates a new object. Unicode-aware operations
//! interpret the bytes as UTF-8 with conservative replacement on invalid
//! input. Normalization and case folding use the ASCII fallback: folding
//! lowercases A-Z, normalization returns a shallow copy.

use crate::gc::{alloc_raw, TypeTag};

/// Build a string object from raw bytes.
pub(crate) fn make_string(bytes: &[u8]) -> *mut u8 {
    let word = std::mem::size_of::<usize>();
    let p = alloc_raw(word + bytes.len() + 1, TypeTag::String);
    // SAFETY: payload has room for len + bytes + NUL.
    unsafe {
        *(p as *mut usize) = bytes.len();
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), p.add(word), bytes.len());
        *p.add(word + bytes.len()) = 0;
    }
    p
}

/// View a string object's bytes.
///
/// # Safety
/// `s` must be a live string payload.
pub(crate) unsafe fn str_bytes<'a>(s: *mut u8) -> &'a [u8] {
    let word = std::mem::size_of::<usize>();
    unsafe {
        let len = *(s as *const usize);
        std::slice::from_raw_parts(s.add(word), len)
    }
}

/// Read a NUL-terminated C string.
///
/// # Safety
/// `cstr` must be null or point at a NUL-terminated buffer.
pub(crate) unsafe fn cstr_bytes<'a>(cstr: *const u8) -> &'a [u8] {
    if cstr.is_null() {
        return &[];
    }
    let mut len = 0;
    unsafe {
        while *cstr.add(len) != 0 {
            len += 1;
        }
        std::slice::from_raw_parts(cstr, len)
    }
}

/// # Safety
/// `data` must point at `len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_string_new(data: *const u8, len: u64) -> *mut u8 {
    if data.is_null() {
        return make_string(&[]);
    }
    let bytes = unsafe { std::slice::from_raw_parts(data, len as usize) };
    make_string(bytes)
}

/// # Safety
/// `s` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_string_len(s: *mut u8) -> u64 {
    if s.is_null() {
        return 0;
    }
    unsafe { *(s as *const usize) as u64 }
}

/// Pointer to the NUL-terminated byte data.
///
/// # Safety
/// `s` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_string_data(s: *mut u8) -> *const u8 {
    if s.is_null() {
        return std::ptr::null();
    }
    unsafe { s.add(std::mem::size_of::<usize>()) }
}

/// # Safety
/// `cstr` must be null or NUL-terminated.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_string_from_cstr(cstr: *const u8) -> *mut u8 {
    make_string(unsafe { cstr_bytes(cstr) })
}

/// # Safety
/// Both operands must be live string payloads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_string_concat(a: *mut u8, b: *mut u8) -> *mut u8 {
    unsafe {
        let mut out = Vec::with_capacity(str_bytes(a).len() + str_bytes(b).len());
        out.extend_from_slice(str_bytes(a));
        out.extend_from_slice(str_bytes(b));
        make_string(&out)
    }
}

/// Slice by Unicode code points: `start` and `len` count characters.
///
/// # Safety
/// `s` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_string_slice(s: *mut u8, start: u64, len: u64) -> *mut u8 {
    let text = unsafe { String::from_utf8_lossy(str_bytes(s)) };
    let sliced: String = text
        .chars()
        .skip(start as usize)
        .take(len as usize)
        .collect();
    make_string(sliced.as_bytes())
}

/// Repeat; a zero (or wrapped-negative) count yields the empty string.
///
/// # Safety
/// `s` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_string_repeat(s: *mut u8, n: i64) -> *mut u8 {
    if n <= 0 {
        return make_string(&[]);
    }
    let bytes = unsafe { str_bytes(s) };
    let mut out = Vec::with_capacity(bytes.len() * n as usize);
    for _ in 0..n {
        out.extend_from_slice(bytes);
    }
    make_string(&out)
}

/// Substring containment.
///
/// # Safety
/// Both operands must be live string payloads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_string_contains(haystack: *mut u8, needle: *mut u8) -> bool {
    unsafe {
        let h = str_bytes(haystack);
        let n = str_bytes(needle);
        if n.is_empty() {
            return true;
        }
        h.windows(n.len()).any(|w| w == n)
    }
}

/// Length in Unicode code points (invalid sequences count as replacement
/// characters).
///
/// # Safety
/// `s` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_string_charlen(s: *mut u8) -> u64 {
    let text = unsafe { String::from_utf8_lossy(str_bytes(s)) };
    text.chars().count() as u64
}

/// # Safety
/// Both operands must be live string payloads (null equals only null).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_string_eq(a: *mut u8, b: *mut u8) -> bool {
    if a.is_null() || b.is_null() {
        return a == b;
    }
    unsafe { str_bytes(a) == str_bytes(b) }
}

/// Normalization fallback: a shallow copy for every form.
///
/// # Safety
/// `s` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_string_normalize(s: *mut u8, _form: i32) -> *mut u8 {
    make_string(unsafe { str_bytes(s) })
}

/// ASCII-only case folding: A-Z lowered, everything else copied.
///
/// # Safety
/// `s` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_string_casefold(s: *mut u8) -> *mut u8 {
    let folded: Vec<u8> = unsafe { str_bytes(s) }
        .iter()
        .map(|b| b.to_ascii_lowercase())
        .collect();
    make_string(&folded)
}

/// Encode to "utf-8" or "ascii". `errors` is "strict" (raise) or
/// "replace" (substitute `?` for non-ASCII bytes).
///
/// # Safety
/// `s` must be a live string payload; `encoding`/`errors` NUL-terminated.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_string_encode(
    s: *mut u8,
    encoding: *const u8,
    errors: *const u8,
) -> *mut u8 {
    let enc = unsafe { cstr_bytes(encoding) };
    let errs = unsafe { cstr_bytes(errors) };
    let bytes = unsafe { str_bytes(s) };
    match enc {
        b"utf-8" | b"" => crate::bytes::make_bytes(bytes),
        b"ascii" => {
            if bytes.iter().all(u8::is_ascii) {
                crate::bytes::make_bytes(bytes)
            } else if errs == b"replace" {
                let replaced: Vec<u8> = bytes
                    .iter()
                    .map(|&b| if b.is_ascii() { b } else { b'?' })
                    .collect();
                crate::bytes::make_bytes(&replaced)
            } else {
                crate::exceptions::raise_str("UnicodeEncodeError", "non-ASCII byte in ascii encode");
                std::ptr::null_mut()
            }
        }
        _ => {
            crate::exceptions::raise_str("LookupError", "unknown encoding");
            std::ptr::null_mut()
        }
    }
}

/// Decode a bytes object as "utf-8" or "ascii" with "strict"/"replace"
/// error handling.
///
/// # Safety
/// `b` must be a live bytes payload; `encoding`/`errors` NUL-terminated.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_bytes_decode(
    b: *mut u8,
    encoding: *const u8,
    errors: *const u8,
) -> *mut u8 {
    let enc = unsafe { cstr_bytes(encoding) };
    let errs = unsafe { cstr_bytes(errors) };
    let data = unsafe { crate::bytes::bytes_slice_of(b) };
    let strict = errs != b"replace";
    match enc {
        b"utf-8" | b"" => match std::str::from_utf8(data) {
            Ok(text) => make_string(text.as_bytes()),
            Err(_) if strict => {
                crate::exceptions::raise_str("UnicodeDecodeError", "invalid utf-8");
                std::ptr::null_mut()
            }
            Err(_) => {
                let text = String::from_utf8_lossy(data);
                make_string(text.as_bytes())
            }
        },
        b"ascii" => {
            if data.iter().all(u8::is_ascii) {
                make_string(data)
            } else if strict {
                crate::exceptions::raise_str("UnicodeDecodeError", "non-ASCII byte");
                std::ptr::null_mut()
            } else {
                let replaced: Vec<u8> = data
                    .iter()
                    .map(|&c| if c.is_ascii() { c } else { b'?' })
                    .collect();
                make_string(&replaced)
            }
        }
        _ => {
            crate::exceptions::raise_str("LookupError", "unknown encoding");
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// `data` must point at `len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_utf8_is_valid(data: *const u8, len: u64) -> bool {
    if data.is_null() {
        return true;
    }
    let bytes = unsafe { std::slice::from_raw_parts(data, len as usize) };
    std::str::from_utf8(bytes).is_ok()
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_int_to_string(value: i64) -> *mut u8 {
    make_string(value.to_string().as_bytes())
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_float_to_string(value: f64) -> *mut u8 {
    make_string(format!("{}", value).as_bytes())
}

/// Parse an integer; raises ValueError on malformed input.
///
/// # Safety
/// `s` must be a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_string_to_int(s: *mut u8) -> i64 {
    let text = unsafe { String::from_utf8_lossy(str_bytes(s)) };
    match text.trim().parse::<i64>() {
        Ok(v) => v,
        Err(_) => {
            crate::exceptions::raise_str("ValueError", "invalid integer literal");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::pycc_gc_reset_for_tests;
    use serial_test::serial;

    fn s(text: &str) -> *mut u8 {
        make_string(text.as_bytes())
    }

    unsafe fn text(p: *mut u8) -> String {
        unsafe { String::from_utf8_lossy(str_bytes(p)).into_owned() }
    }

    #[test]
    #[serial]
    fn test_concat_and_len() {
        pycc_gc_reset_for_tests();
        unsafe {
            let ab = pycc_string_concat(s("foo"), s("bar"));
            assert_eq!(text(ab), "foobar");
            assert_eq!(pycc_string_len(ab), 6);
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_slice_counts_code_points() {
        pycc_gc_reset_for_tests();
        unsafe {
            let sliced = pycc_string_slice(s("héllo"), 1, 3);
            assert_eq!(text(sliced), "éll");
            assert_eq!(pycc_string_charlen(s("héllo")), 5);
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_repeat_negative_gives_empty() {
        pycc_gc_reset_for_tests();
        unsafe {
            assert_eq!(text(pycc_string_repeat(s("ab"), 3)), "ababab");
            assert_eq!(text(pycc_string_repeat(s("ab"), 0)), "");
            assert_eq!(text(pycc_string_repeat(s("ab"), -2)), "");
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_contains_and_eq() {
        pycc_gc_reset_for_tests();
        unsafe {
            assert!(pycc_string_contains(s("haystack"), s("sta")));
            assert!(!pycc_string_contains(s("haystack"), s("zzz")));
            assert!(pycc_string_eq(s("same"), s("same")));
            assert!(!pycc_string_eq(s("same"), s("other")));
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_casefold_ascii_fallback() {
        pycc_gc_reset_for_tests();
        unsafe {
            assert_eq!(text(pycc_string_casefold(s("MiXeD"))), "mixed");
            // Normalization fallback is a shallow copy.
            let copy = pycc_string_normalize(s("abc"), 0);
            assert_eq!(text(copy), "abc");
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_encode_decode_replace() {
        pycc_gc_reset_for_tests();
        unsafe {
            let encoded = pycc_string_encode(s("héllo"), c"ascii".as_ptr().cast(), c"replace".as_ptr().cast());
            let data = crate::bytes::bytes_slice_of(encoded);
            assert_eq!(data, b"h??llo"); // two-byte UTF-8 sequence replaced per byte

            let decoded = pycc_bytes_decode(
                crate::bytes::make_bytes(b"plain"),
                c"utf-8".as_ptr().cast(),
                c"strict".as_ptr().cast(),
            );
            assert_eq!(text(decoded), "plain");
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_conversions() {
        pycc_gc_reset_for_tests();
        unsafe {
            assert_eq!(text(pycc_int_to_string(-42)), "-42");
            assert_eq!(pycc_string_to_int(s("  17 ")), 17);
            assert!(pycc_utf8_is_valid(b"ok".as_ptr(), 2));
            assert!(!pycc_utf8_is_valid([0xff, 0xfe].as_ptr(), 2));
        }
        pycc_gc_reset_for_tests();
    }
}
