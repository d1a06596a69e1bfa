//! Basic I/O and OS interop.

use crate::string::{cstr_bytes, make_string, str_bytes};
use std::io::Write as _;

/// # Safety
/// `s` must be a live string payload or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_io_write_stdout(s: *mut u8) {
    if s.is_null() {
        return;
    }
    let bytes = unsafe { str_bytes(s) };
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(bytes);
    let _ = out.flush();
}

/// # Safety
/// `s` must be a live string payload or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_io_write_stderr(s: *mut u8) {
    if s.is_null() {
        return;
    }
    let bytes = unsafe { str_bytes(s) };
    let mut out = std::io::stderr().lock();
    let _ = out.write_all(bytes);
    let _ = out.flush();
}

/// Read a file into a string object; raises OSError on failure.
///
/// # Safety
/// `path` must be a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_io_read_file(path: *const u8) -> *mut u8 {
    let path = String::from_utf8_lossy(unsafe { cstr_bytes(path) }).into_owned();
    match std::fs::read(&path) {
        Ok(content) => make_string(&content),
        Err(e) => {
            crate::exceptions::raise_str("OSError", &format!("{}: {}", path, e));
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// `path` NUL-terminated; `s` a live string payload.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_io_write_file(path: *const u8, s: *mut u8) -> bool {
    let path = String::from_utf8_lossy(unsafe { cstr_bytes(path) }).into_owned();
    let bytes = unsafe { str_bytes(s) };
    std::fs::write(path, bytes).is_ok()
}

/// Returns a string object, or null when unset.
///
/// # Safety
/// `name` must be a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_os_getenv(name: *const u8) -> *mut u8 {
    let name = String::from_utf8_lossy(unsafe { cstr_bytes(name) }).into_owned();
    match std::env::var(&name) {
        Ok(val) => make_string(val.as_bytes()),
        Err(_) => std::ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_os_time_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_os_getcwd() -> *mut u8 {
    match std::env::current_dir() {
        Ok(dir) => make_string(dir.to_string_lossy().as_bytes()),
        Err(_) => make_string(b""),
    }
}

/// # Safety
/// `path` must be a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_os_mkdir(path: *const u8, mode: i32) -> bool {
    let path_s = String::from_utf8_lossy(unsafe { cstr_bytes(path) }).into_owned();
    if std::fs::create_dir(&path_s).is_err() {
        return false;
    }
    // Apply the requested mode bits the POSIX way.
    #[cfg(unix)]
    unsafe {
        let cpath = std::ffi::CString::new(path_s).expect("no interior NUL");
        libc::chmod(cpath.as_ptr(), mode as libc::mode_t);
    }
    #[cfg(not(unix))]
    let _ = mode;
    true
}

/// # Safety
/// `path` must be a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_os_remove(path: *const u8) -> bool {
    let path = String::from_utf8_lossy(unsafe { cstr_bytes(path) }).into_owned();
    std::fs::remove_file(&path).is_ok() || std::fs::remove_dir(&path).is_ok()
}

/// # Safety
/// Both paths must be NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_os_rename(src: *const u8, dst: *const u8) -> bool {
    let src = String::from_utf8_lossy(unsafe { cstr_bytes(src) }).into_owned();
    let dst = String::from_utf8_lossy(unsafe { cstr_bytes(dst) }).into_owned();
    std::fs::rename(src, dst).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::pycc_gc_reset_for_tests;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_file_round_trip() {
        pycc_gc_reset_for_tests();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let cpath = std::ffi::CString::new(path.to_str().unwrap()).unwrap();
        unsafe {
            let content = make_string(b"hello file");
            assert!(pycc_io_write_file(cpath.as_ptr().cast(), content));
            let read_back = pycc_io_read_file(cpath.as_ptr().cast());
            assert_eq!(str_bytes(read_back), b"hello file");
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_read_missing_file_raises() {
        pycc_gc_reset_for_tests();
        unsafe {
            let p = pycc_io_read_file(c"/no/such/pycc/file".as_ptr().cast());
            assert!(p.is_null());
            assert!(crate::exceptions::pycc_rt_has_exception());
            crate::exceptions::pycc_rt_clear_exception();
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_mkdir_remove_rename() {
        pycc_gc_reset_for_tests();
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let ca = std::ffi::CString::new(a.to_str().unwrap()).unwrap();
        let cb = std::ffi::CString::new(b.to_str().unwrap()).unwrap();
        unsafe {
            assert!(pycc_os_mkdir(ca.as_ptr().cast(), 0o755));
            assert!(a.is_dir());
            assert!(pycc_os_rename(ca.as_ptr().cast(), cb.as_ptr().cast()));
            assert!(b.is_dir());
            assert!(pycc_os_remove(cb.as_ptr().cast()));
            assert!(!b.exists());
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_time_and_cwd() {
        pycc_gc_reset_for_tests();
        assert!(pycc_os_time_ms() > 0);
        unsafe {
            let cwd = pycc_os_getcwd();
            assert!(!str_bytes(cwd).is_empty());
        }
        pycc_gc_reset_for_tests();
    }
}
