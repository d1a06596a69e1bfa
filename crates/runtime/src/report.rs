//! GC report output and the module-init registry.
//!
//! `PYCC_GC_REPORT=json` makes `pycc_gc_report` dump collector stats and
//! telemetry to stderr as JSON; any other value prints a plain-text
//! summary. Generated binaries call it at exit when reporting is enabled.

use std::collections::HashSet;
use std::sync::Mutex;

static MODULES: Mutex<Option<HashSet<String>>> = Mutex::new(None);

/// Record one module initialization; returns true the first time a name
/// is seen, so repeated init stubs stay idempotent.
///
/// # Safety
/// `name` must be a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_rt_module_register(name: *const u8) -> bool {
    let name = String::from_utf8_lossy(unsafe { crate::string::cstr_bytes(name) }).into_owned();
    let mut guard = MODULES.lock().expect("module registry lock poisoned");
    guard.get_or_insert_with(HashSet::new).insert(name)
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_gc_report() {
    let Ok(mode) = std::env::var("PYCC_GC_REPORT") else {
        return;
    };
    let stats = crate::gc::pycc_gc_stats();
    let telemetry = crate::gc::pycc_gc_telemetry();
    if mode == "json" {
        #[cfg(feature = "report-json")]
        {
            let report = serde_json::json!({
                "allocated": stats.num_allocated,
                "freed": stats.num_freed,
                "collections": stats.num_collections,
                "bytes_allocated": stats.bytes_allocated,
                "bytes_live": stats.bytes_live,
                "peak_bytes_live": stats.peak_bytes_live,
                "last_reclaimed_bytes": stats.last_reclaimed_bytes,
                "alloc_rate_bytes_per_sec": telemetry.alloc_rate_bytes_per_sec,
                "pressure": telemetry.pressure,
            });
            eprintln!("{}", report);
            return;
        }
    }
    eprintln!(
        "gc: allocated={} freed={} collections={} live={}B peak={}B pressure={:.2}",
        stats.num_allocated,
        stats.num_freed,
        stats.num_collections,
        stats.bytes_live,
        stats.peak_bytes_live,
        telemetry.pressure
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_module_registry_idempotent() {
        unsafe {
            assert!(pycc_rt_module_register(c"report_test_mod".as_ptr().cast()));
            assert!(!pycc_rt_module_register(c"report_test_mod".as_ptr().cast()));
        }
    }
}
