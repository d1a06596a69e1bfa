//! OS threads with payload copy-in/copy-out.
//!
//! `rt_spawn` copies the payload into a fresh thread that invokes the
//! entry with a result out-parameter; `rt_join` waits and hands back a
//! heap-allocated bytes object with the returned content.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;

/// Out-parameter filled by a thread entry. The entry's buffer must stay
/// valid until it returns; its content is copied immediately after.
#[repr(C)]
pub struct RtBuf {
    pub data: *const u8,
    pub len: usize,
}

type Entry = unsafe extern "C" fn(payload: *const u8, len: usize, out: *mut RtBuf);

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);
static THREADS: Mutex<Option<HashMap<u64, JoinHandle<Vec<u8>>>>> = Mutex::new(None);

/// Spawn a thread; returns its join id.
///
/// # Safety
/// `entry` must be a valid function pointer; `payload` must point at
/// `len` readable bytes (null means empty).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_rt_spawn(entry: Entry, payload: *const u8, len: u64) -> u64 {
    let copied: Vec<u8> = if payload.is_null() {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(payload, len as usize) }.to_vec()
    };
    let handle = std::thread::spawn(move || {
        let mut out = RtBuf {
            data: std::ptr::null(),
            len: 0,
        };
        // SAFETY: entry contract; the payload vec outlives the call.
        unsafe { entry(copied.as_ptr(), copied.len(), &mut out) };
        if out.data.is_null() || out.len == 0 {
            Vec::new()
        } else {
            // SAFETY: entry keeps its buffer valid until return.
            unsafe { std::slice::from_raw_parts(out.data, out.len) }.to_vec()
        }
    });
    let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    let mut guard = THREADS.lock().expect("thread registry lock poisoned");
    guard.get_or_insert_with(HashMap::new).insert(id, handle);
    id
}

/// Join; returns a bytes object with the entry's result (empty bytes for
/// a missing id or an empty result).
#[unsafe(no_mangle)]
pub extern "C" fn pycc_rt_join(id: u64) -> *mut u8 {
    let handle = {
        let mut guard = THREADS.lock().expect("thread registry lock poisoned");
        guard.as_mut().and_then(|m| m.remove(&id))
    };
    match handle {
        Some(h) => match h.join() {
            Ok(bytes) => crate::bytes::make_bytes(&bytes),
            Err(_) => {
                crate::exceptions::raise_str("RuntimeError", "thread panicked");
                std::ptr::null_mut()
            }
        },
        None => crate::bytes::make_bytes(&[]),
    }
}
