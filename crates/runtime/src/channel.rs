//! Bounded channels for cross-thread hand-off of immutable objects.
//!
//! `send` blocks while the queue is full, `recv` blocks while it is
//! empty; `close` wakes every waiter and makes subsequent receives return
//! null. Sends are FIFO and totally ordered per channel; the internal
//! mutex provides the release/acquire pairing between sender and
//! receiver.
//!
//! Only immutable heap kinds (strings, boxed primitives, bytes) may cross
//! the wire; a mutable aggregate raises a type error. Queued values are
//! treated as GC roots until received.

use crate::gc::{object_tag, TypeTag};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Once};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);
static REGISTRY: Mutex<Option<HashMap<u64, Arc<Channel>>>> = Mutex::new(None);
static REGISTRY_INIT: Once = Once::new();

struct ChanState {
    queue: VecDeque<usize>,
    closed: bool,
}

struct Channel {
    capacity: usize,
    state: Mutex<ChanState>,
    not_full: Condvar,
    not_empty: Condvar,
}

fn init_registry() {
    REGISTRY_INIT.call_once(|| {
        let mut guard = REGISTRY.lock().expect("channel registry lock poisoned");
        *guard = Some(HashMap::new());
    });
}

fn lookup(id: u64) -> Option<Arc<Channel>> {
    let guard = REGISTRY.lock().expect("channel registry lock poisoned");
    guard.as_ref().and_then(|m| m.get(&id).cloned())
}

/// Mark hook: every queued value in every open channel.
pub(crate) fn for_each_queued(mut f: impl FnMut(*mut u8)) {
    let channels: Vec<Arc<Channel>> = {
        let guard = REGISTRY.lock().expect("channel registry lock poisoned");
        match guard.as_ref() {
            Some(m) => m.values().cloned().collect(),
            None => return,
        }
    };
    for ch in channels {
        let state = ch.state.lock().expect("channel state lock poisoned");
        for &val in &state.queue {
            f(val as *mut u8);
        }
    }
}

fn wire_ok(value: *mut u8) -> bool {
    if value.is_null() {
        return true;
    }
    matches!(
        object_tag(value),
        Some(TypeTag::String)
            | Some(TypeTag::Int)
            | Some(TypeTag::Float)
            | Some(TypeTag::Bool)
            | Some(TypeTag::Bytes)
    )
}

/// Create a channel with the given capacity (minimum 1).
#[unsafe(no_mangle)]
pub extern "C" fn pycc_chan_new(capacity: i64) -> u64 {
    init_registry();
    let ch = Arc::new(Channel {
        capacity: (capacity.max(1)) as usize,
        state: Mutex::new(ChanState {
            queue: VecDeque::new(),
            closed: false,
        }),
        not_full: Condvar::new(),
        not_empty: Condvar::new(),
    });
    let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
    let mut guard = REGISTRY.lock().expect("channel registry lock poisoned");
    guard
        .as_mut()
        .expect("registry initialized")
        .insert(id, ch);
    id
}

/// Blocking send; raises on mutable payloads, closed channels, and
/// unknown ids.
///
/// # Safety
/// `value` must be a live heap payload or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_chan_send(id: u64, value: *mut u8) {
    if !wire_ok(value) {
        crate::exceptions::raise_str(
            "TypeError",
            "only immutable values may be sent on a channel",
        );
        return;
    }
    let Some(ch) = lookup(id) else {
        crate::exceptions::raise_str("RuntimeError", "send on unknown channel");
        return;
    };
    let mut state = ch.state.lock().expect("channel state lock poisoned");
    loop {
        if state.closed {
            drop(state);
            crate::exceptions::raise_str("RuntimeError", "send on closed channel");
            return;
        }
        if state.queue.len() < ch.capacity {
            break;
        }
        state = ch
            .not_full
            .wait(state)
            .expect("channel state lock poisoned");
    }
    state.queue.push_back(value as usize);
    ch.not_empty.notify_one();
}

/// Blocking receive; returns null once the channel is closed and drained.
#[unsafe(no_mangle)]
pub extern "C" fn pycc_chan_recv(id: u64) -> *mut u8 {
    let Some(ch) = lookup(id) else {
        crate::exceptions::raise_str("RuntimeError", "recv on unknown channel");
        return std::ptr::null_mut();
    };
    let mut state = ch.state.lock().expect("channel state lock poisoned");
    loop {
        if let Some(val) = state.queue.pop_front() {
            ch.not_full.notify_one();
            return val as *mut u8;
        }
        if state.closed {
            return std::ptr::null_mut();
        }
        state = ch
            .not_empty
            .wait(state)
            .expect("channel state lock poisoned");
    }
}

/// Close: wakes all blocked senders and receivers.
#[unsafe(no_mangle)]
pub extern "C" fn pycc_chan_close(id: u64) {
    let Some(ch) = lookup(id) else {
        return;
    };
    let mut state = ch.state.lock().expect("channel state lock poisoned");
    state.closed = true;
    ch.not_full.notify_all();
    ch.not_empty.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxed::{pycc_box_int, pycc_box_int_value};
    use crate::gc::pycc_gc_reset_for_tests;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_send_recv_fifo() {
        pycc_gc_reset_for_tests();
        let id = pycc_chan_new(4);
        unsafe {
            pycc_chan_send(id, pycc_box_int(1));
            pycc_chan_send(id, pycc_box_int(2));
            assert_eq!(pycc_box_int_value(pycc_chan_recv(id)), 1);
            assert_eq!(pycc_box_int_value(pycc_chan_recv(id)), 2);
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_mutable_payload_rejected() {
        pycc_gc_reset_for_tests();
        let id = pycc_chan_new(1);
        let list = crate::list::pycc_list_new(2);
        unsafe {
            pycc_chan_send(id, list);
            assert!(crate::exceptions::pycc_rt_has_exception());
            crate::exceptions::pycc_rt_clear_exception();
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_backpressure_blocks_until_recv() {
        pycc_gc_reset_for_tests();
        let id = pycc_chan_new(1);
        unsafe {
            pycc_chan_send(id, pycc_box_int(1));
        }
        let sender = std::thread::spawn(move || unsafe {
            // Full queue: blocks until the main thread receives.
            pycc_chan_send(id, pycc_box_int(2));
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        unsafe {
            assert_eq!(pycc_box_int_value(pycc_chan_recv(id)), 1);
            sender.join().unwrap();
            assert_eq!(pycc_box_int_value(pycc_chan_recv(id)), 2);
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_close_wakes_receiver_with_null() {
        pycc_gc_reset_for_tests();
        let id = pycc_chan_new(1);
        let receiver = std::thread::spawn(move || pycc_chan_recv(id) as usize);
        std::thread::sleep(std::time::Duration::from_millis(20));
        pycc_chan_close(id);
        assert!((receiver.join().unwrap() as *mut u8).is_null());
        // Subsequent recv returns null immediately.
        assert!(pycc_chan_recv(id).is_null());
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_queued_value_survives_collection() {
        pycc_gc_reset_for_tests();
        let id = pycc_chan_new(2);
        unsafe {
            pycc_chan_send(id, pycc_box_int(42));
            crate::gc::pycc_gc_collect();
            assert_eq!(pycc_box_int_value(pycc_chan_recv(id)), 42);
        }
        pycc_gc_reset_for_tests();
    }
}
