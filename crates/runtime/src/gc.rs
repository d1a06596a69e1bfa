//! Concurrent mark-sweep collector.
//!
//! All heap objects live on a single process-wide list threaded through
//! `ObjectHeader.next`. Reachability comes from three sources: precise
//! roots registered by generated code and tests, the remembered set fed by
//! the write/pre barriers, and (optionally) a conservative word-aligned
//! scan of the requesting thread's stack.
//!
//! A background thread services collection requests in bounded slices: the
//! mark phase holds the heap mutex briefly, the conservative scan yields
//! between word-budgeted slices, and the sweep takes the mutex per batch
//! with a persistent cursor. After each cycle an EWMA controller adapts
//! the slice budget and batch size to allocation rate and heap pressure.
//!
//! Header fields other than `next` are mutated only while the heap mutex
//! is held.

use std::collections::HashMap;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, Once};
use std::time::Duration;

// Tuning constants.
const DEFAULT_THRESHOLD_BYTES: usize = 1 << 20;
const STACK_SLICE_WORDS: usize = 1024;
const SLICE_DEFAULT_US: u64 = 100;
const SLICE_INCREMENT_US: u64 = 100;
const SLICE_DECREMENT_US: u64 = 50;
const SLICE_LOWER_TRIGGER_US: u64 = 150;
const MAX_SLICE_US: u64 = 5000;
const BATCH_DEFAULT: usize = 32;
const BATCH_INCREMENT: usize = 32;
const BATCH_DECREMENT: usize = 16;
const BATCH_LOWER_TRIGGER: usize = 64;
const MAX_BATCH: usize = 512;
const HIGH_PRESSURE: f64 = 0.8;
const HIGH_ALLOC_RATE_BYTES_PER_MS: f64 = 4.0;
const LOW_PRESSURE: f64 = 0.3;
const LOW_ALLOC_RATE_BYTES_PER_MS: f64 = 0.5;
const EWMA_ALPHA: f64 = 0.3;

/// Heap object kind tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TypeTag {
    String = 1,
    Int = 2,
    Float = 3,
    Bool = 4,
    List = 5,
    Object = 6,
    Dict = 7,
    Bytes = 8,
    ByteArray = 9,
}

impl TypeTag {
    pub fn from_u32(v: u32) -> Option<TypeTag> {
        Some(match v {
            1 => TypeTag::String,
            2 => TypeTag::Int,
            3 => TypeTag::Float,
            4 => TypeTag::Bool,
            5 => TypeTag::List,
            6 => TypeTag::Object,
            7 => TypeTag::Dict,
            8 => TypeTag::Bytes,
            9 => TypeTag::ByteArray,
            _ => return None,
        })
    }
}

/// Every heap object starts with this header; the payload follows
/// immediately after.
#[repr(C)]
pub struct ObjectHeader {
    pub mark: u32,
    pub tag: u32,
    /// Total allocation size including the header.
    pub size: usize,
    pub next: *mut ObjectHeader,
}

pub const HEADER_SIZE: usize = std::mem::size_of::<ObjectHeader>();
const HEAP_ALIGN: usize = 16;

/// GC counters exposed to tests and tooling.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeStats {
    pub num_allocated: u64,
    pub num_freed: u64,
    pub num_collections: u64,
    pub bytes_allocated: u64,
    pub bytes_live: u64,
    pub peak_bytes_live: u64,
    pub last_reclaimed_bytes: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GcTelemetry {
    /// Recent allocation rate, bytes/second.
    pub alloc_rate_bytes_per_sec: f64,
    /// bytesLive / threshold.
    pub pressure: f64,
}

struct HeapState {
    head: *mut ObjectHeader,
    roots: Vec<*mut *mut u8>,
    stats: RuntimeStats,
    /// Sweep cursor persisting across background batches.
    sweep_cur: *mut ObjectHeader,
    sweep_active: bool,
}

// Raw pointers are confined to this module and only touched under the
// heap mutex.
unsafe impl Send for HeapState {}

static HEAP: Mutex<HeapState> = Mutex::new(HeapState {
    head: ptr::null_mut(),
    roots: Vec::new(),
    stats: RuntimeStats {
        num_allocated: 0,
        num_freed: 0,
        num_collections: 0,
        bytes_allocated: 0,
        bytes_live: 0,
        peak_bytes_live: 0,
        last_reclaimed_bytes: 0,
    },
    sweep_cur: ptr::null_mut(),
    sweep_active: false,
});

static REMEMBERED: Mutex<Vec<usize>> = Mutex::new(Vec::new());
/// Live exception objects (thread-local slots are invisible to the marker).
static PINNED: Mutex<Vec<usize>> = Mutex::new(Vec::new());

static THRESHOLD: AtomicUsize = AtomicUsize::new(DEFAULT_THRESHOLD_BYTES);
static CONSERVATIVE: AtomicBool = AtomicBool::new(false);
static BARRIER_MODE: AtomicI32 = AtomicI32::new(0); // 0=incremental-update, 1=SATB
static BG_ENABLED: AtomicBool = AtomicBool::new(false);
static BG_REQUESTED: AtomicBool = AtomicBool::new(false);
static BG_START: Once = Once::new();
static BG_SIGNAL: Mutex<bool> = Mutex::new(false);
static BG_CV: Condvar = Condvar::new();
/// Cycle in progress: allocations are born marked so the sweep cannot
/// reclaim objects younger than the snapshot.
static GC_ACTIVE: AtomicBool = AtomicBool::new(false);

static SLICE_US: AtomicU64 = AtomicU64::new(SLICE_DEFAULT_US);
static SWEEP_BATCH: AtomicUsize = AtomicUsize::new(BATCH_DEFAULT);
static LAST_BYTES_ALLOC: AtomicU64 = AtomicU64::new(0);
static LAST_TIME_MS: AtomicU64 = AtomicU64::new(0);
static EWMA: Mutex<(f64, f64)> = Mutex::new((0.0, 0.0)); // (alloc rate bytes/ms, pressure)

/// Stack range captured at the most recent collection request, for the
/// conservative scanner.
static STACK_SCAN_LO: AtomicUsize = AtomicUsize::new(0);
static STACK_SCAN_HI: AtomicUsize = AtomicUsize::new(0);

/// Payload address bounds, a cheap pre-filter for conservative candidates.
static MIN_PAYLOAD: AtomicUsize = AtomicUsize::new(usize::MAX);
static MAX_PAYLOAD: AtomicUsize = AtomicUsize::new(0);

/// Free-block reuse: sweep feeds same-size blocks into a global free list;
/// allocating threads refill a small thread-local cache from it before
/// falling back to the system allocator.
static GLOBAL_FREE: Mutex<Option<HashMap<usize, Vec<usize>>>> = Mutex::new(None);
const FREE_LIST_CAP_PER_SIZE: usize = 64;
const LOCAL_REFILL: usize = 8;

thread_local! {
    static LOCAL_FREE: std::cell::RefCell<HashMap<usize, Vec<usize>>> =
        std::cell::RefCell::new(HashMap::new());
}

/// Take a reusable block of exactly `total` bytes, if any.
fn take_free_block(total: usize) -> Option<*mut u8> {
    let local = LOCAL_FREE.with(|c| c.borrow_mut().get_mut(&total).and_then(Vec::pop));
    if let Some(addr) = local {
        return Some(addr as *mut u8);
    }
    // Steal a refill batch from the global list.
    let mut global = GLOBAL_FREE.lock().expect("free list mutex");
    let list = global.as_mut().and_then(|m| m.get_mut(&total))?;
    if list.is_empty() {
        return None;
    }
    let take = list.len().min(LOCAL_REFILL);
    let batch: Vec<usize> = list.drain(list.len() - take..).collect();
    drop(global);
    let mut batch = batch;
    let first = batch.pop();
    if !batch.is_empty() {
        LOCAL_FREE.with(|c| c.borrow_mut().entry(total).or_default().extend(batch));
    }
    first.map(|a| a as *mut u8)
}

/// Park a freed block for reuse, or hand it back to the system when the
/// per-size list is full.
fn recycle_block(addr: *mut u8, total: usize) {
    let mut global = GLOBAL_FREE.lock().expect("free list mutex");
    let list = global
        .get_or_insert_with(HashMap::new)
        .entry(total)
        .or_default();
    if list.len() < FREE_LIST_CAP_PER_SIZE {
        list.push(addr as usize);
        return;
    }
    drop(global);
    let layout = std::alloc::Layout::from_size_align(total, HEAP_ALIGN).expect("object layout");
    // SAFETY: addr was allocated with exactly this layout.
    unsafe { std::alloc::dealloc(addr, layout) };
}

fn drain_free_lists() {
    LOCAL_FREE.with(|c| {
        for (size, list) in c.borrow_mut().drain() {
            for addr in list {
                let layout = std::alloc::Layout::from_size_align(size, HEAP_ALIGN)
                    .expect("object layout");
                // SAFETY: recorded blocks carry their allocation size.
                unsafe { std::alloc::dealloc(addr as *mut u8, layout) };
            }
        }
    });
    let mut global = GLOBAL_FREE.lock().expect("free list mutex");
    if let Some(map) = global.as_mut() {
        for (size, list) in map.drain() {
            for addr in list {
                let layout =
                    std::alloc::Layout::from_size_align(size, HEAP_ALIGN).expect("object layout");
                // SAFETY: recorded blocks carry their allocation size.
                unsafe { std::alloc::dealloc(addr as *mut u8, layout) };
            }
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[inline]
pub(crate) unsafe fn header_of(payload: *mut u8) -> *mut ObjectHeader {
    unsafe { payload.sub(HEADER_SIZE) as *mut ObjectHeader }
}

#[inline]
pub(crate) unsafe fn payload_of(header: *mut ObjectHeader) -> *mut u8 {
    unsafe { (header as *mut u8).add(HEADER_SIZE) }
}

/// Allocate a heap object; returns the zeroed payload pointer.
///
/// Over-threshold allocation requests a background cycle rather than
/// collecting synchronously, so a newly allocated yet-unrooted object
/// cannot be reclaimed out from under its allocator.
pub(crate) fn alloc_raw(payload_size: usize, tag: TypeTag) -> *mut u8 {
    let total = HEADER_SIZE + payload_size;
    let mem = match take_free_block(total) {
        Some(block) => {
            // Reused blocks must come back zeroed like fresh ones.
            // SAFETY: block spans `total` bytes.
            unsafe { std::ptr::write_bytes(block, 0, total) };
            block
        }
        None => {
            let layout = std::alloc::Layout::from_size_align(total, HEAP_ALIGN)
                .expect("object layout");
            // SAFETY: layout has non-zero size (header is never empty).
            let fresh = unsafe { std::alloc::alloc_zeroed(layout) };
            assert!(!fresh.is_null(), "gc: out of memory");
            fresh
        }
    };
    let header = mem as *mut ObjectHeader;

    let mut heap = HEAP.lock().expect("heap mutex");
    // SAFETY: mem is a fresh allocation of at least HEADER_SIZE bytes.
    unsafe {
        (*header).mark = u32::from(GC_ACTIVE.load(Ordering::Relaxed));
        (*header).tag = tag as u32;
        (*header).size = total;
        (*header).next = heap.head;
    }
    heap.head = header;
    heap.stats.num_allocated += 1;
    heap.stats.bytes_allocated += total as u64;
    heap.stats.bytes_live += total as u64;
    heap.stats.peak_bytes_live = heap.stats.peak_bytes_live.max(heap.stats.bytes_live);

    let payload = unsafe { payload_of(header) };
    MIN_PAYLOAD.fetch_min(payload as usize, Ordering::Relaxed);
    MAX_PAYLOAD.fetch_max(payload as usize + payload_size, Ordering::Relaxed);

    if heap.stats.bytes_live > THRESHOLD.load(Ordering::Relaxed) as u64 {
        if BG_ENABLED.load(Ordering::Relaxed) {
            BG_REQUESTED.store(true, Ordering::Relaxed);
            drop(heap);
            let guard = BG_SIGNAL.lock().expect("bg mutex");
            BG_CV.notify_one();
            drop(guard);
        }
    }
    payload
}

unsafe fn free_obj(heap: &mut HeapState, header: *mut ObjectHeader) {
    let size = unsafe { (*header).size };
    heap.stats.num_freed += 1;
    heap.stats.bytes_live -= size as u64;
    heap.stats.last_reclaimed_bytes += size as u64;
    recycle_block(header as *mut u8, size);
}

/// Mark one object and everything reachable from its interior pointers.
unsafe fn mark(start: *mut ObjectHeader) {
    let mut work = vec![start];
    while let Some(header) = work.pop() {
        if header.is_null() {
            continue;
        }
        // SAFETY: header came from the object list or a payload pointer.
        unsafe {
            if (*header).mark != 0 {
                continue;
            }
            (*header).mark = 1;
            let payload = payload_of(header);
            match TypeTag::from_u32((*header).tag) {
                Some(TypeTag::List) => {
                    let len = *(payload as *const usize);
                    let items = payload.add(2 * std::mem::size_of::<usize>()) as *const *mut u8;
                    for i in 0..len {
                        let item = *items.add(i);
                        if !item.is_null() {
                            work.push(header_of(item));
                        }
                    }
                }
                Some(TypeTag::Dict) => {
                    let cap = *(payload as *const usize).add(1);
                    let keys = payload.add(3 * std::mem::size_of::<usize>()) as *const *mut u8;
                    let values = keys.add(cap);
                    for i in 0..cap {
                        let k = *keys.add(i);
                        if !k.is_null() {
                            work.push(header_of(k));
                        }
                        let v = *values.add(i);
                        if !v.is_null() {
                            work.push(header_of(v));
                        }
                    }
                }
                Some(TypeTag::Object) => {
                    let nfields = *(payload as *const usize);
                    let attr_dict = *(payload as *const *mut u8).add(1);
                    if !attr_dict.is_null() {
                        work.push(header_of(attr_dict));
                    }
                    let fields = payload.add(2 * std::mem::size_of::<usize>()) as *const *mut u8;
                    for i in 0..nfields {
                        let f = *fields.add(i);
                        if !f.is_null() {
                            work.push(header_of(f));
                        }
                    }
                }
                _ => {} // strings, boxed scalars, bytes: no interior pointers
            }
        }
    }
}

/// Find the object whose payload contains `ptr` (conservative scan).
unsafe fn find_object_for_pointer(heap: &HeapState, ptr_val: usize) -> *mut ObjectHeader {
    let mut cur = heap.head;
    while !cur.is_null() {
        // SAFETY: cur is a live list node.
        unsafe {
            let payload_start = payload_of(cur) as usize;
            let payload_end = cur as usize + (*cur).size;
            if ptr_val >= payload_start && ptr_val < payload_end {
                return cur;
            }
            cur = (*cur).next;
        }
    }
    ptr::null_mut()
}

/// Mark from precise roots, the remembered set, and pinned objects.
/// Caller holds the heap mutex.
fn mark_roots_locked(heap: &mut HeapState) {
    let roots = heap.roots.clone();
    for slot in roots {
        // SAFETY: registered root slots outlive their registration.
        unsafe {
            let val = *slot;
            if !val.is_null() {
                mark(header_of(val));
            }
        }
    }
    let drained: Vec<usize> = {
        let mut rem = REMEMBERED.lock().expect("remembered mutex");
        std::mem::take(&mut *rem)
    };
    for val in drained {
        // SAFETY: barrier-recorded values are payload pointers.
        unsafe { mark(header_of(val as *mut u8)) };
    }
    let pinned: Vec<usize> = PINNED.lock().expect("pinned mutex").clone();
    for val in pinned {
        unsafe { mark(header_of(val as *mut u8)) };
    }
    crate::channel::for_each_queued(|val| {
        // SAFETY: queued values are live payload pointers.
        unsafe { mark(header_of(val)) };
    });
}

/// One bounded conservative slice; returns true when the scan is done.
fn conservative_slice(heap: &mut HeapState, words: usize) -> bool {
    let lo = STACK_SCAN_LO.load(Ordering::Relaxed);
    let hi = STACK_SCAN_HI.load(Ordering::Relaxed);
    if lo == 0 || hi <= lo {
        return true;
    }
    let min = MIN_PAYLOAD.load(Ordering::Relaxed);
    let max = MAX_PAYLOAD.load(Ordering::Relaxed);
    let word = std::mem::size_of::<usize>();
    let total_words = (hi - lo) / word;
    let scanned = words.min(total_words);
    for i in 0..scanned {
        let addr = lo + i * word;
        // SAFETY: [lo, hi) is within the requesting thread's stack.
        let candidate = unsafe { *(addr as *const usize) };
        if candidate >= min && candidate < max {
            let obj = unsafe { find_object_for_pointer(heap, candidate) };
            if !obj.is_null() {
                unsafe { mark(obj) };
            }
        }
    }
    let new_lo = lo + scanned * word;
    STACK_SCAN_LO.store(new_lo, Ordering::Relaxed);
    new_lo >= hi
}

/// Sweep up to `batch` objects from the cursor; returns true when the
/// sweep finished. Caller holds the heap mutex.
unsafe fn sweep_batch_locked(heap: &mut HeapState, batch: usize) -> bool {
    if !heap.sweep_active {
        heap.sweep_cur = heap.head;
        heap.sweep_active = true;
        heap.stats.last_reclaimed_bytes = 0;
    }
    let mut steps = 0;
    while !heap.sweep_cur.is_null() && steps < batch {
        let cur = heap.sweep_cur;
        // SAFETY: cur is on the list; the heap mutex is held.
        unsafe {
            heap.sweep_cur = (*cur).next;
            if (*cur).mark != 0 {
                (*cur).mark = 0;
            } else {
                unlink(heap, cur);
                free_obj(heap, cur);
            }
        }
        steps += 1;
    }
    if heap.sweep_cur.is_null() {
        heap.sweep_active = false;
        heap.stats.num_collections += 1;
        return true;
    }
    false
}

/// Remove `node` from the object list. Allocations may have prepended
/// newer objects since the cursor was taken, so the predecessor is found
/// by walking from the head.
unsafe fn unlink(heap: &mut HeapState, node: *mut ObjectHeader) {
    unsafe {
        if heap.head == node {
            heap.head = (*node).next;
            return;
        }
        let mut cur = heap.head;
        while !cur.is_null() {
            if (*cur).next == node {
                (*cur).next = (*node).next;
                return;
            }
            cur = (*cur).next;
        }
    }
}

/// Stop-the-world collection under the heap mutex.
fn collect_now() {
    GC_ACTIVE.store(true, Ordering::Relaxed);
    let mut heap = HEAP.lock().expect("heap mutex");
    mark_roots_locked(&mut heap);
    if CONSERVATIVE.load(Ordering::Relaxed) {
        while !conservative_slice(&mut heap, STACK_SLICE_WORDS) {}
    }
    // SAFETY: mutex held for the whole sweep.
    unsafe {
        while !sweep_batch_locked(&mut heap, usize::MAX) {}
    }
    drop(heap);
    GC_ACTIVE.store(false, Ordering::Relaxed);
    adapt_controller();
}

fn background_loop() {
    loop {
        {
            let mut signaled = BG_SIGNAL.lock().expect("bg mutex");
            while !BG_REQUESTED.load(Ordering::Relaxed) {
                let (guard, _timeout) = BG_CV
                    .wait_timeout(signaled, Duration::from_millis(50))
                    .expect("bg cv");
                signaled = guard;
            }
        }
        BG_REQUESTED.store(false, Ordering::Relaxed);
        GC_ACTIVE.store(true, Ordering::Relaxed);

        // Phase 1: precise roots + remembered set, mutex held briefly.
        {
            let mut heap = HEAP.lock().expect("heap mutex");
            mark_roots_locked(&mut heap);
        }

        // Phase 2: conservative slices, yielding on the slice budget.
        if CONSERVATIVE.load(Ordering::Relaxed) {
            loop {
                let budget = Duration::from_micros(SLICE_US.load(Ordering::Relaxed));
                let start = std::time::Instant::now();
                let done = {
                    let mut heap = HEAP.lock().expect("heap mutex");
                    conservative_slice(&mut heap, STACK_SLICE_WORDS)
                };
                if done {
                    break;
                }
                if start.elapsed() > budget {
                    std::thread::yield_now();
                }
            }
        }

        // Phase 3: sweep in bounded batches.
        loop {
            let batch = SWEEP_BATCH.load(Ordering::Relaxed);
            let done = {
                let mut heap = HEAP.lock().expect("heap mutex");
                // SAFETY: mutex held for the batch.
                unsafe { sweep_batch_locked(&mut heap, batch) }
            };
            if done {
                break;
            }
            std::thread::yield_now();
        }

        GC_ACTIVE.store(false, Ordering::Relaxed);
        adapt_controller();
    }
}

fn ensure_background_thread() {
    BG_START.call_once(|| {
        std::thread::Builder::new()
            .name("pycc-gc".to_string())
            .spawn(background_loop)
            .expect("spawn gc thread");
    });
}

/// EWMA controller: trade pause time against throughput under load.
fn adapt_controller() {
    let now = now_ms();
    let (bytes_live, bytes_alloc) = {
        let heap = HEAP.lock().expect("heap mutex");
        (heap.stats.bytes_live, heap.stats.bytes_allocated)
    };
    let last_t = LAST_TIME_MS.swap(now, Ordering::Relaxed);
    let last_b = LAST_BYTES_ALLOC.swap(bytes_alloc, Ordering::Relaxed);
    let dt_ms = now.saturating_sub(last_t).max(1);
    let db = bytes_alloc.saturating_sub(last_b);
    let alloc_rate = db as f64 / dt_ms as f64; // bytes/ms
    let pressure = bytes_live as f64 / THRESHOLD.load(Ordering::Relaxed) as f64;

    let mut ewma = EWMA.lock().expect("ewma mutex");
    ewma.0 = EWMA_ALPHA * alloc_rate + (1.0 - EWMA_ALPHA) * ewma.0;
    ewma.1 = EWMA_ALPHA * pressure + (1.0 - EWMA_ALPHA) * ewma.1;
    let (rate, press) = *ewma;
    drop(ewma);

    let mut slice = SLICE_US.load(Ordering::Relaxed);
    let mut batch = SWEEP_BATCH.load(Ordering::Relaxed);
    if press > HIGH_PRESSURE || rate > HIGH_ALLOC_RATE_BYTES_PER_MS {
        slice = (slice + SLICE_INCREMENT_US).min(MAX_SLICE_US);
        batch = (batch + BATCH_INCREMENT).min(MAX_BATCH);
    } else if press < LOW_PRESSURE && rate < LOW_ALLOC_RATE_BYTES_PER_MS {
        if slice > SLICE_LOWER_TRIGGER_US {
            slice = slice.saturating_sub(SLICE_DECREMENT_US).max(SLICE_DEFAULT_US);
        }
        if batch > BATCH_LOWER_TRIGGER {
            batch = batch.saturating_sub(BATCH_DECREMENT).max(BATCH_DEFAULT);
        }
    }
    SLICE_US.store(slice, Ordering::Relaxed);
    SWEEP_BATCH.store(batch, Ordering::Relaxed);
}

fn capture_stack_range() {
    let anchor: usize = 0;
    let here = std::ptr::addr_of!(anchor) as usize;
    // Scan a bounded window above the current frame; the stack grows down.
    let window = 64 * 1024;
    STACK_SCAN_LO.store(here, Ordering::Relaxed);
    STACK_SCAN_HI.store(here + window, Ordering::Relaxed);
}

pub(crate) fn pin_object(payload: *mut u8) {
    PINNED.lock().expect("pinned mutex").push(payload as usize);
}

pub(crate) fn unpin_object(payload: *mut u8) {
    let mut pinned = PINNED.lock().expect("pinned mutex");
    if let Some(pos) = pinned.iter().position(|&p| p == payload as usize) {
        pinned.swap_remove(pos);
    }
}

// C-ABI surface -----------------------------------------------------------

/// Record a new value into the remembered set (incremental-update mode).
///
/// # Safety
/// `slot` must be a valid slot address or null-safe; `value` must be a
/// heap payload pointer or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_gc_write_barrier(_slot: *mut *mut u8, value: *mut u8) {
    if BARRIER_MODE.load(Ordering::Relaxed) != 0 {
        return; // SATB records in the pre-barrier instead
    }
    if value.is_null() {
        return;
    }
    REMEMBERED
        .lock()
        .expect("remembered mutex")
        .push(value as usize);
}

/// Record the about-to-be-overwritten value (SATB mode). Null slots and
/// null old values record nothing.
///
/// # Safety
/// `slot` must be null or point to a readable slot.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_gc_pre_barrier(slot: *mut *mut u8) {
    if BARRIER_MODE.load(Ordering::Relaxed) != 1 {
        return;
    }
    if slot.is_null() {
        return;
    }
    let old = unsafe { *slot };
    if old.is_null() {
        return;
    }
    REMEMBERED
        .lock()
        .expect("remembered mutex")
        .push(old as usize);
}

/// Register a precise root slot.
///
/// # Safety
/// `slot` must remain valid until unregistered.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_gc_register_root(slot: *mut *mut u8) {
    HEAP.lock().expect("heap mutex").roots.push(slot);
}

/// # Safety
/// `slot` must have been registered.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pycc_gc_unregister_root(slot: *mut *mut u8) {
    let mut heap = HEAP.lock().expect("heap mutex");
    if let Some(pos) = heap.roots.iter().position(|&r| r == slot) {
        heap.roots.swap_remove(pos);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_gc_set_threshold(bytes: u64) {
    THRESHOLD.store(bytes as usize, Ordering::Relaxed);
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_gc_set_conservative(enabled: bool) {
    CONSERVATIVE.store(enabled, Ordering::Relaxed);
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_gc_set_background(enabled: bool) {
    BG_ENABLED.store(enabled, Ordering::Relaxed);
    if enabled {
        ensure_background_thread();
    }
}

/// Barrier mode: 0 = incremental-update, 1 = SATB.
#[unsafe(no_mangle)]
pub extern "C" fn pycc_gc_set_barrier_mode(mode: i32) {
    BARRIER_MODE.store(mode, Ordering::Relaxed);
}

/// Collect: requests a background cycle when the background collector is
/// enabled, otherwise runs a stop-the-world cycle.
#[unsafe(no_mangle)]
pub extern "C" fn pycc_gc_collect() {
    if CONSERVATIVE.load(Ordering::Relaxed) {
        capture_stack_range();
    }
    if BG_ENABLED.load(Ordering::Relaxed) {
        ensure_background_thread();
        BG_REQUESTED.store(true, Ordering::Relaxed);
        let guard = BG_SIGNAL.lock().expect("bg mutex");
        BG_CV.notify_one();
        drop(guard);
    } else {
        collect_now();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_gc_stats() -> RuntimeStats {
    HEAP.lock().expect("heap mutex").stats
}

#[unsafe(no_mangle)]
pub extern "C" fn pycc_gc_telemetry() -> GcTelemetry {
    let ewma = EWMA.lock().expect("ewma mutex");
    GcTelemetry {
        alloc_rate_bytes_per_sec: ewma.0 * 1000.0,
        pressure: ewma.1,
    }
}

/// Return the runtime to a pristine state. Test-only; assumes no live
/// mutator threads.
#[unsafe(no_mangle)]
pub extern "C" fn pycc_gc_reset_for_tests() {
    crate::exceptions::clear_for_reset();
    let mut heap = HEAP.lock().expect("heap mutex");
    heap.roots.clear();
    heap.sweep_active = false;
    heap.sweep_cur = ptr::null_mut();
    // SAFETY: no mutators; every object is unreachable by assumption.
    unsafe {
        let mut cur = heap.head;
        while !cur.is_null() {
            let next = (*cur).next;
            let layout =
                std::alloc::Layout::from_size_align((*cur).size, HEAP_ALIGN).expect("layout");
            std::alloc::dealloc(cur as *mut u8, layout);
            cur = next;
        }
    }
    heap.head = ptr::null_mut();
    heap.stats = RuntimeStats::default();
    drop(heap);
    drain_free_lists();
    REMEMBERED.lock().expect("remembered mutex").clear();
    PINNED.lock().expect("pinned mutex").clear();
    THRESHOLD.store(DEFAULT_THRESHOLD_BYTES, Ordering::Relaxed);
    CONSERVATIVE.store(false, Ordering::Relaxed);
    BARRIER_MODE.store(0, Ordering::Relaxed);
    BG_ENABLED.store(false, Ordering::Relaxed);
    BG_REQUESTED.store(false, Ordering::Relaxed);
    GC_ACTIVE.store(false, Ordering::Relaxed);
    SLICE_US.store(SLICE_DEFAULT_US, Ordering::Relaxed);
    SWEEP_BATCH.store(BATCH_DEFAULT, Ordering::Relaxed);
    *EWMA.lock().expect("ewma mutex") = (0.0, 0.0);
}

/// The tag of a live object, for tests and dispatch checks.
pub fn object_tag(payload: *mut u8) -> Option<TypeTag> {
    if payload.is_null() {
        return None;
    }
    // SAFETY: payload came from alloc_raw.
    unsafe { TypeTag::from_u32((*header_of(payload)).tag) }
}

/// Block until no sweep is in progress (test helper for background mode).
pub fn wait_for_idle() {
    loop {
        {
            let heap = HEAP.lock().expect("heap mutex");
            if !heap.sweep_active && !BG_REQUESTED.load(Ordering::Relaxed) {
                return;
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Visit tag and size of every live object (diagnostics).
pub fn heap_snapshot() -> HashMap<u32, (u64, u64)> {
    let heap = HEAP.lock().expect("heap mutex");
    let mut out: HashMap<u32, (u64, u64)> = HashMap::new();
    let mut cur = heap.head;
    // SAFETY: mutex held; list is consistent.
    unsafe {
        while !cur.is_null() {
            let e = out.entry((*cur).tag).or_default();
            e.0 += 1;
            e.1 += (*cur).size as u64;
            cur = (*cur).next;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_alloc_and_stats() {
        pycc_gc_reset_for_tests();
        let p = alloc_raw(32, TypeTag::Bytes);
        assert!(!p.is_null());
        let stats = pycc_gc_stats();
        assert_eq!(stats.num_allocated, 1);
        assert!(stats.bytes_live as usize >= 32 + HEADER_SIZE);
        assert_eq!(object_tag(p), Some(TypeTag::Bytes));
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_registered_root_survives_collection() {
        pycc_gc_reset_for_tests();
        let mut slot: *mut u8 = alloc_raw(16, TypeTag::Bytes);
        // SAFETY: slot lives for the duration of the test.
        unsafe { pycc_gc_register_root(&mut slot) };
        let _garbage = alloc_raw(16, TypeTag::Bytes);
        pycc_gc_collect();
        let stats = pycc_gc_stats();
        assert_eq!(stats.num_freed, 1, "only the unrooted object is freed");
        assert_eq!(object_tag(slot), Some(TypeTag::Bytes));
        unsafe { pycc_gc_unregister_root(&mut slot) };
        pycc_gc_collect();
        assert_eq!(pycc_gc_stats().num_freed, 2);
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_incremental_barrier_records_new_value() {
        pycc_gc_reset_for_tests();
        pycc_gc_set_barrier_mode(0);
        let obj = alloc_raw(16, TypeTag::Bytes);
        let mut slot: *mut u8 = ptr::null_mut();
        unsafe {
            pycc_gc_write_barrier(&mut slot, obj);
        }
        // The remembered set keeps the object alive through a cycle even
        // without a registered root.
        pycc_gc_collect();
        assert_eq!(pycc_gc_stats().num_freed, 0);
        // Next cycle: the set was drained, nothing re-records it.
        pycc_gc_collect();
        assert_eq!(pycc_gc_stats().num_freed, 1);
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_satb_pre_barrier_records_old_value() {
        pycc_gc_reset_for_tests();
        pycc_gc_set_barrier_mode(1);
        let old = alloc_raw(16, TypeTag::Bytes);
        let mut slot: *mut u8 = old;
        unsafe {
            // Overwrite: the pre-barrier snapshots the old value.
            pycc_gc_pre_barrier(&mut slot);
            slot = ptr::null_mut();
            pycc_gc_write_barrier(&mut slot, slot);
        }
        pycc_gc_collect();
        assert_eq!(pycc_gc_stats().num_freed, 0, "snapshot keeps old alive");
        pycc_gc_collect();
        assert_eq!(pycc_gc_stats().num_freed, 1);
        // Null slot is a no-op.
        unsafe { pycc_gc_pre_barrier(ptr::null_mut()) };
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_mark_recurses_into_list_items() {
        pycc_gc_reset_for_tests();
        let item = alloc_raw(16, TypeTag::Bytes);
        // Hand-build a one-element list payload: {len, cap, items[1]}.
        let word = std::mem::size_of::<usize>();
        let list = alloc_raw(2 * word + word, TypeTag::List);
        unsafe {
            *(list as *mut usize) = 1; // len
            *(list as *mut usize).add(1) = 1; // cap
            *(list.add(2 * word) as *mut *mut u8) = item;
        }
        let mut slot: *mut u8 = list;
        unsafe { pycc_gc_register_root(&mut slot) };
        pycc_gc_collect();
        assert_eq!(pycc_gc_stats().num_freed, 0, "list item is reachable");
        unsafe { pycc_gc_unregister_root(&mut slot) };
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_adaptive_controller_raises_budgets_under_pressure() {
        pycc_gc_reset_for_tests();
        pycc_gc_set_threshold(64);
        // A rooted allocation keeps bytes_live far above the threshold, so
        // pressure stays over the high-water mark across the cycle.
        let mut slot: *mut u8 = alloc_raw(4096, TypeTag::Bytes);
        // SAFETY: slot outlives the collections below.
        unsafe { pycc_gc_register_root(&mut slot) };
        pycc_gc_collect();
        pycc_gc_collect();
        assert!(
            SLICE_US.load(Ordering::Relaxed) > SLICE_DEFAULT_US,
            "slice budget grows under pressure"
        );
        assert!(
            SWEEP_BATCH.load(Ordering::Relaxed) > BATCH_DEFAULT,
            "sweep batch grows under pressure"
        );
        unsafe { pycc_gc_unregister_root(&mut slot) };
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_freed_block_reused_for_same_size() {
        pycc_gc_reset_for_tests();
        let garbage = alloc_raw(24, TypeTag::Bytes);
        let addr = garbage as usize;
        pycc_gc_collect();
        assert_eq!(pycc_gc_stats().num_freed, 1);
        let fresh = alloc_raw(24, TypeTag::Bytes);
        assert_eq!(fresh as usize, addr, "same-size block comes from the free list");
        // Reused payloads are zeroed.
        // SAFETY: fresh is a live 24-byte payload.
        unsafe {
            assert!(std::slice::from_raw_parts(fresh, 24).iter().all(|&b| b == 0));
        }
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_conservative_stack_scan_keeps_local_alive() {
        pycc_gc_reset_for_tests();
        pycc_gc_set_conservative(true);
        let holder = [alloc_raw(16, TypeTag::Bytes)];
        std::hint::black_box(&holder);
        pycc_gc_collect();
        assert_eq!(
            pycc_gc_stats().num_freed,
            0,
            "stack-referenced object survives"
        );
        assert_eq!(object_tag(holder[0]), Some(TypeTag::Bytes));
        pycc_gc_reset_for_tests();
    }

    #[test]
    #[serial]
    fn test_background_collection_runs() {
        pycc_gc_reset_for_tests();
        pycc_gc_set_background(true);
        let mut slot: *mut u8 = alloc_raw(16, TypeTag::Bytes);
        unsafe { pycc_gc_register_root(&mut slot) };
        for _ in 0..32 {
            let _ = alloc_raw(64, TypeTag::Bytes);
        }
        pycc_gc_collect();
        // Wait for the cycle to finish; the rooted object survives.
        for _ in 0..200 {
            if pycc_gc_stats().num_collections > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(pycc_gc_stats().num_collections > 0, "background cycle ran");
        assert_eq!(object_tag(slot), Some(TypeTag::Bytes));
        unsafe { pycc_gc_unregister_root(&mut slot) };
        pycc_gc_reset_for_tests();
    }
}
