//! Real trackpads through the private MultitouchSupport framework.
//!
//! The framework delivers contact frames on its own threads through a plain C
//! callback with no user-data pointer, so the callback finds its sink through
//! a process-wide [`AtomicPtr`]. Only one [`MultitouchSource`] may run at a
//! time.
//!
//! # Permissions
//!
//! Reading contacts needs no permission; posting the resulting actions needs
//! Accessibility access.

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use core_foundation::array::{CFArrayGetCount, CFArrayGetValueAtIndex, CFArrayRef};
use core_foundation::base::{CFRelease, CFTypeRef};
use tap_frame::{capture_len, detect_stride, PROBE_WINDOW};
use tracing::{debug, info, trace, warn};

use crate::source::{FrameSink, FrameSource, RawFrame};

/// Pause between stopping and restarting devices.
pub const RESTART_DELAY: Duration = Duration::from_millis(500);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

type MTDeviceRef = *mut c_void;

type MTContactCallback = extern "C" fn(
    device:      MTDeviceRef,
    touches:     *const u8,
    num_touches: i32,
    timestamp:   f64,
    frame:       i32,
);

#[link(name = "MultitouchSupport", kind = "framework")]
extern "C" {
    fn MTDeviceCreateList() -> CFArrayRef;
    fn MTRegisterContactFrameCallback(device: MTDeviceRef, callback: MTContactCallback);
    fn MTUnregisterContactFrameCallback(device: MTDeviceRef, callback: MTContactCallback);
    fn MTDeviceStart(device: MTDeviceRef, mode: i32) -> i32;
    fn MTDeviceStop(device: MTDeviceRef);
}

// ════════════════════════════════════════════════════════════════════════════
// Callback context
// ════════════════════════════════════════════════════════════════════════════

/// Devices of the current enumeration and the record stride learned for
/// each. Ids are positions in the enumeration.
#[derive(Default)]
struct DeviceTable {
    handles: Vec<usize>,
    strides: HashMap<usize, usize>,
}

struct CallbackContext {
    sink:    FrameSink,
    devices: Mutex<DeviceTable>,
    /// Set once the sink rejects a frame.
    closed:  AtomicBool,
}

impl CallbackContext {
    fn devices(&self) -> MutexGuard<'_, DeviceTable> {
        self.devices.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

static CONTEXT_PTR: AtomicPtr<CallbackContext> = AtomicPtr::new(ptr::null_mut());

/// Callbacks currently holding a context reference.
static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

struct InFlight;

impl InFlight {
    fn enter() -> Self {
        IN_FLIGHT.fetch_add(1, Ordering::SeqCst);
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) { IN_FLIGHT.fetch_sub(1, Ordering::SeqCst); }
}

/// Unpublish the context and free it once no callback still holds it.
fn retire_context(ctx_ptr: *mut CallbackContext) {
    CONTEXT_PTR.store(ptr::null_mut(), Ordering::SeqCst);
    while IN_FLIGHT.load(Ordering::SeqCst) != 0 {
        thread::yield_now();
    }
    // Safety: unpublished, and every callback that loaded it has returned.
    drop(unsafe { Box::from_raw(ctx_ptr) });
}

extern "C" fn contact_callback(
    device:      MTDeviceRef,
    touches:     *const u8,
    num_touches: i32,
    timestamp:   f64,
    _frame:      i32,
) {
    let _guard = InFlight::enter();
    let ctx_ptr = CONTEXT_PTR.load(Ordering::SeqCst);
    if ctx_ptr.is_null() { return; }
    // Safety: `retire_context` waits for `IN_FLIGHT` to drain before freeing.
    let ctx = unsafe { &*ctx_ptr };
    if ctx.closed.load(Ordering::Relaxed) { return; }

    let finger_count = num_touches.max(0) as usize;

    let (id, data) = {
        let mut table = ctx.devices();
        // Late frames from a device of a previous enumeration.
        let Some(id) = table.handles.iter().position(|&d| d == device as usize) else { return; };

        let mut stride = table.strides.get(&id).copied();
        if stride.is_none() && finger_count >= 2 && !touches.is_null() {
            // Safety: the span stride detection reads from multi-finger
            // frames. Taken only until a stride is learned for the device.
            let window = unsafe { std::slice::from_raw_parts(touches, PROBE_WINDOW) };
            stride = detect_stride(window, finger_count);
            if let Some(s) = stride {
                debug!(device = id, stride = s, "capture stride learned");
                table.strides.insert(id, s);
            }
        }

        let len = if touches.is_null() { 0 } else { capture_len(finger_count, stride) };
        // Safety: `len` is `finger_count` records at the detected stride, or
        // the probe window above.
        let data = if len == 0 { Vec::new() } else { unsafe { std::slice::from_raw_parts(touches, len) }.to_vec() };
        (id, data)
    };

    trace!(device = id, finger_count, timestamp, "contact frame");

    let sent = ctx.sink.send(RawFrame { device: id, data, finger_count, timestamp });
    if !sent {
        ctx.closed.store(true, Ordering::Relaxed);
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Device list
// ════════════════════════════════════════════════════════════════════════════

struct DeviceList {
    array:   CFArrayRef,
    devices: Vec<MTDeviceRef>,
}

impl DeviceList {
    fn enumerate() -> Option<Self> {
        let array = unsafe { MTDeviceCreateList() };
        if array.is_null() { return None; }
        let count = unsafe { CFArrayGetCount(array) };
        let devices = (0..count)
            .map(|i| unsafe { CFArrayGetValueAtIndex(array, i) } as MTDeviceRef)
            .filter(|d| !d.is_null())
            .collect();
        Some(DeviceList { array, devices })
    }

    /// Enumerate, logging when nothing is there. An empty list is still
    /// returned so a later restart can look again.
    fn enumerate_logged() -> Option<Self> {
        let list = Self::enumerate();
        match &list {
            None => warn!("multitouch device list unavailable; a restart looks again"),
            Some(l) if l.devices.is_empty() => warn!("no multitouch devices found; a restart looks again"),
            Some(l) => debug!(count = l.devices.len(), "multitouch devices enumerated"),
        }
        list
    }

    fn devices(list: &Option<Self>) -> &[MTDeviceRef] {
        list.as_ref().map_or(&[], |l| &l.devices)
    }
}

impl Drop for DeviceList {
    fn drop(&mut self) {
        unsafe { CFRelease(self.array as CFTypeRef) }
    }
}

/// Register and start every device. Failures are logged and skipped.
fn start_all(devices: &[MTDeviceRef]) -> Vec<MTDeviceRef> {
    let mut started = Vec::new();
    for (i, &d) in devices.iter().enumerate() {
        unsafe { MTRegisterContactFrameCallback(d, contact_callback) };
        if unsafe { MTDeviceStart(d, 0) } == 0 {
            info!(device = i, "device started");
            started.push(d);
        } else {
            warn!(device = i, "device failed to start");
            unsafe { MTUnregisterContactFrameCallback(d, contact_callback) };
        }
    }
    info!("monitoring {}/{} device(s)", started.len(), devices.len());
    if started.is_empty() {
        warn!("no multitouch device is running; taps will not be detected");
    }
    started
}

fn stop_all(started: &[MTDeviceRef]) {
    for &d in started {
        unsafe {
            MTDeviceStop(d);
            MTUnregisterContactFrameCallback(d, contact_callback);
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MultitouchSource
// ════════════════════════════════════════════════════════════════════════════

/// Flags that steer a running [`MultitouchSource`] from other threads.
#[derive(Clone, Debug, Default)]
pub struct MultitouchControl {
    stop:    Arc<AtomicBool>,
    restart: Arc<AtomicBool>,
}

impl MultitouchControl {
    /// Stop all devices and end the source.
    pub fn stop(&self) { self.stop.store(true, Ordering::SeqCst); }

    /// Stop all devices, wait [`RESTART_DELAY`], enumerate again and start
    /// whatever is there.
    pub fn restart(&self) { self.restart.store(true, Ordering::SeqCst); }
}

/// Frame source over all built-in and external trackpads.
///
/// Finding no devices is not fatal: the source keeps running so a restart
/// can pick up a trackpad connected later.
#[derive(Default)]
pub struct MultitouchSource {
    control: MultitouchControl,
}

impl MultitouchSource {
    pub fn new() -> Self { Self::default() }

    pub fn control(&self) -> MultitouchControl { self.control.clone() }
}

fn device_table(list: &Option<DeviceList>) -> DeviceTable {
    DeviceTable {
        handles: DeviceList::devices(list).iter().map(|&d| d as usize).collect(),
        strides: HashMap::new(),
    }
}

impl FrameSource for MultitouchSource {
    fn run(self: Box<Self>, sink: FrameSink) {
        let mut list = DeviceList::enumerate_logged();

        let ctx = Box::new(CallbackContext {
            sink,
            devices: Mutex::new(device_table(&list)),
            closed:  AtomicBool::new(false),
        });
        let ctx_ptr = Box::into_raw(ctx);
        if CONTEXT_PTR
            .compare_exchange(ptr::null_mut(), ctx_ptr, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("another multitouch source is already running");
            // Safety: never published, still uniquely owned.
            drop(unsafe { Box::from_raw(ctx_ptr) });
            return;
        }
        // Safety: published above; freed only by `retire_context` below.
        let ctx = unsafe { &*ctx_ptr };

        let mut started = start_all(DeviceList::devices(&list));
        loop {
            thread::sleep(POLL_INTERVAL);
            if ctx.closed.load(Ordering::Relaxed) || self.control.stop.load(Ordering::SeqCst) {
                break;
            }

            if self.control.restart.swap(false, Ordering::SeqCst) {
                info!("restarting touch detection");
                stop_all(&started);
                started.clear();
                thread::sleep(RESTART_DELAY);

                // Released only once its devices are stopped.
                list = DeviceList::enumerate_logged();
                *ctx.devices() = device_table(&list);
                started = start_all(DeviceList::devices(&list));
            }
        }

        stop_all(&started);
        retire_context(ctx_ptr);
        drop(list);
        info!("touch detection stopped");
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    use tap_frame::{FrameEncoder, Point};

    use crate::engine::EngineInput;

    fn row(n: usize) -> Vec<Point> {
        (0..n).map(|i| Point::new(0.3 + 0.1 * i as f64, 0.5)).collect()
    }

    fn frames(rx: &mpsc::Receiver<EngineInput>) -> Vec<RawFrame> {
        rx.try_iter().filter_map(|i| match i {
            EngineInput::Frame(f) => Some(f),
            _ => None,
        }).collect()
    }

    // One test: the callback context is process-wide.
    #[test]
    fn callback_captures_by_learned_stride_and_retires_cleanly() {
        let (tx, rx) = mpsc::channel();
        let device = 0x1000usize;
        let ctx = Box::into_raw(Box::new(CallbackContext {
            sink:    FrameSink::new(tx),
            devices: Mutex::new(DeviceTable { handles: vec![device], strides: HashMap::new() }),
            closed:  AtomicBool::new(false),
        }));
        CONTEXT_PTR.store(ctx, Ordering::SeqCst);
        let dev = device as MTDeviceRef;

        // ── capture length ────────────────────────────────────────────────
        let wide = FrameEncoder::new(128).encode(&row(4));
        contact_callback(dev, wide.as_ptr(), 4, 1.0, 0);
        let got = frames(&rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data.len(), 4 * 128);
        assert_eq!(got[0].device, 0);

        let one = FrameEncoder::new(128).encode(&row(1));
        contact_callback(dev, one.as_ptr(), 1, 1.1, 0);
        assert_eq!(frames(&rx)[0].data.len(), 128);

        contact_callback(dev, ptr::null(), 0, 1.2, 0);
        assert!(frames(&rx)[0].data.is_empty());

        // ── unknown devices ───────────────────────────────────────────────
        contact_callback(0x2000usize as MTDeviceRef, wide.as_ptr(), 4, 1.3, 0);
        assert!(frames(&rx).is_empty());

        // ── re-enumeration ────────────────────────────────────────────────
        *unsafe { &*ctx }.devices() = device_table(&None);
        contact_callback(dev, wide.as_ptr(), 4, 1.4, 0);
        assert!(frames(&rx).is_empty());

        // ── retirement waits for callbacks in flight ──────────────────────
        let (entered_tx, entered_rx) = mpsc::channel();
        let holder = thread::spawn(move || {
            let _guard = InFlight::enter();
            entered_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
        });
        entered_rx.recv().unwrap();
        let began = Instant::now();
        retire_context(ctx);
        assert!(began.elapsed() >= Duration::from_millis(20));
        assert!(CONTEXT_PTR.load(Ordering::SeqCst).is_null());
        holder.join().unwrap();

        contact_callback(dev, wide.as_ptr(), 4, 1.5, 0);
        assert!(frames(&rx).is_empty());
    }
}
