//! The simulated driver: a background thread standing in for the kernel
//! side of the FIFO protocol. It acks every posted TX descriptor
//! immediately, optionally loops transmitted frames back onto already
//! client-posted RX slots when loopback is enabled (`ListenTx`), and
//! watches the device's link-status flag to assert `LINK_STATUS` on
//! change.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ethlink_core::{Descriptor, COOKIE_MAGIC};

use crate::mock_device::MockDeviceShared;
use crate::ring_fifo::DriverSide;

const POLL_INTERVAL_MIN: Duration = Duration::from_millis(1);
const POLL_INTERVAL_MAX_JITTER_MICROS: u64 = 2_000;

/// Handle to a running simulated-driver thread. Dropping does not stop
/// it; call [`Driver::stop`] explicitly (done automatically by
/// [`crate::MockDevice::drop`]).
pub struct Driver {
    stop: Arc<AtomicBool>,
    loopback: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Driver {
    /// Spawn the background thread servicing `tx`/`rx`, watching
    /// `device_shared`'s link flag.
    pub fn spawn(tx: DriverSide, rx: DriverSide, device_shared: Arc<MockDeviceShared>) -> Driver {
        let stop = Arc::new(AtomicBool::new(false));
        let loopback = Arc::new(AtomicBool::new(false));

        let stop_for_thread = stop.clone();
        let loopback_for_thread = loopback.clone();
        let handle = std::thread::spawn(move || {
            run(tx, rx, device_shared, stop_for_thread, loopback_for_thread);
        });

        Driver {
            stop,
            loopback,
            handle: Some(handle),
        }
    }

    /// Start looping every posted TX descriptor back onto a client-posted
    /// RX slot, best-effort (dropped if no RX slot is currently posted).
    pub fn enable_loopback(&self) {
        self.loopback.store(true, Ordering::SeqCst);
    }

    /// Signal the background thread to exit and join it.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    tx: DriverSide,
    rx: DriverSide,
    device_shared: Arc<MockDeviceShared>,
    stop: Arc<AtomicBool>,
    loopback: Arc<AtomicBool>,
) {
    let mut last_link_up = device_shared.link_up();

    while !stop.load(Ordering::SeqCst) {
        if tx.is_closed() || rx.is_closed() {
            break;
        }

        let posted = tx.drain_posted(usize::MAX);
        if !posted.is_empty() {
            if loopback.load(Ordering::SeqCst) {
                loop_back(&rx, &posted);
            }
            tx.complete(posted);
        }

        let now_up = device_shared.link_up();
        if now_up != last_link_up {
            last_link_up = now_up;
            rx.signal_link_status();
        }

        std::thread::sleep(poll_interval());
    }
}

/// A driver that serviced the FIFOs at a perfectly fixed cadence would
/// make timing-sensitive bugs (missed completions, reordered wakeups)
/// harder to catch; jitter the poll interval instead.
fn poll_interval() -> Duration {
    let jitter = rand::random_range(0..POLL_INTERVAL_MAX_JITTER_MICROS);
    POLL_INTERVAL_MIN + Duration::from_micros(jitter)
}

/// Pair each looped-back TX descriptor with a client-already-posted RX
/// slot, carrying over the sender's length. Frames for which no RX slot
/// is currently posted are dropped; this models a driver with no spare
/// receive buffers rather than a protocol violation.
fn loop_back(rx: &DriverSide, sent: &[Descriptor]) {
    let rx_slots = rx.drain_posted(sent.len());
    let completions = sent.iter().zip(rx_slots.iter()).map(|(sent, rx_slot)| {
        debug_assert_eq!(sent.cookie >> 32, COOKIE_MAGIC);
        Descriptor {
            offset: rx_slot.offset,
            length: sent.length,
            reserved: 0,
            cookie: rx_slot.cookie,
        }
    });
    rx.complete(completions);
}
