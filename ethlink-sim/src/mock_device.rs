//! An in-process [`EthernetDevice`] backed by [`RingFifo`] pairs, with a
//! controllable link-status flag and call-log for assertions in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ethlink_core::{
    DeviceError, DeviceInfo, DEVICE_STATUS_ONLINE, EthernetDevice, Fifos, FifoConfig,
    FifoEndpoint, RegionHandle,
};
use parking_lot::Mutex;

use crate::driver::Driver;
use crate::ring_fifo::RingFifo;

/// Fixed depth used by [`MockDevice`]'s FIFO pairs; matches the arena's
/// slot count so a client can never be arena-starved by FIFO depth alone.
pub const SIM_FIFO_DEPTH: u32 = 256;

/// State shared between [`MockDevice`] and its background [`Driver`]
/// thread.
pub struct MockDeviceShared {
    link_up: AtomicBool,
    promiscuous: AtomicBool,
    started: AtomicBool,
    io_buffer: Mutex<Option<RegionHandle>>,
}

impl MockDeviceShared {
    /// Current simulated link state, read by the driver thread each poll.
    pub(crate) fn link_up(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }
}

/// A simulated ethernet device: a fixed MAC/MTU, a pair of [`RingFifo`]s,
/// and a background [`Driver`] thread that acks sends and loops back
/// frames on request.
pub struct MockDevice {
    info: DeviceInfo,
    shared: Arc<MockDeviceShared>,
    driver: Mutex<Option<Driver>>,
    tx: Arc<RingFifo>,
    rx: Arc<RingFifo>,
}

impl MockDevice {
    /// Build a device with a fixed MAC/MTU and depth-256 FIFOs, and start
    /// its background driver thread.
    pub fn new() -> Arc<MockDevice> {
        Self::with_depths(SIM_FIFO_DEPTH, SIM_FIFO_DEPTH)
    }

    /// Build a device with the given TX/RX FIFO depths, for tests that
    /// need to exercise depth-driven backpressure directly.
    pub fn with_depths(tx_depth: u32, rx_depth: u32) -> Arc<MockDevice> {
        let (tx, tx_driver) = RingFifo::new_pair(tx_depth);
        let (rx, rx_driver) = RingFifo::new_pair(rx_depth);

        let shared = Arc::new(MockDeviceShared {
            link_up: AtomicBool::new(true),
            promiscuous: AtomicBool::new(false),
            started: AtomicBool::new(false),
            io_buffer: Mutex::new(None),
        });

        let driver = Driver::spawn(tx_driver, rx_driver, shared.clone());

        Arc::new(MockDevice {
            info: DeviceInfo {
                mac: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
                mtu: 1500,
                features: 0,
            },
            shared,
            driver: Mutex::new(Some(driver)),
            tx,
            rx,
        })
    }

    /// Close the TX FIFO from the driver side, as if the driver crashed
    /// or was unplugged. The client's next `send`/`wait_send` observes
    /// `PEER_CLOSED`.
    pub fn close_tx(&self) {
        self.tx.close();
    }

    /// Close the RX FIFO from the driver side.
    pub fn close_rx(&self) {
        self.rx.close();
    }

    /// Flip the simulated link state. The background driver thread
    /// notices the change and asserts `LINK_STATUS` on the RX FIFO.
    pub fn set_link_up(&self, up: bool) {
        self.shared.link_up.store(up, Ordering::SeqCst);
    }

    /// Whether `set_promiscuous_mode(true)` is currently in effect.
    pub fn promiscuous(&self) -> bool {
        self.shared.promiscuous.load(Ordering::SeqCst)
    }

    /// Stop the background driver thread. Called automatically on drop.
    pub fn shutdown(&self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.stop();
        }
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EthernetDevice for MockDevice {
    fn set_client_name(&self, name: &str) -> Result<(), DeviceError> {
        tracing::debug!(name, "mock device: set_client_name");
        Ok(())
    }

    fn get_info(&self) -> Result<DeviceInfo, DeviceError> {
        Ok(self.info)
    }

    fn get_fifos(&self) -> Result<(Fifos, FifoConfig), DeviceError> {
        Ok((
            Fifos {
                tx: self.tx.clone(),
                rx: self.rx.clone(),
            },
            FifoConfig {
                tx_depth: self.tx.depth(),
                rx_depth: self.rx.depth(),
            },
        ))
    }

    fn set_io_buffer(&self, region: RegionHandle) -> Result<(), DeviceError> {
        *self.shared.io_buffer.lock() = Some(region);
        Ok(())
    }

    fn start(&self) -> Result<(), DeviceError> {
        self.shared.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.shared.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_promiscuous_mode(&self, enabled: bool) -> Result<(), DeviceError> {
        self.shared.promiscuous.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn listen_start(&self) -> Result<(), DeviceError> {
        if let Some(driver) = self.driver.lock().as_ref() {
            driver.enable_loopback();
        }
        Ok(())
    }

    fn get_status(&self) -> Result<u32, DeviceError> {
        Ok(if self.shared.link_up.load(Ordering::SeqCst) {
            DEVICE_STATUS_ONLINE
        } else {
            0
        })
    }
}
