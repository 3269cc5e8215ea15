//! The device-control RPC boundary consumed from the driver.
//!
//! Opening/closing the device, reporting MAC/MTU info, toggling
//! promiscuous mode, and querying link status all happen on the other
//! side of this trait; `ethlink-sim::MockDevice` is the concrete
//! implementation used by tests.

use std::sync::Arc;

use thiserror::Error;

use crate::arena::RegionHandle;
use crate::fifo::FifoEndpoint;

/// Static information about the underlying device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device MAC address.
    pub mac: [u8; 6],
    /// Device MTU in bytes.
    pub mtu: u32,
    /// Driver-defined feature bitmask.
    pub features: u32,
}

/// TX/RX FIFO handles and their reported depths, as returned by
/// `GetFifos`.
pub struct Fifos {
    /// TX FIFO endpoint.
    pub tx: Arc<dyn FifoEndpoint>,
    /// RX FIFO endpoint.
    pub rx: Arc<dyn FifoEndpoint>,
}

/// Link state as reported by `GetStatus`'s `ONLINE` bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Link is down.
    Down,
    /// Link is up.
    Up,
}

impl LinkStatus {
    /// Decode `GetStatus`'s raw flags into a `LinkStatus`.
    pub fn from_raw(status: u32) -> LinkStatus {
        if status & DEVICE_STATUS_ONLINE != 0 {
            LinkStatus::Up
        } else {
            LinkStatus::Down
        }
    }
}

/// Errors returned by the device-control RPC surface.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The driver returned a non-OK status for the named call.
    #[error("device call {call} failed: {status}")]
    Status {
        /// Name of the failing call, for diagnostics.
        call: &'static str,
        /// Driver-reported status code.
        status: i32,
    },

    /// The underlying RPC transport failed.
    #[error("device rpc transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Device-control surface consumed from the driver.
pub trait EthernetDevice: Send + Sync {
    /// Set this client's name on the device, for diagnostics.
    fn set_client_name(&self, name: &str) -> Result<(), DeviceError>;

    /// Fetch static device info (MAC, MTU, features).
    fn get_info(&self) -> Result<DeviceInfo, DeviceError>;

    /// Fetch the TX/RX FIFO handles and their depths.
    fn get_fifos(&self) -> Result<(Fifos, FifoConfig), DeviceError>;

    /// Hand the driver a duplicate of the arena's shared memory region.
    fn set_io_buffer(&self, region: RegionHandle) -> Result<(), DeviceError>;

    /// Start the device (enables the interface).
    fn start(&self) -> Result<(), DeviceError>;

    /// Stop the device.
    fn stop(&self) -> Result<(), DeviceError>;

    /// Toggle promiscuous mode.
    fn set_promiscuous_mode(&self, enabled: bool) -> Result<(), DeviceError>;

    /// Ask the driver to loop transmitted packets back to this client.
    fn listen_start(&self) -> Result<(), DeviceError>;

    /// Query the device's raw status flags; bit `ONLINE` indicates link.
    /// Callers decode the result with [`LinkStatus::from_raw`].
    fn get_status(&self) -> Result<u32, DeviceError>;
}

/// Bit within `GetStatus`'s raw flags indicating link is online.
pub const DEVICE_STATUS_ONLINE: u32 = 1 << 0;

/// A fixed-depth FIFO configuration pair, as reported by `GetFifos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoConfig {
    /// TX FIFO depth.
    pub tx_depth: u32,
    /// RX FIFO depth.
    pub rx_depth: u32,
}
