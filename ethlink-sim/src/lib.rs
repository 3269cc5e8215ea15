//! In-process simulator for `ethlink-core`'s driver boundary.
//!
//! [`MockDevice`] implements [`ethlink_core::EthernetDevice`] over a pair
//! of [`RingFifo`]s serviced by a background thread ([`driver::Driver`]),
//! so `ethlink-core::Client` can be exercised without a real kernel
//! driver. This crate exists for tests; it is a dev-dependency of
//! `ethlink-core` and depends on `ethlink-core` itself.

mod driver;
mod mock_device;
mod ring_fifo;

pub use mock_device::{MockDevice, MockDeviceShared, SIM_FIFO_DEPTH};
pub use ring_fifo::{DriverSide, RingFifo};
