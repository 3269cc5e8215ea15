//! Zero-copy ethernet client core.
//!
//! This crate implements the two subsystems that make up a userspace
//! ethernet client talking to a kernel-mediated driver over a pair of
//! fixed-depth descriptor FIFOs backed by a shared memory region:
//!
//! - [`arena`]: a fixed-capacity, partitioned byte region with a
//!   multi-tenant slot allocator ([`Arena`], [`Buffer`]).
//! - [`client`]: the send/receive half-loops that keep the FIFOs supplied
//!   and reclaim completed descriptors ([`Client`]).
//!
//! The descriptor wire format and the FIFO/device boundaries a real driver
//! would implement live in [`descriptor`], [`fifo`], and [`device`]. This
//! crate does not ship a driver; see `ethlink-sim` for an in-process one.

mod arena;
mod client;
mod descriptor;
mod device;
mod error;
mod fifo;
mod metrics;

pub use arena::{Arena, Buffer, ClientId, RegionHandle, COOKIE_MAGIC, SLOT_COUNT, SLOT_SIZE};
pub use client::{Client, RecvOutcome, State, StateCallback};
pub use descriptor::Descriptor;
pub use device::{
    DeviceError, DeviceInfo, DEVICE_STATUS_ONLINE, EthernetDevice, Fifos, FifoConfig, LinkStatus,
};
pub use error::ClientError;
pub use fifo::{FifoEndpoint, FifoError, ReadOutcome, Signal, WriteOutcome};
