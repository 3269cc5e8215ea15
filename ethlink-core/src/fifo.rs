//! The FIFO endpoint boundary: a kernel-provided, fixed-depth queue of
//! descriptors, abstracted as a trait so the [`crate::Client`] state
//! machine is backend-agnostic. `ethlink-sim` provides the concrete
//! in-process implementation used by tests.

use std::time::Instant;

use bitflags::bitflags;
use thiserror::Error;

use crate::descriptor::Descriptor;

bitflags! {
    /// Signals a FIFO handle can assert, observed via [`FifoEndpoint::wait`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Signal: u32 {
        /// The FIFO has records available to read.
        const READABLE = 0b0001;
        /// The FIFO has room to accept a write.
        const WRITABLE = 0b0010;
        /// The peer end of the FIFO has closed.
        const PEER_CLOSED = 0b0100;
        /// Vendor signal: link status changed (RX FIFO handle only).
        const LINK_STATUS = 0b1000;
    }
}

/// Error surfaced by a [`FifoEndpoint`] operation.
///
/// `WouldBlock` and peer-closed are not modeled as variants of this type:
/// they are distinct, expected outcomes represented by
/// [`WriteOutcome`]/[`ReadOutcome`] and [`FifoError::PeerClosed`]
/// respectively, keeping backpressure distinct from error.
#[derive(Debug, Error)]
pub enum FifoError {
    /// The peer end of the FIFO has closed; this is terminal.
    #[error("fifo peer closed")]
    PeerClosed,

    /// A `wait` deadline elapsed before any requested signal asserted.
    #[error("fifo wait timed out")]
    Timeout,

    /// A transient driver/transport error, distinct from backpressure.
    #[error("fifo error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a [`FifoEndpoint::write`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// `accepted` records (`accepted <= batch.len()`, `accepted > 0`) were
    /// enqueued.
    Accepted(usize),
    /// No records fit; the caller retains the whole batch.
    WouldBlock,
}

/// Outcome of a [`FifoEndpoint::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `read` records (`read <= max`, `read > 0`) were dequeued.
    Read(usize),
    /// No records were available.
    WouldBlock,
}

/// A kernel-mediated, fixed-depth, bidirectional queue of fixed-size
/// [`Descriptor`] records.
///
/// Both FIFOs (TX and RX) are bidirectional between user and driver: the
/// user writes posted descriptors, reads completion
/// descriptors.
pub trait FifoEndpoint: Send + Sync {
    /// Enqueue as many records from `batch` as fit.
    fn write(&self, batch: &[Descriptor]) -> Result<WriteOutcome, FifoError>;

    /// Dequeue up to `dest.len()` records into `dest`.
    fn read(&self, dest: &mut [Descriptor]) -> Result<ReadOutcome, FifoError>;

    /// Block the calling thread until one of the signals in `mask`
    /// asserts, or `deadline` passes. `None` deadline waits indefinitely.
    fn wait(&self, mask: Signal, deadline: Option<Instant>) -> Result<Signal, FifoError>;

    /// The fixed depth of this FIFO, as reported by the driver.
    fn depth(&self) -> u32;

    /// Close this end of the FIFO. Idempotent; wakes any thread blocked in
    /// `wait` with `PEER_CLOSED`.
    fn close(&self);
}
