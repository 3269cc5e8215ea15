//! Error types surfaced by the [`crate::Client`] data-path and lifecycle
//! operations. Fatal arena invariant violations are not represented here:
//! they are programmer/driver bugs and abort the process via `panic!`,
//! not a recoverable `Result`.

use thiserror::Error;

use crate::device::DeviceError;
use crate::fifo::FifoError;

/// Errors returned by [`crate::Client`] operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The peer (driver) has closed the connection; terminal.
    #[error("client peer closed")]
    PeerClosed,

    /// A device-control RPC call failed.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// A FIFO transport error other than would-block/peer-closed.
    #[error("fifo error: {0}")]
    Fifo(#[source] FifoError),

    /// The client has already been closed.
    #[error("client is closed")]
    Closed,
}

impl From<FifoError> for ClientError {
    fn from(err: FifoError) -> Self {
        match err {
            FifoError::PeerClosed => ClientError::PeerClosed,
            other => ClientError::Fifo(other),
        }
    }
}
