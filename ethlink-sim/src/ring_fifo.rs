//! An in-process, bounded, bidirectional FIFO, standing in for a kernel
//! FIFO object. One [`RingFifo`] is the end the [`crate::MockDevice`]'s
//! user hands to a `Client`; its paired [`DriverSide`] is the end the
//! simulated driver thread drains and refills.

use std::collections::VecDeque;
use std::time::Instant;

use ethlink_core::{Descriptor, FifoEndpoint, FifoError, ReadOutcome, Signal, WriteOutcome};
use parking_lot::{Condvar, Mutex};

struct State {
    /// Descriptors written by the user side, awaiting drain by the driver.
    posted: VecDeque<Descriptor>,
    /// Descriptors written by the driver side, awaiting drain by the user.
    completed: VecDeque<Descriptor>,
    depth: usize,
    closed: bool,
    link_status_pending: bool,
}

/// Shared, paired FIFO state. Construct with [`RingFifo::new_pair`].
pub struct RingFifo {
    state: Mutex<State>,
    changed: Condvar,
}

impl RingFifo {
    /// Build a connected user/driver pair with the given fixed depth.
    pub fn new_pair(depth: u32) -> (std::sync::Arc<RingFifo>, DriverSide) {
        let fifo = std::sync::Arc::new(RingFifo {
            state: Mutex::new(State {
                posted: VecDeque::with_capacity(depth as usize),
                completed: VecDeque::with_capacity(depth as usize),
                depth: depth as usize,
                closed: false,
                link_status_pending: false,
            }),
            changed: Condvar::new(),
        });
        let driver = DriverSide {
            fifo: fifo.clone(),
        };
        (fifo, driver)
    }

    /// Wake up anything blocked in `wait`, unconditionally. Used by the
    /// driver thread after it mutates shared state.
    fn notify(&self) {
        self.changed.notify_all();
    }
}

impl FifoEndpoint for RingFifo {
    fn write(&self, batch: &[Descriptor]) -> Result<WriteOutcome, FifoError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(FifoError::PeerClosed);
        }
        let room = state.depth.saturating_sub(state.posted.len());
        if room == 0 {
            return Ok(WriteOutcome::WouldBlock);
        }
        let n = room.min(batch.len());
        state.posted.extend(batch[..n].iter().copied());
        drop(state);
        self.notify();
        Ok(WriteOutcome::Accepted(n))
    }

    fn read(&self, dest: &mut [Descriptor]) -> Result<ReadOutcome, FifoError> {
        let mut state = self.state.lock();
        if state.completed.is_empty() {
            if state.closed {
                return Err(FifoError::PeerClosed);
            }
            return Ok(ReadOutcome::WouldBlock);
        }
        let n = dest.len().min(state.completed.len());
        for slot in dest.iter_mut().take(n) {
            *slot = state.completed.pop_front().expect("checked non-empty above");
        }
        Ok(ReadOutcome::Read(n))
    }

    fn wait(&self, mask: Signal, deadline: Option<Instant>) -> Result<Signal, FifoError> {
        let mut state = self.state.lock();
        loop {
            let mut asserted = Signal::empty();
            if !state.completed.is_empty() {
                asserted |= Signal::READABLE;
            }
            if state.posted.len() < state.depth {
                asserted |= Signal::WRITABLE;
            }
            if state.closed {
                asserted |= Signal::PEER_CLOSED;
            }
            if state.link_status_pending {
                asserted |= Signal::LINK_STATUS;
            }

            let hit = asserted & mask;
            if !hit.is_empty() {
                if hit.contains(Signal::LINK_STATUS) {
                    state.link_status_pending = false;
                }
                return Ok(hit);
            }

            let timed_out = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        true
                    } else {
                        self.changed.wait_for(&mut state, d - now).timed_out()
                    }
                }
                None => {
                    self.changed.wait(&mut state);
                    false
                }
            };
            if timed_out {
                return Err(FifoError::Timeout);
            }
        }
    }

    fn depth(&self) -> u32 {
        self.state.lock().depth as u32
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.notify();
    }
}

/// The driver-facing end of a [`RingFifo`] pair: the inverse of
/// [`FifoEndpoint`] from the user's perspective. The simulated driver
/// thread in [`crate::driver`] drains `posted` and fills `completed`.
#[derive(Clone)]
pub struct DriverSide {
    fifo: std::sync::Arc<RingFifo>,
}

impl DriverSide {
    /// Drain up to `max` posted descriptors.
    pub fn drain_posted(&self, max: usize) -> Vec<Descriptor> {
        let mut state = self.fifo.state.lock();
        let n = max.min(state.posted.len());
        state.posted.drain(..n).collect()
    }

    /// Push completions back to the user. Caller is responsible for
    /// respecting the user's read-side depth; this never blocks.
    pub fn complete(&self, descriptors: impl IntoIterator<Item = Descriptor>) {
        let mut state = self.fifo.state.lock();
        state.completed.extend(descriptors);
        drop(state);
        self.fifo.notify();
    }

    /// Assert `LINK_STATUS` for the next `wait` call on this FIFO.
    pub fn signal_link_status(&self) {
        let mut state = self.fifo.state.lock();
        state.link_status_pending = true;
        drop(state);
        self.fifo.notify();
    }

    /// Close the FIFO from the driver side; equivalent in effect to the
    /// user side closing it.
    pub fn close(&self) {
        self.fifo.close();
    }

    /// Whether the user has closed their end.
    pub fn is_closed(&self) -> bool {
        self.fifo.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_drain_then_complete_round_trips() {
        let (user, driver) = RingFifo::new_pair(4);
        let d = Descriptor {
            offset: 0,
            length: 10,
            reserved: 0,
            cookie: 42,
        };
        assert_eq!(user.write(&[d]).unwrap(), WriteOutcome::Accepted(1));

        let drained = driver.drain_posted(4);
        assert_eq!(drained, vec![d]);

        driver.complete([d]);
        let mut dest = [Descriptor::default(); 4];
        assert_eq!(user.read(&mut dest).unwrap(), ReadOutcome::Read(1));
        assert_eq!(dest[0], d);
    }

    #[test]
    fn write_respects_depth() {
        let (user, _driver) = RingFifo::new_pair(1);
        let d = Descriptor::default();
        assert_eq!(user.write(&[d]).unwrap(), WriteOutcome::Accepted(1));
        assert_eq!(user.write(&[d]).unwrap(), WriteOutcome::WouldBlock);
    }

    #[test]
    fn close_wakes_waiters_with_peer_closed() {
        let (user, driver) = RingFifo::new_pair(1);
        driver.close();
        let signal = user.wait(Signal::READABLE | Signal::PEER_CLOSED, None).unwrap();
        assert!(signal.contains(Signal::PEER_CLOSED));

        let mut dest = [Descriptor::default(); 1];
        assert!(matches!(user.read(&mut dest), Err(FifoError::PeerClosed)));
    }
}
