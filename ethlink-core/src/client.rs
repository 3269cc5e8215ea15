//! The client state machine: TX/RX half-loops, arena tenancy, and link
//! lifecycle.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::arena::{Arena, Buffer, ClientId};
use crate::descriptor::Descriptor;
use crate::device::{DeviceInfo, EthernetDevice, LinkStatus};
use crate::error::ClientError;
use crate::fifo::{FifoEndpoint, FifoError, ReadOutcome, Signal, WriteOutcome};
use crate::metrics;

/// Client lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Initial state, before the first `Up`/link-status transition.
    Unknown,
    /// Driver running, link up.
    Started,
    /// Explicitly stopped, or link down.
    Down,
    /// Terminal; all arena slots owned by this client have been reclaimed.
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Unknown => f.write_str("eth unknown state"),
            State::Started => f.write_str("eth started"),
            State::Down => f.write_str("eth down"),
            // No dedicated string for this state upstream either; it falls
            // through to the same "bad state" formatting.
            State::Closed => write!(f, "eth bad state ({})", *self as u32),
        }
    }
}

/// Outcome of a [`Client::recv`] call.
#[derive(Debug)]
pub enum RecvOutcome {
    /// A received buffer, with driver-set length.
    Buffer(Buffer),
    /// No completion was available yet; not an error.
    WouldBlock,
}

/// A callback invoked on every lifecycle state change, while the client
/// lock is held: at most one runs at a time per client.
pub type StateCallback = Box<dyn FnMut(State) + Send>;

struct Inner {
    state: State,
    state_callback: Option<StateCallback>,

    tx: Arc<dyn FifoEndpoint>,
    rx: Arc<dyn FifoEndpoint>,
    tx_depth: u32,
    rx_depth: u32,

    /// Scratch space reused between TX-completion drain and RX-refill;
    /// safe because both are only ever called with the client lock held.
    tmp: Vec<Descriptor>,
    recv_pending: VecDeque<Descriptor>,
    send_pending: Vec<Descriptor>,

    tx_in_flight: u32,
    rx_in_flight: u32,
    tx_total: u64,
    rx_total: u64,
}

/// A tenant of an [`Arena`], talking to one [`EthernetDevice`] over a pair
/// of TX/RX FIFOs.
pub struct Client {
    path: String,
    info: DeviceInfo,
    device: Arc<dyn EthernetDevice>,
    arena: Arc<Arena>,
    id: ClientId,
    inner: Mutex<Inner>,
}

impl Client {
    /// Register with `arena`, negotiate FIFOs with `device`, hand the
    /// arena's shared region to the driver, and prime the RX FIFO.
    ///
    /// Any failure during initialisation closes the partially-constructed
    /// client before propagating the error.
    pub fn new(
        name: &str,
        topo: impl Into<String>,
        device: Arc<dyn EthernetDevice>,
        arena: Arc<Arena>,
        state_callback: Option<StateCallback>,
    ) -> Result<Client, ClientError> {
        let id = arena.register_client();
        device.set_client_name(name)?;
        let info = device.get_info()?;
        let (fifos, cfg) = device.get_fifos()?;

        let max_depth = cfg.tx_depth.max(cfg.rx_depth) as usize;
        let inner = Mutex::new(Inner {
            state: State::Unknown,
            state_callback,
            tx: fifos.tx,
            rx: fifos.rx,
            tx_depth: cfg.tx_depth,
            rx_depth: cfg.rx_depth,
            tmp: Vec::with_capacity(max_depth),
            recv_pending: VecDeque::with_capacity(cfg.rx_depth as usize),
            send_pending: Vec::with_capacity(cfg.tx_depth as usize),
            tx_in_flight: 0,
            rx_in_flight: 0,
            tx_total: 0,
            rx_total: 0,
        });

        let client = Client {
            path: topo.into(),
            info,
            device,
            arena,
            id,
            inner,
        };

        if let Err(err) = client.init() {
            client.close();
            return Err(err);
        }

        tracing::info!(path = %client.path, "eth client created");
        Ok(client)
    }

    fn init(&self) -> Result<(), ClientError> {
        let region = self
            .arena
            .region_handle()
            .map_err(crate::device::DeviceError::Transport)?;
        self.device.set_io_buffer(region)?;

        let mut inner = self.inner.lock();
        self.rx_refill_locked(&mut inner)
    }

    /// Static device info fetched at construction time.
    pub fn info(&self) -> DeviceInfo {
        self.info
    }

    /// The client's topological path / identity string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    /// Number of slots whose descriptors are currently posted to the TX
    /// FIFO and not yet completed.
    pub fn tx_in_flight(&self) -> u32 {
        self.inner.lock().tx_in_flight
    }

    /// Number of slots whose descriptors are currently posted to the RX
    /// FIFO and not yet completed.
    pub fn rx_in_flight(&self) -> u32 {
        self.inner.lock().rx_in_flight
    }

    /// Lifetime count of completed sends.
    pub fn tx_total(&self) -> u64 {
        self.inner.lock().tx_total
    }

    /// Lifetime count of completed receives.
    pub fn rx_total(&self) -> u64 {
        self.inner.lock().rx_total
    }

    fn change_state_locked(&self, inner: &mut Inner, s: State) {
        inner.state = s;
        if let Some(cb) = inner.state_callback.as_mut() {
            cb(s);
        }
    }

    /// Enable the interface.
    pub fn up(&self) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        if inner.state != State::Started {
            self.device.start()?;
            self.change_state_locked(&mut inner, State::Started);
        }
        Ok(())
    }

    /// Disable the interface.
    pub fn down(&self) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        if inner.state != State::Down {
            self.device.stop()?;
            self.change_state_locked(&mut inner, State::Down);
        }
        Ok(())
    }

    /// Toggle promiscuous mode.
    pub fn set_promiscuous_mode(&self, enabled: bool) -> Result<(), ClientError> {
        self.device.set_promiscuous_mode(enabled)?;
        Ok(())
    }

    /// Ask the driver to loop transmitted packets back to this client.
    pub fn listen_tx(&self) -> Result<(), ClientError> {
        self.device.listen_start()?;
        Ok(())
    }

    /// Poll the device's link status outside of `wait_recv`.
    pub fn link_status(&self) -> Result<LinkStatus, ClientError> {
        Ok(LinkStatus::from_raw(self.device.get_status()?))
    }

    /// Close the client, releasing any held resources. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        self.close_locked(&mut inner);
    }

    fn close_locked(&self, inner: &mut Inner) {
        if inner.state == State::Closed {
            return;
        }
        if let Err(err) = self.device.stop() {
            tracing::warn!(path = %self.path, error = %err, "failed to stop device on close");
        }
        inner.tx.close();
        inner.rx.close();
        inner.tmp.clear();
        inner.recv_pending.clear();
        inner.send_pending.clear();
        self.arena.free_all(self.id);
        self.change_state_locked(inner, State::Closed);
    }

    /// Returns a [`Buffer`] to be passed to [`Client::send`], or `None`
    /// under backpressure (`tx_in_flight == TX_DEPTH`); callers can
    /// [`Client::wait_send`] for availability.
    pub fn alloc_for_send(&self) -> Option<Buffer> {
        let mut inner = self.inner.lock();
        if inner.tx_in_flight == inner.tx_depth {
            metrics::tx_backpressure();
            return None;
        }
        let buf = self.arena.alloc(self.id)?;
        inner.tx_in_flight += 1;
        Some(buf)
    }

    /// Send a buffer to the driver. Never blocks.
    ///
    /// Note: calling `free` on a buffer obtained from `alloc_for_send` but
    /// never passed to `send` leaks one unit of `tx_in_flight` until it is
    /// reset at `close`. This is documented, expected behavior, not a bug.
    pub fn send(&self, b: Buffer) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        self.tx_complete_locked(&mut inner)?;

        let d = self.arena.encode(&b);
        inner.send_pending.push(d);

        match inner.tx.write(&inner.send_pending) {
            Ok(WriteOutcome::Accepted(n)) => {
                inner.send_pending.drain(0..n);
            }
            Ok(WriteOutcome::WouldBlock) => {}
            Err(FifoError::PeerClosed) => return Err(ClientError::PeerClosed),
            Err(other) => return Err(ClientError::Fifo(other)),
        }
        Ok(())
    }

    fn tx_complete_locked(&self, inner: &mut Inner) -> Result<(), ClientError> {
        let depth = inner.tx_depth as usize;
        inner.tmp.clear();
        inner.tmp.resize(depth, Descriptor::default());

        match inner.tx.read(&mut inner.tmp[..depth]) {
            Ok(ReadOutcome::Read(n)) => {
                inner.tx_in_flight -= n as u32;
                inner.tx_total += n as u64;
                for i in 0..n {
                    let d = inner.tmp[i];
                    let buf = self.arena.decode(d);
                    self.arena.free(self.id, buf);
                }
                Ok(())
            }
            Ok(ReadOutcome::WouldBlock) => Ok(()),
            Err(FifoError::PeerClosed) => Err(ClientError::PeerClosed),
            Err(other) => Err(ClientError::Fifo(other)),
        }
    }

    /// Free a buffer obtained from [`Client::recv`]. Does not decrement
    /// `tx_in_flight`: that counter is owned exclusively by the internal
    /// TX-completion drain.
    pub fn free(&self, b: Buffer) {
        self.arena.free(self.id, b);
    }

    /// Receive a buffer from the driver. Does not block; returns
    /// [`RecvOutcome::WouldBlock`] (not an error) if nothing is available
    /// yet.
    pub fn recv(&self) -> Result<RecvOutcome, ClientError> {
        let mut inner = self.inner.lock();
        if inner.recv_pending.is_empty() {
            let depth = inner.rx_depth as usize;
            inner.tmp.clear();
            inner.tmp.resize(depth, Descriptor::default());

            match inner.rx.read(&mut inner.tmp[..depth]) {
                Ok(ReadOutcome::Read(n)) => {
                    inner.rx_in_flight -= n as u32;
                    for i in 0..n {
                        inner.recv_pending.push_back(inner.tmp[i]);
                    }
                }
                Ok(ReadOutcome::WouldBlock) => {
                    metrics::rx_would_block();
                    return Ok(RecvOutcome::WouldBlock);
                }
                Err(FifoError::PeerClosed) => return Err(ClientError::PeerClosed),
                Err(other) => return Err(ClientError::Fifo(other)),
            }

            self.rx_refill_locked(&mut inner)?;
        }

        let d = inner
            .recv_pending
            .pop_front()
            .expect("recv_pending just ensured non-empty");
        inner.rx_total += 1;
        let buf = self.arena.decode(d);
        drop(inner);
        Ok(RecvOutcome::Buffer(buf))
    }

    fn rx_refill_locked(&self, inner: &mut Inner) -> Result<(), ClientError> {
        inner.tmp.clear();
        while inner.rx_in_flight + inner.tmp.len() as u32 < inner.rx_depth {
            match self.arena.alloc(self.id) {
                Some(buf) => inner.tmp.push(self.arena.encode(&buf)),
                None => break,
            }
        }
        if inner.tmp.is_empty() {
            return Ok(());
        }

        match inner.rx.write(&inner.tmp) {
            Ok(WriteOutcome::Accepted(n)) => {
                inner.rx_in_flight += n as u32;
                let dropped = inner.tmp.len() - n;
                for &d in &inner.tmp[n..] {
                    let buf = self.arena.decode(d);
                    self.arena.free(self.id, buf);
                }
                metrics::rx_refill_dropped(dropped as u64);
                Ok(())
            }
            Ok(WriteOutcome::WouldBlock) => {
                for &d in inner.tmp.iter() {
                    let buf = self.arena.decode(d);
                    self.arena.free(self.id, buf);
                }
                Ok(())
            }
            Err(FifoError::PeerClosed) => Err(ClientError::PeerClosed),
            Err(other) => Err(ClientError::Fifo(other)),
        }
    }

    /// Block until it is possible to allocate a send buffer, or the
    /// client has been closed.
    pub fn wait_send(&self) -> Result<(), ClientError> {
        loop {
            let mut inner = self.inner.lock();
            self.tx_complete_locked(&mut inner)?;
            let can_send = inner.tx_in_flight < inner.tx_depth;
            let tx = inner.tx.clone();
            drop(inner);

            if can_send {
                return Ok(());
            }
            // Errors from waiting are handled by the next tx_complete
            // call above (a peer-closed FIFO surfaces there).
            let _ = tx.wait(Signal::READABLE | Signal::PEER_CLOSED, None);
        }
    }

    /// Block until it is possible to receive a buffer, or the client has
    /// been closed.
    pub fn wait_recv(&self) -> Result<(), ClientError> {
        loop {
            let rx = self.inner.lock().rx.clone();
            let signal = match rx.wait(
                Signal::READABLE | Signal::PEER_CLOSED | Signal::LINK_STATUS,
                None,
            ) {
                Ok(s) => s,
                Err(_) => {
                    self.close();
                    return Err(ClientError::PeerClosed);
                }
            };

            if signal.contains(Signal::PEER_CLOSED) {
                self.close();
                return Err(ClientError::PeerClosed);
            }

            if signal.contains(Signal::LINK_STATUS) {
                match self.device.get_status() {
                    Ok(status) => {
                        let new_state = match LinkStatus::from_raw(status) {
                            LinkStatus::Down => State::Down,
                            LinkStatus::Up => State::Started,
                        };
                        let mut inner = self.inner.lock();
                        self.change_state_locked(&mut inner, new_state);
                    }
                    Err(err) => {
                        tracing::warn!(path = %self.path, error = %err, "eth status error");
                    }
                }
                continue;
            }

            if signal.contains(Signal::READABLE) {
                return Ok(());
            }
        }
    }
}
