use std::{
    io,
    os::fd::AsRawFd,
    time::{Duration, Instant},
};

use slab::Slab;
use strand_io::{Event, Poller, WakeHandle};

use crate::{
    connector::Connector,
    error::{DriverError, Op},
    listener::Listener,
    trace::Trace,
    transport::Transport,
};

/// Handle to a listener owned by a [`Driver`].
///
/// Handles are generation-stamped: once the listener is freed, operations
/// through a stale handle are ignored, even if its slot has been reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId {
    pub(crate) key: usize,
    pub(crate) stamp: u64,
}

/// Handle to a connector owned by a [`Driver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectorId {
    pub(crate) key: usize,
    pub(crate) stamp: u64,
}

// Poller keys carry the endpoint kind in the low bit.
pub(crate) const fn listener_token(key: usize) -> usize {
    key << 1
}

pub(crate) const fn connector_token(key: usize) -> usize {
    (key << 1) | 1
}

/// The single-threaded multiplexer owning listeners, connectors and the
/// wakeup primitive.
///
/// `T` is the transport every new connector is equipped with, built by the
/// factory passed at construction. A driver and everything it owns belong
/// to one thread; [`Driver::wake_handle`] is the only piece that crosses.
pub struct Driver<T> {
    pub(crate) poller: Poller,
    events: Vec<Event>,
    pub(crate) listeners: Slab<Listener>,
    pub(crate) connectors: Slab<Connector<T>>,
    pub(crate) listener_order: Vec<ListenerId>,
    pub(crate) connector_order: Vec<ConnectorId>,
    pub(crate) listener_cursor: usize,
    pub(crate) connector_cursor: usize,
    pub(crate) closed_count: usize,
    trace: Trace,
    pub(crate) last_error: Option<DriverError>,
    factory: Box<dyn FnMut() -> T>,
    stamp: u64,
}

impl<T: Transport> Driver<T> {
    /// Creates a driver with trace flags captured from the `TRACE_RAW`,
    /// `TRACE_FRM` and `TRACE_DRV` environment variables. `factory` builds
    /// the transport for each connector the driver creates or accepts.
    pub fn new(factory: impl FnMut() -> T + 'static) -> io::Result<Self> {
        Self::with_trace(factory, Trace::from_env())
    }

    /// Creates a driver with explicit trace flags.
    pub fn with_trace(factory: impl FnMut() -> T + 'static, trace: Trace) -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            events: Vec::new(),
            listeners: Slab::new(),
            connectors: Slab::new(),
            listener_order: Vec::new(),
            connector_order: Vec::new(),
            listener_cursor: 0,
            connector_cursor: 0,
            closed_count: 0,
            trace,
            last_error: None,
            factory: Box::new(factory),
            stamp: 0,
        })
    }

    /// Blocks until readiness, the timeout, or a wakeup, then arms the ready
    /// iterators.
    ///
    /// When any connector's handler already holds deliverable data the OS
    /// poll is skipped entirely: bytes sitting in memory must not stall on
    /// socket readiness. The timeout is clamped by the earliest transport
    /// tick deadline; expired deadlines mark `pending_tick`. A wakeup
    /// returns without marking anything ready.
    pub fn wait(&mut self, timeout: Option<Duration>) {
        if !self.data_ready() {
            self.rearm();
            let timeout = self.clamp_to_deadline(timeout);
            match self.poller.wait(&mut self.events, timeout) {
                Ok(_) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => self.last_error = Some(DriverError::os(Op::Poll, &e)),
            }
            for ev in &self.events {
                let key = ev.key >> 1;
                if ev.key & 1 == 0 {
                    if let Some(l) = self.listeners.get_mut(key) {
                        if ev.readable {
                            l.pending = true;
                        }
                    }
                } else if let Some(c) = self.connectors.get_mut(key) {
                    if ev.readable && c.want_read() {
                        c.pending_read = true;
                    }
                    if ev.writable && c.want_write() {
                        c.pending_write = true;
                    }
                }
            }
            let now = Instant::now();
            for (_, c) in self.connectors.iter_mut() {
                if !c.closed && c.deadline.is_some_and(|d| d <= now) {
                    c.pending_tick = true;
                }
            }
        }
        self.listener_cursor = 0;
        self.connector_cursor = 0;
    }

    /// Next listener with a connection waiting, in insertion order. Armed by
    /// [`Driver::wait`]; each cycle walks the list at most once.
    pub fn next_ready_listener(&mut self) -> Option<ListenerId> {
        while self.listener_cursor < self.listener_order.len() {
            let id = self.listener_order[self.listener_cursor];
            self.listener_cursor += 1;
            if self.listeners[id.key].pending {
                return Some(id);
            }
        }
        None
    }

    /// Next connector needing attention, in insertion order. Ready means
    /// closed, pending I/O or tick, buffered input, or end of stream; the
    /// last two keep residual bytes draining without another OS event.
    pub fn next_ready_connector(&mut self) -> Option<ConnectorId> {
        while self.connector_cursor < self.connector_order.len() {
            let id = self.connector_order[self.connector_cursor];
            self.connector_cursor += 1;
            if self.connectors[id.key].needs_attention() {
                return Some(id);
            }
        }
        None
    }

    /// Breaks a concurrent [`Driver::wait`] from this thread.
    pub fn wakeup(&self) -> io::Result<()> {
        self.poller.wake()
    }

    /// Cloneable any-thread handle that breaks a concurrent
    /// [`Driver::wait`].
    pub fn wake_handle(&self) -> WakeHandle {
        self.poller.wake_handle()
    }

    pub fn listener(&self, id: ListenerId) -> Option<&Listener> {
        self.listener_key(id).map(|key| &self.listeners[key])
    }

    pub fn listener_mut(&mut self, id: ListenerId) -> Option<&mut Listener> {
        self.listener_key(id).map(|key| &mut self.listeners[key])
    }

    pub fn connector(&self, id: ConnectorId) -> Option<&Connector<T>> {
        self.connector_key(id).map(|key| &self.connectors[key])
    }

    pub fn connector_mut(&mut self, id: ConnectorId) -> Option<&mut Connector<T>> {
        self.connector_key(id).map(|key| &mut self.connectors[key])
    }

    /// Listener handles in insertion order.
    pub fn listeners(&self) -> impl Iterator<Item = ListenerId> + '_ {
        self.listener_order.iter().copied()
    }

    /// Connector handles in insertion order.
    pub fn connectors(&self) -> impl Iterator<Item = ConnectorId> + '_ {
        self.connector_order.iter().copied()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn connector_count(&self) -> usize {
        self.connectors.len()
    }

    /// Connectors closed but not yet freed.
    pub fn closed_count(&self) -> usize {
        self.closed_count
    }

    pub fn trace(&self) -> Trace {
        self.trace
    }

    /// Sets trace flags for the driver and for endpoints created afterwards;
    /// existing connectors keep theirs until set individually.
    pub fn set_trace(&mut self, trace: Trace) {
        self.trace = trace;
    }

    /// Last setup or poll failure, if any.
    pub fn last_error(&self) -> Option<&DriverError> {
        self.last_error.as_ref()
    }

    /// Raw OS code of the last failure, or 0.
    pub fn errno(&self) -> i32 {
        self.last_error.as_ref().map_or(0, |e| e.code())
    }

    pub(crate) fn next_stamp(&mut self) -> u64 {
        self.stamp += 1;
        self.stamp
    }

    pub(crate) fn make_transport(&mut self) -> T {
        (self.factory)()
    }

    pub(crate) fn record(&mut self, e: DriverError) -> DriverError {
        self.last_error = Some(e.clone());
        e
    }

    pub(crate) fn listener_key(&self, id: ListenerId) -> Option<usize> {
        self.listeners
            .get(id.key)
            .filter(|l| l.stamp == id.stamp)
            .map(|_| id.key)
    }

    pub(crate) fn connector_key(&self, id: ConnectorId) -> Option<usize> {
        self.connectors
            .get(id.key)
            .filter(|c| c.stamp == id.stamp)
            .map(|_| id.key)
    }

    fn data_ready(&self) -> bool {
        self.connectors
            .iter()
            .any(|(_, c)| !c.closed() && c.handler_data_ready())
    }

    /// Re-arms every live registration from current intent. Oneshot poll
    /// semantics make this the per-cycle equivalent of rebuilding a pollfd
    /// array.
    fn rearm(&mut self) {
        for (key, l) in self.listeners.iter() {
            if let Some(sock) = l.sock.as_ref() {
                if let Err(e) = self
                    .poller
                    .modify(sock.as_raw_fd(), Event::readable(listener_token(key)))
                {
                    self.last_error = Some(DriverError::os(Op::Register, &e));
                }
            }
        }
        for (key, c) in self.connectors.iter() {
            if let Some(sock) = c.sock.as_ref() {
                let ev = Event {
                    key: connector_token(key),
                    readable: c.want_read(),
                    writable: c.want_write(),
                };
                if let Err(e) = self.poller.modify(sock.as_raw_fd(), ev) {
                    self.last_error = Some(DriverError::os(Op::Register, &e));
                }
            }
        }
    }

    fn clamp_to_deadline(&self, timeout: Option<Duration>) -> Option<Duration> {
        let next = self
            .connectors
            .iter()
            .filter(|(_, c)| !c.closed())
            .filter_map(|(_, c)| c.deadline)
            .min();
        let Some(next) = next else {
            return timeout;
        };
        let until = next.saturating_duration_since(Instant::now());
        Some(match timeout {
            Some(t) => t.min(until),
            None => until,
        })
    }
}
