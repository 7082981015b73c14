use std::{
    any::Any,
    io::{self, Read},
    os::fd::AsRawFd,
    time::Instant,
};

use socket2::{SockAddr, Socket};
use strand_io::Event;
use tracing::{error, info};

use crate::{
    buf::IoBuf,
    driver::{ConnectorId, Driver, ListenerId, connector_token},
    error::{DriverError, Op},
    handler::{DefaultIo, IoHandler, Shutdown},
    net,
    trace::Trace,
    transport::{ConnectionHandle, Flow, Sasl, TlsMode, TlsSession, Transport},
};

/// Compile-time capacity of each connector's input and output buffers.
pub const IO_BUF_SIZE: usize = 4096;

#[cfg(not(target_vendor = "apple"))]
const SEND_FLAGS: i32 = libc::MSG_NOSIGNAL;
// Apple targets suppress SIGPIPE per-socket via SO_NOSIGPIPE instead.
#[cfg(target_vendor = "apple")]
const SEND_FLAGS: i32 = 0;

/// Readiness the connector currently wants from the poller.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub(crate) struct Want {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Want {
    const RW: Self = Self {
        read: true,
        write: true,
    };
}

/// An active endpoint: a stream socket, fixed-capacity byte buffers in each
/// direction, and an owned [`Transport`] consuming and producing those bytes.
///
/// Connectors are produced by [`Driver::connect`], [`Driver::accept`] or
/// [`Driver::adopt_connector`] and live on their driver until freed. A
/// closed connector keeps its slot (and counts toward
/// [`Driver::closed_count`]) so the embedder can observe the close and reap
/// it with [`Driver::free_connector`].
pub struct Connector<T> {
    pub(crate) sock: Option<Socket>,
    name: String,
    pub(crate) stamp: u64,
    pub(crate) want: Want,
    pub(crate) pending_read: bool,
    pub(crate) pending_write: bool,
    pub(crate) pending_tick: bool,
    pub(crate) closed: bool,
    trace: Trace,
    pub(crate) deadline: Option<Instant>,
    input: IoBuf,
    input_eos: bool,
    input_done: bool,
    output: IoBuf,
    output_done: bool,
    transport: T,
    connection: Option<ConnectionHandle>,
    listener: Option<ListenerId>,
    context: Option<Box<dyn Any>>,
    pub(crate) handler: Option<Box<dyn IoHandler<T>>>,
    pub(crate) close_requested: bool,
    pub(crate) shutdown_started: bool,
}

impl<T: Transport> Connector<T> {
    pub(crate) fn new(
        sock: Socket,
        name: String,
        transport: T,
        trace: Trace,
        listener: Option<ListenerId>,
        context: Option<Box<dyn Any>>,
        stamp: u64,
    ) -> Self {
        let mut connector = Self {
            sock: Some(sock),
            name,
            stamp,
            want: Want::RW,
            pending_read: false,
            pending_write: false,
            pending_tick: false,
            closed: false,
            trace: Trace::OFF,
            deadline: None,
            input: IoBuf::with_capacity(IO_BUF_SIZE),
            input_eos: false,
            input_done: false,
            output: IoBuf::with_capacity(IO_BUF_SIZE),
            output_done: false,
            transport,
            connection: None,
            listener,
            context,
            handler: Some(Box::new(DefaultIo)),
            close_requested: false,
            shutdown_started: false,
        };
        connector.set_trace(trace);
        connector
    }

    /// Peer name in `host:port` form.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    /// The listener this connector was accepted from, if any.
    pub fn listener(&self) -> Option<ListenerId> {
        self.listener
    }

    pub fn trace(&self) -> Trace {
        self.trace
    }

    /// Sets trace flags for this connector and its transport.
    pub fn set_trace(&mut self, trace: Trace) {
        self.trace = trace;
        self.transport.set_trace(trace);
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// SASL negotiation handle of the owned transport, if it carries one.
    pub fn sasl(&mut self) -> Option<&mut dyn Sasl> {
        self.transport.sasl()
    }

    /// TLS session of the owned transport, if it carries one. Connectors
    /// produced by a listener get a server-mode session, outbound connectors
    /// a client-mode one.
    pub fn ssl(&mut self) -> Option<&mut dyn TlsSession> {
        let mode = if self.listener.is_some() {
            TlsMode::Server
        } else {
            TlsMode::Client
        };
        self.transport.tls(mode)
    }

    /// Binds the embedder's connection and propagates it to the transport.
    pub fn set_connection(&mut self, connection: ConnectionHandle) {
        self.connection = Some(connection);
        self.transport.bind(connection);
        self.transport.set_trace(self.trace);
    }

    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.connection
    }

    pub fn context(&self) -> Option<&dyn Any> {
        self.context.as_deref()
    }

    pub fn set_context(&mut self, context: Option<Box<dyn Any>>) {
        self.context = context;
    }

    /// Replaces the installed I/O handler. TLS layers install their own to
    /// interpose record processing on the default byte pipeline.
    pub fn set_handler(&mut self, handler: Box<dyn IoHandler<T>>) {
        self.handler = Some(handler);
    }

    /// Asks the driver to close this connector after the current handler
    /// pass. For handlers that detect closure mid-pass.
    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    /// Next absolute deadline at which the transport wants a tick.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Overrides the tick deadline. Normally maintained from `tick` return
    /// values; embedders use this to seed the first tick.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn pending_read(&self) -> bool {
        self.pending_read
    }

    pub fn pending_write(&self) -> bool {
        self.pending_write
    }

    pub fn pending_tick(&self) -> bool {
        self.pending_tick
    }

    pub fn want_read(&self) -> bool {
        self.want.read
    }

    pub fn want_write(&self) -> bool {
        self.want.write
    }

    pub fn input_size(&self) -> usize {
        self.input.len()
    }

    pub fn output_size(&self) -> usize {
        self.output.len()
    }

    pub fn input_eos(&self) -> bool {
        self.input_eos
    }

    pub fn input_done(&self) -> bool {
        self.input_done
    }

    pub fn output_done(&self) -> bool {
        self.output_done
    }

    /// True once the output buffer is empty and both transport directions
    /// have closed; the connector is then eligible for clean shutdown.
    pub fn drainable(&self) -> bool {
        self.output.is_empty() && self.input_done && self.output_done
    }

    /// Clears the read/write pending flags; handlers call this after
    /// consuming the cycle's readiness.
    pub fn clear_pending_io(&mut self) {
        self.pending_read = false;
        self.pending_write = false;
    }

    pub(crate) fn handler_data_ready(&self) -> bool {
        self.handler.as_ref().is_some_and(|h| h.data_ready(self))
    }

    /// The six-way readiness predicate of the driver's connector iterator.
    /// Buffered input and end-of-stream keep a connector ready without
    /// another OS event, so residual bytes drain.
    pub(crate) fn needs_attention(&self) -> bool {
        self.closed
            || self.pending_read
            || self.pending_write
            || self.pending_tick
            || !self.input.is_empty()
            || self.input_eos
    }

    /// Moves bytes from the socket into the input buffer. End of stream and
    /// hard errors latch `input_eos` and drop read interest; a spurious
    /// wakeup is a no-op.
    pub fn read(&mut self) {
        let Some(sock) = self.sock.as_mut() else {
            return;
        };
        let spare = self.input.unfilled_mut();
        if spare.is_empty() {
            // Full buffer: the transport has not consumed yet. A zero-length
            // recv would report 0 and masquerade as end of stream.
            return;
        }
        match sock.read(spare) {
            Ok(0) => {
                self.want.read = false;
                self.input_eos = true;
            }
            Ok(n) => self.input.advance(n),
            Err(ref e) if would_block(e) => {}
            Err(e) => {
                if self.trace.any() {
                    error!("read on {}: {}", self.name, e);
                }
                self.want.read = false;
                self.input_eos = true;
            }
        }
    }

    /// Pushes buffered input into the transport. Once the transport refuses
    /// the direction, `input_done` latches and later bytes are discarded.
    pub fn process_input(&mut self) {
        if self.input_done {
            self.input.clear();
            return;
        }
        if self.input.is_empty() && !self.input_eos {
            return;
        }
        match self.transport.push(self.input.filled()) {
            Flow::Advanced(n) => self.input.consume(n),
            Flow::Closed => {
                self.input.clear();
                self.input_done = true;
            }
        }
    }

    /// Pulls transport output into spare outbound buffer space and asserts
    /// write interest while any of it remains unsent.
    pub fn process_output(&mut self) {
        if !self.output_done {
            let spare = self.output.unfilled_mut();
            if !spare.is_empty() {
                match self.transport.pull(spare) {
                    Flow::Advanced(n) => self.output.advance(n),
                    Flow::Closed => self.output_done = true,
                }
            }
        }
        if !self.output.is_empty() {
            self.want.write = true;
        }
    }

    /// Moves buffered output to the socket. A hard error discards the
    /// buffer and latches `output_done`; sends never raise SIGPIPE.
    pub fn write(&mut self) {
        if let Some(sock) = self.sock.as_ref() {
            if !self.output.is_empty() {
                match sock.send_with_flags(self.output.filled(), SEND_FLAGS) {
                    Ok(n) => self.output.consume(n),
                    Err(ref e) if would_block(e) => {}
                    Err(e) => {
                        if self.trace.any() {
                            error!("send on {}: {}", self.name, e);
                        }
                        self.output.clear();
                        self.output_done = true;
                    }
                }
            }
        }
        if self.output.is_empty() {
            self.want.write = false;
        }
    }

    /// Runs transport housekeeping. Bytes the tick produces in-band are
    /// pushed through the buffers immediately so they reach the same cycle's
    /// write.
    pub fn tick(&mut self, now: Instant) -> Option<Instant> {
        let next = self.transport.tick(now);
        self.process_input();
        self.process_output();
        next
    }
}

fn would_block(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

impl<T: Transport> Driver<T> {
    /// Opens a TCP connection to `host:port` and adopts it.
    ///
    /// Resolution and connect are synchronous, so this must not be called
    /// from the hot loop. Failures are recorded as the driver's last error.
    pub fn connect(
        &mut self,
        host: &str,
        port: u16,
        context: Option<Box<dyn Any>>,
    ) -> Result<ConnectorId, DriverError> {
        let addr = net::resolve(host, port).map_err(|e| self.record(e))?;
        let sock = net::tcp_socket(&addr).map_err(|e| self.record(e))?;
        if let Err(e) = sock.connect(&SockAddr::from(addr)) {
            return Err(self.record(DriverError::os(Op::Connect, &e)));
        }
        let name = format!("{host}:{port}");
        let id = self.adopt_connector_inner(sock, name.clone(), None, context)?;
        if self.trace().any() {
            info!("Connected to {}", name);
        }
        Ok(id)
    }

    /// Adopts an externally prepared stream socket.
    pub fn adopt_connector(
        &mut self,
        sock: impl Into<Socket>,
        context: Option<Box<dyn Any>>,
    ) -> Result<ConnectorId, DriverError> {
        let sock = sock.into();
        let name = sock
            .peer_addr()
            .ok()
            .and_then(|a| a.as_socket())
            .map(|a| a.to_string())
            .unwrap_or_default();
        self.adopt_connector_inner(sock, name, None, context)
    }

    pub(crate) fn adopt_connector_inner(
        &mut self,
        sock: Socket,
        name: String,
        listener: Option<ListenerId>,
        context: Option<Box<dyn Any>>,
    ) -> Result<ConnectorId, DriverError> {
        if let Err(e) = net::configure(&sock) {
            return Err(self.record(DriverError::os(Op::Socket, &e)));
        }
        let stamp = self.next_stamp();
        let trace = self.trace();
        let transport = self.make_transport();
        let fd = sock.as_raw_fd();
        let key = self
            .connectors
            .insert(Connector::new(sock, name, transport, trace, listener, context, stamp));
        if let Err(e) = self.poller.add(fd, Event::all(connector_token(key))) {
            self.connectors.remove(key);
            return Err(self.record(DriverError::os(Op::Register, &e)));
        }
        let id = ConnectorId { key, stamp };
        self.connector_order.push(id);
        Ok(id)
    }

    /// Closes the connector's socket and clears its readiness intent.
    /// Idempotent. The connector stays on the driver, counted by
    /// [`Driver::closed_count`], until freed.
    pub fn close_connector(&mut self, id: ConnectorId) {
        if let Some(key) = self.connector_key(id) {
            self.close_connector_key(key);
        }
    }

    pub(crate) fn close_connector_key(&mut self, key: usize) {
        let Some(c) = self.connectors.get_mut(key) else {
            return;
        };
        if c.closed {
            return;
        }
        if let Some(sock) = c.sock.take() {
            let _ = self.poller.delete(sock.as_raw_fd());
        }
        c.want = Want::default();
        c.closed = true;
        self.closed_count += 1;
    }

    /// Releases a connector, unbinding its transport. Freeing an open
    /// connector closes it first.
    pub fn free_connector(&mut self, id: ConnectorId) {
        let Some(key) = self.connector_key(id) else {
            return;
        };
        if let Some(pos) = self.connector_order.iter().position(|c| c.key == key) {
            // keep the mid-walk cursor on the successor of the removed node
            if pos < self.connector_cursor {
                self.connector_cursor -= 1;
            }
            self.connector_order.remove(pos);
        }
        let mut c = self.connectors.remove(key);
        if c.closed {
            self.closed_count -= 1;
        } else if let Some(sock) = c.sock.take() {
            let _ = self.poller.delete(sock.as_raw_fd());
        }
        c.transport.unbind();
    }

    /// Runs one I/O pass on a ready connector: tick if due, then the
    /// installed handler, then clean shutdown once the connector drains.
    pub fn process(&mut self, id: ConnectorId) {
        let Some(key) = self.connector_key(id) else {
            return;
        };
        let c = &mut self.connectors[key];
        if c.closed {
            return;
        }
        if c.pending_tick {
            c.deadline = c.tick(Instant::now());
            c.pending_tick = false;
        }
        let Some(mut handler) = c.handler.take() else {
            return;
        };
        let result = handler.process(c);
        c.handler = Some(handler);

        if let Err(e) = result {
            if self.connectors[key].trace().any() {
                error!("I/O Failure: {}", e);
            }
            self.close_connector_key(key);
            return;
        }
        if self.connectors[key].close_requested {
            self.close_connector_key(key);
            return;
        }

        let mut close_now = false;
        let c = &mut self.connectors[key];
        if c.drainable() && !c.shutdown_started {
            c.shutdown_started = true;
            if c.trace().any() {
                info!("Closed {}", c.name());
            }
            if let Some(mut handler) = c.handler.take() {
                let outcome = handler.shutdown(c);
                c.handler = Some(handler);
                close_now = matches!(outcome, Shutdown::Complete) || c.close_requested;
            }
        }
        if close_now {
            self.close_connector_key(key);
        }
    }
}
