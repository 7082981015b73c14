use std::io;

use crate::{connector::Connector, transport::Transport};

/// Outcome of a clean shutdown request.
pub enum Shutdown {
    /// Shutdown finished; the driver closes the connector immediately.
    Complete,
    /// A closure handshake is in flight. The handler finishes it over
    /// subsequent `process` calls and requests the close itself via
    /// [`Connector::request_close`].
    Pending,
}

/// Per-connector I/O entry point.
///
/// The default handler moves bytes straight between the socket and the
/// transport. A TLS layer substitutes its own implementation to interpose
/// record processing, report buffered plaintext the poller cannot see, and
/// run the closure handshake. The driver only touches a connector's socket
/// and buffers through the installed handler.
pub trait IoHandler<T: Transport> {
    /// One readiness-driven I/O pass. An error is a fatal I/O failure: the
    /// driver logs it and closes the connector.
    fn process(&mut self, connector: &mut Connector<T>) -> io::Result<()>;

    /// True when this handler holds decrypted data deliverable without
    /// further socket readiness. While any connector reports data the driver
    /// skips the OS wait entirely.
    fn data_ready(&self, _connector: &Connector<T>) -> bool {
        false
    }

    /// Begins clean shutdown once the connector becomes drainable. Invoked
    /// exactly once per connector.
    fn shutdown(&mut self, _connector: &mut Connector<T>) -> Shutdown {
        Shutdown::Complete
    }
}

/// Default byte pipeline: read, push, pull, write.
pub struct DefaultIo;

impl<T: Transport> IoHandler<T> for DefaultIo {
    fn process(&mut self, c: &mut Connector<T>) -> io::Result<()> {
        if c.pending_read() {
            c.read();
        }
        c.process_input();
        c.process_output();
        if c.pending_write() {
            c.write();
        }
        c.clear_pending_io();
        Ok(())
    }
}

/// Ignores readiness entirely, parking the connector until a real handler is
/// installed.
pub struct NullIo;

impl<T: Transport> IoHandler<T> for NullIo {
    fn process(&mut self, c: &mut Connector<T>) -> io::Result<()> {
        c.clear_pending_io();
        Ok(())
    }
}
