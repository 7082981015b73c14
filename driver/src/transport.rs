use std::time::Instant;

use crate::trace::Trace;

/// Progress reported by a transport for one push or pull.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// The transport consumed or produced this many bytes.
    Advanced(usize),
    /// The transport has closed this direction; no further bytes move.
    Closed,
}

/// Identifies the embedder's connection object bound to a connector.
///
/// The driver stores and forwards the handle without interpreting it. The
/// handle is non-owning: the embedder must keep the identified connection
/// alive until the connector is freed, or unbind it first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Mode a TLS session operates in.
///
/// Derived from how the connector was produced: accepted connectors get
/// server sessions, outbound connectors client sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsMode {
    Client,
    Server,
}

/// SASL negotiation handle owned by a transport.
///
/// The driver hands the handle to the embedder and never calls into it; the
/// negotiation itself rides the ordinary byte stream.
pub trait Sasl {}

/// TLS session handle owned by a transport.
///
/// Like [`Sasl`], surfaced for the embedder to configure; record processing
/// happens in the TLS layer's [`IoHandler`](crate::IoHandler) substitute.
pub trait TlsSession {
    fn mode(&self) -> TlsMode;
}

/// Byte-oriented protocol state machine bound to one connector.
///
/// The driver moves bytes between the socket and the transport and knows
/// nothing about what they mean. `push` hands the transport bytes received
/// from the peer; an empty slice signals end of stream. `pull` asks the
/// transport to fill spare outbound buffer space. Either direction answers
/// [`Flow::Closed`] to refuse further traffic, which the driver latches;
/// once both directions are closed and the output buffer drains, the
/// connector is shut down.
pub trait Transport {
    fn push(&mut self, input: &[u8]) -> Flow;

    fn pull(&mut self, output: &mut [u8]) -> Flow;

    /// Housekeeping entry point. Returns the next absolute deadline at which
    /// the transport wants to run again, if any.
    fn tick(&mut self, _now: Instant) -> Option<Instant> {
        None
    }

    /// Binds the embedder's connection to this transport.
    fn bind(&mut self, _connection: ConnectionHandle) {}

    /// Releases a previously bound connection.
    fn unbind(&mut self) {}

    fn set_trace(&mut self, _trace: Trace) {}

    /// SASL negotiation handle, if this transport carries one.
    fn sasl(&mut self) -> Option<&mut dyn Sasl> {
        None
    }

    /// TLS session in the given mode, if this transport carries one.
    fn tls(&mut self, _mode: TlsMode) -> Option<&mut dyn TlsSession> {
        None
    }
}
