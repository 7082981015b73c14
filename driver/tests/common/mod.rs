#![allow(dead_code)]

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use strand_driver::{
    ConnectionHandle, ConnectorId, Driver, Flow, TlsMode, TlsSession, Trace, Transport,
};

/// Session handle recording which mode the driver asked for.
pub struct ProbeSession {
    pub mode: TlsMode,
}

impl TlsSession for ProbeSession {
    fn mode(&self) -> TlsMode {
        self.mode
    }
}

/// Configurable in-memory transport for loopback tests.
///
/// Bytes pushed by the driver are recorded in `received` (and, in echo mode,
/// queued straight back out). Bytes queued in `outbound`, by the test or by
/// the echo path, are handed to `pull`. After end of stream both directions
/// report closed once `outbound` drains, which is what lets connectors wind
/// down cleanly.
#[derive(Default)]
pub struct TestTransport {
    pub echo: bool,
    pub reject_input: bool,
    pub reject_output: bool,
    pub push_limit: Option<usize>,
    pub tick_payload: Option<Vec<u8>>,
    pub received: Vec<u8>,
    pub outbound: VecDeque<u8>,
    pub eos: bool,
    pub bound: Option<ConnectionHandle>,
    pub trace: Trace,
    tls: Option<ProbeSession>,
}

impl TestTransport {
    pub fn sink() -> Self {
        Self::default()
    }

    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    pub fn rejecting_input() -> Self {
        Self {
            reject_input: true,
            ..Self::default()
        }
    }

    pub fn rejecting_output() -> Self {
        Self {
            reject_output: true,
            ..Self::default()
        }
    }

    /// Consumes at most `per_push` bytes per push, leaving the rest buffered
    /// on the connector.
    pub fn slow(per_push: usize) -> Self {
        Self {
            push_limit: Some(per_push),
            ..Self::default()
        }
    }

    /// Emits `payload` from its first tick.
    pub fn ticking(payload: &[u8]) -> Self {
        Self {
            tick_payload: Some(payload.to_vec()),
            ..Self::default()
        }
    }
}

impl Transport for TestTransport {
    fn push(&mut self, input: &[u8]) -> Flow {
        if input.is_empty() {
            self.eos = true;
            return Flow::Closed;
        }
        if self.reject_input {
            return Flow::Closed;
        }
        let n = self.push_limit.map_or(input.len(), |cap| cap.min(input.len()));
        self.received.extend_from_slice(&input[..n]);
        if self.echo {
            self.outbound.extend(&input[..n]);
        }
        Flow::Advanced(n)
    }

    fn pull(&mut self, output: &mut [u8]) -> Flow {
        if self.reject_output {
            return Flow::Closed;
        }
        if self.outbound.is_empty() {
            if self.eos {
                return Flow::Closed;
            }
            return Flow::Advanced(0);
        }
        let n = output.len().min(self.outbound.len());
        for (slot, byte) in output.iter_mut().zip(self.outbound.drain(..n)) {
            *slot = byte;
        }
        Flow::Advanced(n)
    }

    fn tick(&mut self, _now: Instant) -> Option<Instant> {
        if let Some(payload) = self.tick_payload.take() {
            self.outbound.extend(payload);
        }
        None
    }

    fn bind(&mut self, connection: ConnectionHandle) {
        self.bound = Some(connection);
    }

    fn unbind(&mut self) {
        self.bound = None;
    }

    fn set_trace(&mut self, trace: Trace) {
        self.trace = trace;
    }

    fn tls(&mut self, mode: TlsMode) -> Option<&mut dyn TlsSession> {
        Some(self.tls.get_or_insert(ProbeSession { mode }) as &mut dyn TlsSession)
    }
}

pub fn echo_driver() -> Driver<TestTransport> {
    Driver::with_trace(TestTransport::echoing, Trace::OFF).unwrap()
}

pub fn sink_driver() -> Driver<TestTransport> {
    Driver::with_trace(TestTransport::sink, Trace::OFF).unwrap()
}

/// One wait/drain cycle: accept every ready listener, process every ready
/// connector. Returns the connectors accepted during the cycle.
pub fn cycle(d: &mut Driver<TestTransport>, timeout: Duration) -> Vec<ConnectorId> {
    d.wait(Some(timeout));
    let mut accepted = Vec::new();
    while let Some(l) = d.next_ready_listener() {
        if let Some(c) = d.accept(l) {
            accepted.push(c);
        }
    }
    while let Some(c) = d.next_ready_connector() {
        d.process(c);
    }
    accepted
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
