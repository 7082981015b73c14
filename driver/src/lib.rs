//! Non-blocking connection driver for an AMQP-family messaging stack.
//!
//! A [`Driver`] multiplexes a dynamic set of listening sockets and
//! bidirectional connections on a single-threaded readiness loop. Each
//! connection ([`Connector`]) pairs a socket with fixed-capacity input and
//! output buffers and a pluggable byte-oriented [`Transport`]; the driver
//! moves bytes between the two and surfaces ready endpoints back to the
//! embedder, which owns all protocol state.
//!
//! The embedding loop is two-phase:
//!
//! ```no_run
//! # use std::time::Duration;
//! # use strand_driver::{Driver, Flow, Transport};
//! # struct Amqp;
//! # impl Transport for Amqp {
//! #     fn push(&mut self, input: &[u8]) -> Flow { Flow::Advanced(input.len()) }
//! #     fn pull(&mut self, _output: &mut [u8]) -> Flow { Flow::Advanced(0) }
//! # }
//! let mut driver = Driver::new(|| Amqp)?;
//! driver.listen("127.0.0.1", 5672, None)?;
//!
//! loop {
//!     driver.wait(Some(Duration::from_secs(1)));
//!     while let Some(listener) = driver.next_ready_listener() {
//!         let _accepted = driver.accept(listener);
//!     }
//!     while let Some(connector) = driver.next_ready_connector() {
//!         driver.process(connector);
//!         // inspect the connector's transport/connection for events here
//!     }
//! }
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! All state on a driver is owned by the thread calling it; the sole
//! cross-thread operation is [`Driver::wake_handle`], which breaks a
//! concurrent [`Driver::wait`].

#![forbid(unsafe_code)]

mod buf;
mod connector;
mod driver;
mod error;
mod handler;
mod listener;
mod net;
mod trace;
mod transport;

pub use connector::{Connector, IO_BUF_SIZE};
pub use driver::{ConnectorId, Driver, ListenerId};
pub use error::{DriverError, Op};
pub use handler::{DefaultIo, IoHandler, NullIo, Shutdown};
pub use listener::Listener;
pub use trace::Trace;
pub use transport::{ConnectionHandle, Flow, Sasl, TlsMode, TlsSession, Transport};

#[cfg(not(unix))]
compile_error!("strand-driver only supports unix-family platforms");
