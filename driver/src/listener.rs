use std::{any::Any, io, net::SocketAddr, os::fd::AsRawFd};

use socket2::{SockAddr, Socket};
use strand_io::Event;
use tracing::{error, info};

use crate::{
    driver::{ConnectorId, Driver, ListenerId, listener_token},
    error::{DriverError, Op},
    net,
    transport::Transport,
};

const BACKLOG: i32 = 256;

/// A passive endpoint producing [`Connector`](crate::Connector)s on accept.
pub struct Listener {
    pub(crate) sock: Option<Socket>,
    pub(crate) stamp: u64,
    pub(crate) pending: bool,
    context: Option<Box<dyn Any>>,
}

impl Listener {
    /// True while an incoming connection is waiting to be accepted.
    pub fn pending(&self) -> bool {
        self.pending
    }

    pub fn context(&self) -> Option<&dyn Any> {
        self.context.as_deref()
    }

    pub fn set_context(&mut self, context: Option<Box<dyn Any>>) {
        self.context = context;
    }

    /// Address the socket is bound to, while open. Useful with ephemeral
    /// ports.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.sock.as_ref()?.local_addr().ok()?.as_socket()
    }
}

impl<T: Transport> Driver<T> {
    /// Binds a listening socket on `host:port`.
    ///
    /// Resolution is synchronous; do not call from the hot loop. Failures
    /// are recorded as the driver's last error.
    pub fn listen(
        &mut self,
        host: &str,
        port: u16,
        context: Option<Box<dyn Any>>,
    ) -> Result<ListenerId, DriverError> {
        let addr = net::resolve(host, port).map_err(|e| self.record(e))?;
        let sock = net::tcp_socket(&addr).map_err(|e| self.record(e))?;
        if let Err(e) = sock.set_reuse_address(true) {
            return Err(self.record(DriverError::os(Op::Socket, &e)));
        }
        if let Err(e) = sock.bind(&SockAddr::from(addr)) {
            return Err(self.record(DriverError::os(Op::Bind, &e)));
        }
        if let Err(e) = sock.listen(BACKLOG) {
            return Err(self.record(DriverError::os(Op::Listen, &e)));
        }
        let id = self.adopt_listener_inner(sock, context)?;
        if self.trace().any() {
            info!("Listening on {}:{}", host, port);
        }
        Ok(id)
    }

    /// Adopts an externally prepared listening socket.
    pub fn adopt_listener(
        &mut self,
        sock: impl Into<Socket>,
        context: Option<Box<dyn Any>>,
    ) -> Result<ListenerId, DriverError> {
        self.adopt_listener_inner(sock.into(), context)
    }

    fn adopt_listener_inner(
        &mut self,
        sock: Socket,
        context: Option<Box<dyn Any>>,
    ) -> Result<ListenerId, DriverError> {
        if let Err(e) = sock.set_nonblocking(true) {
            return Err(self.record(DriverError::os(Op::Socket, &e)));
        }
        let stamp = self.next_stamp();
        let fd = sock.as_raw_fd();
        let key = self.listeners.insert(Listener {
            sock: Some(sock),
            stamp,
            pending: false,
            context,
        });
        if let Err(e) = self.poller.add(fd, Event::readable(listener_token(key))) {
            self.listeners.remove(key);
            return Err(self.record(DriverError::os(Op::Register, &e)));
        }
        let id = ListenerId { key, stamp };
        self.listener_order.push(id);
        Ok(id)
    }

    /// Accepts one waiting connection, yielding a connector linked back to
    /// this listener (which selects server-mode TLS for it). Returns `None`
    /// until the listener has been reported ready.
    pub fn accept(&mut self, id: ListenerId) -> Option<ConnectorId> {
        let key = self.listener_key(id)?;
        let result = {
            let l = &mut self.listeners[key];
            if !l.pending {
                return None;
            }
            l.pending = false;
            l.sock.as_ref()?.accept()
        };
        let (sock, peer) = match result {
            Ok(pair) => pair,
            Err(e) => {
                if e.kind() != io::ErrorKind::WouldBlock {
                    error!("accept: {}", e);
                    self.record(DriverError::os(Op::Accept, &e));
                }
                return None;
            }
        };
        let name = peer
            .as_socket()
            .map(|a| a.to_string())
            .unwrap_or_else(|| String::from("unknown"));
        if self.trace().any() {
            info!("Accepted from {}", name);
        }
        self.adopt_connector_inner(sock, name, Some(id), None).ok()
    }

    /// Closes the listening socket. Idempotent; the listener stays on the
    /// driver until freed.
    pub fn close_listener(&mut self, id: ListenerId) {
        let Some(key) = self.listener_key(id) else {
            return;
        };
        let l = &mut self.listeners[key];
        if let Some(sock) = l.sock.take() {
            let _ = self.poller.delete(sock.as_raw_fd());
        }
        l.pending = false;
    }

    /// Releases a listener.
    pub fn free_listener(&mut self, id: ListenerId) {
        let Some(key) = self.listener_key(id) else {
            return;
        };
        if let Some(pos) = self.listener_order.iter().position(|l| l.key == key) {
            // keep the mid-walk cursor on the successor of the removed node
            if pos < self.listener_cursor {
                self.listener_cursor -= 1;
            }
            self.listener_order.remove(pos);
        }
        let mut l = self.listeners.remove(key);
        if let Some(sock) = l.sock.take() {
            let _ = self.poller.delete(sock.as_raw_fd());
        }
    }
}
