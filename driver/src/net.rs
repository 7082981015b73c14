use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{DriverError, Op};

/// Synchronous name resolution. Deliberately blocking; endpoint constructors
/// must not be called from the hot loop.
pub(crate) fn resolve(host: &str, port: u16) -> Result<SocketAddr, DriverError> {
    match (host, port).to_socket_addrs() {
        Ok(mut addrs) => addrs
            .next()
            .ok_or_else(|| DriverError::detail(Op::Resolve, format!("no address for {host}:{port}"))),
        Err(e) => Err(DriverError::os(Op::Resolve, &e)),
    }
}

pub(crate) fn tcp_socket(addr: &SocketAddr) -> Result<Socket, DriverError> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(|e| DriverError::os(Op::Socket, &e))
}

/// Nonblocking with SIGPIPE suppressed; every socket the driver drives goes
/// through here.
pub(crate) fn configure(sock: &Socket) -> io::Result<()> {
    sock.set_nonblocking(true)?;
    #[cfg(target_vendor = "apple")]
    sock.set_nosigpipe(true)?;
    Ok(())
}
