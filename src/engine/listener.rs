//! Listening socket setup shared by all engines.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};

const BACKLOG: i32 = 512;

/// Create a TCP listener bound to `0.0.0.0:port`.
///
/// Address and port reuse are enabled so benchmark runs can restart
/// without waiting out TIME_WAIT. Non-blocking mode is applied only for
/// the readiness engine; the completion engines submit accepts to the
/// ring against a blocking listener.
pub fn create_listener(port: u16, nonblocking: bool) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    if nonblocking {
        socket.set_nonblocking(true)?;
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
