//! The stream transports a shim can wrap.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

/// An ordered, reliable byte-stream connection that a [`SimulatedStream`] can wrap.
///
/// Implemented for [`TcpStream`] and for the in-memory [`DuplexStream`], which is
/// handy in tests because it needs no sockets at all.
///
/// [`SimulatedStream`]: crate::SimulatedStream
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// The local address of the connection.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// The remote address of the connection.
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl Transport for TcpStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

impl Transport for DuplexStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "in-memory pipe has no socket address",
        ))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "in-memory pipe has no socket address",
        ))
    }
}
