//! Abstract async datagram transport for the tunnel driver.
//!
//! The [`Transport`] trait lets the driver run the tunnel over any
//! medium that can move addressed datagrams. Enable the `tokio`
//! feature (on by default) for the built-in [`UdpTransport`] backed by
//! `tokio::net::UdpSocket`.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

/// Boxed future returned by [`Transport::send_to`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = io::Result<usize>> + Send + 'a>>;

/// Boxed future returned by [`Transport::recv_from`].
pub type RecvFuture<'a> =
    Pin<Box<dyn Future<Output = io::Result<(usize, SocketAddr)>> + Send + 'a>>;

/// Async datagram transport consumed by the tunnel driver.
///
/// The trait is object-safe so drivers can hold `Arc<dyn Transport>`
/// when they need to.
pub trait Transport: Send + Sync + 'static {
    /// Send one datagram to `target`, returning the bytes written.
    fn send_to<'a>(&'a self, datagram: &'a [u8], target: SocketAddr) -> SendFuture<'a>;

    /// Receive one datagram into `buf`, returning its length and the
    /// remote address it came from. Datagrams longer than `buf` are
    /// truncated.
    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> RecvFuture<'a>;

    /// The local address this transport is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[cfg(feature = "tokio")]
mod udp {
    use super::*;
    use tokio::net::UdpSocket;

    /// Default [`Transport`] implementation over a UDP socket.
    pub struct UdpTransport {
        socket: UdpSocket,
    }

    impl UdpTransport {
        /// Bind a new UDP socket to `addr`.
        pub async fn bind(addr: impl tokio::net::ToSocketAddrs) -> io::Result<Self> {
            let socket = UdpSocket::bind(addr).await?;
            Ok(Self { socket })
        }

        /// Wrap an already-configured socket.
        pub fn new(socket: UdpSocket) -> Self {
            Self { socket }
        }
    }

    impl Transport for UdpTransport {
        fn send_to<'a>(&'a self, datagram: &'a [u8], target: SocketAddr) -> SendFuture<'a> {
            Box::pin(self.socket.send_to(datagram, target))
        }

        fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> RecvFuture<'a> {
            Box::pin(self.socket.recv_from(buf))
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            self.socket.local_addr()
        }
    }
}

#[cfg(feature = "tokio")]
pub use udp::UdpTransport;
