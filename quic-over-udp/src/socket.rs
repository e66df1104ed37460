//! Async datagram socket abstraction.
//!
//! [`DatagramSocket`] is the only I/O the transport needs: send one datagram,
//! receive one datagram.  [`Socket`] implements it over a tokio
//! `UdpSocket`; [`crate::simulator::Simulator`] wraps any implementation and
//! injects faults.  Decoding happens in the connection, so this layer only
//! moves bytes.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

pub use crate::error::DatagramError;

/// Unreliable, unordered datagram delivery.
pub trait DatagramSocket: Send + Sync + 'static {
    fn send_to(
        &self,
        datagram: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = Result<(), DatagramError>> + Send;

    /// Receive one datagram into `buf`; returns its length and sender.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(usize, SocketAddr), DatagramError>> + Send;

    fn local_addr(&self) -> SocketAddr;
}

/// Lets a caller keep a handle on a socket the session owns, e.g. to change
/// a [`crate::simulator::Simulator`]'s fault model mid-test.
impl<T: DatagramSocket> DatagramSocket for Arc<T> {
    fn send_to(
        &self,
        datagram: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = Result<(), DatagramError>> + Send {
        (**self).send_to(datagram, dest)
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(usize, SocketAddr), DatagramError>> + Send {
        (**self).recv_from(buf)
    }

    fn local_addr(&self) -> SocketAddr {
        (**self).local_addr()
    }
}

/// A bound UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `127.0.0.1:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, DatagramError> {
        let inner = UdpSocket::bind(local_addr)
            .await
            .map_err(DatagramError::Bind)?;
        let local_addr = inner.local_addr().map_err(DatagramError::Bind)?;
        Ok(Self { local_addr, inner })
    }
}

impl DatagramSocket for Socket {
    async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), DatagramError> {
        self.inner
            .send_to(datagram, dest)
            .await
            .map_err(DatagramError::Send)?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), DatagramError> {
        self.inner.recv_from(buf).await.map_err(DatagramError::Recv)
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Receive one datagram, giving up after `timeout`.
pub async fn recv_with_timeout<S: DatagramSocket>(
    socket: &S,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<(usize, SocketAddr), DatagramError> {
    tokio::time::timeout(timeout, socket.recv_from(buf))
        .await
        .map_err(|_| DatagramError::Timeout)?
}
