use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Non-blocking datagram I/O used by the scheduler.
pub trait Transport {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// `Ok(None)` when nothing is queued.
    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;
}

impl Transport for UdpSocket {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.try_send_to(buf, target)
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match UdpSocket::try_recv_from(self, buf) {
            Ok(received) => Ok(Some(received)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }
}
