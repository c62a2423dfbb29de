use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
};

/// Destination for encoded records. One call sends one datagram.
pub trait DatagramSink: Send {
    fn send(&mut self, payload: &[u8]) -> io::Result<()>;
}

/// Fire-and-forget UDP sender bound to an ephemeral local port.
#[derive(Debug)]
pub struct UdpSink {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpSink {
    /// Binds a local socket of the destination's address family.
    pub fn connect(destination: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = match destination {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local)?;

        tracing::info!(
            local = %socket.local_addr()?,
            %destination,
            "udp sink ready"
        );

        Ok(Self {
            socket,
            destination,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

impl DatagramSink for UdpSink {
    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        let sent = self.socket.send_to(payload, self.destination)?;
        if sent != payload.len() {
            tracing::warn!(sent, expected = payload.len(), "partial datagram sent");
        }
        Ok(())
    }
}
