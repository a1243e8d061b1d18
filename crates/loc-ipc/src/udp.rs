//! UDP transport. One datagram per packet.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::error::IpcError;
use crate::socket::{IpcRecver, IpcSender, Peer};
use crate::wire::{check_packet_len, DEFAULT_MAX_MSG_LEN};

pub struct UdpSender {
    socket: UdpSocket,
    target: SocketAddr,
    max_msg_len: usize,
}

impl UdpSender {
    /// Sender bound to an ephemeral port of the target's address family.
    pub async fn new(target: SocketAddr) -> Result<Self, IpcError> {
        let local: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        Ok(UdpSender {
            socket: UdpSocket::bind(local).await?,
            target,
            max_msg_len: DEFAULT_MAX_MSG_LEN,
        })
    }

    pub fn with_max_msg_len(mut self, max_msg_len: usize) -> Self {
        self.max_msg_len = max_msg_len;
        self
    }
}

#[async_trait]
impl IpcSender for UdpSender {
    fn max_msg_len(&self) -> usize {
        self.max_msg_len
    }

    async fn send_packet(&self, packet: &[u8]) -> Result<(), IpcError> {
        check_packet_len(packet.len(), self.max_msg_len)?;
        self.socket.send_to(packet, self.target).await?;
        Ok(())
    }
}

pub struct UdpRecver {
    socket: UdpSocket,
    local: SocketAddr,
    max_msg_len: usize,
}

impl UdpRecver {
    pub async fn bind(addr: SocketAddr) -> Result<Self, IpcError> {
        let socket = UdpSocket::bind(addr).await?;
        let local = socket.local_addr()?;
        Ok(UdpRecver {
            socket,
            local,
            max_msg_len: DEFAULT_MAX_MSG_LEN,
        })
    }

    pub fn with_max_msg_len(mut self, max_msg_len: usize) -> Self {
        self.max_msg_len = max_msg_len;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

/// Address to reach `local` from this host: the wildcard address maps to
/// loopback.
pub(crate) fn loopback_for(local: SocketAddr) -> SocketAddr {
    match local {
        SocketAddr::V4(v4) if v4.ip().is_unspecified() => (Ipv4Addr::LOCALHOST, v4.port()).into(),
        SocketAddr::V6(v6) if v6.ip().is_unspecified() => (Ipv6Addr::LOCALHOST, v6.port()).into(),
        other => other,
    }
}

#[async_trait]
impl IpcRecver for UdpRecver {
    fn name(&self) -> String {
        format!("udp://{}", self.local)
    }

    fn max_msg_len(&self) -> usize {
        self.max_msg_len
    }

    async fn recv_packet(&mut self, buf: &mut [u8]) -> Result<(usize, Peer), IpcError> {
        let (n, from) = self.socket.recv_from(buf).await?;
        Ok((n, Peer::Inet(from)))
    }

    async fn abort_sender(&self) -> Result<Box<dyn IpcSender>, IpcError> {
        let sender = UdpSender::new(loopback_for(self.local))
            .await?
            .with_max_msg_len(self.max_msg_len);
        Ok(Box::new(sender))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_maps_to_loopback() {
        let any: SocketAddr = "0.0.0.0:2947".parse().unwrap();
        assert_eq!(loopback_for(any), "127.0.0.1:2947".parse().unwrap());

        let any6: SocketAddr = "[::]:2947".parse().unwrap();
        assert_eq!(loopback_for(any6), "[::1]:2947".parse().unwrap());

        let fixed: SocketAddr = "10.0.0.2:2947".parse().unwrap();
        assert_eq!(loopback_for(fixed), fixed);
    }
}
