//! Transport seams.
//!
//! A transport supplies a packet sender and a bound packet receiver; the
//! framing on top of them lives in [`crate::LocIpc`].

use std::net::SocketAddr;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::IpcError;

/// Where a packet came from. Fragments of one message are only
/// accepted from the peer that sent its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer {
    /// Unix-domain sender; unbound senders have no path.
    Local(Option<PathBuf>),
    Inet(SocketAddr),
    /// Accepted TCP connection, numbered in accept order.
    Stream(u64),
}

#[async_trait]
pub trait IpcSender: Send + Sync {
    fn max_msg_len(&self) -> usize;

    /// Send one packet of at most [`IpcSender::max_msg_len`] bytes.
    async fn send_packet(&self, packet: &[u8]) -> Result<(), IpcError>;
}

#[async_trait]
pub trait IpcRecver: Send {
    /// Human-readable address, for logs.
    fn name(&self) -> String;

    fn max_msg_len(&self) -> usize;

    /// Wait for one packet and copy it into `buf`.
    async fn recv_packet(&mut self, buf: &mut [u8]) -> Result<(usize, Peer), IpcError>;

    /// A sender addressed at this receiver, used to deliver the abort
    /// sentinel.
    async fn abort_sender(&self) -> Result<Box<dyn IpcSender>, IpcError>;
}

/// Receives complete logical messages.
pub trait IpcListener: Send + Sync {
    fn on_receive(&self, data: &[u8]);

    /// Called once the socket is bound, before the first receive.
    fn on_listener_ready(&self) {}
}
