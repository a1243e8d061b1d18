//! TCP transport.
//!
//! Packets travel as records on the byte stream:
//!
//! ```text
//! [0..4] : packet length (u32 BE)
//! [4..]  : packet bytes
//! ```
//!
//! The receiver serves one connection at a time. A newly accepted
//! connection replaces the current one, which is how the abort sender
//! reaches a receiver that is blocked on another peer.

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::IpcError;
use crate::socket::{IpcRecver, IpcSender, Peer};
use crate::udp::loopback_for;
use crate::wire::{check_packet_len, DEFAULT_MAX_MSG_LEN};

const RECORD_HEADER_LEN: usize = 4;

pub struct TcpSender {
    target: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
    max_msg_len: usize,
}

impl TcpSender {
    /// The connection is opened by the first send and dropped on error;
    /// the next send reconnects.
    pub fn new(target: SocketAddr) -> Self {
        TcpSender {
            target,
            stream: Mutex::new(None),
            max_msg_len: DEFAULT_MAX_MSG_LEN,
        }
    }

    pub fn with_max_msg_len(mut self, max_msg_len: usize) -> Self {
        self.max_msg_len = max_msg_len;
        self
    }
}

#[async_trait]
impl IpcSender for TcpSender {
    fn max_msg_len(&self) -> usize {
        self.max_msg_len
    }

    async fn send_packet(&self, packet: &[u8]) -> Result<(), IpcError> {
        check_packet_len(packet.len(), self.max_msg_len)?;

        let mut record = BytesMut::with_capacity(RECORD_HEADER_LEN + packet.len());
        record.put_u32(packet.len() as u32);
        record.extend_from_slice(packet);

        let mut guard = self.stream.lock().await;
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => {
                let stream = TcpStream::connect(self.target).await?;
                stream.set_nodelay(true)?;
                debug!("connected to {}", self.target);
                stream
            }
        };

        stream.write_all(&record).await?;
        *guard = Some(stream);
        Ok(())
    }
}

pub struct TcpRecver {
    listener: TcpListener,
    local: SocketAddr,
    active: Option<(u64, TcpStream)>,
    accepted: u64,
    max_msg_len: usize,
}

impl TcpRecver {
    pub async fn bind(addr: SocketAddr) -> Result<Self, IpcError> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        Ok(TcpRecver {
            listener,
            local,
            active: None,
            accepted: 0,
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

    fn replace_active(&mut self, stream: TcpStream, from: SocketAddr) {
        self.accepted += 1;
        if let Some((id, _)) = self.active.take() {
            warn!(
                "connection {} replaced by connection {} from {}, unread data dropped",
                id, self.accepted, from
            );
        }
        info!("connection {} from {}", self.accepted, from);
        self.active = Some((self.accepted, stream));
    }
}

/// Read one record into `buf`. `None` when the peer closed the stream.
async fn read_record(stream: &mut TcpStream, buf: &mut [u8]) -> Result<Option<usize>, IpcError> {
    let len = match stream.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > buf.len() {
        return Err(IpcError::PacketTooLarge {
            len,
            max: buf.len(),
        });
    }
    stream.read_exact(&mut buf[..len]).await?;
    Ok(Some(len))
}

#[async_trait]
impl IpcRecver for TcpRecver {
    fn name(&self) -> String {
        format!("tcp://{}", self.local)
    }

    fn max_msg_len(&self) -> usize {
        self.max_msg_len
    }

    async fn recv_packet(&mut self, buf: &mut [u8]) -> Result<(usize, Peer), IpcError> {
        loop {
            let Some((id, stream)) = self.active.as_mut() else {
                let (stream, from) = self.listener.accept().await?;
                self.replace_active(stream, from);
                continue;
            };
            let id = *id;

            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, from) = accepted?;
                    self.replace_active(stream, from);
                }
                record = read_record(stream, buf) => match record {
                    Ok(Some(n)) => return Ok((n, Peer::Stream(id))),
                    Ok(None) => {
                        debug!("connection {} closed by peer", id);
                        self.active = None;
                    }
                    Err(e) => {
                        warn!("connection {} dropped: {}", id, e);
                        self.active = None;
                    }
                },
            }
        }
    }

    async fn abort_sender(&self) -> Result<Box<dyn IpcSender>, IpcError> {
        let sender = TcpSender::new(loopback_for(self.local)).with_max_msg_len(self.max_msg_len);
        Ok(Box::new(sender))
    }
}
