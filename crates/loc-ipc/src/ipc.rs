//! Fragmenting sender and reassembling listen loop.
//!
//! This module:
//! - splits payloads larger than the transport's packet size into a
//!   header plus fixed-size chunks,
//! - runs the receive loop that hands complete messages to an
//!   [`IpcListener`],
//! - stops that loop from any task by sending the abort sentinel to the
//!   receiver's own address.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::error::IpcError;
use crate::socket::{IpcListener, IpcRecver, IpcSender, Peer};
use crate::wire::{self, Frame};

type AbortSlot = Arc<Mutex<Option<Arc<dyn IpcSender>>>>;

/// Result of one pass of the receive loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Recv {
    Continue,
    Aborted,
}

#[derive(Default)]
pub struct LocIpc {
    abort: AbortSlot,
    worker: Mutex<Option<JoinHandle<bool>>>,
}

impl LocIpc {
    pub fn new() -> Self {
        LocIpc::default()
    }

    /// Send `data` as one logical message. Failures are logged.
    pub async fn send(sender: &dyn IpcSender, data: &[u8]) -> bool {
        match send_message(sender, data).await {
            Ok(()) => true,
            Err(e) => {
                error!("cannot send {} bytes: {}", data.len(), e);
                false
            }
        }
    }

    pub fn is_listening(&self) -> bool {
        slot(&self.abort).is_some()
    }

    /// Run the listen loop on the calling task until aborted or the
    /// socket fails. Returns `true` only when stopped by an abort.
    pub async fn start_listening_blocking(
        &self,
        recver: Box<dyn IpcRecver>,
        listener: Arc<dyn IpcListener>,
    ) -> bool {
        listen(self.abort.clone(), recver, listener).await
    }

    /// Run the listen loop on a spawned task. Needs a tokio runtime.
    pub fn start_listening_non_blocking(
        &self,
        recver: Box<dyn IpcRecver>,
        listener: Arc<dyn IpcListener>,
    ) -> bool {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!("cannot start listener for {}: {}", recver.name(), e);
                return false;
            }
        };

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|w| !w.is_finished()) {
            warn!("listener already running, not starting {}", recver.name());
            return false;
        }

        let span = tracing::info_span!("LocIpc", name = %recver.name());
        *worker = Some(handle.spawn(listen(self.abort.clone(), recver, listener).instrument(span)));
        true
    }

    /// Unblock a pending receive by sending the abort sentinel to the
    /// receiver's own address.
    pub async fn abort(&self) -> bool {
        let Some(sender) = slot(&self.abort).clone() else {
            warn!("abort: {}", IpcError::NotListening);
            return false;
        };
        match sender.send_packet(wire::MSG_ABORT).await {
            Ok(()) => true,
            Err(e) => {
                error!("cannot send abort: {}", e);
                false
            }
        }
    }

    /// Abort the listen loop and, for the non-blocking variant, wait for
    /// its task. Returns the loop's result.
    pub async fn stop_listening(&self) -> bool {
        let aborted = self.abort().await;
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match worker {
            Some(worker) if !aborted => {
                // Loop not reachable through its socket yet; cancel the task.
                worker.abort();
                false
            }
            Some(worker) => match worker.await {
                Ok(stopped) => stopped,
                Err(e) => {
                    error!("listener task failed: {}", e);
                    false
                }
            },
            None => aborted,
        }
    }
}

fn slot(abort: &AbortSlot) -> std::sync::MutexGuard<'_, Option<Arc<dyn IpcSender>>> {
    abort.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn send_message(sender: &dyn IpcSender, data: &[u8]) -> Result<(), IpcError> {
    let max = sender.max_msg_len();
    if data.len() <= max {
        return sender.send_packet(data).await;
    }

    debug!("fragmenting {} bytes into {}-byte packets", data.len(), max);
    sender.send_packet(&wire::encode_header(data.len())).await?;
    for chunk in data.chunks(max) {
        sender.send_packet(chunk).await?;
    }
    Ok(())
}

async fn listen(
    abort: AbortSlot,
    mut recver: Box<dyn IpcRecver>,
    listener: Arc<dyn IpcListener>,
) -> bool {
    let name = recver.name();
    match recver.abort_sender().await {
        Ok(sender) => {
            *slot(&abort) = Some(Arc::from(sender));
        }
        Err(e) => {
            error!("cannot create abort sender for {}: {}", name, e);
            return false;
        }
    }

    info!("listening on {}", name);
    listener.on_listener_ready();

    // One spare byte so a datagram over the limit shows up as such.
    let mut buf = vec![0u8; wire::recv_buf_len(recver.max_msg_len()) + 1];
    let result = loop {
        match recv_once(recver.as_mut(), listener.as_ref(), &mut buf).await {
            Ok(Recv::Continue) => {}
            Ok(Recv::Aborted) => break true,
            Err(e) => {
                error!("cannot read {}: {}", name, e);
                break false;
            }
        }
    };

    *slot(&abort) = None;
    info!("stopped listening on {}", name);
    result
}

async fn recv_once(
    recver: &mut dyn IpcRecver,
    listener: &dyn IpcListener,
    buf: &mut [u8],
) -> Result<Recv, IpcError> {
    let (n, peer) = recver.recv_packet(buf).await?;
    if n == 0 {
        return Ok(Recv::Continue);
    }
    if n > packet_limit(buf) {
        warn!("dropping oversized packet from {:?}", peer);
        return Ok(Recv::Continue);
    }

    match wire::classify(&buf[..n]) {
        Ok(Frame::Abort) => Ok(Recv::Aborted),
        Ok(Frame::Whole) => {
            listener.on_receive(&buf[..n]);
            Ok(Recv::Continue)
        }
        Ok(Frame::Header(0)) => {
            debug!("empty fragmented message from {:?}", peer);
            Ok(Recv::Continue)
        }
        Ok(Frame::Header(len)) if len > wire::MAX_ASSEMBLED_LEN => {
            warn!(
                "dropping header from {:?}: {} bytes announced, limit {}",
                peer,
                len,
                wire::MAX_ASSEMBLED_LEN
            );
            Ok(Recv::Continue)
        }
        Ok(Frame::Header(len)) => reassemble(recver, listener, buf, peer, len).await,
        Err(e) => {
            warn!("dropping packet from {:?}: {}", peer, e);
            Ok(Recv::Continue)
        }
    }
}

async fn reassemble(
    recver: &mut dyn IpcRecver,
    listener: &dyn IpcListener,
    buf: &mut [u8],
    peer: Peer,
    len: usize,
) -> Result<Recv, IpcError> {
    let limit = packet_limit(buf);
    // Grows with the fragments; the header alone never sizes it.
    let mut msg = BytesMut::with_capacity(len.min(limit));

    while msg.len() < len {
        let (n, from) = recver.recv_packet(buf).await?;
        let packet = &buf[..n];
        if wire::is_abort(packet) {
            debug!("abort with {} of {} bytes assembled", msg.len(), len);
            return Ok(Recv::Aborted);
        }
        if from != peer {
            warn!("dropping {} bytes from {:?} while assembling from {:?}", n, from, peer);
            continue;
        }
        if n > limit {
            warn!(
                "oversized fragment from {:?}, abandoning {} of {} bytes",
                peer,
                msg.len(),
                len
            );
            return Ok(Recv::Continue);
        }
        msg.extend_from_slice(packet);
    }

    if msg.len() > len {
        warn!("{:?} sent {} bytes, header said {}", peer, msg.len(), len);
        msg.truncate(len);
    }
    listener.on_receive(&msg);
    Ok(Recv::Continue)
}

/// Largest packet the loop accepts; `buf` holds one byte more.
fn packet_limit(buf: &[u8]) -> usize {
    buf.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;

    /// Replays scripted packets, then parks forever.
    struct ScriptedRecver {
        packets: VecDeque<(Vec<u8>, Peer)>,
        max: usize,
    }

    impl ScriptedRecver {
        fn new(max: usize, packets: Vec<(Vec<u8>, Peer)>) -> Box<Self> {
            Box::new(ScriptedRecver {
                packets: packets.into(),
                max,
            })
        }
    }

    #[async_trait]
    impl IpcRecver for ScriptedRecver {
        fn name(&self) -> String {
            "scripted".into()
        }

        fn max_msg_len(&self) -> usize {
            self.max
        }

        async fn recv_packet(&mut self, buf: &mut [u8]) -> Result<(usize, Peer), IpcError> {
            match self.packets.pop_front() {
                Some((packet, peer)) => {
                    // Datagram semantics: the tail past `buf` is lost.
                    let n = packet.len().min(buf.len());
                    buf[..n].copy_from_slice(&packet[..n]);
                    Ok((n, peer))
                }
                None => std::future::pending().await,
            }
        }

        async fn abort_sender(&self) -> Result<Box<dyn IpcSender>, IpcError> {
            Ok(Box::new(RecordingSender::new(self.max)))
        }
    }

    struct RecordingSender {
        max: usize,
        packets: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingSender {
        fn new(max: usize) -> Self {
            RecordingSender {
                max,
                packets: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl IpcSender for RecordingSender {
        fn max_msg_len(&self) -> usize {
            self.max
        }

        async fn send_packet(&self, packet: &[u8]) -> Result<(), IpcError> {
            self.packets.lock().unwrap().push(packet.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct Collector {
        messages: Mutex<Vec<Vec<u8>>>,
    }

    impl IpcListener for Collector {
        fn on_receive(&self, data: &[u8]) {
            self.messages.lock().unwrap().push(data.to_vec());
        }
    }

    fn pkt(bytes: &[u8], port: u16) -> (Vec<u8>, Peer) {
        (bytes.to_vec(), Peer::Inet(([127, 0, 0, 1], port).into()))
    }

    #[tokio::test]
    async fn large_payload_is_header_then_chunks() {
        let sender = RecordingSender::new(4);
        assert!(LocIpc::send(&sender, b"0123456789").await);

        let packets = sender.packets.lock().unwrap();
        assert_eq!(
            *packets,
            vec![
                b"$MSGLEN$10".to_vec(),
                b"0123".to_vec(),
                b"4567".to_vec(),
                b"89".to_vec(),
            ]
        );
    }

    #[tokio::test]
    async fn payload_at_limit_goes_out_whole() {
        let sender = RecordingSender::new(4);
        assert!(LocIpc::send(&sender, b"abcd").await);
        assert_eq!(*sender.packets.lock().unwrap(), vec![b"abcd".to_vec()]);
    }

    #[tokio::test]
    async fn fragments_from_other_peers_are_dropped() {
        let recver = ScriptedRecver::new(
            4,
            vec![
                pkt(b"$MSGLEN$6", 1),
                pkt(b"abcd", 1),
                pkt(b"zzzz", 2),
                pkt(b"", 1),
                pkt(b"ef", 1),
                pkt(b"solo", 2),
                pkt(wire::MSG_ABORT, 3),
            ],
        );
        let collector = Arc::new(Collector::default());

        let stopped = LocIpc::new()
            .start_listening_blocking(recver, collector.clone())
            .await;

        assert!(stopped);
        assert_eq!(
            *collector.messages.lock().unwrap(),
            vec![b"abcdef".to_vec(), b"solo".to_vec()]
        );
    }

    #[tokio::test]
    async fn abort_mid_assembly_delivers_nothing() {
        let recver = ScriptedRecver::new(
            4,
            vec![
                pkt(b"$MSGLEN$12", 1),
                pkt(b"abcd", 1),
                pkt(wire::MSG_ABORT, 9),
                pkt(b"efgh", 1),
            ],
        );
        let collector = Arc::new(Collector::default());

        assert!(
            LocIpc::new()
                .start_listening_blocking(recver, collector.clone())
                .await
        );
        assert!(collector.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_and_malformed_packets_are_skipped() {
        let recver = ScriptedRecver::new(
            16,
            vec![
                pkt(b"", 1),
                pkt(b"$MSGLEN$", 1),
                pkt(b"$MSGLEN$0", 1),
                pkt(b"ok", 1),
                pkt(wire::MSG_ABORT, 1),
            ],
        );
        let collector = Arc::new(Collector::default());

        assert!(
            LocIpc::new()
                .start_listening_blocking(recver, collector.clone())
                .await
        );
        assert_eq!(*collector.messages.lock().unwrap(), vec![b"ok".to_vec()]);
    }

    #[tokio::test]
    async fn abort_without_listener_fails() {
        let ipc = LocIpc::new();
        assert!(!ipc.is_listening());
        assert!(!ipc.abort().await);
    }

    #[tokio::test]
    async fn oversized_headers_are_dropped() {
        let too_big = format!("$MSGLEN${}", wire::MAX_ASSEMBLED_LEN + 1);
        let recver = ScriptedRecver::new(
            4,
            vec![
                pkt(format!("$MSGLEN${}", usize::MAX).as_bytes(), 1),
                pkt(too_big.as_bytes(), 1),
                pkt(b"ok", 1),
                pkt(wire::MSG_ABORT, 1),
            ],
        );
        let collector = Arc::new(Collector::default());

        assert!(
            LocIpc::new()
                .start_listening_blocking(recver, collector.clone())
                .await
        );
        assert_eq!(*collector.messages.lock().unwrap(), vec![b"ok".to_vec()]);
    }

    #[tokio::test]
    async fn packets_over_the_limit_are_dropped_not_truncated() {
        let max = 32;
        let limit = wire::recv_buf_len(max);
        let recver = ScriptedRecver::new(
            max,
            vec![
                pkt(&vec![7u8; limit + 8], 1),
                pkt(format!("$MSGLEN${}", 2 * limit).as_bytes(), 1),
                pkt(&vec![1u8; limit], 1),
                pkt(&vec![2u8; limit + 1], 1),
                pkt(&vec![3u8; limit], 1),
                pkt(wire::MSG_ABORT, 1),
            ],
        );
        let collector = Arc::new(Collector::default());

        assert!(
            LocIpc::new()
                .start_listening_blocking(recver, collector.clone())
                .await
        );
        // The oversized whole packet and the broken message are gone;
        // only the packet at the limit arrives, intact.
        assert_eq!(*collector.messages.lock().unwrap(), vec![vec![3u8; limit]]);
    }
}
