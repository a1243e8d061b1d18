// crates/loc-ipc/tests/transports.rs
//
// End-to-end runs of LocIpc over every transport.

use std::sync::Arc;
use std::time::Duration;

use loc_ipc::{
    IpcListener, IpcRecver, IpcSender, LocIpc, LocalRecver, LocalSender, TcpRecver, TcpSender,
    UdpRecver, UdpSender,
};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Forwards every delivered message into a channel.
struct ChannelListener {
    ready: Arc<Notify>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl IpcListener for ChannelListener {
    fn on_receive(&self, data: &[u8]) {
        let _ = self.tx.send(data.to_vec());
    }

    fn on_listener_ready(&self) {
        self.ready.notify_one();
    }
}

struct Harness {
    ipc: LocIpc,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Harness {
    async fn start(recver: Box<dyn IpcRecver>) -> Harness {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let ready = Arc::new(Notify::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let ipc = LocIpc::new();
        assert!(ipc.start_listening_non_blocking(
            recver,
            Arc::new(ChannelListener {
                ready: ready.clone(),
                tx,
            }),
        ));
        timeout(WAIT, ready.notified())
            .await
            .expect("listener never became ready");
        Harness { ipc, rx }
    }

    async fn next(&mut self) -> Vec<u8> {
        timeout(WAIT, self.rx.recv())
            .await
            .expect("no message")
            .expect("listener gone")
    }

    /// Stop the loop and check nothing else was delivered.
    async fn stop(mut self) {
        assert!(self.ipc.stop_listening().await);
        assert!(!self.ipc.is_listening());
        assert!(self.rx.try_recv().is_err());
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

async fn exercise(recver: Box<dyn IpcRecver>, sender: &dyn IpcSender) {
    let mut harness = Harness::start(recver).await;

    let big = payload(10 * sender.max_msg_len() + 17);
    assert!(LocIpc::send(sender, &big).await);
    assert_eq!(harness.next().await, big);

    assert!(LocIpc::send(sender, b"first").await);
    assert!(LocIpc::send(sender, b"second").await);
    assert_eq!(harness.next().await, b"first".to_vec());
    assert_eq!(harness.next().await, b"second".to_vec());

    harness.stop().await;
}

#[tokio::test]
async fn local_datagram_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("loc_ipc.sock");

    let recver = LocalRecver::bind(&path)?.with_max_msg_len(512);
    let sender = LocalSender::new(&path)?.with_max_msg_len(512);
    exercise(Box::new(recver), &sender).await;

    // The receiver removed its socket when the loop ended.
    assert!(!path.exists());
    Ok(())
}

#[tokio::test]
async fn udp_round_trip() -> anyhow::Result<()> {
    let recver = UdpRecver::bind("127.0.0.1:0".parse()?).await?;
    let sender = UdpSender::new(recver.local_addr()).await?;
    exercise(Box::new(recver), &sender).await;
    Ok(())
}

#[tokio::test]
async fn tcp_round_trip() -> anyhow::Result<()> {
    let recver = TcpRecver::bind("127.0.0.1:0".parse()?).await?;
    let sender = TcpSender::new(recver.local_addr()).with_max_msg_len(256);
    exercise(Box::new(recver.with_max_msg_len(256)), &sender).await;
    Ok(())
}

#[tokio::test]
async fn abort_unblocks_idle_blocking_listener() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let recver = LocalRecver::bind(dir.path().join("idle.sock"))?;

    let ready = Arc::new(Notify::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = Arc::new(ChannelListener {
        ready: ready.clone(),
        tx,
    });

    let ipc = Arc::new(LocIpc::new());
    let looping = {
        let ipc = ipc.clone();
        tokio::spawn(async move { ipc.start_listening_blocking(Box::new(recver), listener).await })
    };

    timeout(WAIT, ready.notified()).await?;
    assert!(ipc.is_listening());
    assert!(ipc.abort().await);

    assert!(timeout(WAIT, looping).await??);
    assert!(rx.try_recv().is_err());
    assert!(!ipc.abort().await);
    Ok(())
}

#[tokio::test]
async fn receiver_drops_packets_over_its_own_limit() -> anyhow::Result<()> {
    let recver = UdpRecver::bind("127.0.0.1:0".parse()?).await?;
    let sender = UdpSender::new(recver.local_addr()).await?;
    let mut harness = Harness::start(Box::new(recver.with_max_msg_len(512))).await;

    // Fits the sender's default limit, not the receiver's.
    assert!(LocIpc::send(&sender, &[7u8; 800]).await);
    assert!(LocIpc::send(&sender, b"after").await);
    assert_eq!(harness.next().await, b"after".to_vec());

    harness.stop().await;
    Ok(())
}

#[tokio::test]
async fn send_to_missing_socket_fails() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let sender = LocalSender::new(dir.path().join("nobody.sock"))?;
    assert!(!LocIpc::send(&sender, b"hello").await);
    Ok(())
}
