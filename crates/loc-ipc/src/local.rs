//! Unix-domain datagram transport.
//!
//! The receiver owns its socket path: a stale file is unlinked before
//! bind, the new file is made owner read/write plus group write, and it
//! is removed again when the receiver is dropped.

use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::net::UnixDatagram;
use tracing::{debug, warn};

use crate::error::IpcError;
use crate::socket::{IpcRecver, IpcSender, Peer};
use crate::wire::{check_packet_len, DEFAULT_MAX_MSG_LEN};

const SOCKET_MODE: u32 = 0o620;

pub struct LocalSender {
    socket: UnixDatagram,
    path: PathBuf,
    max_msg_len: usize,
}

impl LocalSender {
    /// Unbound sender addressed at `path`. Needs a tokio runtime.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, IpcError> {
        Ok(LocalSender {
            socket: UnixDatagram::unbound()?,
            path: path.into(),
            max_msg_len: DEFAULT_MAX_MSG_LEN,
        })
    }

    pub fn with_max_msg_len(mut self, max_msg_len: usize) -> Self {
        self.max_msg_len = max_msg_len;
        self
    }
}

#[async_trait]
impl IpcSender for LocalSender {
    fn max_msg_len(&self) -> usize {
        self.max_msg_len
    }

    async fn send_packet(&self, packet: &[u8]) -> Result<(), IpcError> {
        check_packet_len(packet.len(), self.max_msg_len)?;
        self.socket.send_to(packet, &self.path).await?;
        Ok(())
    }
}

pub struct LocalRecver {
    socket: UnixDatagram,
    path: PathBuf,
    max_msg_len: usize,
}

impl LocalRecver {
    /// Bind a datagram socket at `path`. Needs a tokio runtime.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, IpcError> {
        let path = path.into();

        match fs::remove_file(&path) {
            Ok(()) => debug!("removed stale socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("cannot unlink {}: {}", path.display(), e),
        }

        let socket = UnixDatagram::bind(&path)?;
        fs::set_permissions(&path, Permissions::from_mode(SOCKET_MODE))?;

        Ok(LocalRecver {
            socket,
            path,
            max_msg_len: DEFAULT_MAX_MSG_LEN,
        })
    }

    pub fn with_max_msg_len(mut self, max_msg_len: usize) -> Self {
        self.max_msg_len = max_msg_len;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IpcRecver for LocalRecver {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn max_msg_len(&self) -> usize {
        self.max_msg_len
    }

    async fn recv_packet(&mut self, buf: &mut [u8]) -> Result<(usize, Peer), IpcError> {
        let (n, addr) = self.socket.recv_from(buf).await?;
        Ok((n, Peer::Local(addr.as_pathname().map(Path::to_path_buf))))
    }

    async fn abort_sender(&self) -> Result<Box<dyn IpcSender>, IpcError> {
        let sender = LocalSender::new(&self.path)?.with_max_msg_len(self.max_msg_len);
        Ok(Box::new(sender))
    }
}

impl Drop for LocalRecver {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("cannot remove {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_replaces_stale_file_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loc.sock");
        fs::write(&path, b"stale").unwrap();

        let recver = LocalRecver::bind(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, SOCKET_MODE);

        drop(recver);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn sender_rejects_oversized_packets() {
        let dir = tempfile::tempdir().unwrap();
        let sender = LocalSender::new(dir.path().join("nobody"))
            .unwrap()
            .with_max_msg_len(64);

        let err = sender.send_packet(&[0u8; 65]).await.unwrap_err();
        assert!(matches!(err, IpcError::PacketTooLarge { len: 65, max: 64 }));
    }
}
