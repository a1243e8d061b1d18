//! loc-ipc
//!
//! Framed messaging between the location service and its sibling
//! daemons:
//! - wire constants and the length header ([`wire`])
//! - transport seams ([`IpcSender`], [`IpcRecver`], [`IpcListener`])
//! - the fragmenting sender and reassembling listen loop ([`LocIpc`])
//! - transports: Unix-domain datagram ([`local`]), TCP ([`tcp`]) and
//!   UDP ([`udp`])

pub mod error;
pub mod ipc;
pub mod local;
pub mod socket;
pub mod tcp;
pub mod udp;
pub mod wire;

pub use error::IpcError;
pub use ipc::LocIpc;
pub use local::{LocalRecver, LocalSender};
pub use socket::{IpcListener, IpcRecver, IpcSender, Peer};
pub use tcp::{TcpRecver, TcpSender};
pub use udp::{UdpRecver, UdpSender};
pub use wire::{DEFAULT_MAX_MSG_LEN, MSG_ABORT, MSG_HEAD};
