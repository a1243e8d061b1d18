//! Error type for the IPC layer.
//!
//! `LocIpc`'s public entry points fold these into `bool` after logging;
//! transports return them so the loop can decide what to log.

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet starts with the length marker but no length follows.
    #[error("malformed length header")]
    MalformedHeader,

    #[error("packet of {len} bytes exceeds maximum of {max}")]
    PacketTooLarge { len: usize, max: usize },

    /// `abort()` was called while no listen loop was running.
    #[error("no listen loop running")]
    NotListening,
}
