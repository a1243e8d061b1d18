//! Wire format shared by every transport.
//!
//! ```text
//! payload.len() <= max_msg_len
//! ----------------------------
//!   [payload]                          one packet, no header
//!
//! payload.len() > max_msg_len
//! ---------------------------
//!   "$MSGLEN$" <decimal length>        header packet
//!   [chunk 0] [chunk 1] ...            max_msg_len bytes each, last may be short
//!
//! abort
//! -----
//!   "LocIpcMsg::ABORT"                 whole packet, never delivered
//! ```
//!
//! There is no checksum and no version field. A short payload that
//! happens to start with the marker is read as a header. Packets longer
//! than the receiver's own limit are dropped, never cut short.

use crate::error::IpcError;

pub const MSG_HEAD: &[u8] = b"$MSGLEN$";

pub const MSG_ABORT: &[u8] = b"LocIpcMsg::ABORT";

/// Default maximum transmission size of one packet.
pub const DEFAULT_MAX_MSG_LEN: usize = 1024;

/// Largest message a header may announce. Bigger headers are dropped
/// without waiting for their fragments.
pub const MAX_ASSEMBLED_LEN: usize = 16 * 1024 * 1024;

/// Longest header packet: the marker plus the digits of `usize::MAX`.
pub const MAX_HEADER_LEN: usize = MSG_HEAD.len() + 20;

/// Receive buffer size for a transport whose packets carry at most
/// `max_msg_len` payload bytes. Control packets always fit.
pub fn recv_buf_len(max_msg_len: usize) -> usize {
    max_msg_len.max(MAX_HEADER_LEN).max(MSG_ABORT.len())
}

/// Transports refuse packets the receiving side could not hold.
pub fn check_packet_len(len: usize, max_msg_len: usize) -> Result<(), IpcError> {
    if len > recv_buf_len(max_msg_len) {
        return Err(IpcError::PacketTooLarge {
            len,
            max: max_msg_len,
        });
    }
    Ok(())
}

/// What a received packet means to the listen loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Frame {
    Abort,
    /// A complete message on its own.
    Whole,
    /// Header announcing a fragmented message of this many bytes.
    Header(usize),
}

pub fn is_abort(packet: &[u8]) -> bool {
    packet == MSG_ABORT
}

/// Header packet announcing a `len`-byte payload.
pub fn encode_header(len: usize) -> Vec<u8> {
    let digits = len.to_string();
    let mut out = Vec::with_capacity(MSG_HEAD.len() + digits.len());
    out.extend_from_slice(MSG_HEAD);
    out.extend_from_slice(digits.as_bytes());
    out
}

/// Length announced by a header packet, or `None` if the packet does not
/// carry the marker.
pub fn parse_header(packet: &[u8]) -> Result<Option<usize>, IpcError> {
    let Some(digits) = packet.strip_prefix(MSG_HEAD) else {
        return Ok(None);
    };
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .map(Some)
        .ok_or(IpcError::MalformedHeader)
}

pub fn classify(packet: &[u8]) -> Result<Frame, IpcError> {
    if is_abort(packet) {
        return Ok(Frame::Abort);
    }
    Ok(match parse_header(packet)? {
        Some(len) => Frame::Header(len),
        None => Frame::Whole,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_marker_then_decimal() {
        assert_eq!(encode_header(4096), b"$MSGLEN$4096".to_vec());
        assert_eq!(parse_header(b"$MSGLEN$4096").unwrap(), Some(4096));
    }

    #[test]
    fn plain_payloads_are_not_headers() {
        assert_eq!(parse_header(b"hello").unwrap(), None);
        assert_eq!(parse_header(b"").unwrap(), None);
        assert_eq!(classify(b"$MSGLEN").unwrap(), Frame::Whole);
    }

    #[test]
    fn marker_without_length_is_malformed() {
        assert!(matches!(
            parse_header(b"$MSGLEN$"),
            Err(IpcError::MalformedHeader)
        ));
        assert!(matches!(
            parse_header(b"$MSGLEN$12ab"),
            Err(IpcError::MalformedHeader)
        ));
    }

    #[test]
    fn control_packets_fit_small_buffers() {
        assert!(recv_buf_len(4) >= encode_header(usize::MAX).len());
        assert!(recv_buf_len(4) >= MSG_ABORT.len());
        assert_eq!(recv_buf_len(DEFAULT_MAX_MSG_LEN), DEFAULT_MAX_MSG_LEN);
    }

    #[test]
    fn abort_must_match_exactly() {
        assert_eq!(classify(MSG_ABORT).unwrap(), Frame::Abort);
        assert_eq!(classify(b"LocIpcMsg::ABORT!").unwrap(), Frame::Whole);
        assert_eq!(classify(b"LocIpcMsg::ABOR").unwrap(), Frame::Whole);
    }
}
