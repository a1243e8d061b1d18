//! AGPS data-connection arbitration.
//!
//! Several positioning sessions may need the same cellular data
//! connection at once, while the ATL protocol allows one open/close
//! handshake per connection type. One [`AgpsStateMachine`] per type
//! coalesces the requests:
//!
//! - `internet`: WWAN, handled through the framework;
//! - `agnss`: SUPL, handled through the framework;
//! - `ds`: emergency SUPL, handled directly with the modem data service.
//!
//! Everything here runs on the dispatch queue. The state machines hold no
//! locks of their own; the owning adapter keeps the manager behind one.

mod backend;
mod callbacks;
mod manager;
mod state_machine;

pub use callbacks::{
    AgpsCallbacks, AgpsFramework, AtlStatusSink, DataServiceClient, DsError, RetryScheduler,
};
pub use manager::{AgpsConfig, AgpsManager};
pub use state_machine::{AgpsStateMachine, AgpsSubscriber};

/// Maximum APN length accepted from the framework, in bytes.
pub const MAX_APN_LEN: usize = 100;

/// AGPS connection type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AgpsType {
    Invalid,
    Any,
    Supl,
    C2k,
    WwanAny,
    Wifi,
    SuplEs,
}

/// Bitmask of APN types a connection serves.
pub type ApnTypeMask = u32;

/// Bits of [`ApnTypeMask`].
pub mod apn_type {
    use super::ApnTypeMask;

    pub const DEFAULT: ApnTypeMask = 1 << 0;
    pub const IMS: ApnTypeMask = 1 << 1;
    pub const MMS: ApnTypeMask = 1 << 2;
    pub const DUN: ApnTypeMask = 1 << 3;
    pub const SUPL: ApnTypeMask = 1 << 4;
    pub const HIPRI: ApnTypeMask = 1 << 5;
    pub const FOTA: ApnTypeMask = 1 << 6;
    pub const CBS: ApnTypeMask = 1 << 7;
    pub const IA: ApnTypeMask = 1 << 8;
    pub const EMERGENCY: ApnTypeMask = 1 << 9;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ApnBearer {
    #[default]
    Invalid,
    Ipv4,
    Ipv6,
    Ipv4v6,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AgpsState {
    Released,
    Pending,
    Acquired,
    Releasing,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AgpsEvent {
    Subscribe,
    Unsubscribe,
    Granted,
    Released,
    Denied,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataConnStatus {
    Request,
    Release,
}

/// Data connection request/release sent to the framework.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AgnssStatus {
    pub agps_type: AgpsType,
    pub apn_type_mask: ApnTypeMask,
    pub status: DataConnStatus,
}
