//! loc-core
//!
//! Positioning service core:
//! - dispatch queue ([`MsgTask`]) serialising all client mutation
//! - engine-facing singleton ([`LocApi`]) with adapter fan-out
//! - adapter base ([`LocAdapterBase`], [`LocAdapter`]) and the tracking
//!   adapter ([`GnssAdapter`])
//! - lazily-created service front ([`GnssService`]) with the pending
//!   configuration buffer
//! - AGPS data-connection arbitration ([`agps`])

pub mod adapter;
pub mod agps;
pub mod config;
pub mod context;
pub mod error;
pub mod gnss_adapter;
pub mod gnss_config;
pub mod loc_api;
pub mod msg_task;
pub mod pending_config;
pub mod service;
pub mod session;
pub mod types;

pub use adapter::{LocAdapter, LocAdapterBase, RemoveClientDone};
pub use config::LocConfig;
pub use context::{CapabilityContext, EngineCapabilities, SupportedFeature, SupportedMessage};
pub use error::{ConfigError, LocApiError};
pub use gnss_adapter::GnssAdapter;
pub use gnss_config::GnssConfig;
pub use loc_api::{AdapterId, LocApi, LocEngine, MAX_ADAPTERS};
pub use msg_task::{LocMsg, MsgTask};
pub use pending_config::PendingConfig;
pub use service::GnssService;
pub use session::{SessionIdGenerator, SessionKey};

pub use types::{
    ClientId, EngineStatus, EventMask, GnssNmeaNotification, GnssSv, GnssSvNotification,
    Location, LocationCallbacks, LocationCapabilitiesMask, LocationError, MaskStatus,
    PositionReport, SessionStatus, TrackingOptions,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock, ignoring poisoning.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
