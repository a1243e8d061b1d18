//! Client-facing value types shared by adapters, the engine API and
//! the service front.
//!
//! These are **transport-agnostic** logical types:
//! - identities ([`ClientId`]),
//! - registration masks ([`EventMask`], [`LocationCapabilitiesMask`]),
//! - the per-client callback table ([`LocationCallbacks`]),
//! - engine reports that are fanned out to clients.

use std::fmt;
use std::sync::Arc;

use crate::error::LocApiError;

/// Identifier for a location client.
///
/// This is intentionally opaque; the owner of the client guarantees
/// uniqueness over the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Engine event registration mask.
pub type EventMask = u64;

/// Bits of [`EventMask`].
pub mod event_mask {
    use super::EventMask;

    pub const POSITION_REPORT: EventMask = 1 << 0;
    pub const SATELLITE_REPORT: EventMask = 1 << 1;
    pub const NMEA_1HZ_REPORT: EventMask = 1 << 2;
    pub const NMEA_POSITION_REPORT: EventMask = 1 << 3;
    pub const STATUS_REPORT: EventMask = 1 << 4;
    pub const LOCATION_SERVER_REQUEST: EventMask = 1 << 5;
    pub const NI_NOTIFY_VERIFY_REQUEST: EventMask = 1 << 6;
    pub const GNSS_MEASUREMENT: EventMask = 1 << 7;
}

/// How [`crate::LocAdapterBase::update_evt_mask`] applies a mask.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MaskStatus {
    /// OR the bits in.
    Enabled,
    /// Clear the bits.
    Disabled,
    /// Replace the whole mask.
    Set,
}

/// Capability bits reported to clients.
pub type LocationCapabilitiesMask = u32;

/// Bits of [`LocationCapabilitiesMask`].
pub mod capabilities {
    use super::LocationCapabilitiesMask;

    pub const TIME_BASED_TRACKING: LocationCapabilitiesMask = 1 << 0;
    pub const TIME_BASED_BATCHING: LocationCapabilitiesMask = 1 << 1;
    pub const DISTANCE_BASED_TRACKING: LocationCapabilitiesMask = 1 << 2;
    pub const DISTANCE_BASED_BATCHING: LocationCapabilitiesMask = 1 << 3;
    pub const GEOFENCE: LocationCapabilitiesMask = 1 << 4;
    pub const GNSS_MEASUREMENTS: LocationCapabilitiesMask = 1 << 5;
    pub const GNSS_MSB: LocationCapabilitiesMask = 1 << 6;
    pub const GNSS_MSA: LocationCapabilitiesMask = 1 << 7;
    pub const DEBUG_NMEA: LocationCapabilitiesMask = 1 << 8;
    pub const OUTDOOR_TRIP_BATCHING: LocationCapabilitiesMask = 1 << 9;
}

/// Response code delivered through the response callbacks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LocationError {
    Success,
    GeneralFailure,
    CallbackMissing,
    InvalidParameter,
    IdUnknown,
    NotSupported,
}

impl From<Result<(), LocApiError>> for LocationError {
    fn from(result: Result<(), LocApiError>) -> Self {
        match result {
            Ok(()) => LocationError::Success,
            Err(LocApiError::Unsupported) => LocationError::NotSupported,
            Err(LocApiError::InvalidParameter) => LocationError::InvalidParameter,
            Err(_) => LocationError::GeneralFailure,
        }
    }
}

/// Requested tracking cadence for one session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TrackingOptions {
    pub min_interval_ms: u32,
    pub min_distance_m: u32,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        TrackingOptions {
            min_interval_ms: 1000,
            min_distance_m: 0,
        }
    }
}

/// A computed fix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: f32,
    pub timestamp_ms: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Success,
    InProgress,
    Failure,
}

/// Position report as emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionReport {
    pub location: Location,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GnssSv {
    pub svid: u16,
    /// Carrier-to-noise density in dB-Hz.
    pub cn0_dbhz: f32,
    pub used_in_fix: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GnssSvNotification {
    pub svs: Vec<GnssSv>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GnssNmeaNotification {
    pub timestamp_ms: u64,
    pub nmea: String,
}

/// Engine status transitions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    SessionBegin,
    SessionEnd,
    EngineOn,
    EngineOff,
}

// -----------------------------------------------------------------------------
// Client callbacks
// -----------------------------------------------------------------------------

pub type CapabilitiesCb = Arc<dyn Fn(LocationCapabilitiesMask) + Send + Sync>;
pub type ResponseCb = Arc<dyn Fn(LocationError, u32) + Send + Sync>;
pub type CollectiveResponseCb = Arc<dyn Fn(&[(LocationError, u32)]) + Send + Sync>;
pub type TrackingCb = Arc<dyn Fn(&Location) + Send + Sync>;
pub type GnssSvCb = Arc<dyn Fn(&GnssSvNotification) + Send + Sync>;
pub type GnssNmeaCb = Arc<dyn Fn(&GnssNmeaNotification) + Send + Sync>;

/// Callbacks registered by one client. Any of them may be absent.
#[derive(Clone, Default)]
pub struct LocationCallbacks {
    pub capabilities_cb: Option<CapabilitiesCb>,
    pub response_cb: Option<ResponseCb>,
    pub collective_response_cb: Option<CollectiveResponseCb>,
    pub tracking_cb: Option<TrackingCb>,
    pub gnss_sv_cb: Option<GnssSvCb>,
    pub gnss_nmea_cb: Option<GnssNmeaCb>,
}

impl fmt::Debug for LocationCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationCallbacks")
            .field("capabilities_cb", &self.capabilities_cb.is_some())
            .field("response_cb", &self.response_cb.is_some())
            .field("collective_response_cb", &self.collective_response_cb.is_some())
            .field("tracking_cb", &self.tracking_cb.is_some())
            .field("gnss_sv_cb", &self.gnss_sv_cb.is_some())
            .field("gnss_nmea_cb", &self.gnss_nmea_cb.is_some())
            .finish()
    }
}
