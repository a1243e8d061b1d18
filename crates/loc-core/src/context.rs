//! Engine capability context.
//!
//! The engine reports, once, which optional messages and features it
//! supports. The core only ever reads this; [`location_capabilities`]
//! turns it into the mask handed to clients.

use crate::config::{GPS_CAPABILITY_MSA, GPS_CAPABILITY_MSB};
use crate::types::{capabilities, LocationCapabilitiesMask};

/// Size of the feature bitmap, in bytes.
pub const MAX_FEATURE_LENGTH: usize = 100;

/// Optional engine messages, by bit position in the supported-message mask.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SupportedMessage {
    LocationBatching = 0,
    BatchedGeofenceBreach = 1,
    DistanceBaseTracking = 2,
    AdaptiveLocationBatching = 3,
    DistanceBaseLocationBatching = 4,
    UpdateTbfOnTheFly = 5,
    OutdoorTripBatching = 6,
}

/// Optional engine features, by bit position in the feature bitmap.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SupportedFeature {
    Odcpi = 0,
    WifiApDataInject = 1,
    DebugNmea = 2,
    GnssOnlyPositionReport = 3,
    Fdcl = 4,
    ConstellationEnablement = 5,
    Agpm = 6,
    XtraIntegrity = 7,
}

/// Read-only capability queries.
pub trait CapabilityContext {
    fn is_message_supported(&self, msg: SupportedMessage) -> bool;
    fn is_feature_supported(&self, feature: u8) -> bool;
}

/// What the engine said it supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCapabilities {
    supported_msg_mask: u64,
    features: [u8; MAX_FEATURE_LENGTH],
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        EngineCapabilities {
            supported_msg_mask: 0,
            features: [0; MAX_FEATURE_LENGTH],
        }
    }
}

impl EngineCapabilities {
    /// Build from the raw engine report. Extra feature bytes are ignored.
    pub fn new(supported_msg_mask: u64, feature_bytes: &[u8]) -> Self {
        let mut features = [0u8; MAX_FEATURE_LENGTH];
        let len = feature_bytes.len().min(MAX_FEATURE_LENGTH);
        features[..len].copy_from_slice(&feature_bytes[..len]);
        EngineCapabilities {
            supported_msg_mask,
            features,
        }
    }

    pub fn with_message(mut self, msg: SupportedMessage) -> Self {
        self.supported_msg_mask |= 1u64 << (msg as u8);
        self
    }

    pub fn with_feature(mut self, feature: SupportedFeature) -> Self {
        let bit = feature as u8;
        self.features[(bit >> 3) as usize] |= 1 << (bit & 7);
        self
    }

    pub fn supported_msg_mask(&self) -> u64 {
        self.supported_msg_mask
    }
}

impl CapabilityContext for EngineCapabilities {
    fn is_message_supported(&self, msg: SupportedMessage) -> bool {
        self.supported_msg_mask & (1u64 << (msg as u8)) != 0
    }

    fn is_feature_supported(&self, feature: u8) -> bool {
        let index = (feature >> 3) as usize;
        if index >= MAX_FEATURE_LENGTH {
            return false;
        }
        (self.features[index] >> (feature & 7)) & 1 == 1
    }
}

/// Capability mask reported to clients.
///
/// Time-based tracking and geofencing are always there. MSB/MSA come
/// from the carrier-filtered `CAPABILITIES`; everything else depends on
/// what the engine reported, if it reported anything yet.
pub fn location_capabilities<C: CapabilityContext>(
    engine: Option<&C>,
    carrier_capabilities: u32,
) -> LocationCapabilitiesMask {
    let mut mask = capabilities::TIME_BASED_TRACKING | capabilities::GEOFENCE;

    if carrier_capabilities & GPS_CAPABILITY_MSB != 0 {
        mask |= capabilities::GNSS_MSB;
    }
    if carrier_capabilities & GPS_CAPABILITY_MSA != 0 {
        mask |= capabilities::GNSS_MSA;
    }

    let Some(engine) = engine else {
        return mask;
    };

    if engine.is_message_supported(SupportedMessage::DistanceBaseLocationBatching) {
        mask |= capabilities::TIME_BASED_BATCHING | capabilities::DISTANCE_BASED_BATCHING;
    }
    if engine.is_message_supported(SupportedMessage::DistanceBaseTracking) {
        mask |= capabilities::DISTANCE_BASED_TRACKING;
    }
    if engine.is_message_supported(SupportedMessage::OutdoorTripBatching) {
        mask |= capabilities::OUTDOOR_TRIP_BATCHING;
    }
    if engine.is_feature_supported(SupportedFeature::ConstellationEnablement as u8) {
        mask |= capabilities::GNSS_MEASUREMENTS;
    }
    if engine.is_feature_supported(SupportedFeature::DebugNmea as u8) {
        mask |= capabilities::DEBUG_NMEA;
    }
    mask
}
