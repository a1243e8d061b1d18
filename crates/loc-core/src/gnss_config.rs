//! Engine configuration update carried from clients to the engine.
//!
//! Only the fields whose bit is set in [`GnssConfig::flags`] are
//! meaningful; the others hold whatever default they were built with.

/// Bits of [`GnssConfig::flags`].
pub mod config_flags {
    pub const GPS_LOCK_VALID: u32 = 1 << 0;
    pub const SUPL_VERSION_VALID: u32 = 1 << 1;
    pub const ASSISTANCE_SERVER_VALID: u32 = 1 << 2;
    pub const LPP_PROFILE_VALID: u32 = 1 << 3;
    pub const EM_PDN_FOR_EM_SUPL_VALID: u32 = 1 << 4;
    pub const SUPL_EM_SERVICES_VALID: u32 = 1 << 5;
    pub const SUPL_MODE_VALID: u32 = 1 << 6;
}

use config_flags::*;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssistanceServer {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GnssConfig {
    pub flags: u32,
    pub gps_lock: u32,
    pub supl_version: u32,
    pub assistance_server: AssistanceServer,
    pub lpp_profile: u32,
    pub emergency_pdn_for_emergency_supl: bool,
    pub supl_emergency_services: bool,
    /// Carrier SUPL mode (bit0 MSB, bit1 MSA).
    pub supl_mode: u32,
}

impl GnssConfig {
    pub fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn is_empty(&self) -> bool {
        self.flags == 0
    }

    /// Number of fields carried by this update.
    pub fn field_count(&self) -> usize {
        self.flags.count_ones() as usize
    }

    /// Copy every flagged field of `update` into `self`.
    ///
    /// Fields present in both take the value from `update`; fields
    /// only present in `self` are kept.
    pub fn merge_from(&mut self, update: &GnssConfig) {
        if update.has(GPS_LOCK_VALID) {
            self.gps_lock = update.gps_lock;
        }
        if update.has(SUPL_VERSION_VALID) {
            self.supl_version = update.supl_version;
        }
        if update.has(ASSISTANCE_SERVER_VALID) {
            self.assistance_server = update.assistance_server.clone();
        }
        if update.has(LPP_PROFILE_VALID) {
            self.lpp_profile = update.lpp_profile;
        }
        if update.has(EM_PDN_FOR_EM_SUPL_VALID) {
            self.emergency_pdn_for_emergency_supl = update.emergency_pdn_for_emergency_supl;
        }
        if update.has(SUPL_EM_SERVICES_VALID) {
            self.supl_emergency_services = update.supl_emergency_services;
        }
        if update.has(SUPL_MODE_VALID) {
            self.supl_mode = update.supl_mode;
        }
        self.flags |= update.flags;
    }
}
