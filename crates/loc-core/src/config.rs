//! Configuration for the location core.
//!
//! Carrier and AGPS settings come from the process environment. An
//! unset variable keeps its default; a malformed one is an error:
//!
//! - `LOC_CAPABILITIES`                          (default: `0x7`)
//! - `LOC_SUPL_MODE`                             (default: `0x1`)
//! - `LOC_USE_EMERGENCY_PDN_FOR_EMERGENCY_SUPL`  (default: `1`)
//! - `LOC_AGPS_ATL_TYPES`                        (default: `0x7`)
//! - `LOC_DS_MAX_RETRIES`                        (default: `4`)
//! - `LOC_DS_RETRY_DELAY_MS`                     (default: `500`)
//!
//! Numbers are decimal or `0x`-prefixed hex.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// `CAPABILITIES` bit: MS-based positioning.
pub const GPS_CAPABILITY_MSB: u32 = 0x2;
/// `CAPABILITIES` bit: MS-assisted positioning.
pub const GPS_CAPABILITY_MSA: u32 = 0x4;

const CARRIER_MSB: u32 = 0x1;
const CARRIER_MSA: u32 = 0x2;

/// Which ATL state machines the AGPS manager creates.
pub type AtlTypeMask = u32;

pub const ATL_TYPE_SUPL: AtlTypeMask = 0x1;
pub const ATL_TYPE_SUPL_ES: AtlTypeMask = 0x2;
pub const ATL_TYPE_WWAN: AtlTypeMask = 0x4;

/// Core configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocConfig {
    /// gps.conf `CAPABILITIES`.
    pub capabilities: u32,

    /// Carrier SUPL mode (bit0 MSB, bit1 MSA).
    pub supl_mode: u32,

    /// Route emergency SUPL over the emergency data-service path.
    pub use_emergency_pdn_for_emergency_supl: bool,

    pub agps_atl_types: AtlTypeMask,

    /// Bounded retry count for opening the modem data call.
    pub ds_max_retries: u32,

    pub ds_retry_delay_ms: u64,
}

impl Default for LocConfig {
    fn default() -> Self {
        LocConfig {
            capabilities: 0x7,
            supl_mode: 0x1,
            use_emergency_pdn_for_emergency_supl: true,
            agps_atl_types: ATL_TYPE_SUPL | ATL_TYPE_SUPL_ES | ATL_TYPE_WWAN,
            ds_max_retries: 4,
            ds_retry_delay_ms: 500,
        }
    }
}

impl LocConfig {
    /// Construct a `LocConfig` from environment variables, falling back
    /// to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        LocConfig::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`LocConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = LocConfig::default();

        Ok(LocConfig {
            capabilities: read_or_default(&lookup, "LOC_CAPABILITIES", defaults.capabilities)?,
            supl_mode: read_or_default(&lookup, "LOC_SUPL_MODE", defaults.supl_mode)?,
            use_emergency_pdn_for_emergency_supl: read_or_default(
                &lookup,
                "LOC_USE_EMERGENCY_PDN_FOR_EMERGENCY_SUPL",
                defaults.use_emergency_pdn_for_emergency_supl as u32,
            )? != 0,
            agps_atl_types: read_or_default(&lookup, "LOC_AGPS_ATL_TYPES", defaults.agps_atl_types)?,
            ds_max_retries: read_or_default(&lookup, "LOC_DS_MAX_RETRIES", defaults.ds_max_retries)?,
            ds_retry_delay_ms: read_or_default(
                &lookup,
                "LOC_DS_RETRY_DELAY_MS",
                defaults.ds_retry_delay_ms,
            )?,
        })
    }

    /// `CAPABILITIES` filtered by what the carrier's SUPL mode allows.
    pub fn carrier_capabilities(&self) -> u32 {
        carrier_capabilities(self.capabilities, self.supl_mode)
    }

    /// Whether the SUPL state machines should exist at all.
    pub fn agps_capable(&self) -> bool {
        self.carrier_capabilities() & (GPS_CAPABILITY_MSA | GPS_CAPABILITY_MSB) != 0
    }

    pub fn ds_retry_delay(&self) -> Duration {
        Duration::from_millis(self.ds_retry_delay_ms)
    }
}

/// MSA survives only if the carrier allows MSA, likewise for MSB.
pub fn carrier_capabilities(capabilities: u32, supl_mode: u32) -> u32 {
    let mut caps = capabilities;
    if supl_mode & CARRIER_MSA != CARRIER_MSA {
        caps &= !GPS_CAPABILITY_MSA;
    }
    if supl_mode & CARRIER_MSB != CARRIER_MSB {
        caps &= !GPS_CAPABILITY_MSB;
    }
    caps
}

fn read_or_default<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: TryFrom<u64>,
{
    match lookup(key) {
        Some(val) => parse_number(&val)
            .and_then(|n| T::try_from(n).ok())
            .ok_or(ConfigError::InvalidValue { key, value: val }),
        None => Ok(default),
    }
}

fn parse_number(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = LocConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, LocConfig::default());
    }

    #[test]
    fn reads_hex_and_decimal() {
        let config = LocConfig::from_lookup(lookup_from(&[
            ("LOC_CAPABILITIES", "0x6"),
            ("LOC_SUPL_MODE", "3"),
            ("LOC_USE_EMERGENCY_PDN_FOR_EMERGENCY_SUPL", "0"),
            ("LOC_DS_RETRY_DELAY_MS", "20"),
        ]))
        .unwrap();
        assert_eq!(config.capabilities, 6);
        assert_eq!(config.supl_mode, 3);
        assert!(!config.use_emergency_pdn_for_emergency_supl);
        assert_eq!(config.ds_retry_delay(), Duration::from_millis(20));
    }

    #[test]
    fn rejects_garbage() {
        let err = LocConfig::from_lookup(lookup_from(&[("LOC_SUPL_MODE", "msa")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "LOC_SUPL_MODE",
                value: "msa".to_string()
            }
        );
    }

    #[test]
    fn carrier_mode_filters_capabilities() {
        // MSB-only carrier drops MSA.
        assert_eq!(carrier_capabilities(0x7, 0x1), 0x3);
        // MSA-only carrier drops MSB.
        assert_eq!(carrier_capabilities(0x7, 0x2), 0x5);
        assert_eq!(carrier_capabilities(0x7, 0x3), 0x7);
        assert_eq!(carrier_capabilities(0x7, 0x0), 0x1);

        let config = LocConfig {
            supl_mode: 0,
            ..LocConfig::default()
        };
        assert!(!config.agps_capable());
        assert!(LocConfig::default().agps_capable());
    }
}
