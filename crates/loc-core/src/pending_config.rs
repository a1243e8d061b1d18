//! Configuration written before the engine API exists.
//!
//! There is a single slot. Updates arriving while it is occupied are
//! merged into it field by field; the later value wins where two updates
//! carry the same field. The slot is emptied by the one flush that
//! happens when the API comes up.

use tracing::debug;

use crate::gnss_config::GnssConfig;

#[derive(Debug, Default)]
pub struct PendingConfig {
    config: Option<GnssConfig>,
}

impl PendingConfig {
    pub fn new() -> Self {
        PendingConfig::default()
    }

    /// Buffer `update`. Updates with no field set are ignored.
    pub fn stash(&mut self, update: &GnssConfig) -> bool {
        if update.is_empty() {
            debug!("ignoring empty pending config");
            return false;
        }
        match self.config.as_mut() {
            Some(pending) => {
                debug!(
                    "merging config flags 0x{:x} into pending 0x{:x}",
                    update.flags, pending.flags
                );
                pending.merge_from(update);
            }
            None => self.config = Some(update.clone()),
        }
        true
    }

    pub fn is_pending(&self) -> bool {
        self.config.is_some()
    }

    /// Hand out the buffered config and invalidate the slot.
    pub fn take(&mut self) -> Option<GnssConfig> {
        self.config.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gnss_config::config_flags::*;

    fn lock_update(lock: u32) -> GnssConfig {
        GnssConfig {
            flags: GPS_LOCK_VALID,
            gps_lock: lock,
            ..GnssConfig::default()
        }
    }

    #[test]
    fn empty_slot_until_stashed() {
        let mut pending = PendingConfig::new();
        assert!(!pending.is_pending());
        assert!(pending.take().is_none());

        assert!(!pending.stash(&GnssConfig::default()));
        assert!(!pending.is_pending());
    }

    #[test]
    fn second_update_merges_and_overrides_same_field() {
        let mut pending = PendingConfig::new();
        pending.stash(&lock_update(1));
        pending.stash(&GnssConfig {
            flags: SUPL_VERSION_VALID,
            supl_version: 0x0002_0000,
            ..GnssConfig::default()
        });
        pending.stash(&lock_update(3));

        let flushed = pending.take().unwrap();
        assert_eq!(flushed.flags, GPS_LOCK_VALID | SUPL_VERSION_VALID);
        assert_eq!(flushed.gps_lock, 3);
        assert_eq!(flushed.supl_version, 0x0002_0000);
    }

    #[test]
    fn take_invalidates() {
        let mut pending = PendingConfig::new();
        pending.stash(&lock_update(1));
        assert!(pending.take().is_some());
        assert!(!pending.is_pending());
        assert!(pending.take().is_none());
    }
}
