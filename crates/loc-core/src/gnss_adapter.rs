//! Tracking adapter.
//!
//! Keeps the tracking sessions of every client, starts the engine for the
//! first session and stops it after the last, and fans position, SV and
//! NMEA reports out to the clients that asked for them. It also owns the
//! AGPS manager and the engine configuration updates.
//!
//! All session and AGPS state is only mutated from messages running on
//! the dispatch queue.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::adapter::{LocAdapter, LocAdapterBase};
use crate::agps::{
    AgpsCallbacks, AgpsConfig, AgpsFramework, AgpsManager, AgpsType, ApnBearer, ApnTypeMask,
    AtlStatusSink, DataServiceClient, RetryScheduler,
};
use crate::config::LocConfig;
use crate::error::LocApiError;
use crate::gnss_config::{config_flags, GnssConfig};
use crate::loc_api::LocApi;
use crate::lock;
use crate::msg_task::MsgTask;
use crate::session::SessionKey;
use crate::types::{
    event_mask, ClientId, EventMask, GnssNmeaNotification, GnssSvNotification, LocationCallbacks,
    LocationError, MaskStatus, PositionReport, SessionStatus, TrackingOptions,
};

type TrackingSessions = BTreeMap<SessionKey, TrackingOptions>;

pub struct GnssAdapter {
    base: LocAdapterBase,
    me: Weak<GnssAdapter>,
    tracking_sessions: Mutex<TrackingSessions>,
    agps: Mutex<Option<AgpsManager>>,
    agps_ready: AtomicBool,
    config: Mutex<LocConfig>,
}

impl GnssAdapter {
    pub fn new(loc_api: Arc<LocApi>, config: LocConfig) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<GnssAdapter>| {
            let adapter: Weak<dyn LocAdapter> = me.clone();
            GnssAdapter {
                base: LocAdapterBase::new(adapter, loc_api, config.carrier_capabilities()),
                me: me.clone(),
                tracking_sessions: Mutex::new(BTreeMap::new()),
                agps: Mutex::new(None),
                agps_ready: AtomicBool::new(false),
                config: Mutex::new(config),
            }
        })
    }

    pub fn config(&self) -> LocConfig {
        lock(&self.config).clone()
    }

    pub fn has_tracking_session(&self, client: ClientId, id: u32) -> bool {
        lock(&self.tracking_sessions).contains_key(&SessionKey::new(client, id))
    }

    pub fn tracking_session_count(&self) -> usize {
        lock(&self.tracking_sessions).len()
    }

    /// Run `f` on the adapter, from the queue.
    fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce(&GnssAdapter) + Send + 'static,
    {
        let me = self.me.clone();
        self.base.send_msg(move || {
            if let Some(adapter) = me.upgrade() {
                f(&adapter);
            }
        })
    }

    fn report_response(&self, client: ClientId, err: LocationError, id: u32) {
        let Some(cb) = self
            .base
            .client_callbacks(client)
            .and_then(|callbacks| callbacks.response_cb)
        else {
            debug!("{} has no response callback ({:?}, {})", client, err, id);
            return;
        };
        cb(err, id);
    }

    // -------------------------------------------------------------------------
    // Tracking
    // -------------------------------------------------------------------------

    /// Options of the session with the smallest interval; the engine runs
    /// with these.
    fn best_options(sessions: &TrackingSessions) -> Option<TrackingOptions> {
        sessions
            .values()
            .min_by_key(|options| options.min_interval_ms)
            .copied()
    }

    /// Start a tracking session. The id is returned at once; the outcome
    /// arrives through the client's response callback.
    pub fn start_tracking_command(&self, client: ClientId, options: TrackingOptions) -> u32 {
        let id = self.base.loc_api().generate_session_id();
        debug!("{} start tracking, session {}", client, id);

        self.post(move |adapter| {
            let Some(callbacks) = adapter.base.client_callbacks(client) else {
                error!("{} not registered, cannot start session {}", client, id);
                return;
            };
            if callbacks.tracking_cb.is_none() {
                adapter.report_response(client, LocationError::CallbackMissing, id);
                return;
            }
            if options.min_interval_ms == 0 {
                adapter.report_response(client, LocationError::InvalidParameter, id);
                return;
            }

            let key = SessionKey::new(client, id);
            let (before, after) = {
                let mut sessions = lock(&adapter.tracking_sessions);
                let before = Self::best_options(&sessions);
                sessions.insert(key, options);
                (before, Self::best_options(&sessions))
            };

            match after {
                Some(best) if before != Some(best) => adapter.start_fix(key, best, true),
                _ => adapter.report_response(client, LocationError::Success, id),
            }
        });
        id
    }

    /// Change the options of a running session.
    pub fn update_tracking_options_command(&self, client: ClientId, id: u32, options: TrackingOptions) {
        self.post(move |adapter| {
            let key = SessionKey::new(client, id);
            let (before, after) = {
                let mut sessions = lock(&adapter.tracking_sessions);
                let before = Self::best_options(&sessions);
                let known = match sessions.get_mut(&key) {
                    Some(current) => {
                        *current = options;
                        true
                    }
                    None => false,
                };
                if !known {
                    drop(sessions);
                    adapter.report_response(client, LocationError::IdUnknown, id);
                    return;
                }
                (before, Self::best_options(&sessions))
            };

            match after {
                Some(best) if before != Some(best) => adapter.start_fix(key, best, false),
                _ => adapter.report_response(client, LocationError::Success, id),
            }
        });
    }

    pub fn stop_tracking_command(&self, client: ClientId, id: u32) {
        debug!("{} stop tracking, session {}", client, id);

        self.post(move |adapter| {
            let key = SessionKey::new(client, id);
            let (removed, before, after) = {
                let mut sessions = lock(&adapter.tracking_sessions);
                let before = Self::best_options(&sessions);
                let removed = sessions.remove(&key).is_some();
                (removed, before, Self::best_options(&sessions))
            };

            if !removed {
                adapter.report_response(client, LocationError::IdUnknown, id);
                return;
            }

            match after {
                None => adapter.stop_fix(Some(key)),
                Some(best) if before != Some(best) => adapter.restart_fix(key, best),
                Some(_) => adapter.report_response(client, LocationError::Success, id),
            }
        });
    }

    /// Ask the engine to run with `best`. On failure a freshly started
    /// session is dropped again.
    fn start_fix(&self, key: SessionKey, best: TrackingOptions, new_session: bool) {
        let me = self.me.clone();
        self.base.loc_api().start_fix(best, move |result| {
            let Some(adapter) = me.upgrade() else {
                return;
            };
            if let Err(e) = result {
                warn!("start_fix for {:?} failed: {}", key, e);
                if new_session {
                    lock(&adapter.tracking_sessions).remove(&key);
                }
            }
            adapter.report_response(key.client, result.into(), key.id);
        });
    }

    /// Same as [`GnssAdapter::start_fix`] for a session that is gone
    /// already.
    fn restart_fix(&self, key: SessionKey, best: TrackingOptions) {
        let me = self.me.clone();
        self.base.loc_api().start_fix(best, move |result| {
            if let Some(adapter) = me.upgrade() {
                adapter.report_response(key.client, result.into(), key.id);
            }
        });
    }

    fn stop_fix(&self, key: Option<SessionKey>) {
        let me = self.me.clone();
        self.base.loc_api().stop_fix(move |result: Result<(), LocApiError>| {
            if let Err(e) = result {
                warn!("stop_fix failed: {}", e);
            }
            if let (Some(key), Some(adapter)) = (key, me.upgrade()) {
                adapter.report_response(key.client, result.into(), key.id);
            }
        });
    }

    fn restart_sessions(&self) {
        let best = Self::best_options(&lock(&self.tracking_sessions));
        if let Some(best) = best {
            info!("restarting tracking with {:?}", best);
            self.base.loc_api().start_fix(best, |result| {
                if let Err(e) = result {
                    error!("restart of tracking sessions failed: {}", e);
                }
            });
        }
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    /// Push the flagged fields of `config` to the engine. Returns one id
    /// per flagged field; the client's collective response callback gets
    /// one result per id.
    pub fn gnss_update_config_command(&self, client: ClientId, config: GnssConfig) -> Vec<u32> {
        if config.is_empty() {
            warn!("{} sent an empty config update", client);
            return Vec::new();
        }

        let ids: Vec<u32> = (0..config.field_count())
            .map(|_| self.base.loc_api().generate_session_id())
            .collect();
        let response_ids = ids.clone();

        self.post(move |adapter| {
            adapter.apply_config_locally(&config);

            let me = adapter.me.clone();
            adapter.base.loc_api().update_config(config, move |result| {
                let err = LocationError::from(result);
                if let Err(e) = result {
                    warn!("engine config update failed: {}", e);
                }
                let Some(adapter) = me.upgrade() else {
                    return;
                };
                let responses: Vec<(LocationError, u32)> =
                    response_ids.iter().map(|id| (err, *id)).collect();
                match adapter
                    .base
                    .client_callbacks(client)
                    .and_then(|callbacks| callbacks.collective_response_cb)
                {
                    Some(cb) => cb(&responses),
                    None => debug!("{} has no collective response callback", client),
                }
            });
        });
        ids
    }

    /// Adapter-side effects of a config update: emergency PDN routing and
    /// carrier SUPL mode.
    fn apply_config_locally(&self, update: &GnssConfig) {
        if update.has(config_flags::EM_PDN_FOR_EM_SUPL_VALID) {
            let enabled = update.emergency_pdn_for_emergency_supl;
            lock(&self.config).use_emergency_pdn_for_emergency_supl = enabled;
            if let Some(agps) = lock(&self.agps).as_mut() {
                agps.set_use_emergency_pdn(enabled);
            }
        }

        if update.has(config_flags::SUPL_MODE_VALID) {
            let caps = {
                let mut config = lock(&self.config);
                config.supl_mode = update.supl_mode;
                config.carrier_capabilities()
            };
            if caps != self.base.carrier_capabilities() {
                info!("SUPL mode 0x{:x}, carrier caps 0x{:x}", update.supl_mode, caps);
                self.base.set_carrier_capabilities(caps);
                self.base.broadcast_capabilities(self.base.capabilities());
            }
        }
    }

    // -------------------------------------------------------------------------
    // AGPS
    // -------------------------------------------------------------------------

    /// Build the AGPS manager with the framework and modem strategies.
    pub fn init_agps_command(
        &self,
        framework: Arc<dyn AgpsFramework>,
        data_service: Option<Arc<dyn DataServiceClient>>,
    ) {
        self.post(move |adapter| {
            let mut agps = lock(&adapter.agps);
            if agps.is_some() {
                warn!("AGPS already initialised");
                return;
            }

            let callbacks = AgpsCallbacks {
                framework,
                atl: Arc::new(EngineAtlSink {
                    loc_api: adapter.base.loc_api().clone(),
                }),
                data_service,
                scheduler: Arc::new(QueueScheduler {
                    adapter: adapter.me.clone(),
                    msg_task: adapter.base.msg_task().clone(),
                }),
            };
            let config = AgpsConfig::from(&*lock(&adapter.config));
            *agps = Some(AgpsManager::new(config, callbacks));
            drop(agps);

            adapter.agps_ready.store(true, Ordering::SeqCst);
            adapter
                .base
                .update_evt_mask(event_mask::LOCATION_SERVER_REQUEST, MaskStatus::Enabled);
            info!("AGPS initialised");
        });
    }

    /// Run `f` on the AGPS manager. `None` if AGPS is not initialised.
    pub fn with_agps<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut AgpsManager) -> R,
    {
        let mut agps = lock(&self.agps);
        match agps.as_mut() {
            Some(manager) => Some(f(manager)),
            None => {
                warn!("AGPS not initialised");
                None
            }
        }
    }

    pub fn agps_data_conn_open_command(&self, agps_type: AgpsType, apn: String, bearer: ApnBearer) {
        self.post(move |adapter| {
            adapter.with_agps(|agps| agps.report_atl_open_success(agps_type, Some(&apn), bearer));
        });
    }

    pub fn agps_data_conn_closed_command(&self, agps_type: AgpsType) {
        self.post(move |adapter| {
            adapter.with_agps(|agps| agps.report_atl_closed(agps_type));
        });
    }

    pub fn agps_data_conn_failed_command(&self, agps_type: AgpsType) {
        self.post(move |adapter| {
            adapter.with_agps(|agps| agps.report_atl_open_failed(agps_type));
        });
    }

    pub fn handle_modem_ssr_command(&self) {
        self.post(|adapter| {
            adapter.with_agps(AgpsManager::handle_modem_ssr);
        });
    }
}

impl LocAdapter for GnssAdapter {
    fn base(&self) -> &LocAdapterBase {
        &self.base
    }

    fn adapter_event_mask(&self) -> EventMask {
        if self.agps_ready.load(Ordering::SeqCst) {
            event_mask::LOCATION_SERVER_REQUEST
        } else {
            0
        }
    }

    fn client_event_mask(&self, callbacks: &LocationCallbacks) -> EventMask {
        let mut mask = 0;
        if callbacks.tracking_cb.is_some() {
            mask |= event_mask::POSITION_REPORT | event_mask::STATUS_REPORT;
        }
        if callbacks.gnss_sv_cb.is_some() {
            mask |= event_mask::SATELLITE_REPORT;
        }
        if callbacks.gnss_nmea_cb.is_some() {
            mask |= event_mask::NMEA_1HZ_REPORT | event_mask::NMEA_POSITION_REPORT;
        }
        mask
    }

    fn stop_client_sessions(&self, client: ClientId) {
        let (stopped, now_empty) = {
            let mut sessions = lock(&self.tracking_sessions);
            let before = sessions.len();
            sessions.retain(|key, _| key.client != client);
            (before - sessions.len(), sessions.is_empty())
        };

        if stopped == 0 {
            return;
        }
        info!("{}: stopped {} tracking sessions", client, stopped);
        if now_empty {
            self.stop_fix(None);
        } else {
            self.restart_sessions();
        }
    }

    fn handle_engine_up_event(&self) {
        self.post(GnssAdapter::restart_sessions);
    }

    fn handle_engine_down_event(&self) {
        self.handle_modem_ssr_command();
    }

    fn report_position_event(&self, report: &PositionReport) {
        if report.status == SessionStatus::Failure {
            debug!("dropping failed position report");
            return;
        }

        let owners: BTreeSet<ClientId> = lock(&self.tracking_sessions)
            .keys()
            .map(|key| key.client)
            .collect();
        for client in owners {
            if let Some(cb) = self
                .base
                .client_callbacks(client)
                .and_then(|callbacks| callbacks.tracking_cb)
            {
                cb(&report.location);
            }
        }
    }

    fn report_sv_event(&self, sv: &GnssSvNotification) {
        for (_, callbacks) in self.base.clients_snapshot() {
            if let Some(cb) = callbacks.gnss_sv_cb {
                cb(sv);
            }
        }
    }

    fn report_nmea_event(&self, nmea: &GnssNmeaNotification) {
        for (_, callbacks) in self.base.clients_snapshot() {
            if let Some(cb) = callbacks.gnss_nmea_cb {
                cb(nmea);
            }
        }
    }

    fn request_atl(&self, handle: i32, agps_type: AgpsType, apn_type_mask: ApnTypeMask) -> bool {
        self.post(move |adapter| {
            if adapter
                .with_agps(|agps| agps.request_atl(handle, agps_type, apn_type_mask))
                .is_none()
            {
                adapter.base.loc_api().atl_open_status(
                    handle,
                    false,
                    None,
                    ApnBearer::Invalid,
                    agps_type,
                    apn_type_mask,
                );
            }
        })
    }

    fn release_atl(&self, handle: i32) -> bool {
        self.post(move |adapter| {
            if adapter.with_agps(|agps| agps.release_atl(handle)).is_none() {
                adapter.base.loc_api().atl_close_status(handle, false);
            }
        })
    }

    fn report_data_call_opened(&self) -> bool {
        self.post(|adapter| {
            adapter.with_agps(AgpsManager::report_data_call_opened);
        })
    }

    fn report_data_call_closed(&self) -> bool {
        self.post(|adapter| {
            adapter.with_agps(AgpsManager::report_data_call_closed);
        })
    }
}

// -----------------------------------------------------------------------------
// AGPS strategies backed by the engine API and the dispatch queue
// -----------------------------------------------------------------------------

struct EngineAtlSink {
    loc_api: Arc<LocApi>,
}

impl AtlStatusSink for EngineAtlSink {
    fn atl_open_status(
        &self,
        handle: i32,
        success: bool,
        apn: Option<&str>,
        bearer: ApnBearer,
        agps_type: AgpsType,
        apn_type_mask: ApnTypeMask,
    ) {
        self.loc_api.atl_open_status(
            handle,
            success,
            apn.map(str::to_owned),
            bearer,
            agps_type,
            apn_type_mask,
        );
    }

    fn atl_close_status(&self, handle: i32, success: bool) {
        self.loc_api.atl_close_status(handle, success);
    }
}

struct QueueScheduler {
    adapter: Weak<GnssAdapter>,
    msg_task: MsgTask,
}

impl RetryScheduler for QueueScheduler {
    fn schedule_retry(&self, delay: Duration) {
        let adapter = self.adapter.clone();
        let msg_task = self.msg_task.clone();
        self.msg_task.runtime().spawn(async move {
            tokio::time::sleep(delay).await;
            msg_task.send_msg(move || {
                if let Some(adapter) = adapter.upgrade() {
                    adapter.with_agps(AgpsManager::retry_data_call);
                }
            });
        });
    }

    fn schedule_request(&self, handle: i32, agps_type: AgpsType, apn_type_mask: ApnTypeMask) {
        let adapter = self.adapter.clone();
        self.msg_task.send_msg(move || {
            if let Some(adapter) = adapter.upgrade() {
                adapter.with_agps(|agps| agps.request_atl(handle, agps_type, apn_type_mask));
            }
        });
    }
}
