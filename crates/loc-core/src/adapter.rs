//! Adapter base: client registry, event mask, queued client commands.
//!
//! Every concrete adapter embeds a [`LocAdapterBase`] and implements
//! [`LocAdapter`]. The trait carries the engine event hooks with no-op
//! defaults, so an adapter only overrides what it cares about.
//!
//! Registry mutation happens only inside messages running on the
//! dispatch queue. Reads from other threads take a snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, warn};

use crate::agps::{AgpsType, ApnTypeMask};
use crate::context::location_capabilities;
use crate::loc_api::{AdapterId, LocApi};
use crate::lock;
use crate::msg_task::MsgTask;
use crate::types::{
    ClientId, EngineStatus, EventMask, GnssNmeaNotification, GnssSvNotification,
    LocationCallbacks, LocationCapabilitiesMask, MaskStatus, PositionReport,
};

/// Called once a client has been removed.
pub type RemoveClientDone = Box<dyn FnOnce(ClientId) + Send + 'static>;

/// Engine event hooks plus the per-adapter reductions the base needs.
///
/// Upcalls run on the engine's own thread, not on the queue.
pub trait LocAdapter: Send + Sync + 'static {
    fn base(&self) -> &LocAdapterBase;

    /// Engine events this client's callbacks need. The adapter mask is
    /// the OR over all clients.
    fn client_event_mask(&self, _callbacks: &LocationCallbacks) -> EventMask {
        0
    }

    /// Events the adapter needs regardless of its clients.
    fn adapter_event_mask(&self) -> EventMask {
        0
    }

    /// Stop every session owned by `client`. Runs on the queue, right
    /// before the client is erased.
    fn stop_client_sessions(&self, _client: ClientId) {}

    fn handle_engine_up_event(&self) {}

    fn handle_engine_down_event(&self) {}

    fn report_position_event(&self, _report: &PositionReport) {}

    fn report_sv_event(&self, _sv: &GnssSvNotification) {}

    fn report_nmea_event(&self, _nmea: &GnssNmeaNotification) {}

    fn report_status(&self, _status: EngineStatus) {}

    fn request_atl(&self, _handle: i32, _agps_type: AgpsType, _apn_type_mask: ApnTypeMask) -> bool {
        false
    }

    fn release_atl(&self, _handle: i32) -> bool {
        false
    }

    fn report_data_call_opened(&self) -> bool {
        false
    }

    fn report_data_call_closed(&self) -> bool {
        false
    }

    fn request_time(&self) -> bool {
        false
    }

    fn request_xtra_data(&self) -> bool {
        false
    }
}

/// State shared by every adapter.
pub struct LocAdapterBase {
    id: Option<AdapterId>,
    me: Weak<dyn LocAdapter>,
    evt_mask: AtomicU64,
    carrier_capabilities: AtomicU32,
    loc_api: Arc<LocApi>,
    msg_task: MsgTask,
    clients: Mutex<HashMap<ClientId, LocationCallbacks>>,
}

impl LocAdapterBase {
    /// Register `me` with the engine API.
    ///
    /// Meant to be called from inside `Arc::new_cyclic`, so `me` cannot
    /// be upgraded yet.
    pub fn new(me: Weak<dyn LocAdapter>, loc_api: Arc<LocApi>, carrier_capabilities: u32) -> Self {
        let id = loc_api.add_adapter(me.clone());
        if id.is_none() {
            warn!("adapter created without an engine registration");
        }
        let msg_task = loc_api.msg_task().clone();

        LocAdapterBase {
            id,
            me,
            evt_mask: AtomicU64::new(0),
            carrier_capabilities: AtomicU32::new(carrier_capabilities),
            loc_api,
            msg_task,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn loc_api(&self) -> &Arc<LocApi> {
        &self.loc_api
    }

    pub fn msg_task(&self) -> &MsgTask {
        &self.msg_task
    }

    pub fn send_msg<F>(&self, msg: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.msg_task.send_msg(msg)
    }

    pub fn is_registered(&self) -> bool {
        self.id.is_some()
    }

    // -------------------------------------------------------------------------
    // Event mask
    // -------------------------------------------------------------------------

    pub fn evt_mask(&self) -> EventMask {
        self.evt_mask.load(Ordering::SeqCst)
    }

    /// Bits of `mask` this adapter registered for.
    pub fn check_mask(&self, mask: EventMask) -> EventMask {
        mask & self.evt_mask()
    }

    /// Apply `event` to the adapter mask, then let the engine API
    /// recompute the aggregate.
    pub fn update_evt_mask(&self, event: EventMask, status: MaskStatus) {
        match status {
            MaskStatus::Enabled => {
                self.evt_mask.fetch_or(event, Ordering::SeqCst);
            }
            MaskStatus::Disabled => {
                self.evt_mask.fetch_and(!event, Ordering::SeqCst);
            }
            MaskStatus::Set => self.evt_mask.store(event, Ordering::SeqCst),
        }
        self.loc_api.update_evt_mask();
    }

    fn update_clients_evt_mask(&self, adapter: &dyn LocAdapter) {
        let mask = lock(&self.clients)
            .values()
            .fold(adapter.adapter_event_mask(), |mask, callbacks| {
                mask | adapter.client_event_mask(callbacks)
            });
        self.update_evt_mask(mask, MaskStatus::Set);
    }

    // -------------------------------------------------------------------------
    // Capabilities
    // -------------------------------------------------------------------------

    pub fn carrier_capabilities(&self) -> u32 {
        self.carrier_capabilities.load(Ordering::SeqCst)
    }

    pub fn set_carrier_capabilities(&self, caps: u32) {
        self.carrier_capabilities.store(caps, Ordering::SeqCst);
    }

    /// Mask to report to clients, from whatever the engine has said so far.
    pub fn capabilities(&self) -> LocationCapabilitiesMask {
        location_capabilities(
            self.loc_api.capabilities().as_ref(),
            self.carrier_capabilities(),
        )
    }

    /// Deliver `mask` to every client with a capabilities callback.
    pub fn broadcast_capabilities(&self, mask: LocationCapabilitiesMask) {
        for (client, callbacks) in self.clients_snapshot() {
            if let Some(cb) = callbacks.capabilities_cb {
                debug!("capabilities 0x{:x} -> {}", mask, client);
                cb(mask);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Client registry (reads)
    // -------------------------------------------------------------------------

    pub fn client_callbacks(&self, client: ClientId) -> Option<LocationCallbacks> {
        lock(&self.clients).get(&client).cloned()
    }

    pub fn has_client(&self, client: ClientId) -> bool {
        lock(&self.clients).contains_key(&client)
    }

    pub fn client_count(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn clients_snapshot(&self) -> Vec<(ClientId, LocationCallbacks)> {
        lock(&self.clients)
            .iter()
            .map(|(client, callbacks)| (*client, callbacks.clone()))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Client commands (queued)
    // -------------------------------------------------------------------------

    /// Insert or replace `client`, then recompute the adapter mask.
    pub fn add_client_command(&self, client: ClientId, callbacks: LocationCallbacks) {
        let me = self.me.clone();
        self.send_msg(move || {
            let Some(adapter) = me.upgrade() else {
                return;
            };
            let base = adapter.base();
            let replaced = lock(&base.clients).insert(client, callbacks).is_some();
            if replaced {
                debug!("{} re-registered", client);
            } else {
                info!("{} added", client);
            }
            base.update_clients_evt_mask(adapter.as_ref());
        });
    }

    /// Stop the client's sessions, erase it, then run `on_done`.
    pub fn remove_client_command(&self, client: ClientId, on_done: Option<RemoveClientDone>) {
        let me = self.me.clone();
        self.send_msg(move || {
            let Some(adapter) = me.upgrade() else {
                return;
            };
            let base = adapter.base();

            adapter.stop_client_sessions(client);
            if lock(&base.clients).remove(&client).is_some() {
                info!("{} removed", client);
            } else {
                debug!("remove of unknown {}", client);
            }
            base.update_clients_evt_mask(adapter.as_ref());

            if let Some(done) = on_done {
                done(client);
            }
        });
    }

    /// Report capabilities to `client` once they are known.
    ///
    /// If the engine has not reported yet, a waiter is parked on the
    /// capability channel and the delivery is posted when it fires.
    pub fn request_capabilities_command(&self, client: ClientId) {
        let me = self.me.clone();
        self.send_msg(move || {
            let Some(adapter) = me.upgrade() else {
                return;
            };
            let base = adapter.base();

            if base.loc_api.is_capabilities_known() {
                deliver_capabilities(adapter.as_ref(), client);
                return;
            }

            debug!("capabilities unknown, {} waits", client);
            let mut rx = base.loc_api.subscribe_capabilities();
            let msg_task = base.msg_task.clone();
            let me = Arc::downgrade(&adapter);
            base.msg_task.runtime().spawn(async move {
                let known = rx.wait_for(Option::is_some).await.is_ok();
                if !known {
                    return;
                }
                msg_task.send_msg(move || {
                    if let Some(adapter) = me.upgrade() {
                        deliver_capabilities(adapter.as_ref(), client);
                    }
                });
            });
        });
    }
}

fn deliver_capabilities(adapter: &dyn LocAdapter, client: ClientId) {
    let base = adapter.base();
    let Some(callbacks) = base.client_callbacks(client) else {
        debug!("{} gone before capabilities were known", client);
        return;
    };
    if let Some(cb) = callbacks.capabilities_cb {
        cb(base.capabilities());
    }
}

impl Drop for LocAdapterBase {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.loc_api.remove_adapter(id);
        }
    }
}
