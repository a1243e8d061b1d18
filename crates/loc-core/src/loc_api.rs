//! Engine-facing side of the core.
//!
//! [`LocApi`] sits between the single positioning engine and every
//! adapter:
//! - engine events (arriving on the engine's own thread) are fanned
//!   out to all registered adapters, directly, without queueing;
//! - downward requests ([`LocApi::start_fix`], ...) are posted to the
//!   dispatch queue so they run after any client command posted
//!   before them;
//! - the aggregate event mask of all adapters is pushed down to the
//!   engine whenever an adapter changes its own.
//!
//! Adapters are held weakly. They register at construction and
//! deregister when dropped; the API never owns one.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::adapter::LocAdapter;
use crate::agps::{AgpsType, ApnBearer, ApnTypeMask};
use crate::context::{CapabilityContext, EngineCapabilities, SupportedMessage};
use crate::error::LocApiError;
use crate::gnss_config::GnssConfig;
use crate::lock;
use crate::msg_task::MsgTask;
use crate::session::SessionIdGenerator;
use crate::types::{
    EngineStatus, EventMask, GnssNmeaNotification, GnssSvNotification, PositionReport,
    TrackingOptions,
};

/// Maximum number of adapters attached to one engine.
pub const MAX_ADAPTERS: usize = 10;

/// Downward interface to the positioning engine.
///
/// `open`/`close`/`start_fix`/`stop_fix` are mandatory; the rest default
/// to [`LocApiError::Unsupported`].
pub trait LocEngine: Send + Sync {
    /// (Re)open the engine with the given event registration mask.
    fn open(&self, mask: EventMask) -> Result<(), LocApiError>;

    fn close(&self) -> Result<(), LocApiError>;

    fn start_fix(&self, options: &TrackingOptions) -> Result<(), LocApiError>;

    fn stop_fix(&self) -> Result<(), LocApiError>;

    fn atl_open_status(
        &self,
        _handle: i32,
        _success: bool,
        _apn: Option<&str>,
        _bearer: ApnBearer,
        _agps_type: AgpsType,
        _apn_type_mask: ApnTypeMask,
    ) -> Result<(), LocApiError> {
        Err(LocApiError::Unsupported)
    }

    fn atl_close_status(&self, _handle: i32, _success: bool) -> Result<(), LocApiError> {
        Err(LocApiError::Unsupported)
    }

    fn update_config(&self, _config: &GnssConfig) -> Result<(), LocApiError> {
        Err(LocApiError::Unsupported)
    }
}

/// Registration handle of one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterId(pub u32);

struct AdapterSlot {
    id: AdapterId,
    adapter: Weak<dyn LocAdapter>,
}

/// Engine-facing singleton shared by all adapters.
pub struct LocApi {
    me: Weak<LocApi>,
    engine: Arc<dyn LocEngine>,
    msg_task: MsgTask,
    adapters: Mutex<Vec<AdapterSlot>>,
    next_adapter_id: AtomicU32,
    /// Mask the engine was last opened with. Only touched on the queue.
    open_mask: AtomicU64,
    capabilities: watch::Sender<Option<EngineCapabilities>>,
    session_ids: SessionIdGenerator,
}

impl LocApi {
    pub fn new(engine: Arc<dyn LocEngine>, msg_task: MsgTask) -> Arc<Self> {
        let (capabilities, _) = watch::channel(None);

        Arc::new_cyclic(|me| LocApi {
            me: me.clone(),
            engine,
            msg_task,
            adapters: Mutex::new(Vec::with_capacity(MAX_ADAPTERS)),
            next_adapter_id: AtomicU32::new(1),
            open_mask: AtomicU64::new(0),
            capabilities,
            session_ids: SessionIdGenerator::new(),
        })
    }

    pub fn msg_task(&self) -> &MsgTask {
        &self.msg_task
    }

    pub fn generate_session_id(&self) -> u32 {
        self.session_ids.next_id()
    }

    // -------------------------------------------------------------------------
    // Adapter registry
    // -------------------------------------------------------------------------

    /// Attach an adapter. `None` if all slots are taken.
    ///
    /// The adapter may still be under construction; it is only upgraded
    /// when events are delivered. Slots are freed by [`LocApi::remove_adapter`]
    /// alone.
    pub fn add_adapter(&self, adapter: Weak<dyn LocAdapter>) -> Option<AdapterId> {
        let id = {
            let mut slots = lock(&self.adapters);
            if slots.len() >= MAX_ADAPTERS {
                error!("adapter registry full ({} slots)", MAX_ADAPTERS);
                return None;
            }
            let id = AdapterId(self.next_adapter_id.fetch_add(1, Ordering::Relaxed));
            slots.push(AdapterSlot { id, adapter });
            id
        };

        debug!("adapter {:?} registered", id);
        self.update_evt_mask();
        Some(id)
    }

    pub fn remove_adapter(&self, id: AdapterId) {
        let removed = {
            let mut slots = lock(&self.adapters);
            let before = slots.len();
            slots.retain(|slot| slot.id != id);
            before != slots.len()
        };

        if removed {
            debug!("adapter {:?} deregistered", id);
            self.update_evt_mask();
        }
    }

    pub fn adapter_count(&self) -> usize {
        lock(&self.adapters).len()
    }

    /// Snapshot of live adapters, so no lock is held during delivery.
    fn live_adapters(&self) -> Vec<Arc<dyn LocAdapter>> {
        lock(&self.adapters)
            .iter()
            .filter_map(|slot| slot.adapter.upgrade())
            .collect()
    }

    fn to_all_adapters<F>(&self, f: F)
    where
        F: Fn(&dyn LocAdapter),
    {
        for adapter in self.live_adapters() {
            f(adapter.as_ref());
        }
    }

    /// Stops at the first adapter that handles the event.
    fn to_first_handling_adapter<F>(&self, f: F) -> bool
    where
        F: Fn(&dyn LocAdapter) -> bool,
    {
        self.live_adapters().iter().any(|adapter| f(adapter.as_ref()))
    }

    // -------------------------------------------------------------------------
    // Event mask
    // -------------------------------------------------------------------------

    /// OR of every live adapter's mask.
    pub fn aggregate_evt_mask(&self) -> EventMask {
        self.live_adapters()
            .iter()
            .fold(0, |mask, adapter| mask | adapter.base().evt_mask())
    }

    /// Mask the engine is currently opened with.
    pub fn evt_mask(&self) -> EventMask {
        self.open_mask.load(Ordering::SeqCst)
    }

    /// Recompute the aggregate mask on the queue and reopen the engine
    /// if it changed. Closes the engine when nobody wants events.
    pub fn update_evt_mask(&self) {
        let me = self.me.clone();
        self.msg_task.send_msg(move || {
            let Some(api) = me.upgrade() else {
                return;
            };
            let mask = api.aggregate_evt_mask();
            let previous = api.open_mask.swap(mask, Ordering::SeqCst);
            if mask == previous {
                return;
            }

            let result = if mask == 0 {
                api.engine.close()
            } else {
                api.engine.open(mask)
            };
            match result {
                Ok(()) => debug!("engine mask 0x{:x} -> 0x{:x}", previous, mask),
                Err(e) => error!("engine reconfigure to mask 0x{:x} failed: {}", mask, e),
            }
        });
    }

    // -------------------------------------------------------------------------
    // Capabilities
    // -------------------------------------------------------------------------

    /// Engine reported what it supports. Wakes every waiter; later
    /// reports replace the stored value.
    pub fn save_supported_features(&self, caps: EngineCapabilities) {
        info!(
            "engine capabilities known, msg mask 0x{:x}",
            caps.supported_msg_mask()
        );
        self.capabilities.send_replace(Some(caps));
    }

    pub fn capabilities(&self) -> Option<EngineCapabilities> {
        self.capabilities.borrow().clone()
    }

    pub fn is_capabilities_known(&self) -> bool {
        self.capabilities.borrow().is_some()
    }

    pub fn subscribe_capabilities(&self) -> watch::Receiver<Option<EngineCapabilities>> {
        self.capabilities.subscribe()
    }

    pub fn is_feature_supported(&self, feature: u8) -> bool {
        self.capabilities
            .borrow()
            .as_ref()
            .is_some_and(|caps| caps.is_feature_supported(feature))
    }

    pub fn is_message_supported(&self, msg: SupportedMessage) -> bool {
        self.capabilities
            .borrow()
            .as_ref()
            .is_some_and(|caps| caps.is_message_supported(msg))
    }

    // -------------------------------------------------------------------------
    // Upcalls: engine thread -> adapters (not queued)
    // -------------------------------------------------------------------------

    pub fn handle_engine_up_event(&self) {
        info!("engine up");
        self.to_all_adapters(|adapter| adapter.handle_engine_up_event());
    }

    pub fn handle_engine_down_event(&self) {
        warn!("engine down");
        self.to_all_adapters(|adapter| adapter.handle_engine_down_event());
    }

    pub fn report_position(&self, report: &PositionReport) {
        self.to_all_adapters(|adapter| adapter.report_position_event(report));
    }

    pub fn report_sv(&self, sv: &GnssSvNotification) {
        self.to_all_adapters(|adapter| adapter.report_sv_event(sv));
    }

    pub fn report_nmea(&self, nmea: &GnssNmeaNotification) {
        self.to_all_adapters(|adapter| adapter.report_nmea_event(nmea));
    }

    pub fn report_status(&self, status: EngineStatus) {
        self.to_all_adapters(|adapter| adapter.report_status(status));
    }

    pub fn request_atl(&self, handle: i32, agps_type: AgpsType, apn_type_mask: ApnTypeMask) -> bool {
        let handled = self.to_first_handling_adapter(|adapter| {
            adapter.request_atl(handle, agps_type, apn_type_mask)
        });
        if !handled {
            warn!("request_atl({}) not handled by any adapter", handle);
        }
        handled
    }

    pub fn release_atl(&self, handle: i32) -> bool {
        self.to_first_handling_adapter(|adapter| adapter.release_atl(handle))
    }

    pub fn report_data_call_opened(&self) -> bool {
        self.to_first_handling_adapter(|adapter| adapter.report_data_call_opened())
    }

    pub fn report_data_call_closed(&self) -> bool {
        self.to_first_handling_adapter(|adapter| adapter.report_data_call_closed())
    }

    pub fn request_time(&self) -> bool {
        self.to_first_handling_adapter(|adapter| adapter.request_time())
    }

    pub fn request_xtra_data(&self) -> bool {
        self.to_first_handling_adapter(|adapter| adapter.request_xtra_data())
    }

    // -------------------------------------------------------------------------
    // Downward requests (queued)
    // -------------------------------------------------------------------------

    pub fn start_fix<F>(&self, options: TrackingOptions, done: F)
    where
        F: FnOnce(Result<(), LocApiError>) + Send + 'static,
    {
        let engine = self.engine.clone();
        self.msg_task.send_msg(move || done(engine.start_fix(&options)));
    }

    pub fn stop_fix<F>(&self, done: F)
    where
        F: FnOnce(Result<(), LocApiError>) + Send + 'static,
    {
        let engine = self.engine.clone();
        self.msg_task.send_msg(move || done(engine.stop_fix()));
    }

    pub fn atl_open_status(
        &self,
        handle: i32,
        success: bool,
        apn: Option<String>,
        bearer: ApnBearer,
        agps_type: AgpsType,
        apn_type_mask: ApnTypeMask,
    ) {
        let engine = self.engine.clone();
        self.msg_task.send_msg(move || {
            if let Err(e) = engine.atl_open_status(
                handle,
                success,
                apn.as_deref(),
                bearer,
                agps_type,
                apn_type_mask,
            ) {
                error!("atl_open_status({}) failed: {}", handle, e);
            }
        });
    }

    pub fn atl_close_status(&self, handle: i32, success: bool) {
        let engine = self.engine.clone();
        self.msg_task.send_msg(move || {
            if let Err(e) = engine.atl_close_status(handle, success) {
                error!("atl_close_status({}) failed: {}", handle, e);
            }
        });
    }

    pub fn update_config<F>(&self, config: GnssConfig, done: F)
    where
        F: FnOnce(Result<(), LocApiError>) + Send + 'static,
    {
        let engine = self.engine.clone();
        self.msg_task.send_msg(move || done(engine.update_config(&config)));
    }
}
