//! Strategies the AGPS manager talks to.
//!
//! All of them are supplied once, when the manager is built, and never
//! replaced.

use std::sync::Arc;
use std::time::Duration;

use super::{AgnssStatus, AgpsType, ApnBearer, ApnTypeMask};

/// Data-service call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DsError {
    /// Modem is busy; worth retrying after a delay.
    #[error("data service busy")]
    Busy,

    /// No emergency profile on the modem.
    #[error("emergency data profile not available")]
    Unsupported,

    #[error("data service failure")]
    Failure,
}

/// Framework side of the ATL handshake.
pub trait AgpsFramework: Send + Sync {
    /// Ask the framework to bring a data connection up or down.
    fn data_conn_status(&self, status: &AgnssStatus);
}

/// Where ATL open/close results go (the engine).
pub trait AtlStatusSink: Send + Sync {
    fn atl_open_status(
        &self,
        handle: i32,
        success: bool,
        apn: Option<&str>,
        bearer: ApnBearer,
        agps_type: AgpsType,
        apn_type_mask: ApnTypeMask,
    );

    fn atl_close_status(&self, handle: i32, success: bool);
}

/// Modem data-service control for emergency SUPL.
pub trait DataServiceClient: Send + Sync {
    fn init(&self, is_ssr: bool) -> Result<(), DsError>;

    fn open_and_start_data_call(&self) -> Result<(), DsError>;

    fn stop_data_call(&self);

    fn close_data_call(&self);

    fn release(&self);
}

/// Posts deferred AGPS work back onto the dispatch queue.
pub trait RetryScheduler: Send + Sync {
    /// Call [`super::AgpsManager::retry_data_call`] after `delay`.
    fn schedule_retry(&self, delay: Duration);

    /// Call [`super::AgpsManager::request_atl`] for `handle` on a later
    /// turn of the queue.
    fn schedule_request(&self, handle: i32, agps_type: AgpsType, apn_type_mask: ApnTypeMask);
}

/// Bundle handed to [`super::AgpsManager::new`].
#[derive(Clone)]
pub struct AgpsCallbacks {
    pub framework: Arc<dyn AgpsFramework>,
    pub atl: Arc<dyn AtlStatusSink>,
    pub data_service: Option<Arc<dyn DataServiceClient>>,
    pub scheduler: Arc<dyn RetryScheduler>,
}
