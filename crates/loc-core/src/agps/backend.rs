//! Where a state machine sends its open/close requests and its
//! subscriber notifications.
//!
//! The framework backend drives the generic ATL handshake. The
//! data-service backend talks to the modem directly and owns the only
//! automatic retry in the core.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::callbacks::{AgpsFramework, AtlStatusSink, DataServiceClient, DsError, RetryScheduler};
use super::state_machine::AgpsSubscriber;
use super::{apn_type, AgnssStatus, AgpsEvent, AgpsState, AgpsType, ApnBearer, ApnTypeMask, DataConnStatus};

/// Connection parameters carried by one state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LinkInfo {
    pub agps_type: AgpsType,
    pub apn_type_mask: ApnTypeMask,
    pub apn: Option<String>,
    pub bearer: ApnBearer,
}

impl LinkInfo {
    pub fn new(agps_type: AgpsType) -> Self {
        LinkInfo {
            agps_type,
            apn_type_mask: 0,
            apn: None,
            bearer: ApnBearer::Invalid,
        }
    }
}

/// Result of asking a backend to bring the connection up.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ConnRequest {
    /// Request is out; wait for GRANTED or DENIED.
    Sent,
    /// Request failed but will be retried; stay PENDING.
    RetryScheduled,
    /// Request failed for good; treat as DENIED.
    Denied,
}

pub(crate) trait ConnectionBackend: Send {
    fn request(&mut self, link: &LinkInfo) -> ConnRequest;

    fn release(&mut self, link: &LinkInfo);

    fn notify(&mut self, event: AgpsEvent, subscriber: &AgpsSubscriber, link: &LinkInfo);

    /// Rewrite an incoming event before the transition table sees it.
    fn translate(&self, event: AgpsEvent, _state: AgpsState) -> AgpsEvent {
        event
    }

    /// Modem restarted.
    fn reset(&mut self) {}

    fn supports_retry(&self) -> bool {
        false
    }
}

// -----------------------------------------------------------------------------
// Framework
// -----------------------------------------------------------------------------

pub(crate) struct FrameworkBackend {
    framework: Arc<dyn AgpsFramework>,
    atl: Arc<dyn AtlStatusSink>,
}

impl FrameworkBackend {
    pub fn new(framework: Arc<dyn AgpsFramework>, atl: Arc<dyn AtlStatusSink>) -> Self {
        FrameworkBackend { framework, atl }
    }

    fn send(&self, link: &LinkInfo, status: DataConnStatus) {
        let status = AgnssStatus {
            agps_type: link.agps_type,
            apn_type_mask: link.apn_type_mask,
            status,
        };
        debug!("AGPS data conn {:?}", status);
        self.framework.data_conn_status(&status);
    }
}

impl ConnectionBackend for FrameworkBackend {
    fn request(&mut self, link: &LinkInfo) -> ConnRequest {
        self.send(link, DataConnStatus::Request);
        ConnRequest::Sent
    }

    fn release(&mut self, link: &LinkInfo) {
        self.send(link, DataConnStatus::Release);
    }

    fn notify(&mut self, event: AgpsEvent, subscriber: &AgpsSubscriber, link: &LinkInfo) {
        match event {
            AgpsEvent::Granted | AgpsEvent::Denied => self.atl.atl_open_status(
                subscriber.conn_handle,
                event == AgpsEvent::Granted,
                link.apn.as_deref(),
                link.bearer,
                link.agps_type,
                link.apn_type_mask,
            ),
            AgpsEvent::Unsubscribe | AgpsEvent::Released => {
                self.atl.atl_close_status(subscriber.conn_handle, true)
            }
            AgpsEvent::Subscribe => error!("invalid notification {:?}", event),
        }
    }
}

// -----------------------------------------------------------------------------
// Modem data service
// -----------------------------------------------------------------------------

pub(crate) struct DsBackend {
    client: Arc<dyn DataServiceClient>,
    atl: Arc<dyn AtlStatusSink>,
    scheduler: Arc<dyn RetryScheduler>,
    retries: u32,
    max_retries: u32,
    retry_delay: Duration,
}

impl DsBackend {
    pub fn new(
        client: Arc<dyn DataServiceClient>,
        atl: Arc<dyn AtlStatusSink>,
        scheduler: Arc<dyn RetryScheduler>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        DsBackend {
            client,
            atl,
            scheduler,
            retries: 0,
            max_retries,
            retry_delay,
        }
    }
}

impl ConnectionBackend for DsBackend {
    fn request(&mut self, _link: &LinkInfo) -> ConnRequest {
        match self.client.open_and_start_data_call() {
            Ok(()) => {
                debug!("DS data call start sent");
                self.retries = 0;
                ConnRequest::Sent
            }
            Err(DsError::Busy) => {
                self.retries += 1;
                if self.retries > self.max_retries {
                    error!("DS call retries exhausted, falling back to SUPL");
                    return ConnRequest::Denied;
                }
                warn!(
                    "DS open busy, retry {}/{} in {:?}",
                    self.retries, self.max_retries, self.retry_delay
                );
                self.scheduler.schedule_retry(self.retry_delay);
                ConnRequest::RetryScheduled
            }
            Err(e) => {
                error!("DS open failed: {}, falling back to SUPL", e);
                ConnRequest::Denied
            }
        }
    }

    fn release(&mut self, _link: &LinkInfo) {
        self.client.stop_data_call();
        debug!("DS stop data call sent");
    }

    fn notify(&mut self, event: AgpsEvent, subscriber: &AgpsSubscriber, link: &LinkInfo) {
        let handle = subscriber.conn_handle;
        match event {
            AgpsEvent::Granted => self.atl.atl_open_status(
                handle,
                true,
                None,
                ApnBearer::Invalid,
                AgpsType::SuplEs,
                link.apn_type_mask,
            ),
            AgpsEvent::Denied => {
                // Retry on the regular SUPL connection.
                self.retries = 0;
                let mask = (link.apn_type_mask & !apn_type::EMERGENCY) | apn_type::SUPL;
                self.scheduler.schedule_request(handle, AgpsType::Supl, mask);
            }
            AgpsEvent::Unsubscribe => self.atl.atl_close_status(handle, true),
            AgpsEvent::Released => {
                self.client.close_data_call();
                self.atl.atl_close_status(handle, true);
            }
            AgpsEvent::Subscribe => error!("invalid notification {:?}", event),
        }
    }

    /// The modem reports open failure and closure the same way.
    fn translate(&self, event: AgpsEvent, state: AgpsState) -> AgpsEvent {
        if event == AgpsEvent::Released && state == AgpsState::Pending {
            debug!("DS: RELEASED while PENDING taken as DENIED");
            return AgpsEvent::Denied;
        }
        event
    }

    fn reset(&mut self) {
        self.retries = 0;
        self.client.stop_data_call();
        self.client.close_data_call();
        self.client.release();
        if let Err(e) = self.client.init(true) {
            error!("DS re-init after modem restart failed: {}", e);
        }
    }

    fn supports_retry(&self) -> bool {
        true
    }
}

impl Drop for DsBackend {
    fn drop(&mut self) {
        self.client.release();
    }
}
