//! Per-connection-type AGPS state machine.
//!
//! ```text
//!   RELEASED --SUBSCRIBE--> PENDING --GRANTED--> ACQUIRED
//!      ^                      |                     |
//!      |                   DENIED             last UNSUBSCRIBE
//!      +----------------------+                     v
//!      +--------------RELEASED (no active)------ RELEASING
//! ```
//!
//! At most one open or close request is outstanding at a time. Later
//! subscribers piggyback on whatever is in flight.

use tracing::{debug, error, info, warn};

use super::backend::{ConnRequest, ConnectionBackend, LinkInfo};
use super::{AgpsEvent, AgpsState, AgpsType, ApnBearer, ApnTypeMask, MAX_APN_LEN};

/// One outstanding data-connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgpsSubscriber {
    pub conn_handle: i32,
    /// Stay in the list after UNSUBSCRIBE until the close completes.
    pub wait_for_close_complete: bool,
    /// Unsubscribed, waiting for the close to complete.
    pub is_inactive: bool,
    /// Already told the connection is up.
    pub granted: bool,
    pub apn_type_mask: ApnTypeMask,
}

impl AgpsSubscriber {
    pub fn new(conn_handle: i32, apn_type_mask: ApnTypeMask) -> Self {
        AgpsSubscriber {
            conn_handle,
            wait_for_close_complete: false,
            is_inactive: false,
            granted: false,
            apn_type_mask,
        }
    }

    pub fn waiting_for_close(mut self) -> Self {
        self.wait_for_close_complete = true;
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum NotifyScope {
    All,
    Inactive,
}

impl NotifyScope {
    fn matches(self, subscriber: &AgpsSubscriber) -> bool {
        match self {
            NotifyScope::All => true,
            NotifyScope::Inactive => subscriber.is_inactive,
        }
    }
}

pub struct AgpsStateMachine {
    state: AgpsState,
    subscribers: Vec<AgpsSubscriber>,
    link: LinkInfo,
    backend: Box<dyn ConnectionBackend>,
}

impl std::fmt::Debug for AgpsStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgpsStateMachine")
            .field("state", &self.state)
            .field("subscribers", &self.subscribers)
            .field("link", &self.link)
            .finish()
    }
}

impl AgpsStateMachine {
    pub(crate) fn new(agps_type: AgpsType, backend: Box<dyn ConnectionBackend>) -> Self {
        AgpsStateMachine {
            state: AgpsState::Released,
            subscribers: Vec::new(),
            link: LinkInfo::new(agps_type),
            backend,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn state(&self) -> AgpsState {
        self.state
    }

    pub fn agps_type(&self) -> AgpsType {
        self.link.agps_type
    }

    pub fn apn(&self) -> Option<&str> {
        self.link.apn.as_deref()
    }

    pub fn bearer(&self) -> ApnBearer {
        self.link.bearer
    }

    pub fn subscribers(&self) -> &[AgpsSubscriber] {
        &self.subscribers
    }

    pub fn subscriber(&self, conn_handle: i32) -> Option<&AgpsSubscriber> {
        self.subscribers
            .iter()
            .find(|sub| sub.conn_handle == conn_handle)
    }

    pub fn any_active_subscribers(&self) -> bool {
        self.subscribers.iter().any(|sub| !sub.is_inactive)
    }

    pub(crate) fn set_type(&mut self, agps_type: AgpsType) {
        self.link.agps_type = agps_type;
    }

    pub(crate) fn set_apn_type_mask(&mut self, mask: ApnTypeMask) {
        self.link.apn_type_mask = mask;
    }

    pub(crate) fn set_bearer(&mut self, bearer: ApnBearer) {
        self.link.bearer = bearer;
    }

    /// Store the APN from the framework. Empty or over-long names are
    /// dropped.
    pub(crate) fn set_apn(&mut self, apn: Option<&str>) {
        self.link.apn = match apn {
            Some(apn) if !apn.is_empty() && apn.len() <= MAX_APN_LEN => Some(apn.to_owned()),
            Some(apn) => {
                debug!("invalid apn len ({})", apn.len());
                None
            }
            None => None,
        };
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    pub fn subscribe(&mut self, subscriber: AgpsSubscriber) {
        debug!(
            "{:?} SM: SUBSCRIBE handle {} in {:?}",
            self.link.agps_type, subscriber.conn_handle, self.state
        );

        match self.state {
            AgpsState::Released => {
                self.add_subscriber(subscriber);
                self.transition(AgpsState::Pending);
                self.request_connection();
            }
            AgpsState::Pending | AgpsState::Releasing => self.add_subscriber(subscriber),
            AgpsState::Acquired => {
                let mut subscriber = subscriber;
                self.backend
                    .notify(AgpsEvent::Granted, &subscriber, &self.link);
                subscriber.granted = true;
                self.add_subscriber(subscriber);
            }
        }
    }

    /// `false` if no subscriber has this handle.
    pub fn unsubscribe(&mut self, conn_handle: i32) -> bool {
        let Some(index) = self
            .subscribers
            .iter()
            .position(|sub| sub.conn_handle == conn_handle)
        else {
            return false;
        };

        debug!(
            "{:?} SM: UNSUBSCRIBE handle {} in {:?}",
            self.link.agps_type, conn_handle, self.state
        );

        if self.state == AgpsState::Released {
            let subscriber = self.subscribers.remove(index);
            self.backend
                .notify(AgpsEvent::Unsubscribe, &subscriber, &self.link);
            return true;
        }

        if self.subscribers[index].wait_for_close_complete {
            self.subscribers[index].is_inactive = true;
        } else {
            let subscriber = self.subscribers.remove(index);
            self.backend
                .notify(AgpsEvent::Unsubscribe, &subscriber, &self.link);
        }

        match self.state {
            AgpsState::Pending | AgpsState::Acquired => {
                if !self.any_active_subscribers() {
                    self.transition(AgpsState::Releasing);
                    self.backend.release(&self.link);
                }
            }
            AgpsState::Releasing => {
                // Close already requested.
                if self.subscribers.is_empty() {
                    self.transition(AgpsState::Released);
                }
            }
            AgpsState::Released => {}
        }
        true
    }

    /// Connection-level event from the framework or the modem.
    pub fn process_event(&mut self, event: AgpsEvent) {
        let event = self.backend.translate(event, self.state);
        debug!("{:?} SM: {:?} in {:?}", self.link.agps_type, event, self.state);

        match event {
            AgpsEvent::Granted => self.on_granted(),
            AgpsEvent::Released => self.on_released(),
            AgpsEvent::Denied => self.on_denied(),
            AgpsEvent::Subscribe | AgpsEvent::Unsubscribe => {
                error!("{:?} needs a subscriber", event);
            }
        }
    }

    /// Deferred retry of the open request.
    pub fn retry(&mut self) {
        if !self.backend.supports_retry() {
            return;
        }
        if self.state != AgpsState::Pending || !self.any_active_subscribers() {
            debug!(
                "{:?} SM: retry dropped in {:?}",
                self.link.agps_type, self.state
            );
            return;
        }
        self.request_connection();
    }

    /// Drop every subscriber and go back to RELEASED without telling
    /// anyone. Callers re-request afterwards.
    pub fn reset(&mut self) {
        info!(
            "{:?} SM: reset, dropping {} subscribers",
            self.link.agps_type,
            self.subscribers.len()
        );
        self.subscribers.clear();
        self.transition(AgpsState::Released);
        self.backend.reset();
    }

    fn on_granted(&mut self) {
        if self.state != AgpsState::Pending {
            error!("unexpected GRANTED in {:?}", self.state);
            return;
        }

        self.transition(AgpsState::Acquired);

        let link = &self.link;
        let backend = &mut self.backend;
        for subscriber in self
            .subscribers
            .iter_mut()
            .filter(|sub| !sub.is_inactive && !sub.granted)
        {
            backend.notify(AgpsEvent::Granted, subscriber, link);
            subscriber.granted = true;
        }
    }

    fn on_released(&mut self) {
        match self.state {
            AgpsState::Released => {
                if !self.subscribers.is_empty() {
                    error!("unexpected RELEASED in RELEASED with subscribers");
                }
            }
            AgpsState::Acquired => {
                warn!("forced RELEASED in ACQUIRED");
                self.transition(AgpsState::Released);
                self.notify_and_remove(AgpsEvent::Released, NotifyScope::All);
            }
            AgpsState::Releasing => self.close_completed(),
            AgpsState::Pending => {}
        }
    }

    fn on_denied(&mut self) {
        match self.state {
            AgpsState::Released => error!("unexpected DENIED in RELEASED"),
            AgpsState::Acquired => {}
            AgpsState::Releasing => self.close_completed(),
            AgpsState::Pending => {
                self.transition(AgpsState::Released);
                self.notify_and_remove(AgpsEvent::Denied, NotifyScope::All);
            }
        }
    }

    /// Close finished while RELEASING. Anyone who subscribed meanwhile
    /// gets a fresh open request.
    fn close_completed(&mut self) {
        self.notify_and_remove(AgpsEvent::Released, NotifyScope::Inactive);

        if self.any_active_subscribers() {
            self.transition(AgpsState::Pending);
            self.request_connection();
        } else {
            self.transition(AgpsState::Released);
        }
    }

    /// Must be in PENDING already.
    fn request_connection(&mut self) {
        match self.backend.request(&self.link) {
            ConnRequest::Sent | ConnRequest::RetryScheduled => {}
            ConnRequest::Denied => self.on_denied(),
        }
    }

    fn notify_and_remove(&mut self, event: AgpsEvent, scope: NotifyScope) {
        let link = &self.link;
        let backend = &mut self.backend;
        self.subscribers.retain(|subscriber| {
            if !scope.matches(subscriber) {
                return true;
            }
            backend.notify(event, subscriber, link);
            false
        });
    }

    fn add_subscriber(&mut self, subscriber: AgpsSubscriber) {
        if self.subscriber(subscriber.conn_handle).is_some() {
            error!("subscriber {} already in list", subscriber.conn_handle);
            return;
        }
        self.subscribers.push(subscriber);
    }

    fn transition(&mut self, state: AgpsState) {
        debug!(
            "{:?} SM: {:?} -> {:?}",
            self.link.agps_type, self.state, state
        );
        self.state = state;
    }
}
