//! Owner of the per-type state machines and router for ATL requests.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::backend::{DsBackend, FrameworkBackend};
use super::callbacks::AgpsCallbacks;
use super::state_machine::{AgpsStateMachine, AgpsSubscriber};
use super::{apn_type, AgpsEvent, AgpsState, AgpsType, ApnBearer, ApnTypeMask};
use crate::config::{AtlTypeMask, LocConfig, ATL_TYPE_SUPL, ATL_TYPE_SUPL_ES, ATL_TYPE_WWAN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgpsConfig {
    pub atl_types: AtlTypeMask,
    /// Carrier capabilities include MSA or MSB.
    pub agps_capable: bool,
    pub use_emergency_pdn_for_emergency_supl: bool,
    pub ds_max_retries: u32,
    pub ds_retry_delay: Duration,
}

impl From<&LocConfig> for AgpsConfig {
    fn from(config: &LocConfig) -> Self {
        AgpsConfig {
            atl_types: config.agps_atl_types,
            agps_capable: config.agps_capable(),
            use_emergency_pdn_for_emergency_supl: config.use_emergency_pdn_for_emergency_supl,
            ds_max_retries: config.ds_max_retries,
            ds_retry_delay: config.ds_retry_delay(),
        }
    }
}

impl Default for AgpsConfig {
    fn default() -> Self {
        AgpsConfig::from(&LocConfig::default())
    }
}

/// Routes ATL requests and connection results to the right machine.
pub struct AgpsManager {
    config: AgpsConfig,
    callbacks: AgpsCallbacks,
    internet: Option<AgpsStateMachine>,
    agnss: Option<AgpsStateMachine>,
    ds: Option<AgpsStateMachine>,
}

impl AgpsManager {
    pub fn new(config: AgpsConfig, callbacks: AgpsCallbacks) -> Self {
        let mut manager = AgpsManager {
            config,
            callbacks,
            internet: None,
            agnss: None,
            ds: None,
        };
        manager.create_state_machines();
        manager
    }

    fn create_state_machines(&mut self) {
        if self.internet.is_none() && self.config.atl_types & ATL_TYPE_WWAN != 0 {
            self.internet = Some(self.framework_machine(AgpsType::WwanAny));
            debug!("internet state machine created");
        }

        if !self.config.agps_capable {
            info!("not AGPS capable, no SUPL state machines");
            return;
        }

        if self.agnss.is_none() && self.config.atl_types & ATL_TYPE_SUPL != 0 {
            self.agnss = Some(self.framework_machine(AgpsType::Supl));
            debug!("AGNSS state machine created");
        }

        if self.config.use_emergency_pdn_for_emergency_supl {
            self.create_ds_machine();
        }
    }

    fn framework_machine(&self, agps_type: AgpsType) -> AgpsStateMachine {
        let backend = FrameworkBackend::new(
            self.callbacks.framework.clone(),
            self.callbacks.atl.clone(),
        );
        AgpsStateMachine::new(agps_type, Box::new(backend))
    }

    fn create_ds_machine(&mut self) {
        if self.ds.is_some()
            || !self.config.agps_capable
            || self.config.atl_types & ATL_TYPE_SUPL_ES == 0
        {
            return;
        }
        let Some(client) = self.callbacks.data_service.clone() else {
            error!("no data service client, emergency SUPL uses the SUPL path");
            return;
        };
        if let Err(e) = client.init(false) {
            error!("failed to init data service client: {}", e);
            return;
        }

        let backend = DsBackend::new(
            client,
            self.callbacks.atl.clone(),
            self.callbacks.scheduler.clone(),
            self.config.ds_max_retries,
            self.config.ds_retry_delay,
        );
        self.ds = Some(AgpsStateMachine::new(AgpsType::SuplEs, Box::new(backend)));
        debug!("DS state machine created");
    }

    fn machine_mut(&mut self, agps_type: AgpsType) -> Option<&mut AgpsStateMachine> {
        let machine = match agps_type {
            AgpsType::Invalid | AgpsType::Supl => self.agnss.as_mut(),
            AgpsType::SuplEs => {
                if self.config.use_emergency_pdn_for_emergency_supl {
                    self.create_ds_machine();
                    self.ds.as_mut()
                } else {
                    self.agnss.as_mut()
                }
            }
            _ => self.internet.as_mut(),
        };
        if machine.is_none() {
            error!("no state machine for {:?}", agps_type);
        }
        machine
    }

    /// Machine that serves `agps_type`, if any.
    pub fn machine(&self, agps_type: AgpsType) -> Option<&AgpsStateMachine> {
        match agps_type {
            AgpsType::Invalid | AgpsType::Supl => self.agnss.as_ref(),
            AgpsType::SuplEs if self.config.use_emergency_pdn_for_emergency_supl => {
                self.ds.as_ref()
            }
            AgpsType::SuplEs => self.agnss.as_ref(),
            _ => self.internet.as_ref(),
        }
    }

    pub fn state(&self, agps_type: AgpsType) -> Option<AgpsState> {
        self.machine(agps_type).map(AgpsStateMachine::state)
    }

    pub fn set_use_emergency_pdn(&mut self, enabled: bool) {
        self.config.use_emergency_pdn_for_emergency_supl = enabled;
    }

    // -------------------------------------------------------------------------
    // Engine side
    // -------------------------------------------------------------------------

    pub fn request_atl(&mut self, conn_handle: i32, agps_type: AgpsType, apn_type_mask: ApnTypeMask) {
        let mut agps_type = agps_type;
        let mut apn_type_mask = apn_type_mask;

        if agps_type == AgpsType::SuplEs && !self.config.use_emergency_pdn_for_emergency_supl {
            agps_type = AgpsType::Supl;
            apn_type_mask = (apn_type_mask & !apn_type::EMERGENCY) | apn_type::SUPL;
            debug!(
                "emergency PDN disabled, SUPL_ES rerouted to SUPL, apn mask 0x{:x}",
                apn_type_mask
            );
        }

        info!(
            "request ATL: handle {}, {:?}, apn mask 0x{:x}",
            conn_handle, agps_type, apn_type_mask
        );

        let atl = self.callbacks.atl.clone();
        let Some(machine) = self.machine_mut(agps_type) else {
            atl.atl_open_status(
                conn_handle,
                false,
                None,
                ApnBearer::Invalid,
                agps_type,
                apn_type_mask,
            );
            return;
        };

        if machine.agps_type() != AgpsType::SuplEs {
            machine.set_type(agps_type);
        }
        machine.set_apn_type_mask(apn_type_mask);

        let mut subscriber = AgpsSubscriber::new(conn_handle, apn_type_mask);
        if agps_type == AgpsType::SuplEs {
            subscriber = subscriber.waiting_for_close();
        }
        machine.subscribe(subscriber);
    }

    pub fn release_atl(&mut self, conn_handle: i32) {
        info!("release ATL: handle {}", conn_handle);

        let machine = [&mut self.agnss, &mut self.internet, &mut self.ds]
            .into_iter()
            .flatten()
            .find(|machine| machine.subscriber(conn_handle).is_some());

        match machine {
            Some(machine) => {
                machine.unsubscribe(conn_handle);
            }
            None => {
                error!("subscriber {} not found in any state machine", conn_handle);
                self.callbacks.atl.atl_close_status(conn_handle, false);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Framework side
    // -------------------------------------------------------------------------

    pub fn report_atl_open_success(&mut self, agps_type: AgpsType, apn: Option<&str>, bearer: ApnBearer) {
        info!("ATL open success: {:?}, apn {:?}, {:?}", agps_type, apn, bearer);
        if let Some(machine) = self.machine_mut(agps_type) {
            machine.set_bearer(bearer);
            machine.set_apn(apn);
            machine.process_event(AgpsEvent::Granted);
        }
    }

    pub fn report_atl_open_failed(&mut self, agps_type: AgpsType) {
        warn!("ATL open failed: {:?}", agps_type);
        if let Some(machine) = self.machine_mut(agps_type) {
            machine.process_event(AgpsEvent::Denied);
        }
    }

    pub fn report_atl_closed(&mut self, agps_type: AgpsType) {
        info!("ATL closed: {:?}", agps_type);
        if let Some(machine) = self.machine_mut(agps_type) {
            machine.process_event(AgpsEvent::Released);
        }
    }

    // -------------------------------------------------------------------------
    // Modem data service
    // -------------------------------------------------------------------------

    pub fn report_data_call_opened(&mut self) {
        debug!("DS data call opened");
        if let Some(ds) = self.ds.as_mut() {
            ds.process_event(AgpsEvent::Granted);
        }
    }

    pub fn report_data_call_closed(&mut self) {
        debug!("DS data call closed");
        if let Some(ds) = self.ds.as_mut() {
            ds.process_event(AgpsEvent::Released);
        }
    }

    /// Fired by the retry timer the DS machine armed.
    pub fn retry_data_call(&mut self) {
        if let Some(ds) = self.ds.as_mut() {
            ds.retry();
        }
    }

    /// Modem restarted: every machine forgets its subscribers.
    pub fn handle_modem_ssr(&mut self) {
        warn!("modem SSR, resetting AGPS state machines");
        for machine in [&mut self.agnss, &mut self.internet, &mut self.ds]
            .into_iter()
            .flatten()
        {
            machine.reset();
        }
    }
}
