// crates/loc-core/tests/common/mod.rs
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use loc_core::agps::{AgpsType, ApnBearer, ApnTypeMask};
use loc_core::{EventMask, GnssConfig, LocApi, LocApiError, LocEngine, MsgTask, TrackingOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Open(EventMask),
    Close,
    StartFix(TrackingOptions),
    StopFix,
    AtlOpen { handle: i32, success: bool, agps_type: AgpsType },
    AtlClose { handle: i32, success: bool },
    UpdateConfig(GnssConfig),
}

/// Engine stub that records every downward call.
#[derive(Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    start_error: Mutex<Option<LocApiError>>,
}

impl RecordingEngine {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<EngineCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn fail_start_with(&self, err: LocApiError) {
        *self.start_error.lock().unwrap() = Some(err);
    }

    fn push(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl LocEngine for RecordingEngine {
    fn open(&self, mask: EventMask) -> Result<(), LocApiError> {
        self.push(EngineCall::Open(mask));
        Ok(())
    }

    fn close(&self) -> Result<(), LocApiError> {
        self.push(EngineCall::Close);
        Ok(())
    }

    fn start_fix(&self, options: &TrackingOptions) -> Result<(), LocApiError> {
        self.push(EngineCall::StartFix(*options));
        match *self.start_error.lock().unwrap() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn stop_fix(&self) -> Result<(), LocApiError> {
        self.push(EngineCall::StopFix);
        Ok(())
    }

    fn atl_open_status(
        &self,
        handle: i32,
        success: bool,
        _apn: Option<&str>,
        _bearer: ApnBearer,
        agps_type: AgpsType,
        _apn_type_mask: ApnTypeMask,
    ) -> Result<(), LocApiError> {
        self.push(EngineCall::AtlOpen {
            handle,
            success,
            agps_type,
        });
        Ok(())
    }

    fn atl_close_status(&self, handle: i32, success: bool) -> Result<(), LocApiError> {
        self.push(EngineCall::AtlClose { handle, success });
        Ok(())
    }

    fn update_config(&self, config: &GnssConfig) -> Result<(), LocApiError> {
        self.push(EngineCall::UpdateConfig(config.clone()));
        Ok(())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine_and_api() -> (Arc<RecordingEngine>, Arc<LocApi>) {
    init_tracing();
    let engine = Arc::new(RecordingEngine::default());
    let api = LocApi::new(engine.clone(), MsgTask::new("loc-test"));
    (engine, api)
}

/// Let chained messages and parked waiters run to completion.
pub async fn settle(api: &LocApi) {
    for _ in 0..8 {
        tokio::task::yield_now().await;
        api.msg_task().drain().await;
    }
}

pub fn only_fix_calls(calls: &[EngineCall]) -> Vec<EngineCall> {
    calls
        .iter()
        .filter(|c| matches!(c, EngineCall::StartFix(_) | EngineCall::StopFix))
        .cloned()
        .collect()
}
