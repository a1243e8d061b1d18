//! Service front used by one positioning client.
//!
//! The client-side API object is created lazily, the first time a
//! callback table is registered. Until then:
//! - tracking calls fail (logged, `false`), with no retry;
//! - configuration updates are kept in the single [`PendingConfig`] slot
//!   and flushed once when the API object comes up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use crate::adapter::LocAdapter;
use crate::gnss_adapter::GnssAdapter;
use crate::gnss_config::GnssConfig;
use crate::lock;
use crate::pending_config::PendingConfig;
use crate::types::{ClientId, LocationCallbacks, TrackingOptions};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Client-side API object: one registered client of the adapter.
#[derive(Debug)]
struct ApiClient {
    client: ClientId,
    session: Option<u32>,
    options: TrackingOptions,
}

pub struct GnssService {
    adapter: Arc<GnssAdapter>,
    api: Mutex<Option<ApiClient>>,
    pending_config: Mutex<PendingConfig>,
}

impl GnssService {
    pub fn new(adapter: Arc<GnssAdapter>) -> Self {
        GnssService {
            adapter,
            api: Mutex::new(None),
            pending_config: Mutex::new(PendingConfig::new()),
        }
    }

    pub fn adapter(&self) -> &Arc<GnssAdapter> {
        &self.adapter
    }

    pub fn is_api_ready(&self) -> bool {
        lock(&self.api).is_some()
    }

    pub fn client_id(&self) -> Option<ClientId> {
        lock(&self.api).as_ref().map(|api| api.client)
    }

    pub fn has_pending_config(&self) -> bool {
        lock(&self.pending_config).is_pending()
    }

    /// Register (or replace) the callback table. Creates the API object
    /// on first use and flushes any buffered configuration into it.
    pub fn set_callback(&self, callbacks: LocationCallbacks) -> bool {
        let mut api = lock(&self.api);

        if let Some(existing) = api.as_ref() {
            debug!("{} replacing callbacks", existing.client);
            self.adapter
                .base()
                .add_client_command(existing.client, callbacks);
            return true;
        }

        let client = ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed));
        info!("creating location API object for {}", client);

        let base = self.adapter.base();
        base.add_client_command(client, callbacks);
        base.request_capabilities_command(client);

        if let Some(config) = lock(&self.pending_config).take() {
            debug!("flushing pending config flags 0x{:x}", config.flags);
            self.adapter.gnss_update_config_command(client, config);
        }

        *api = Some(ApiClient {
            client,
            session: None,
            options: TrackingOptions::default(),
        });
        true
    }

    pub fn start(&self) -> bool {
        let mut api = lock(&self.api);
        let Some(api) = api.as_mut() else {
            error!("start: location API not ready");
            return false;
        };
        if api.session.is_some() {
            debug!("{} already tracking", api.client);
            return true;
        }
        api.session = Some(
            self.adapter
                .start_tracking_command(api.client, api.options),
        );
        true
    }

    pub fn stop(&self) -> bool {
        let mut api = lock(&self.api);
        let Some(api) = api.as_mut() else {
            error!("stop: location API not ready");
            return false;
        };
        if let Some(id) = api.session.take() {
            self.adapter.stop_tracking_command(api.client, id);
        }
        true
    }

    pub fn set_position_mode(&self, min_interval_ms: u32, min_distance_m: u32) -> bool {
        let mut api = lock(&self.api);
        let Some(api) = api.as_mut() else {
            error!("set_position_mode: location API not ready");
            return false;
        };
        api.options = TrackingOptions {
            min_interval_ms,
            min_distance_m,
        };
        if let Some(id) = api.session {
            self.adapter
                .update_tracking_options_command(api.client, id, api.options);
        }
        true
    }

    /// Send `config` to the engine, or buffer it until the API exists.
    pub fn update_configuration(&self, config: GnssConfig) -> bool {
        let api = lock(&self.api);
        match api.as_ref() {
            Some(api) => {
                self.adapter.gnss_update_config_command(api.client, config);
                true
            }
            None => {
                debug!("location API not ready, buffering config");
                lock(&self.pending_config).stash(&config)
            }
        }
    }

    /// Stop tracking and drop the API object.
    pub fn cleanup(&self) {
        let Some(api) = lock(&self.api).take() else {
            return;
        };
        if let Some(id) = api.session {
            self.adapter.stop_tracking_command(api.client, id);
        }
        self.adapter.base().remove_client_command(api.client, None);
        info!("{} cleaned up", api.client);
    }
}

impl Drop for GnssService {
    fn drop(&mut self) {
        self.cleanup();
    }
}
