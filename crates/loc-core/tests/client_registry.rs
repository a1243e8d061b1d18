// crates/loc-core/tests/client_registry.rs
mod common;

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use common::{engine_and_api, settle};
use loc_core::types::capabilities;
use loc_core::{
    ClientId, EngineCapabilities, LocAdapter, LocAdapterBase, LocApi, LocationCallbacks,
    SupportedMessage, MAX_ADAPTERS,
};

/// Minimal adapter that counts stop-session hooks per client.
struct CountingAdapter {
    base: LocAdapterBase,
    stops: Mutex<HashMap<ClientId, usize>>,
}

impl CountingAdapter {
    fn new(api: &Arc<LocApi>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<CountingAdapter>| {
            let me: Weak<dyn LocAdapter> = me.clone();
            CountingAdapter {
                base: LocAdapterBase::new(me, api.clone(), 0x7),
                stops: Mutex::new(HashMap::new()),
            }
        })
    }

    fn stops(&self, client: ClientId) -> usize {
        self.stops.lock().unwrap().get(&client).copied().unwrap_or(0)
    }
}

impl LocAdapter for CountingAdapter {
    fn base(&self) -> &LocAdapterBase {
        &self.base
    }

    fn stop_client_sessions(&self, client: ClientId) {
        *self.stops.lock().unwrap().entry(client).or_insert(0) += 1;
    }
}

fn with_capabilities_cb(seen: Arc<Mutex<Vec<u32>>>) -> LocationCallbacks {
    LocationCallbacks {
        capabilities_cb: Some(Arc::new(move |mask| seen.lock().unwrap().push(mask))),
        ..LocationCallbacks::default()
    }
}

#[tokio::test]
async fn add_then_remove_before_drain() {
    let (_engine, api) = engine_and_api();
    let adapter = CountingAdapter::new(&api);
    let c1 = ClientId(1);
    let done = Arc::new(AtomicUsize::new(0));

    adapter
        .base()
        .add_client_command(c1, LocationCallbacks::default());
    let done_count = done.clone();
    adapter.base().remove_client_command(
        c1,
        Some(Box::new(move |client| {
            assert_eq!(client, ClientId(1));
            done_count.fetch_add(1, Ordering::SeqCst);
        })),
    );
    settle(&api).await;

    assert!(!adapter.base().has_client(c1));
    assert_eq!(adapter.stops(c1), 1);
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interleaved_adds_and_removes_net_out() {
    let (_engine, api) = engine_and_api();
    let adapter = CountingAdapter::new(&api);
    let mut expected = BTreeSet::new();

    // Deterministic LCG so failures replay.
    let mut seed: u64 = 0x5eed;
    for _ in 0..1_000 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let client = ClientId((seed >> 33) % 16);
        if (seed >> 20) & 1 == 0 {
            adapter
                .base()
                .add_client_command(client, LocationCallbacks::default());
            expected.insert(client);
        } else {
            adapter.base().remove_client_command(client, None);
            expected.remove(&client);
        }
    }
    settle(&api).await;

    let actual: BTreeSet<ClientId> = adapter
        .base()
        .clients_snapshot()
        .into_iter()
        .map(|(client, _)| client)
        .collect();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn re_registration_replaces_callbacks() {
    let (_engine, api) = engine_and_api();
    let adapter = CountingAdapter::new(&api);
    let seen = Arc::new(Mutex::new(Vec::new()));

    adapter
        .base()
        .add_client_command(ClientId(3), LocationCallbacks::default());
    adapter
        .base()
        .add_client_command(ClientId(3), with_capabilities_cb(seen));
    settle(&api).await;

    assert_eq!(adapter.base().client_count(), 1);
    let callbacks = adapter.base().client_callbacks(ClientId(3)).unwrap();
    assert!(callbacks.capabilities_cb.is_some());
}

#[tokio::test]
async fn capability_request_waits_until_known() {
    let (_engine, api) = engine_and_api();
    let adapter = CountingAdapter::new(&api);
    let first = Arc::new(Mutex::new(Vec::new()));
    let second = Arc::new(Mutex::new(Vec::new()));

    adapter
        .base()
        .add_client_command(ClientId(1), with_capabilities_cb(first.clone()));
    adapter
        .base()
        .add_client_command(ClientId(2), with_capabilities_cb(second.clone()));
    adapter.base().request_capabilities_command(ClientId(1));
    adapter.base().request_capabilities_command(ClientId(2));
    settle(&api).await;
    assert!(first.lock().unwrap().is_empty());
    assert!(second.lock().unwrap().is_empty());

    let caps = EngineCapabilities::default().with_message(SupportedMessage::DistanceBaseTracking);
    api.save_supported_features(caps);
    settle(&api).await;

    let expected = capabilities::TIME_BASED_TRACKING
        | capabilities::GEOFENCE
        | capabilities::GNSS_MSB
        | capabilities::GNSS_MSA
        | capabilities::DISTANCE_BASED_TRACKING;
    assert_eq!(*first.lock().unwrap(), vec![expected]);
    assert_eq!(*second.lock().unwrap(), vec![expected]);

    // Once known, a request is answered on its own turn of the queue.
    adapter.base().request_capabilities_command(ClientId(1));
    settle(&api).await;
    assert_eq!(*first.lock().unwrap(), vec![expected, expected]);
}

#[tokio::test]
async fn adapter_registry_is_bounded() {
    let (_engine, api) = engine_and_api();

    let adapters: Vec<_> = (0..MAX_ADAPTERS).map(|_| CountingAdapter::new(&api)).collect();
    assert!(adapters.iter().all(|a| a.base().is_registered()));

    let extra = CountingAdapter::new(&api);
    assert!(!extra.base().is_registered());
    assert_eq!(api.adapter_count(), MAX_ADAPTERS);

    drop(adapters);
    assert_eq!(api.adapter_count(), 0);
}
