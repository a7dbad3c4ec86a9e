//! Shared harness: a store with its areas spawned and, when needed, a
//! transport server bound on a loopback port.

use lodestone_store::config::{AreaConfig, Config, KvConfig};
use lodestone_store::{server, KvStore, KvStoreHandle};
use lodestone_types::Value;
use std::net::SocketAddr;
use std::time::Duration;

pub struct TestStore {
    pub handle: KvStoreHandle,
    pub addr: SocketAddr,
    _store: KvStore,
}

impl TestStore {
    pub async fn spawn(node_name: &str, areas: &[&str]) -> Self {
        Self::spawn_with(node_name, areas, KvConfig::default()).await
    }

    pub async fn spawn_with(node_name: &str, areas: &[&str], kv: KvConfig) -> Self {
        let config = Config {
            node_name: node_name.to_string(),
            domain: "test".to_string(),
            areas: areas
                .iter()
                .map(|a| AreaConfig {
                    area_id: a.to_string(),
                    neighbor_regexes: vec![],
                    include_interface_regexes: vec![],
                })
                .collect(),
            kv,
            listen_addr: None,
        };
        let store = KvStore::spawn(&config).expect("spawn store");
        let handle = store.handle();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(server::serve(listener, handle.clone()));

        Self {
            handle,
            addr,
            _store: store,
        }
    }
}

#[allow(dead_code)]
pub fn full(version: u64, originator: &str, value: &[u8]) -> Value {
    Value::full(version, originator, value.to_vec(), 300_000, 1)
}

/// Poll until the condition holds or the deadline passes.
#[allow(dead_code)]
pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
