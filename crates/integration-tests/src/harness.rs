//! Shared harness for end-to-end tests.

use elicitation::{ElicitationConfig, ElicitationManager};
use event_store::{EventStore, EventStoreConfig, IdentityRegistry, SyncPolicy};
use shared_types::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Shared secret used by every harness component.
pub const SECRET: &[u8] = b"integration-test-secret";

/// Initialize test logging once; respects `RUST_LOG`.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Open an event store under `dir/events` with batch-only sync for speed.
pub fn open_store(dir: &Path) -> Arc<EventStore> {
    init_tracing();
    let config = EventStoreConfig::new(dir.join("events"), SECRET.to_vec())
        .with_sync_policy(SyncPolicy::BatchOnly);
    let identity = IdentityRegistry::new(SECRET.to_vec());
    Arc::new(EventStore::open(config, identity).expect("store opens"))
}

/// Build and initialize a manager over a fresh store.
pub async fn open_manager(dir: &Path, config: ElicitationConfig) -> Arc<ElicitationManager> {
    let store = open_store(dir);
    let manager =
        Arc::new(ElicitationManager::new(store, SECRET.to_vec(), config).expect("manager"));
    manager.initialize().await.expect("initialize");
    manager
}

/// Reopen a manager over an existing data directory.
pub async fn reopen_manager(dir: &Path, config: ElicitationConfig) -> Arc<ElicitationManager> {
    open_manager(dir, config).await
}

/// `{"type": "object"}` schema.
#[must_use]
pub fn object_schema() -> Value {
    let mut schema = BTreeMap::new();
    schema.insert("type".to_string(), Value::from("object"));
    Value::Map(schema)
}

/// Accept payload `{"pong": true}`.
#[must_use]
pub fn pong_payload() -> Value {
    let mut data = BTreeMap::new();
    data.insert("pong".to_string(), Value::from(true));
    Value::Map(data)
}
