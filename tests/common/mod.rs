use std::sync::Arc;
use std::time::Duration;

use keymaster::api::AppState;
use keymaster::config::Config;
use keymaster::distribution::DistributionEngine;
use keymaster::metrics::KdcMetrics;
use keymaster::storage::Storage;

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.database.dsn = ":memory:".to_string();
    config.kdc.control_zone = "kdc.example.net.".to_string();
    config.server.notify_timeout = Duration::from_millis(50);
    config
}

pub async fn memory_storage() -> Storage {
    let config = test_config();
    Storage::connect(&config.database)
        .await
        .expect("in-memory storage")
}

pub async fn test_state() -> AppState {
    let config = Arc::new(test_config());
    let storage = Storage::connect(&config.database)
        .await
        .expect("in-memory storage");
    let metrics = Arc::new(KdcMetrics::new().expect("metrics"));
    let engine = Arc::new(DistributionEngine::new(
        storage.clone(),
        config.clone(),
        metrics.clone(),
    ));
    AppState {
        storage,
        engine,
        config,
        metrics,
    }
}
