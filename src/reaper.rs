use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::now_ms;

/// Background task that returns equipment to the Available pool once every
/// commitment on it has ended.
pub async fn run_releaser(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        match engine.release_idle_equipment(now_ms()).await {
            Ok(released) if !released.is_empty() => {
                info!("released {} idle equipment unit(s)", released.len());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("equipment release sweep failed: {e}"),
        }
    }
}

/// Background task that compacts the WAL once enough commits accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let commits = engine.wal_commits_since_compact().await;
        if commits < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {commits} commits"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
