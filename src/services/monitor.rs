use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior};

use crate::services::engine::MaterializationEngine;

/// Runs a materialization cycle every `interval`, forever. A failed cycle is
/// logged and the next tick tries again from the stored cursors.
pub async fn start_monitoring(engine: Arc<MaterializationEngine>, interval: Duration) {
    tracing::info!("Starting monitoring service (every {:?})...", interval);
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;
        match engine.run_cycle().await {
            Ok(report) => tracing::info!(
                "Cycle complete: {} pools published, {} reported",
                report.published(),
                report.pools.len()
            ),
            Err(e) => tracing::error!("Cycle aborted: {}", e),
        }
    }
}
