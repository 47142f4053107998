use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::engine::Engine;

/// Background task that keeps subscription statuses honest: scheduled rows
/// whose start date has arrived become active, live rows past their end
/// become expired. Foreground operations never depend on it — it only
/// catches up rows nobody has touched.
pub async fn run_sweeper(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let today = Utc::now().date_naive();
        match engine.run_lifecycle_sweep(today).await {
            Ok(0) => {}
            Ok(n) => info!("lifecycle sweep: {n} subscriptions transitioned"),
            Err(e) => warn!("lifecycle sweep failed: {e}"),
        }
    }
}
