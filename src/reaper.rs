use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

/// Background task that periodically retries dead-lettered releases.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let pending = engine.dead_letters().len();
        if pending == 0 {
            continue;
        }
        let released = engine.retry_dead_letters().await;
        if released > 0 {
            info!("reaper released {released} of {pending} stuck resources");
        }
        if released < pending {
            warn!("{} resources still stuck after reaper pass", pending - released);
        }
    }
}
