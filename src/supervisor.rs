//! Main-thread supervision for the binaries
//!
//! The bridges run on plain threads. The main thread only waits for them,
//! logs periodic statistics and turns Ctrl+C into a pipeline stop.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::pipeline::{Pipeline, PipelineStats};

/// Interval between statistics log lines
pub const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Wait for `pipeline` to finish, stopping it on Ctrl+C
pub async fn supervise(pipeline: Pipeline, stats_every: Duration) -> Result<()> {
    let handle = pipeline.handle();
    let mut waiter = tokio::task::spawn_blocking(move || pipeline.wait());

    let mut ticker = tokio::time::interval(stats_every);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            joined = &mut waiter => {
                return joined.map_err(|_| Error::ThreadPanicked("pipeline supervisor"))?;
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Interrupt received, shutting down");
                handle.stop();
            }
            _ = ticker.tick() => log_stats(&handle.stats()),
        }
    }
}

fn log_stats(stats: &PipelineStats) {
    tracing::info!(
        "Stats: device {} transfers ({:.1} KB), network {} datagrams ({:.1} KB), ring {}/{} bytes buffered",
        stats.device_transfers,
        stats.device_bytes as f64 / 1024.0,
        stats.network_transfers,
        stats.network_bytes as f64 / 1024.0,
        stats.ring.unread,
        stats.ring.capacity - 1
    );
}
