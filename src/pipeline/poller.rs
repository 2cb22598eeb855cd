//! Background poller: repeats triage cycles on a timer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::pipeline::processor::{BatchReport, TriageProcessor};

/// Spawn a task that runs one cycle immediately and then every `every`.
///
/// A failed cycle is logged and the next tick tries again. `on_report` is
/// called after every cycle, with the partial report when one aborts
/// after fetching.
/// Returns the `JoinHandle` and a shutdown flag checked before each cycle.
pub fn spawn_poller<F>(
    mut processor: TriageProcessor,
    max_count: u32,
    every: Duration,
    mut on_report: F,
) -> (JoinHandle<()>, Arc<AtomicBool>)
where
    F: FnMut(&BatchReport) + Send + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Triage poller started, polling every {}s", every.as_secs());

        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // First tick completes immediately
        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Triage poller shutting down");
                return;
            }

            match processor.run_batch(max_count).await {
                Ok(report) => on_report(&report),
                Err(aborted) => {
                    error!(error = %aborted.source, "Triage cycle failed, retrying next tick");
                    if aborted.report.fetched > 0 {
                        on_report(&aborted.report);
                    }
                }
            }
        }
    });

    (handle, shutdown_flag)
}
