use crate::codec::SignatureCheck;
use crate::pool::TxPool;
use crate::queue::QueueDrainer;
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;
use tokio::task::{self, JoinHandle};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Runs the transaction sync driver: every `period` the queue is drained
/// into `pool`. On shutdown a final pass flushes what is still buffered and
/// the drainer is handed back through the join handle.
///
/// Each pass runs on tokio's blocking pool, so decode and signature recovery
/// never hold up the runtime's worker threads. The join handle yields `None`
/// only if a pass could not complete (it panicked or the runtime shut down).
pub fn spawn(
    drainer: QueueDrainer,
    pool: Arc<dyn TxPool>,
    check: SignatureCheck,
    period: Duration,
    mut shutdown_rx: Receiver<()>,
) -> JoinHandle<Option<QueueDrainer>> {
    task::spawn(async move {
        let mut drainer = drainer;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = period.as_millis() as u64, "transaction sync driver started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("transaction sync driver received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    drainer = drain_off_runtime(drainer, Arc::clone(&pool), check).await?;
                }
            }
        }

        let drainer = drain_off_runtime(drainer, pool, check).await?;
        info!("transaction sync driver stopped");
        Some(drainer)
    })
}

/// Moves the drainer onto the blocking pool for one pass and takes it back.
async fn drain_off_runtime(
    mut drainer: QueueDrainer,
    pool: Arc<dyn TxPool>,
    check: SignatureCheck,
) -> Option<QueueDrainer> {
    let pass = task::spawn_blocking(move || {
        drain_once(&mut drainer, pool.as_ref(), check);
        drainer
    });
    match pass.await {
        Ok(drainer) => Some(drainer),
        Err(e) => {
            error!(error = %e, "drain pass did not complete, stopping transaction sync driver");
            None
        }
    }
}

fn drain_once(drainer: &mut QueueDrainer, pool: &dyn TxPool, check: SignatureCheck) {
    match drainer.drain_and_import(pool, check) {
        Ok(summary) if summary.shards > 0 => {
            debug!(shards = summary.shards, imported = summary.imported, "sync tick");
        }
        Ok(_) => {}
        // Requeued by the drainer; the next tick retries.
        Err(e) => warn!(error = %e, "transaction import pass failed"),
    }
}
