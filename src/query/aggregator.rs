//! Fan-out/fan-in over keys.
//!
//! ```text
//!          ┌─ task(key 1) ─ fetch ─ filter ─┐
//! keys ────┼─ task(key 2) ─ fetch ─ filter ─┼──► mpsc ──► collector ──► Vec<Flight>
//!          └─ task(key N) ─ fetch ─ filter ─┘
//! ```
//!
//! Every key gets its own task. Store reads are bounded by a semaphore. Each
//! task sends its accepted records as one batch and drops its sender; the
//! collector returns once every sender is gone, including those of tasks that
//! failed or panicked.

use super::fetcher::fetch_key;
use crate::flight::Flight;
use crate::store::FlightStore;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Record filter applied inside each worker.
pub type Predicate = Arc<dyn Fn(&Flight) -> bool + Send + Sync>;

/// Fetch every key concurrently and merge the accepted records.
///
/// Order across keys is unspecified; records from one key keep their stored
/// order. Per-key failures are logged and contribute nothing.
pub async fn gather<S: FlightStore>(
    store: &Arc<S>,
    keys: Vec<String>,
    predicate: Option<Predicate>,
    max_in_flight: usize,
) -> Vec<Flight> {
    if keys.is_empty() {
        return Vec::new();
    }

    let key_count = keys.len();
    let permits = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let (tx, mut rx) = mpsc::channel::<Vec<Flight>>(key_count.min(max_in_flight.max(1)));
    let mut workers = JoinSet::new();

    for key in keys {
        let store = store.clone();
        let permits = permits.clone();
        let predicate = predicate.clone();
        let tx = tx.clone();

        workers.spawn(async move {
            let flights = {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                match fetch_key(&*store, &key).await {
                    Ok(flights) => flights,
                    Err(e) => {
                        warn!(%key, error = %e, "skipping key after store failure");
                        return;
                    }
                }
            };

            let accepted: Vec<Flight> = match &predicate {
                Some(accept) => flights.into_iter().filter(|f| accept(f)).collect(),
                None => flights,
            };
            if accepted.is_empty() {
                return;
            }
            if tx.send(accepted).await.is_err() {
                debug!(%key, "collector gone, dropping batch");
            }
        });
    }
    drop(tx);

    let mut collected = Vec::new();
    while let Some(batch) = rx.recv().await {
        collected.extend(batch);
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                error!(error = %e, "query worker panicked");
            }
        }
    }

    debug!(keys = key_count, records = collected.len(), "gather complete");
    collected
}
