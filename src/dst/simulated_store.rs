//! Simulated flight store with fault injection.
//!
//! Wraps another store and fails individual operations with configured
//! probabilities, drawing every decision from one seeded generator. Simulated
//! latency is a random number of scheduler yields, so a current-thread runtime
//! replays the same interleaving for the same seed.

use super::rng::DeterministicRng;
use crate::error::StoreError;
use crate::store::{ContainerKind, FlightStore, ScanPage, StoreFuture};
use ahash::AHashSet;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of a push failing
    pub push_fail_prob: f64,
    /// Probability of a per-key read (kind, list, hash) failing
    pub read_fail_prob: f64,
    /// Probability of a scan page failing
    pub scan_fail_prob: f64,
    /// Scheduler yields injected before each operation (min, max)
    pub latency_yields: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            push_fail_prob: 0.05,
            read_fail_prob: 0.05,
            scan_fail_prob: 0.0,
            latency_yields: (0, 3),
        }
    }
}

impl SimulatedStoreConfig {
    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            push_fail_prob: 0.0,
            read_fail_prob: 0.0,
            scan_fail_prob: 0.0,
            latency_yields: (0, 0),
        }
    }

    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            push_fail_prob: 0.25,
            read_fail_prob: 0.25,
            scan_fail_prob: 0.0,
            latency_yields: (0, 8),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedStoreStats {
    pub push_attempts: u64,
    pub push_failures: u64,
    pub read_attempts: u64,
    pub read_failures: u64,
    pub scan_attempts: u64,
    pub scan_failures: u64,
}

struct SimulatedStoreInner {
    rng: DeterministicRng,
    stats: SimulatedStoreStats,
    /// Keys with at least one failed read since the last `take_failed_reads`
    failed_reads: AHashSet<String>,
}

#[derive(Clone, Copy)]
enum Op {
    Push,
    Read,
    Scan,
}

/// Fault-injecting wrapper around another store
pub struct SimulatedFlightStore<S> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner>>,
}

impl<S: FlightStore> SimulatedFlightStore<S> {
    pub fn new(inner_store: S, rng: DeterministicRng, config: SimulatedStoreConfig) -> Self {
        SimulatedFlightStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng,
                stats: SimulatedStoreStats::default(),
                failed_reads: AHashSet::new(),
            })),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// Keys whose reads failed since the previous call.
    pub fn take_failed_reads(&self) -> AHashSet<String> {
        std::mem::take(&mut self.state.lock().failed_reads)
    }

    /// Count the attempt, decide whether it fails, and how long to stall.
    fn roll(&self, op: Op, key: Option<&str>) -> (bool, u64) {
        let mut s = self.state.lock();
        let (min, max) = self.config.latency_yields;
        let yields = s.rng.gen_range(min, max.max(min));
        let fail = match op {
            Op::Push => {
                s.stats.push_attempts += 1;
                let fail = s.rng.gen_bool(self.config.push_fail_prob);
                if fail {
                    s.stats.push_failures += 1;
                }
                fail
            }
            Op::Read => {
                s.stats.read_attempts += 1;
                let fail = s.rng.gen_bool(self.config.read_fail_prob);
                if fail {
                    s.stats.read_failures += 1;
                    if let Some(key) = key {
                        s.failed_reads.insert(key.to_string());
                    }
                }
                fail
            }
            Op::Scan => {
                s.stats.scan_attempts += 1;
                let fail = s.rng.gen_bool(self.config.scan_fail_prob);
                if fail {
                    s.stats.scan_failures += 1;
                }
                fail
            }
        };
        (fail, yields)
    }
}

async fn stall(yields: u64) {
    for _ in 0..yields {
        tokio::task::yield_now().await;
    }
}

fn injected(op: &str) -> StoreError {
    StoreError::Unavailable(format!("simulated {} failure", op))
}

impl<S: FlightStore> FlightStore for SimulatedFlightStore<S> {
    fn scan<'a>(&'a self, cursor: u64, count: usize) -> StoreFuture<'a, ScanPage> {
        Box::pin(async move {
            let (fail, yields) = self.roll(Op::Scan, None);
            stall(yields).await;
            if fail {
                return Err(injected("scan"));
            }
            self.inner_store.scan(cursor, count).await
        })
    }

    fn kind<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ContainerKind> {
        Box::pin(async move {
            let (fail, yields) = self.roll(Op::Read, Some(key));
            stall(yields).await;
            if fail {
                return Err(injected("type"));
            }
            self.inner_store.kind(key).await
        })
    }

    fn list_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let (fail, yields) = self.roll(Op::Read, Some(key));
            stall(yields).await;
            if fail {
                return Err(injected("list read"));
            }
            self.inner_store.list_all(key).await
        })
    }

    fn hash_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, HashMap<String, String>> {
        Box::pin(async move {
            let (fail, yields) = self.roll(Op::Read, Some(key));
            stall(yields).await;
            if fail {
                return Err(injected("hash read"));
            }
            self.inner_store.hash_all(key).await
        })
    }

    fn push_front<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let (fail, yields) = self.roll(Op::Push, Some(key));
            stall(yields).await;
            if fail {
                return Err(injected("push"));
            }
            self.inner_store.push_front(key, value).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryFlightStore;

    #[tokio::test]
    async fn test_no_faults_passes_through() {
        let inner = InMemoryFlightStore::new();
        let store = SimulatedFlightStore::new(
            inner.clone(),
            DeterministicRng::new(1),
            SimulatedStoreConfig::no_faults(),
        );
        for i in 0..50 {
            store.push_front("k", i.to_string()).await.unwrap();
        }
        assert_eq!(inner.list_len("k"), 50);
        assert_eq!(store.stats().push_attempts, 50);
        assert_eq!(store.stats().push_failures, 0);
    }

    #[tokio::test]
    async fn test_failed_pushes_are_not_applied() {
        let inner = InMemoryFlightStore::new();
        let store = SimulatedFlightStore::new(
            inner.clone(),
            DeterministicRng::new(2),
            SimulatedStoreConfig::high_chaos(),
        );
        let mut ok = 0;
        for i in 0..200 {
            if store.push_front("k", i.to_string()).await.is_ok() {
                ok += 1;
            }
        }
        let stats = store.stats();
        assert!(stats.push_failures > 0);
        assert_eq!(inner.list_len("k"), ok);
        assert_eq!(stats.push_failures + ok as u64, 200);
    }

    #[tokio::test]
    async fn test_failed_reads_are_tracked() {
        let inner = InMemoryFlightStore::new();
        let store = SimulatedFlightStore::new(
            inner,
            DeterministicRng::new(3),
            SimulatedStoreConfig {
                read_fail_prob: 1.0,
                ..SimulatedStoreConfig::no_faults()
            },
        );
        assert!(store.list_all("a").await.is_err());
        assert!(store.kind("b").await.is_err());

        let failed = store.take_failed_reads();
        assert!(failed.contains("a") && failed.contains("b"));
        assert!(store.take_failed_reads().is_empty());
    }
}
