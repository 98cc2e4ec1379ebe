//! Scheduler timing under paused tokio time, with a feed whose body trickles
//! in slowly enough for runs to outlive ticks and lifetimes.

use bytes::Bytes;
use flight_feed::config::ScheduleConfig;
use flight_feed::ingest::{
    FeedFuture, FeedReader, FeedSource, IngestionScheduler, Ingestor, SchedulerState,
};
use flight_feed::InMemoryFlightStore;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::StreamReader;

const RECORDS: u64 = 3;

fn body() -> Bytes {
    let records: Vec<String> = (0..RECORDS)
        .map(|i| {
            format!(
                r#"{{"flightNumber":"SL{}","departureAirport":{{"code":"JFK","name":""}},"arrivalAirport":{{"code":"LAX","name":""}},"departureTime":"2024-06-01T0{}:00:00Z","priceUSD":150}}"#,
                i, i
            )
        })
        .collect();
    Bytes::from(format!(r#"{{"flights": [{}]}}"#, records.join(",")))
}

/// Open readers drop out of `open` when their body is exhausted or dropped.
struct Reading(Arc<AtomicUsize>);

impl Drop for Reading {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serves `body()` in `pieces` chunks, sleeping `delay` before each one.
struct SlowFeed {
    body: Bytes,
    pieces: usize,
    delay: Duration,
    open: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl SlowFeed {
    fn new(pieces: usize, delay: Duration) -> Self {
        SlowFeed {
            body: body(),
            pieces,
            delay,
            open: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FeedSource for SlowFeed {
    fn open(&self) -> FeedFuture<'_> {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = Reading(self.open.clone());

        let size = self.body.len() / self.pieces + 1;
        let mut chunks = VecDeque::new();
        let mut offset = 0;
        while offset < self.body.len() {
            let end = (offset + size).min(self.body.len());
            chunks.push_back(self.body.slice(offset..end));
            offset = end;
        }

        let delay = self.delay;
        let stream =
            futures::stream::unfold((chunks, guard), move |(mut chunks, guard)| async move {
                let chunk = chunks.pop_front()?;
                tokio::time::sleep(delay).await;
                Some((Ok::<_, io::Error>(chunk), (chunks, guard)))
            });

        Box::pin(async move {
            let reader: FeedReader = Box::new(StreamReader::new(Box::pin(stream)));
            Ok(reader)
        })
    }

    fn describe(&self) -> String {
        "slow feed".to_string()
    }
}

#[tokio::test(start_paused = true)]
async fn test_lifetime_does_not_cut_active_run() {
    let feed = SlowFeed::new(10, Duration::from_millis(200));
    let store = InMemoryFlightStore::new();
    let scheduler = IngestionScheduler::new(
        Ingestor::new(feed, store.clone(), 4096),
        ScheduleConfig {
            interval: Duration::from_secs(1),
            lifetime: Some(Duration::from_millis(500)),
            ..ScheduleConfig::test()
        },
    );

    let handle = scheduler.start();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(handle.state(), SchedulerState::Cancelled);
    assert!(store.list_len("flights:2024-06-01") < RECORDS as usize);

    let stats = handle.join().await;
    assert_eq!(stats.runs_started, 1);
    assert_eq!(stats.runs_completed, 1);
    assert_eq!(stats.records_written, RECORDS);
    assert_eq!(store.list_len("flights:2024-06-01"), RECORDS as usize);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_ticks_are_skipped() {
    let feed = SlowFeed::new(10, Duration::from_millis(100));
    let open = feed.open.clone();
    let peak = feed.peak.clone();
    let store = InMemoryFlightStore::new();
    let scheduler = IngestionScheduler::new(
        Ingestor::new(feed, store.clone(), 4096),
        ScheduleConfig {
            interval: Duration::from_millis(100),
            lifetime: Some(Duration::from_millis(2500)),
            ..ScheduleConfig::test()
        },
    );

    let stats = scheduler.start().join().await;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(open.load(Ordering::SeqCst), 0);
    assert!(stats.ticks_skipped > 0);
    assert!(stats.runs_started >= 2);
    assert_eq!(stats.runs_completed, stats.runs_started);
    assert_eq!(
        store.list_len("flights:2024-06-01") as u64,
        stats.runs_completed * RECORDS
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_out_short_run() {
    let feed = SlowFeed::new(3, Duration::from_millis(100));
    let store = InMemoryFlightStore::new();
    let scheduler = IngestionScheduler::new(
        Ingestor::new(feed, store.clone(), 4096),
        ScheduleConfig {
            interval: Duration::from_secs(60),
            ..ScheduleConfig::test()
        },
    );

    let handle = scheduler.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = handle.shutdown(Duration::from_secs(1)).await;

    assert_eq!(stats.runs_completed, 1);
    assert_eq!(stats.runs_failed, 0);
    assert_eq!(store.list_len("flights:2024-06-01"), RECORDS as usize);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_run_after_grace() {
    let feed = SlowFeed::new(10, Duration::from_secs(1));
    let open = feed.open.clone();
    let store = InMemoryFlightStore::new();
    let scheduler = IngestionScheduler::new(
        Ingestor::new(feed, store.clone(), 4096),
        ScheduleConfig {
            interval: Duration::from_secs(60),
            ..ScheduleConfig::test()
        },
    );

    let handle = scheduler.start();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(handle.state(), SchedulerState::Running);

    let stats = handle.shutdown(Duration::from_millis(500)).await;
    assert_eq!(stats.runs_started, 1);
    assert_eq!(stats.runs_completed, 0);
    assert_eq!(stats.runs_failed, 1);
    assert_eq!(open.load(Ordering::SeqCst), 0);
    assert!(store.list_len("flights:2024-06-01") < RECORDS as usize);
}
