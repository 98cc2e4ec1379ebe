//! Ingestion: feed source → streaming decoder → date-keyed writer.
//!
//! A run fetches the feed once and writes every decodable record as it is
//! decoded, so memory stays bounded by one record regardless of feed size.
//! Per-record failures are counted in the [`IngestReport`]; only document-level
//! failures end a run early, and records written before that point stay written.

pub mod decoder;
pub mod feed;
pub mod scheduler;
pub mod writer;

pub use decoder::{DecodeStats, FeedCodec, FeedDecoder, FeedItem};
pub use feed::{FeedFuture, FeedReader, FeedSource, HttpFeed, StaticFeed};
pub use scheduler::{IngestionScheduler, SchedulerHandle, SchedulerState, SchedulerStats};
pub use writer::DateKeyedWriter;

use crate::error::{IngestError, WriteError};
use crate::store::FlightStore;
use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of one successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Records decoded from the feed
    pub decoded: u64,
    /// Array elements that did not decode as a flight
    pub skipped: u64,
    /// Records persisted
    pub written: u64,
    /// Records dropped for a bad timestamp or serialization failure
    pub rejected: u64,
    /// Records whose single store write failed
    pub write_failures: u64,
}

/// One feed plus one writer: everything a run needs.
pub struct Ingestor<F, S> {
    feed: F,
    writer: DateKeyedWriter<S>,
    max_record_bytes: usize,
}

impl<F: FeedSource, S: FlightStore> Ingestor<F, S> {
    pub fn new(feed: F, store: S, max_record_bytes: usize) -> Self {
        Ingestor {
            feed,
            writer: DateKeyedWriter::new(store),
            max_record_bytes,
        }
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    pub fn store(&self) -> &S {
        self.writer.store()
    }

    /// Fetch the feed and ingest it. `cancel` is checked between records.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<IngestReport, IngestError> {
        let reader = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled { written: 0 }),
            opened = self.feed.open() => opened?,
        };
        ingest_stream(reader, &self.writer, self.max_record_bytes, cancel).await
    }
}

/// Decode `reader` and write every record through `writer`.
///
/// A write already in progress when `cancel` fires is allowed to finish.
pub async fn ingest_stream<R, S>(
    reader: R,
    writer: &DateKeyedWriter<S>,
    max_record_bytes: usize,
    cancel: &CancellationToken,
) -> Result<IngestReport, IngestError>
where
    R: AsyncRead + Unpin,
    S: FlightStore,
{
    let mut decoder = FeedDecoder::new(reader, max_record_bytes);
    let mut report = IngestReport::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(written = report.written, "ingestion cancelled between records");
                return Err(IngestError::Cancelled { written: report.written });
            }
            next = decoder.next() => next,
        };

        let flight = match next {
            Some(Ok(flight)) => flight,
            Some(Err(e)) => {
                warn!(
                    written = report.written,
                    decoded = decoder.stats().decoded,
                    "feed ended abnormally after partial ingest"
                );
                return Err(e);
            }
            None => break,
        };

        match writer.write(&flight).await {
            Ok(_) => report.written += 1,
            Err(e @ WriteError::StoreWriteFailed { .. }) => {
                report.write_failures += 1;
                warn!(error = %e, "failed to store flight");
            }
            Err(e) => {
                report.rejected += 1;
                warn!(error = %e, "dropping flight record");
            }
        }
    }

    let stats = decoder.stats();
    report.decoded = stats.decoded;
    report.skipped = stats.skipped;

    info!(
        decoded = report.decoded,
        skipped = report.skipped,
        written = report.written,
        rejected = report.rejected,
        write_failures = report.write_failures,
        "feed ingested"
    );
    Ok(report)
}
