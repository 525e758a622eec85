//! Source → orchestrator loop shared by every input mode.
//!
//! Readings are submitted as fast as the source yields them; outcomes are
//! collected as they resolve. A sensor whose queue is full is retried after
//! in-flight work completes instead of being dropped.

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::orchestrator::{Orchestrator, PendingResult, ProcessingResult};
use super::source::{ReadingEvent, ReadingSource};

/// Cap on submitted-but-unresolved readings.
const MAX_IN_FLIGHT: usize = 1024;
/// Backoff when a queue is full and nothing else is in flight.
const BACKPRESSURE_WAIT_MS: u64 = 10;
const BACKPRESSURE_MAX_WAITS: u32 = 500;

/// Outcome counts for one run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LoopStats {
    pub read: u64,
    pub processed: u64,
    pub rejected: u64,
    pub malformed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub alerts: u64,
}

impl LoopStats {
    fn tally(&mut self, result: &ProcessingResult) {
        match result {
            ProcessingResult::Processed(report) => {
                self.processed += 1;
                self.alerts += report.alerts.len() as u64;
            }
            ProcessingResult::Rejected { .. } => self.rejected += 1,
            ProcessingResult::PersistenceFailed { .. } => self.failed += 1,
            ProcessingResult::Backpressure { .. } | ProcessingResult::ShuttingDown => self.dropped += 1,
        }
    }
}

pub struct ProcessingLoop {
    orchestrator: Arc<Orchestrator>,
    cancel_token: CancellationToken,
}

impl ProcessingLoop {
    pub fn new(orchestrator: Arc<Orchestrator>, cancel_token: CancellationToken) -> Self {
        Self { orchestrator, cancel_token }
    }

    /// Run until the source is exhausted or cancellation, then wait for every
    /// submitted reading to resolve.
    pub async fn run<S: ReadingSource>(self, source: &mut S) -> LoopStats {
        let mut stats = LoopStats::default();
        let mut in_flight: FuturesUnordered<PendingResult> = FuturesUnordered::new();

        info!(source = source.source_name(), "Processing readings");

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    info!("Shutdown signal received, stopping intake");
                    break;
                }
                result = source.next_reading() => match result {
                    Ok(ev) => ev,
                    Err(e) => {
                        warn!(error = %e, "Source error");
                        break;
                    }
                }
            };

            let raw = match event {
                ReadingEvent::Reading(raw) => raw,
                ReadingEvent::Malformed { line, error } => {
                    stats.read += 1;
                    stats.malformed += 1;
                    warn!(line, error = %error, "Malformed ingestion record");
                    continue;
                }
                ReadingEvent::Eof => {
                    info!(read = stats.read, "Source reached end");
                    break;
                }
            };
            stats.read += 1;

            while in_flight.len() >= MAX_IN_FLIGHT {
                if let Some(result) = in_flight.next().await {
                    stats.tally(&result);
                }
            }

            let mut waits = 0;
            loop {
                match self.orchestrator.submit(raw.clone()) {
                    Ok(pending) => {
                        in_flight.push(pending);
                        break;
                    }
                    Err(ProcessingResult::Backpressure { sensor_id }) if waits < BACKPRESSURE_MAX_WAITS => {
                        waits += 1;
                        if let Some(result) = in_flight.next().await {
                            stats.tally(&result);
                        } else {
                            debug!(sensor_id = %sensor_id, "Queue full, waiting");
                            tokio::time::sleep(Duration::from_millis(BACKPRESSURE_WAIT_MS)).await;
                        }
                    }
                    Err(immediate) => {
                        stats.tally(&immediate);
                        break;
                    }
                }
            }

            // collect whatever already resolved without waiting
            while let Some(Some(result)) = in_flight.next().now_or_never() {
                stats.tally(&result);
            }
        }

        while let Some(result) = in_flight.next().await {
            stats.tally(&result);
        }

        info!(
            read = stats.read,
            processed = stats.processed,
            rejected = stats.rejected,
            malformed = stats.malformed,
            failed = stats.failed,
            dropped = stats.dropped,
            alerts = stats.alerts,
            "Processing loop finished"
        );
        stats
    }
}
