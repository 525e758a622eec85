//! Reading source abstraction for telemetry ingestion.
//!
//! Every source yields one JSON record per line (`{sensor_id, ts, value}`).
//! Lines that are JSON objects go to the pipeline even when fields are missing
//! or mistyped, so the validator reports them; lines that are not JSON objects
//! at all are surfaced as `Malformed`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::types::RawReading;

/// Events produced by a reading source.
#[derive(Debug)]
pub enum ReadingEvent {
    Reading(RawReading),
    /// Line `line` could not be decoded as a JSON object.
    Malformed { line: u64, error: String },
    /// Source reached end of data.
    Eof,
}

/// Where raw readings come from.
///
/// The processing loop calls [`next_reading`](ReadingSource::next_reading)
/// in a `select!` with cancellation.
#[async_trait]
pub trait ReadingSource: Send + 'static {
    async fn next_reading(&mut self) -> Result<ReadingEvent>;

    /// Human-readable name for logging (e.g. "stdin", "file").
    fn source_name(&self) -> &str;
}

/// Shared line decoder for any buffered async reader.
struct JsonLines<R> {
    reader: R,
    line_buffer: String,
    line_no: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLines<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            line_buffer: String::with_capacity(256),
            line_no: 0,
        }
    }

    async fn next(&mut self) -> Result<ReadingEvent> {
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(ReadingEvent::Eof);
            }
            self.line_no += 1;
            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            return Ok(match serde_json::from_str::<RawReading>(line) {
                Ok(raw) => ReadingEvent::Reading(raw),
                Err(e) => ReadingEvent::Malformed {
                    line: self.line_no,
                    error: e.to_string(),
                },
            });
        }
    }
}

// ============================================================================
// Stdin Source
// ============================================================================

/// Reads JSON readings from stdin, e.g. `simulator | telemetry-sentinel run --stdin`.
pub struct StdinSource {
    lines: JsonLines<BufReader<tokio::io::Stdin>>,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            lines: JsonLines::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadingSource for StdinSource {
    async fn next_reading(&mut self) -> Result<ReadingEvent> {
        self.lines.next().await
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}

// ============================================================================
// JSON Lines File Source
// ============================================================================

/// Replays a `.jsonl` file with an optional delay between readings.
pub struct JsonLinesFileSource {
    lines: JsonLines<BufReader<tokio::fs::File>>,
    delay_ms: u64,
    yielded_first: bool,
}

impl JsonLinesFileSource {
    pub async fn open(path: &Path, delay_ms: u64) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening readings file {}", path.display()))?;
        Ok(Self {
            lines: JsonLines::new(BufReader::new(file)),
            delay_ms,
            yielded_first: false,
        })
    }
}

#[async_trait]
impl ReadingSource for JsonLinesFileSource {
    async fn next_reading(&mut self) -> Result<ReadingEvent> {
        if self.yielded_first && self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.yielded_first = true;
        self.lines.next().await
    }

    fn source_name(&self) -> &str {
        "file"
    }
}
