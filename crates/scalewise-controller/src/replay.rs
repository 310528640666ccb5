//! JSON-lines telemetry replay.

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::debug;

use scalewise_core::{BoxFuture, SourceError, TelemetrySample, TelemetrySource};

/// Yields one `TelemetrySample` per non-empty line of a file, in order.
///
/// Lines without a `timestamp` are stamped with the time they are read.
pub struct ReplaySource {
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl ReplaySource {
    pub async fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).await?;
        debug!(?path, "replay source opened");
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    async fn read_next(&mut self) -> Result<Option<TelemetrySample>, SourceError> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(line)
                .map(Some)
                .map_err(|e| SourceError::Malformed {
                    line: self.line_no,
                    message: e.to_string(),
                });
        }
        Ok(None)
    }
}

impl TelemetrySource for ReplaySource {
    fn next_sample(&mut self) -> BoxFuture<'_, Result<Option<TelemetrySample>, SourceError>> {
        Box::pin(self.read_next())
    }
}
