//! Newline-delimited JSON event source.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use callrelay_core::error::RelayError;
use callrelay_core::types::RawEvent;

/// Read one [`RawEvent`] per line and hand each to `sink`.
///
/// Blank lines are ignored and malformed lines are skipped with a warning.
/// Returns the number of events accepted by `sink` once the reader hits EOF
/// or `sink` reports that the engine is shutting down.
pub async fn read_events<R, F>(reader: R, mut sink: F) -> Result<usize, RelayError>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(RawEvent) -> Result<(), RelayError>,
{
    let mut lines = reader.lines();
    let mut accepted = 0usize;
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let raw: RawEvent = match serde_json::from_str(trimmed) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed event");
                continue;
            }
        };

        debug!(line = line_no, line_id = raw.line_id(), "Event read");
        match sink(raw) {
            Ok(()) => accepted += 1,
            Err(RelayError::ShuttingDown) => {
                debug!(line = line_no, "Engine closed; stopping input");
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(accepted)
}
