use camino::Utf8PathBuf;
use serde::Serialize;

/// Number of tick marks drawn for a transfer of known length.
pub const TICK_WIDTH: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadProgress {
    pub bytes: u64,
    /// `None` when the server did not send a usable `Content-Length`.
    pub total: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A line of user-facing text (consent notice, reprompt hint).
    Notice(String),
    Started {
        url: String,
        destination: Utf8PathBuf,
        total: Option<u64>,
    },
    Advanced(DownloadProgress),
    Finished(DownloadProgress),
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Discards every event.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

/// Ticks that should be visible after `bytes` of `total`, capped at `width`
/// so an understated `Content-Length` cannot overflow the bar.
pub fn ticks_for(bytes: u64, total: u64, width: usize) -> usize {
    if total == 0 {
        return width;
    }
    let ticks = (u128::from(bytes) * width as u128) / u128::from(total);
    usize::try_from(ticks).unwrap_or(width).min(width)
}

pub fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1_048_576.0
}
