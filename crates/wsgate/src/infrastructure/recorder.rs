//! Session recording to a playback file.
//!
//! Each forwarded payload becomes one line:
//!
//! ```text
//! "{1234{AAECAw==",
//! ```
//!
//! The marker (`{` for target → client, `}` for client → target) wraps the
//! milliseconds since the session started, followed by the base64 payload.
//! The lines form the body of a JavaScript array, which is what the noVNC
//! playback page loads.
//!
//! Sessions never touch the file themselves. [`FileRecorder::spawn`] starts
//! one writer task per file; every session holds a clone of the returned
//! handle and hands formatted lines to that task over a bounded channel.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::recording::{Direction, RecordSink};

/// Lines that may wait for the writer task before new ones are dropped.
const QUEUE_LINES: usize = 1024;

/// A [`RecordSink`] feeding the writer task of one recording file.
///
/// Cloning is cheap; all clones append to the same file, one whole line at
/// a time. Recording never blocks a session: when the writer falls
/// `QUEUE_LINES` behind, further lines are dropped with a warning.
#[derive(Debug, Clone)]
pub struct FileRecorder {
    path: Arc<PathBuf>,
    lines: mpsc::Sender<String>,
}

impl FileRecorder {
    /// Opens (creating if needed) `path` for appending and spawns its writer
    /// task on the current Tokio runtime.
    ///
    /// The returned handle finishes once every clone of the recorder has
    /// been dropped and the queued lines are written.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be opened.
    pub fn spawn(path: &Path) -> std::io::Result<(Self, JoinHandle<()>)> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let file = tokio::fs::File::from_std(file);
        info!("recording sessions to {}", path.display());

        let path = Arc::new(path.to_path_buf());
        let (lines, rx) = mpsc::channel(QUEUE_LINES);
        let writer = tokio::spawn(write_lines(file, rx, Arc::clone(&path)));
        Ok((Self { path, lines }, writer))
    }

    /// Formats one recording line, newline included.
    pub fn format_line(direction: Direction, elapsed_ms: u128, payload: &[u8]) -> String {
        let marker = direction.marker();
        format!(
            "\"{marker}{elapsed_ms}{marker}{}\",\n",
            BASE64.encode(payload)
        )
    }
}

impl RecordSink for FileRecorder {
    fn record(&mut self, direction: Direction, elapsed_ms: u128, payload: &[u8]) {
        let line = Self::format_line(direction, elapsed_ms, payload);
        match self.lines.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("recording to {} is behind, line dropped", self.path.display());
            }
            // The writer already stopped and said why.
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Writer task: appends lines until every sender is gone or a write fails.
async fn write_lines(mut file: tokio::fs::File, mut rx: mpsc::Receiver<String>, path: Arc<PathBuf>) {
    while let Some(line) = rx.recv().await {
        // Flushing waits for the blocking write, so a line is on disk before
        // the next one is taken.
        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // Stop recording rather than failing any session.
            warn!("recording to {} stopped: {e}", path.display());
            return;
        }
    }
    debug!("recording to {} finished", path.display());
}

// ── Tests ─────────────────────────────────────────────────────────────────────
