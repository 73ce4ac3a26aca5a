//! Traffic recording seam.
//!
//! A session can carry a [`RecordSink`] that sees every decoded payload in
//! both directions, timestamped relative to the session start. The file
//! implementation lives in [`crate::infrastructure::recorder`].

use std::fmt;

/// Direction of a payload relative to the browser client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Target → client.
    ToClient,
    /// Client → target.
    FromClient,
}

impl Direction {
    /// One-character marker used in traces and recordings: `{` for data
    /// read from the target, `}` for data read from the client.
    pub fn marker(self) -> char {
        match self {
            Direction::ToClient => '{',
            Direction::FromClient => '}',
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::ToClient => "to-client",
            Direction::FromClient => "from-client",
        })
    }
}

/// Receives every payload a session forwards.
///
/// Implementations must not fail the session: a sink that cannot write logs
/// the problem and drops the record.
pub trait RecordSink: Send {
    fn record(&mut self, direction: Direction, elapsed_ms: u128, payload: &[u8]);
}

/// In-memory sink shared with the test that installed it.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemoryRecorder {
    entries: std::sync::Arc<std::sync::Mutex<Vec<(Direction, Vec<u8>)>>>,
}

#[cfg(test)]
impl MemoryRecorder {
    pub fn entries(&self) -> Vec<(Direction, Vec<u8>)> {
        self.entries.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl RecordSink for MemoryRecorder {
    fn record(&mut self, direction: Direction, _elapsed_ms: u128, payload: &[u8]) {
        self.entries.lock().unwrap().push((direction, payload.to_vec()));
    }
}
