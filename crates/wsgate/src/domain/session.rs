//! Per-connection session state.
//!
//! A [`Session`] is created when a handshake completes, mutated only by the
//! proxy loop that owns it, and dropped when the connection ends. Nothing in
//! here is shared between connections.
//!
//! # Send queues
//!
//! Sockets accept writes partially. Each direction therefore has a
//! [`SendQueue`]: an ordered list of buffers where the head may be partly
//! written. The unwritten remainder of the head is always retried before any
//! later buffer, so the byte stream reaching each peer is exactly the
//! concatenation of what was pushed.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use uuid::Uuid;
use wsgate_core::{Encoding, ProtocolVersion};

use super::recording::{Direction, RecordSink};

// ── SendQueue ─────────────────────────────────────────────────────────────────

/// FIFO of byte buffers with a write offset into the head buffer.
#[derive(Debug, Default)]
pub struct SendQueue {
    buffers: VecDeque<Vec<u8>>,
    head_offset: usize,
    queued_bytes: usize,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a buffer. Empty buffers are ignored.
    pub fn push(&mut self, buf: Vec<u8>) {
        if buf.is_empty() {
            return;
        }
        self.queued_bytes += buf.len();
        self.buffers.push_back(buf);
    }

    /// The unwritten part of the head buffer; empty when the queue is.
    pub fn head(&self) -> &[u8] {
        match self.buffers.front() {
            Some(buf) => &buf[self.head_offset..],
            None => &[],
        }
    }

    /// Records that the first `n` bytes of [`Self::head`] were written.
    ///
    /// The head buffer is popped once fully written. `n` larger than the
    /// head remainder is clamped.
    pub fn advance(&mut self, n: usize) {
        let Some(front) = self.buffers.front() else {
            return;
        };
        let remaining = front.len() - self.head_offset;
        let n = n.min(remaining);
        self.queued_bytes -= n;
        if n == remaining {
            self.buffers.pop_front();
            self.head_offset = 0;
        } else {
            self.head_offset += n;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Number of buffers still queued, the partly written head included.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Total unwritten bytes across all buffers.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }
}

// ── SessionStats ──────────────────────────────────────────────────────────────

/// Frame and payload-byte counters for one session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_to_client: u64,
    pub bytes_to_client: u64,
    pub frames_from_client: u64,
    pub bytes_from_client: u64,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "to client: {} frames / {} bytes, from client: {} frames / {} bytes",
            self.frames_to_client,
            self.bytes_to_client,
            self.frames_from_client,
            self.bytes_from_client
        )
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// State of one proxied WebSocket connection.
pub struct Session {
    /// Unique per connection; appears in every log line of the session.
    pub id: Uuid,
    pub peer: SocketAddr,
    pub version: ProtocolVersion,
    pub encoding: Encoding,
    /// Request path from the handshake, e.g. `/websockify`.
    pub path: String,
    /// Bytes of a client frame that has not fully arrived yet.
    pub recv_partial: Vec<u8>,
    /// Encoded frames waiting to be written to the client.
    pub client_queue: SendQueue,
    /// Decoded payloads waiting to be written to the target.
    pub target_queue: SendQueue,
    pub stats: SessionStats,
    recorder: Option<Box<dyn RecordSink>>,
    started: Instant,
}

impl Session {
    /// Creates a session for a completed handshake.
    ///
    /// `leftover` holds any bytes the client sent after its handshake in the
    /// same segment; they are the start of the first frame.
    pub fn new(
        peer: SocketAddr,
        version: ProtocolVersion,
        encoding: Encoding,
        path: impl Into<String>,
        leftover: Vec<u8>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            version,
            encoding,
            path: path.into(),
            recv_partial: leftover,
            client_queue: SendQueue::new(),
            target_queue: SendQueue::new(),
            stats: SessionStats::default(),
            recorder: None,
            started: Instant::now(),
        }
    }

    /// Attaches a recording sink.
    pub fn with_recorder(mut self, recorder: Box<dyn RecordSink>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Whether payloads travel base64-encoded on the WebSocket side.
    pub fn use_base64(&self) -> bool {
        self.encoding == Encoding::Base64
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    /// Passes a forwarded payload to the recorder, if any.
    pub fn record(&mut self, direction: Direction, payload: &[u8]) {
        let elapsed = self.elapsed_ms();
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(direction, elapsed, payload);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("version", &self.version)
            .field("encoding", &self.encoding)
            .field("path", &self.path)
            .field("recv_partial", &self.recv_partial.len())
            .field("client_queue", &self.client_queue.queued_bytes())
            .field("target_queue", &self.target_queue.queued_bytes())
            .field("stats", &self.stats)
            .field("recording", &self.recorder.is_some())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
