//! Full-duplex proxy loop between a WebSocket client and a TCP target.
//!
//! One task per connection multiplexes four socket directions with
//! `tokio::select!`:
//!
//! ```text
//!   client ──read──▶ relay::absorb_client_bytes ──▶ target_queue ──write──▶ target
//!   client ◀─write── client_queue ◀── relay::absorb_target_bytes ◀──read── target
//! ```
//!
//! plus a periodic tick for housekeeping. Writes send only the head of a
//! queue and advance by what the socket accepted, so partial writes never
//! reorder or drop bytes.
//!
//! # Backpressure
//!
//! A side is not read while the queue it feeds holds `max_queue_bytes` or
//! more. A client that floods a slow target (or the reverse) therefore stalls
//! at the TCP level instead of growing memory without bound. The limit is
//! checked before each read, so a queue can exceed it by at most one read
//! buffer (plus framing overhead).
//!
//! # Traffic trace
//!
//! At `trace` level every socket operation emits an event with a `legend`
//! field:
//!
//! | legend | meaning                          |
//! |--------|----------------------------------|
//! | `{`    | read from target                 |
//! | `}`    | read from client                 |
//! | `<`    | wrote to client                  |
//! | `<.`   | partial write to client          |
//! | `>`    | wrote to target                  |
//! | `>.`   | partial write to target          |

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, trace};

use crate::application::relay::{
    absorb_client_bytes, absorb_target_bytes, close_frame, ClientInput, RelayError,
};
use crate::domain::config::GatewayConfig;
use crate::domain::session::{SendQueue, Session};

/// WebSocket close code for a protocol violation.
const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// Which socket an I/O error happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Client => "client",
            Side::Target => "target",
        })
    }
}

/// Normal ways a proxy loop ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyExit {
    /// The client closed its TCP connection.
    ClientClosed,
    /// The target closed its TCP connection.
    TargetClosed,
    /// The client sent a WebSocket close frame.
    ClientCloseFrame {
        code: Option<u16>,
        reason: Option<String>,
    },
}

impl fmt::Display for ProxyExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyExit::ClientClosed => f.write_str("client closed connection"),
            ProxyExit::TargetClosed => f.write_str("target closed connection"),
            ProxyExit::ClientCloseFrame { code, reason } => write!(
                f,
                "client sent close frame (code {}, reason {:?})",
                code.map_or_else(|| "none".to_string(), |c| c.to_string()),
                reason.as_deref().unwrap_or("")
            ),
        }
    }
}

/// Abnormal ways a proxy loop ends.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{side} I/O error: {source}")]
    Io {
        side: Side,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] RelayError),
}

impl ProxyError {
    fn io(side: Side) -> impl FnOnce(io::Error) -> Self {
        move |source| ProxyError::Io { side, source }
    }
}

/// The subset of [`GatewayConfig`] a proxy loop needs.
#[derive(Debug, Clone, Copy)]
pub struct ProxySettings {
    pub buffer_size: usize,
    pub max_queue_bytes: usize,
    pub poll_interval: Duration,
}

impl From<&GatewayConfig> for ProxySettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            max_queue_bytes: config.max_queue_bytes,
            poll_interval: config.poll_interval,
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Relays traffic between `client` and `target` until either side closes,
/// the client sends a close frame, or an error occurs.
///
/// On every exit path both streams are shut down. Before that, a bounded
/// (one poll interval) attempt is made to deliver what is still queued.
/// Client data decoded ahead of a close frame or a bad frame still reaches
/// the target; the client gets the echoed close frame or a protocol-error
/// close frame, plus any unsent target data.
///
/// # Errors
///
/// [`ProxyError::Io`] for socket errors and [`ProxyError::Protocol`] when
/// the client sends an undecodable or unmasked frame. Peer closure is not an
/// error; it is reported as a [`ProxyExit`].
pub async fn run_proxy<C, T>(
    session: &mut Session,
    client: C,
    target: T,
    settings: ProxySettings,
) -> Result<ProxyExit, ProxyError>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut target_rd, mut target_wr) = tokio::io::split(target);

    let result = pump(
        session,
        &mut client_rd,
        &mut client_wr,
        &mut target_rd,
        &mut target_wr,
        settings,
    )
    .await;

    let grace = settings.poll_interval;
    match &result {
        Ok(ProxyExit::ClientCloseFrame { .. }) => {
            let _ = timeout(grace, drain_queue(&mut target_wr, &mut session.target_queue)).await;
            let _ = timeout(grace, drain_queue(&mut client_wr, &mut session.client_queue)).await;
        }
        Ok(ProxyExit::TargetClosed) => {
            let _ = timeout(grace, drain_queue(&mut client_wr, &mut session.client_queue)).await;
        }
        Ok(ProxyExit::ClientClosed) => {
            let _ = timeout(grace, drain_queue(&mut target_wr, &mut session.target_queue)).await;
        }
        Err(ProxyError::Protocol(e)) => {
            let _ = timeout(grace, drain_queue(&mut target_wr, &mut session.target_queue)).await;
            if let Some(frame) = close_frame(session, CLOSE_PROTOCOL_ERROR, &e.to_string()) {
                session.client_queue.push(frame);
            }
            let _ = timeout(grace, drain_queue(&mut client_wr, &mut session.client_queue)).await;
        }
        Err(ProxyError::Io { .. }) => {}
    }

    let _ = timeout(grace, client_wr.shutdown()).await;
    let _ = timeout(grace, target_wr.shutdown()).await;
    result
}

// ── Loop internals ────────────────────────────────────────────────────────────

/// What a write-side branch of the loop accomplished.
enum Progress {
    Wrote(usize),
    Flushed,
}

/// Writes the queue head once or, with nothing queued, flushes.
///
/// Writers such as TLS streams may hold accepted bytes internally; the flush
/// after a queue empties pushes them out.
async fn write_or_flush<W: AsyncWrite + Unpin>(writer: &mut W, head: &[u8]) -> io::Result<Progress> {
    if head.is_empty() {
        writer.flush().await.map(|()| Progress::Flushed)
    } else {
        writer.write(head).await.map(Progress::Wrote)
    }
}

async fn pump<CR, CW, TR, TW>(
    session: &mut Session,
    client_rd: &mut CR,
    client_wr: &mut CW,
    target_rd: &mut TR,
    target_wr: &mut TW,
    settings: ProxySettings,
) -> Result<ProxyExit, ProxyError>
where
    CR: AsyncRead + Unpin,
    CW: AsyncWrite + Unpin,
    TR: AsyncRead + Unpin,
    TW: AsyncWrite + Unpin,
{
    let mut client_buf = vec![0u8; settings.buffer_size];
    let mut target_buf = vec![0u8; settings.buffer_size];
    let mut tick = interval(settings.poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Set after a write, cleared by the flush that follows once the queue
    // is empty.
    let mut client_dirty = false;
    let mut target_dirty = false;

    loop {
        let read_client = session.target_queue.queued_bytes() < settings.max_queue_bytes;
        let read_target = session.client_queue.queued_bytes() < settings.max_queue_bytes;
        let write_client = !session.client_queue.is_empty() || client_dirty;
        let write_target = !session.target_queue.is_empty() || target_dirty;

        tokio::select! {
            res = client_rd.read(&mut client_buf), if read_client => {
                let n = res.map_err(ProxyError::io(Side::Client))?;
                if n == 0 {
                    debug!("client closed connection");
                    return Ok(ProxyExit::ClientClosed);
                }
                trace!(legend = "}", bytes = n, "client read");
                if let ClientInput::Closed { code, reason } =
                    absorb_client_bytes(session, &client_buf[..n])?
                {
                    return Ok(ProxyExit::ClientCloseFrame { code, reason });
                }
            }

            res = target_rd.read(&mut target_buf), if read_target => {
                let n = res.map_err(ProxyError::io(Side::Target))?;
                if n == 0 {
                    debug!("target closed connection");
                    return Ok(ProxyExit::TargetClosed);
                }
                trace!(legend = "{", bytes = n, "target read");
                absorb_target_bytes(session, &target_buf[..n]);
            }

            res = write_or_flush(&mut *client_wr, session.client_queue.head()), if write_client => {
                match res.map_err(ProxyError::io(Side::Client))? {
                    Progress::Wrote(n) => {
                        let legend = record_write(&mut session.client_queue, n, Side::Client)?;
                        trace!(legend, bytes = n, "client write");
                        client_dirty = true;
                    }
                    Progress::Flushed => client_dirty = false,
                }
            }

            res = write_or_flush(&mut *target_wr, session.target_queue.head()), if write_target => {
                match res.map_err(ProxyError::io(Side::Target))? {
                    Progress::Wrote(n) => {
                        let legend = record_write(&mut session.target_queue, n, Side::Target)?;
                        trace!(legend, bytes = n, "target write");
                        target_dirty = true;
                    }
                    Progress::Flushed => target_dirty = false,
                }
            }

            _ = tick.tick() => {
                trace!(
                    client_queue = session.client_queue.queued_bytes(),
                    target_queue = session.target_queue.queued_bytes(),
                    recv_partial = session.recv_partial.len(),
                    "poll"
                );
            }
        }
    }
}

/// Advances `queue` past `n` written bytes and returns the trace legend.
fn record_write(queue: &mut SendQueue, n: usize, side: Side) -> Result<&'static str, ProxyError> {
    if n == 0 {
        return Err(ProxyError::Io {
            side,
            source: io::ErrorKind::WriteZero.into(),
        });
    }
    let complete = n == queue.head().len();
    queue.advance(n);
    Ok(match (side, complete) {
        (Side::Client, true) => "<",
        (Side::Client, false) => "<.",
        (Side::Target, true) => ">",
        (Side::Target, false) => ">.",
    })
}

/// Writes everything left in `queue`, then flushes.
async fn drain_queue<W: AsyncWrite + Unpin>(writer: &mut W, queue: &mut SendQueue) -> io::Result<()> {
    while !queue.is_empty() {
        let n = writer.write(queue.head()).await?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        queue.advance(n);
    }
    writer.flush().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
