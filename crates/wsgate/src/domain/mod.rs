//! Domain layer for wsgate.
//!
//! The domain layer contains pure types with no dependencies on sockets,
//! files or the async runtime, so they are easy to test in isolation.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures
//! - Per-connection session state and its send queues
//! - The recording seam ([`RecordSink`])
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream` or TLS types
//! - File I/O or environment variable reading

pub mod config;
pub mod recording;
pub mod session;

// Re-export the most commonly needed types at the domain module boundary
// so callers can write `domain::GatewayConfig` instead of the longer path.
pub use config::GatewayConfig;
pub use recording::{Direction, RecordSink};
pub use session::{SendQueue, Session, SessionStats};
