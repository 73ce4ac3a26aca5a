//! wsgate library crate.
//!
//! A gateway that lets WebSocket clients (typically browsers) talk to plain
//! TCP services such as VNC servers. Each WebSocket connection gets its own
//! TCP connection to the target; payloads are unwrapped from WebSocket frames
//! on the way in and wrapped on the way out.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (WebSocket: Hixie-75, Hixie-76 or HyBi-07; ws:// or wss://)
//!         ↕
//! [wsgate]
//!   ├── domain/           Pure types: GatewayConfig, Session, send queues
//!   ├── application/      relay: bytes ↔ frames for one session
//!   └── infrastructure/
//!         ├── listener/    accept loop, per-connection tasks
//!         ├── negotiator/  peek, TLS, HTTP handshake, web fallback
//!         ├── proxy_loop/  select!-driven full-duplex relay
//!         └── target_conn/ TCP connection to the target
//!         ↕
//! Target service (raw TCP)
//! ```
//!
//! Frame encoding and handshake computation live in `wsgate-core`, which has
//! no I/O at all.
//!
//! # Layer rules
//!
//! - `domain` has no I/O, no async and no TLS types.
//! - `application` depends on `domain` and `wsgate-core` only.
//! - `infrastructure` depends on all other layers plus `tokio` and `rustls`.

/// Domain layer: configuration and session state (no I/O).
pub mod domain;

/// Application layer: frame relay logic.
pub mod application;

/// Infrastructure layer: sockets, TLS, handshake, proxy loop.
pub mod infrastructure;
