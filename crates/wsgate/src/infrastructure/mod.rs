//! Infrastructure layer for wsgate.
//!
//! The infrastructure layer handles all I/O: the listening socket, TLS, the
//! opening handshake, the target connection and the proxy loop.
//!
//! # Responsibilities
//!
//! - Binding the listener and spawning one task per connection
//! - Classifying new connections (Flash policy, TLS, plaintext)
//! - Reading the HTTP request and writing the handshake response
//! - Serving plain HTTP requests from a web root
//! - Opening the TCP connection to the target
//! - Driving both sockets of a session until one side closes
//! - Writing session recordings
//! - Loading the TOML configuration file
//!
//! # What does NOT belong here?
//!
//! - Frame encoding and handshake computation (that is `wsgate-core`)
//! - Deciding which frames to send (that is the application layer)

pub mod config_file;
pub mod listener;
pub mod negotiator;
pub mod proxy_loop;
pub mod recorder;
pub mod stream;
pub mod target_conn;
pub mod tls;
pub mod web;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use listener::{run_server, Gateway, GatewayContext, GatewayStats};
