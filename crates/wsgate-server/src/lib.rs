//! wsgate-server: WebSocket fan-out gateway.
//!
//! A client sends one JSON request naming several backends and the calls to
//! make on each; the gateway authenticates it, runs every call concurrently,
//! and answers with one aggregated response. Failures stay scoped to the
//! call (or backend entry) that produced them.

pub mod auth;
pub mod backend;
pub mod config;
pub mod dispatch;
pub mod handshake;
pub mod server;
pub mod transport;
