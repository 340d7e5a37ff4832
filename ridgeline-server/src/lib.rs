//! Wire listener and per-API dispatch for the Ridgeline broker.
//!
//! Data flow (spec §2/§4.6): [`ConnServer`] accepts a connection, optionally
//! TLS-wraps it, then loops reading length-prefixed frames and handing each
//! one to [`dispatch::dispatch`]. Fetch responses may bypass the ordinary
//! encode-then-write path and stream segment bytes straight to the socket
//! (`sendfile` where available, a buffered copy everywhere else).

#![warn(clippy::all)]

mod broker;
mod connection;
mod dispatch;
mod listener;
mod sendfile;

pub use broker::Broker;
pub use connection::PeerStream;
pub use listener::ConnServer;
