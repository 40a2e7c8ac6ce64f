//! PeerWire Daemon Library
//!
//! Core functionality for the PeerWire daemon:
//! - framed socket transport for client control channels
//! - per-connection topic relay state machine
//! - connection manager binding accepted sockets to relays
//! - TCP accept loop

pub mod connection;
pub mod relay;
pub mod server;
