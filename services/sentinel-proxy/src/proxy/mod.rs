//! Byte-transparent TCP forwarding to the current master.
//!
//! This module provides:
//! - TCP listener management
//! - Per-connection binding to the master known at accept time
//! - Bidirectional copying with independent half-close per direction
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> MasterRegistry::get() -> ForwardingSession -> Master
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use sentinel_proxy::{Listener, ListenerConfig, MasterRegistry};
//!
//! let registry = Arc::new(MasterRegistry::new());
//! let config = ListenerConfig::new("0.0.0.0:9999".parse()?);
//! let listener = Arc::new(Listener::bind(config, registry).await?);
//! listener.run(shutdown_rx).await?;
//! ```

mod listener;
mod session;

pub use listener::{Listener, ListenerConfig, ListenerStats, ACCEPT_ERROR_BACKOFF};
pub use session::{pump, ConnectedSession, ForwardingSession, SessionSummary, PUMP_BUFFER_SIZE};
