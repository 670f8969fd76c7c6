//! Master discovery through Redis Sentinel.
//!
//! ## Architecture
//!
//! ```text
//! Sentinel A -> SentinelClient --\
//! Sentinel B -> SentinelClient ---+-> DiscoveryCoordinator -> MasterRegistry
//! Sentinel C -> SentinelClient --/
//! ```
//!
//! Each client polls its sentinel independently and retries forever. The
//! coordinator writes every report into the registry in arrival order and
//! warns when no sentinel has answered for a whole liveness window.

mod client;
mod coordinator;
pub mod resp;

pub use client::{
    DiscoveryQueryResult, MasterReport, RetryPolicy, SentinelClient, SentinelConnection,
    LOOKUP_COMMAND,
};
pub use coordinator::{
    DiscoveryConfig, DiscoveryCoordinator, DiscoveryStats, DEFAULT_LIVENESS_WINDOW,
};
