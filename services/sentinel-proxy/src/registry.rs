//! Shared "current master" cell.
//!
//! Discovery writes, every accepted connection reads. Values are swapped
//! in as whole `Arc`s, so a reader never sees a half-written address.
//!
//! There is no history and no reconciliation between sentinels: the last
//! `set` wins, even when it comes from a sentinel that lags behind an
//! election the others already agree on. During a failover window two
//! sentinels can briefly flip the value back and forth.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::endpoint::EndpointAddress;

/// Last known master address, `None` until the first resolution.
#[derive(Debug, Default)]
pub struct MasterRegistry {
    current: ArcSwapOption<EndpointAddress>,
}

impl MasterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    /// Snapshot of the current master.
    pub fn get(&self) -> Option<Arc<EndpointAddress>> {
        self.current.load_full()
    }

    /// Overwrite the current master, returning the value it replaced.
    pub fn set(&self, addr: EndpointAddress) -> Option<Arc<EndpointAddress>> {
        self.current.swap(Some(Arc::new(addr)))
    }
}

/// Registry handle shared between discovery and the listener.
pub type SharedMasterRegistry = Arc<MasterRegistry>;
