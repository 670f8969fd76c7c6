pub mod config;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod pidfile;
pub mod proxy;
pub mod registry;

pub use discovery::{
    DiscoveryConfig, DiscoveryCoordinator, DiscoveryStats, MasterReport, RetryPolicy,
    SentinelClient,
};
pub use endpoint::EndpointAddress;
pub use error::{AddressError, DiscoveryError, Recovery, ReplyError, SessionError};
pub use proxy::{
    ConnectedSession, ForwardingSession, Listener, ListenerConfig, ListenerStats, SessionSummary,
};
pub use registry::{MasterRegistry, SharedMasterRegistry};
