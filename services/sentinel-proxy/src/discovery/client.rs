//! Per-sentinel master lookup loop.
//!
//! A `SentinelClient` owns one connection to one sentinel and asks it for
//! the master address forever. Failures never leave the client: transport
//! errors redial, bad answers repeat the query, both after a fixed delay.

use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::resp;
use crate::endpoint::EndpointAddress;
use crate::error::{DiscoveryError, Recovery, ReplyError};

/// Sentinel command resolving a master name to its address.
pub const LOOKUP_COMMAND: &str = "SENTINEL get-master-addr-by-name";

/// Delays and timeouts for one sentinel client.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Bound on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Bound on writing a query and reading its reply.
    pub io_timeout: Duration,
    /// Pause before dialing again after a transport failure.
    pub reconnect_delay: Duration,
    /// Pause before re-sending a query whose answer was unusable.
    pub requery_delay: Duration,
    /// Pause between successful lookups.
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(2),
            requery_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to apply before recovering in the given way.
    pub fn delay_for(&self, recovery: Recovery) -> Duration {
        match recovery {
            Recovery::Reconnect => self.reconnect_delay,
            Recovery::Requery => self.requery_delay,
        }
    }
}

/// A master address reported by one sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterReport {
    pub sentinel: EndpointAddress,
    pub master: EndpointAddress,
}

/// Outcome of a single lookup attempt.
pub type DiscoveryQueryResult = Result<EndpointAddress, DiscoveryError>;

/// An open connection to a sentinel with its unread reply bytes.
pub struct SentinelConnection {
    stream: TcpStream,
    buf: BytesMut,
}

impl SentinelConnection {
    /// Dial a sentinel within `connect_timeout`.
    pub async fn connect(
        sentinel: &EndpointAddress,
        connect_timeout: Duration,
    ) -> Result<Self, DiscoveryError> {
        let stream = match timeout(connect_timeout, TcpStream::connect(sentinel.as_pair())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(DiscoveryError::Connect(e)),
            Err(_) => return Err(DiscoveryError::ConnectTimeout(connect_timeout)),
        };
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(512),
        })
    }

    /// Ask for the address of `master_name` and resolve it.
    ///
    /// The returned address carries the resolved IP, so a host that does
    /// not resolve never reaches the registry.
    pub async fn lookup_master(
        &mut self,
        master_name: &str,
        io_timeout: Duration,
    ) -> DiscoveryQueryResult {
        let request = format!("{LOOKUP_COMMAND} {master_name}\n");
        match timeout(io_timeout, self.stream.write_all(request.as_bytes())).await {
            Ok(result) => result?,
            Err(_) => return Err(DiscoveryError::WriteTimeout(io_timeout)),
        }

        let reply = match timeout(io_timeout, self.read_reply()).await {
            Ok(result) => result?,
            Err(_) => return Err(DiscoveryError::ReadTimeout(io_timeout)),
        };

        let reported = resp::master_addr(reply)?;
        resolve(reported, io_timeout).await
    }

    /// Read until one complete reply is buffered and consume it.
    async fn read_reply(&mut self) -> Result<resp::Reply, DiscoveryError> {
        loop {
            if let Some((reply, used)) = resp::decode(&self.buf)? {
                self.buf.advance(used);
                return Ok(reply);
            }

            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(DiscoveryError::Closed);
            }
        }
    }
}

/// Resolve a reported master to its first socket address.
async fn resolve(reported: EndpointAddress, limit: Duration) -> DiscoveryQueryResult {
    let resolved = match timeout(limit, lookup_host(reported.as_pair())).await {
        Ok(Ok(mut addrs)) => addrs.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no addresses returned")
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "resolve timed out")),
    };

    match resolved {
        Ok(socket) => Ok(EndpointAddress::new(socket.ip().to_string(), socket.port())
            .map_err(ReplyError::from)?),
        Err(source) => Err(DiscoveryError::Resolve {
            addr: reported,
            source,
        }),
    }
}

/// Polls one sentinel and reports every resolved master address.
pub struct SentinelClient {
    sentinel: EndpointAddress,
    master_name: String,
    policy: RetryPolicy,
    reports: mpsc::Sender<MasterReport>,
}

impl SentinelClient {
    pub fn new(
        sentinel: EndpointAddress,
        master_name: impl Into<String>,
        policy: RetryPolicy,
        reports: mpsc::Sender<MasterReport>,
    ) -> Self {
        Self {
            sentinel,
            master_name: master_name.into(),
            policy,
            reports,
        }
    }

    pub fn sentinel(&self) -> &EndpointAddress {
        &self.sentinel
    }

    /// Run the lookup loop.
    ///
    /// Only returns once the report receiver is gone.
    pub async fn run(self) {
        loop {
            let mut conn =
                match SentinelConnection::connect(&self.sentinel, self.policy.connect_timeout).await
                {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(sentinel = %self.sentinel, error = %e, "Sentinel connect failed");
                        sleep(self.policy.reconnect_delay).await;
                        continue;
                    }
                };

            info!(sentinel = %self.sentinel, "Connected to sentinel");

            loop {
                match conn
                    .lookup_master(&self.master_name, self.policy.io_timeout)
                    .await
                {
                    Ok(master) => {
                        debug!(sentinel = %self.sentinel, master = %master, "Sentinel reported master");
                        let report = MasterReport {
                            sentinel: self.sentinel.clone(),
                            master,
                        };
                        if self.reports.send(report).await.is_err() {
                            debug!(sentinel = %self.sentinel, "Report channel closed");
                            return;
                        }
                        sleep(self.policy.poll_interval).await;
                    }
                    Err(e) => {
                        let recovery = e.recovery();
                        warn!(
                            sentinel = %self.sentinel,
                            master_name = %self.master_name,
                            error = %e,
                            ?recovery,
                            "Master lookup failed"
                        );
                        sleep(self.policy.delay_for(recovery)).await;
                        if recovery == Recovery::Reconnect {
                            break;
                        }
                    }
                }
            }
        }
    }
}
