//! One client connection bound to one backend.
//!
//! The backend address is fixed when the session is created. A master
//! change while the session runs does not move it; the client has to
//! reconnect to pick up the new master.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::endpoint::EndpointAddress;
use crate::error::SessionError;

/// Copy buffer size for each direction.
pub const PUMP_BUFFER_SIZE: usize = 8192;

/// Bytes moved by a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub bytes_to_backend: u64,
    pub bytes_from_backend: u64,
}

/// A client connection and the master it was bound to at accept time.
pub struct ForwardingSession {
    client: TcpStream,
    peer_addr: SocketAddr,
    master: Option<Arc<EndpointAddress>>,
}

impl ForwardingSession {
    pub fn new(
        client: TcpStream,
        peer_addr: SocketAddr,
        master: Option<Arc<EndpointAddress>>,
    ) -> Self {
        Self {
            client,
            peer_addr,
            master,
        }
    }

    /// Dial the backend and relay bytes until both directions finish.
    ///
    /// On any error before pumping starts the client connection is dropped,
    /// which closes it.
    pub async fn run(self) -> Result<SessionSummary, SessionError> {
        Ok(self.connect().await?.forward().await)
    }

    /// Dial the bound master. The client is dropped (closed) on failure.
    pub async fn connect(self) -> Result<ConnectedSession, SessionError> {
        let Some(master) = self.master else {
            return Err(SessionError::NoMaster);
        };

        let backend = TcpStream::connect(master.as_pair())
            .await
            .map_err(|source| SessionError::Dial {
                addr: (*master).clone(),
                source,
            })?;

        debug!(
            peer_addr = %self.peer_addr,
            backend_addr = %master,
            "Connected to master"
        );

        Ok(ConnectedSession {
            client: self.client,
            backend,
        })
    }
}

/// A session whose backend connection is established.
pub struct ConnectedSession {
    client: TcpStream,
    backend: TcpStream,
}

impl ConnectedSession {
    /// Relay bytes until both directions finish.
    pub async fn forward(self) -> SessionSummary {
        let (client_read, client_write) = self.client.into_split();
        let (backend_read, backend_write) = self.backend.into_split();

        let upstream = tokio::spawn(pump(client_read, backend_write));
        let downstream = tokio::spawn(pump(backend_read, client_write));

        let (to_backend, from_backend) = join_pumps(upstream, downstream).await;

        SessionSummary {
            bytes_to_backend: to_backend.unwrap_or(0),
            bytes_from_backend: from_backend.unwrap_or(0),
        }
    }
}

/// Wait for both pumps. A clean EOF waits for the sibling (half-close);
/// an error aborts the sibling so both sockets are released.
async fn join_pumps(
    mut upstream: JoinHandle<io::Result<u64>>,
    mut downstream: JoinHandle<io::Result<u64>>,
) -> (io::Result<u64>, io::Result<u64>) {
    tokio::select! {
        first = &mut upstream => {
            let up = flatten(first);
            if up.is_err() {
                downstream.abort();
            }
            let down = flatten(downstream.await);
            log_pump_error("client -> backend", &up);
            log_pump_error("backend -> client", &down);
            (up, down)
        }
        first = &mut downstream => {
            let down = flatten(first);
            if down.is_err() {
                upstream.abort();
            }
            let up = flatten(upstream.await);
            log_pump_error("client -> backend", &up);
            log_pump_error("backend -> client", &down);
            (up, down)
        }
    }
}

fn flatten(joined: Result<io::Result<u64>, tokio::task::JoinError>) -> io::Result<u64> {
    joined.unwrap_or_else(|e| Err(io::Error::other(e)))
}

fn log_pump_error(direction: &str, result: &io::Result<u64>) {
    if let Err(e) = result {
        debug!(direction, error = %e, "Pump ended with error");
    }
}

/// Copy `from` into `to` until EOF or error, then shut down the write side
/// of `to`.
pub async fn pump<R, W>(mut from: R, mut to: W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];

    let copied = loop {
        match from.read(&mut buf).await {
            Ok(0) => break Ok(total),
            Ok(n) => {
                if let Err(e) = to.write_all(&buf[..n]).await {
                    break Err(e);
                }
                total += n as u64;
            }
            Err(e) => break Err(e),
        }
    };

    // The destination may already be gone; the copy result is what matters.
    let _ = to.shutdown().await;
    copied
}
