use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

/// UDP port the wallbox listens on for report commands.
pub const DEFAULT_PORT: u16 = 7090;
/// Read deadline applied from the moment a command has been sent.
pub const DEFAULT_TIMEOUT_MS: u64 = 2_000;

const MAX_DATAGRAM: usize = 65_507;

/// Where and how to reach the wallbox.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Literal IP address or hostname; hostnames resolve once, first record wins.
    pub host: String,
    pub port: u16,
    /// Local port to send from. KEBA firmware answers on 7090 regardless of the
    /// source port, so deployments usually pin this; `None` binds an ephemeral port.
    pub bind_port: Option<u16>,
    /// Read deadline in milliseconds.
    pub timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            bind_port: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no address records found for {0}")]
    NoAddress(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no reply within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// A single request/reply exchange with the device.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn exchange(&self, command: &str) -> Result<Vec<u8>, TransportError>;
}

/// Half-duplex UDP transport bound to one resolved destination.
#[derive(Debug)]
pub struct UdpTransport {
    destination: SocketAddr,
    bind_port: Option<u16>,
    timeout: Duration,
    in_flight: Mutex<()>,
}

impl UdpTransport {
    pub async fn resolve(config: TransportConfig) -> Result<Self, TransportError> {
        let destination = resolve_destination(&config.host, config.port).await?;
        debug!(host = %config.host, %destination, "wallbox address resolved");
        Ok(Self::with_destination(
            destination,
            config.bind_port,
            Duration::from_millis(config.timeout_ms),
        ))
    }

    pub fn with_destination(
        destination: SocketAddr,
        bind_port: Option<u16>,
        timeout: Duration,
    ) -> Self {
        Self {
            destination,
            bind_port,
            timeout,
            in_flight: Mutex::new(()),
        }
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

#[async_trait]
impl Exchange for UdpTransport {
    async fn exchange(&self, command: &str) -> Result<Vec<u8>, TransportError> {
        // replies carry no request id, so only one command may be outstanding
        let _guard = self.in_flight.lock().await;
        exchange_datagram(self.destination, self.bind_port, command, self.timeout).await
    }
}

/// Sends `command` from a fresh socket and waits for exactly one reply datagram.
///
/// The socket lives only for the duration of the call and is released on every
/// return path. The deadline starts once the command has been written.
pub async fn exchange_datagram(
    destination: SocketAddr,
    bind_port: Option<u16>,
    command: &str,
    deadline: Duration,
) -> Result<Vec<u8>, TransportError> {
    let local = SocketAddr::new(unspecified_for(&destination), bind_port.unwrap_or(0));
    let socket = UdpSocket::bind(local).await?;
    socket.connect(destination).await?;
    socket.send(command.as_bytes()).await?;
    let sent_at = Instant::now();

    let mut buf = vec![0u8; MAX_DATAGRAM];
    match timeout(deadline, socket.recv(&mut buf)).await {
        Ok(Ok(len)) => {
            buf.truncate(len);
            debug!(
                %destination,
                command,
                bytes = len,
                elapsed_ms = sent_at.elapsed().as_millis(),
                "udp exchange ok"
            );
            Ok(buf)
        }
        Ok(Err(err)) => {
            warn!(%destination, command, error = %err, "udp receive failed");
            Err(TransportError::Io(err))
        }
        Err(_) => {
            let timeout_ms = deadline.as_millis() as u64;
            warn!(%destination, command, timeout_ms, "udp exchange timed out");
            Err(TransportError::Timeout { timeout_ms })
        }
    }
}

/// Resolves a literal address or hostname to the first matching socket address.
pub async fn resolve_destination(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let mut records = lookup_host((host, port))
        .await
        .map_err(|source| TransportError::Resolve {
            host: host.to_string(),
            source,
        })?;
    records
        .next()
        .ok_or_else(|| TransportError::NoAddress(host.to_string()))
}

fn unspecified_for(destination: &SocketAddr) -> IpAddr {
    match destination {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}
