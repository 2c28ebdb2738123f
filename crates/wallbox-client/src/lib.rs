use thiserror::Error;
use tracing::debug;

use report_decoder::{DecodeError, Report};
use types::{LiveConfig, LiveSession, SessionLogEntry, SystemInfo};
use udp_transport::{Exchange, TransportConfig, TransportError, UdpTransport};

mod history;

pub use history::{FIRST_HISTORY_SLOT, LAST_HISTORY_SLOT};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Read-only client for a KEBA wallbox.
///
/// Every query is one exchange on the underlying transport followed by one
/// decode; nothing is cached and nothing is retried.
#[derive(Debug)]
pub struct WallboxClient<E = UdpTransport> {
    transport: E,
}

impl WallboxClient<UdpTransport> {
    /// Resolves the wallbox address and builds a client on top of a UDP transport.
    pub async fn connect(config: TransportConfig) -> Result<Self, ClientError> {
        let transport = UdpTransport::resolve(config).await?;
        Ok(Self::new(transport))
    }
}

impl<E: Exchange> WallboxClient<E> {
    pub fn new(transport: E) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &E {
        &self.transport
    }

    /// Identity and DIP switches (`report 1`).
    pub async fn fetch_system_info(&self) -> Result<SystemInfo, ClientError> {
        self.report("report 1").await
    }

    /// State, plug flags and limits (`report 2`).
    pub async fn fetch_config(&self) -> Result<LiveConfig, ClientError> {
        self.report("report 2").await
    }

    /// Voltages, currents, power and energy (`report 3`).
    pub async fn fetch_session(&self) -> Result<LiveSession, ClientError> {
        self.report("report 3").await
    }

    /// Past charging sessions in the order the device reports them.
    pub async fn fetch_history(&self) -> Result<Vec<SessionLogEntry>, ClientError> {
        history::collect(self).await
    }

    pub(crate) async fn report<T: Report>(&self, command: &str) -> Result<T, ClientError> {
        let raw = self.transport.exchange(command).await?;
        debug!(command, bytes = raw.len(), "decoding report");
        Ok(T::decode(&raw)?)
    }
}
