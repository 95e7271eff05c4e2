//! Outbound packet sending.
//!
//! Fire-and-forget: connect with a deadline, write one frame, close. Retry
//! policy lives with the client, not here.

use std::net::IpAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use anemochory_types::SessionTag;

use crate::framing::write_frame;
use crate::{Result, TransportError};

/// Default connect deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends single framed packets over fresh TCP connections.
#[derive(Clone, Debug)]
pub struct PacketSender {
    connect_timeout: Duration,
}

impl Default for PacketSender {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketSender {
    /// Create a sender with the default connect deadline.
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Create a sender with an explicit connect deadline.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Send one framed packet to `(address, port)`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectFailed`] if the connection cannot be
    /// established within the deadline and [`TransportError::WriteFailed`]
    /// if the frame cannot be written.
    pub async fn send_packet(
        &self,
        packet: &[u8],
        session_tag: &SessionTag,
        address: IpAddr,
        port: u16,
    ) -> Result<()> {
        let mut stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((address, port)),
        )
        .await
        .map_err(|_| TransportError::ConnectFailed(format!("connect timeout to {address}:{port}")))?
        .map_err(|e| TransportError::ConnectFailed(format!("{address}:{port}: {e}")))?;

        write_frame(&mut stream, packet, session_tag).await?;
        let _ = stream.shutdown().await;

        tracing::debug!(%address, port, bytes = packet.len(), "packet sent");
        Ok(())
    }
}
