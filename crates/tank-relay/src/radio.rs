//! Radio transmit backends.

use crate::config::{RadioConfig, RadioKind};
use crate::error::RadioError;
use std::future::Future;
use std::net::SocketAddr;
use tank_protocol::types::FRAME_SIZE;
use tank_protocol::EncodedFrame;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// The link to the vehicle. One call sends one frame; there is no
/// acknowledgement and the caller never retries.
pub trait Radio {
    /// Hands `frame` to the transmitter.
    fn transmit(
        &mut self,
        frame: &EncodedFrame,
    ) -> impl Future<Output = Result<(), RadioError>> + Send;
}

/// Sends each frame as one UDP datagram to a LoRa bridge or modem.
pub struct UdpRadio {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpRadio {
    /// Binds `bind` and connects it to the bridge at `peer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound or connected.
    pub async fn connect(bind: SocketAddr, peer: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(peer).await?;
        Ok(Self { socket, peer })
    }
}

impl Radio for UdpRadio {
    async fn transmit(&mut self, frame: &EncodedFrame) -> Result<(), RadioError> {
        let sent = self.socket.send(frame.as_bytes()).await?;
        if sent != FRAME_SIZE {
            return Err(RadioError::ShortWrite {
                sent,
                expected: FRAME_SIZE,
            });
        }
        debug!(peer = %self.peer, bytes = sent, "frame sent");
        Ok(())
    }
}

/// Logs frames instead of sending them.
#[derive(Debug, Default)]
pub struct DryRunRadio {
    frames: u64,
}

impl DryRunRadio {
    /// Creates a radio with no frames logged.
    #[must_use]
    pub const fn new() -> Self {
        Self { frames: 0 }
    }

    /// Number of frames "sent" so far.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }
}

impl Radio for DryRunRadio {
    async fn transmit(&mut self, frame: &EncodedFrame) -> Result<(), RadioError> {
        self.frames += 1;
        info!(n = self.frames, frame = ?frame, "dry-run transmit");
        Ok(())
    }
}

/// The backend selected at startup.
pub enum RadioLink {
    /// UDP datagrams to a bridge.
    Udp(UdpRadio),
    /// Logging only.
    DryRun(DryRunRadio),
}

impl RadioLink {
    /// Opens the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if an address does not parse or the UDP socket
    /// cannot be opened.
    pub async fn open(config: &RadioConfig) -> anyhow::Result<Self> {
        match config.kind {
            RadioKind::DryRun => Ok(Self::DryRun(DryRunRadio::new())),
            RadioKind::Udp => {
                let bind: SocketAddr = config.bind.parse()?;
                let peer: SocketAddr = config.addr.parse()?;
                let radio = UdpRadio::connect(bind, peer).await?;
                info!(%peer, "udp radio ready");
                Ok(Self::Udp(radio))
            }
        }
    }

    /// Short name for logs and status output.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Udp(_) => "udp",
            Self::DryRun(_) => "dry-run",
        }
    }
}

impl Radio for RadioLink {
    async fn transmit(&mut self, frame: &EncodedFrame) -> Result<(), RadioError> {
        match self {
            Self::Udp(radio) => radio.transmit(frame).await,
            Self::DryRun(radio) => radio.transmit(frame).await,
        }
    }
}
