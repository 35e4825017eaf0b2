//! Command source adapters and the intent they produce.

use crate::error::SourceError;
use crate::local_api::LocalOperator;
use crate::remote::RemotePoller;
use std::future::Future;
use tank_protocol::Command;

/// What the operator wants the vehicle to do right now.
///
/// Already mapped onto the shared command vocabulary. A Stop intent always
/// carries zero speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveIntent {
    command: Command,
    left_speed: u8,
    right_speed: u8,
}

impl DriveIntent {
    /// Builds an intent, zeroing the speeds of a Stop.
    #[must_use]
    pub const fn new(command: Command, left_speed: u8, right_speed: u8) -> Self {
        if command.is_stop() {
            Self::stop()
        } else {
            Self {
                command,
                left_speed,
                right_speed,
            }
        }
    }

    /// The fail-safe default.
    #[must_use]
    pub const fn stop() -> Self {
        Self {
            command: Command::Stop,
            left_speed: 0,
            right_speed: 0,
        }
    }

    /// Requested command.
    #[must_use]
    pub const fn command(&self) -> Command {
        self.command
    }

    /// Requested left magnitude.
    #[must_use]
    pub const fn left_speed(&self) -> u8 {
        self.left_speed
    }

    /// Requested right magnitude.
    #[must_use]
    pub const fn right_speed(&self) -> u8 {
        self.right_speed
    }
}

/// An untrusted input channel polled once per relay tick.
pub trait CommandSource {
    /// Returns the operator's current intent, or why there is none.
    ///
    /// Implementations must return within a bounded time; the relay loop also
    /// enforces its own poll deadline.
    fn poll(&mut self) -> impl Future<Output = Result<DriveIntent, SourceError>> + Send;
}

/// The adapter selected at startup.
pub enum ActiveSource {
    /// Poll a remote HTTP endpoint.
    Remote(RemotePoller),
    /// Serve a local operator endpoint.
    Local(LocalOperator),
}

impl ActiveSource {
    /// Short name for logs and status output.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Remote(_) => "remote",
            Self::Local(_) => "local",
        }
    }
}

impl CommandSource for ActiveSource {
    async fn poll(&mut self) -> Result<DriveIntent, SourceError> {
        match self {
            Self::Remote(remote) => remote.poll().await,
            Self::Local(local) => local.poll().await,
        }
    }
}
