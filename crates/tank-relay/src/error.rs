use thiserror::Error;

/// Why a command source produced no usable intent this tick.
///
/// Both variants are recovered by the safety watchdog (forced Stop); they
/// never propagate past the relay loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Transport failure, timeout, non-200 response, or a silent operator.
    #[error("command source unreachable: {0}")]
    Unreachable(String),
    /// The source answered but the payload could not be interpreted.
    #[error("invalid command payload: {0}")]
    InvalidPayload(String),
}

impl SourceError {
    /// Short label used for log fields and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::InvalidPayload(_) => "invalid_payload",
        }
    }
}

/// Radio-layer transmit failure. Reported, never fed back into the watchdog.
#[derive(Error, Debug)]
pub enum RadioError {
    /// The underlying socket or device failed.
    #[error("radio io error: {0}")]
    Io(#[from] std::io::Error),
    /// The device accepted fewer bytes than the frame size.
    #[error("short write: sent {sent} of {expected} bytes")]
    ShortWrite {
        /// Bytes actually written.
        sent: usize,
        /// Frame size.
        expected: usize,
    },
}
