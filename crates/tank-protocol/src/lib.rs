//! Wire protocol for the tank command link.
//!
//! This crate provides:
//! - The control frame model and its fixed-size layout ([`frame`])
//! - Ed25519 frame authentication and anti-replay verification ([`crypto`])
//! - Wire constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod crypto;
pub mod frame;
pub mod types;

pub use crypto::{EncodeError, FrameAuthenticator, FrameEncoder, FrameVerifier, VerifyError};
pub use frame::{Command, EncodedFrame, Frame, SequenceCounter};
