//! tank-relay daemon: polls an operator command source and turns it into
//! signed, replay-resistant radio frames, stopping the vehicle whenever the
//! source goes quiet or talks nonsense.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI parsing and TOML configuration.
pub mod config;
/// Source and radio error types.
pub mod error;
/// Ed25519 signing key generation and loading.
pub mod keypair;
/// Local operator source and the HTTP API (`/cmd`, `/status`, `/health`).
pub mod local_api;
/// Prometheus exporter and metric helpers.
pub mod metrics;
/// Radio transmit backends.
pub mod radio;
/// The poll/decide/transmit control loop.
pub mod relay;
/// Remote HTTP polling source.
pub mod remote;
/// Command source trait and drive intents.
pub mod source;
pub mod watchdog;
