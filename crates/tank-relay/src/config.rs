use crate::remote::parse_command_name;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI interface for the relay daemon.
#[derive(Parser)]
#[command(name = "tank-relay", about = "Fail-safe command relay for a tele-operated vehicle")]
#[command(version)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a custom configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Command source override.
    #[arg(long, global = true, value_enum)]
    pub source: Option<SourceKind>,

    /// Radio bridge address override (selects the UDP radio).
    #[arg(long, global = true)]
    pub radio_addr: Option<String>,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to a file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay daemon.
    Start,
    /// Generate a new signing key.
    Keygen {
        /// Overwrite an existing key file.
        #[arg(long)]
        force: bool,
    },
    /// Print the public key the vehicle must trust.
    Identity,
    /// Show the running daemon's status.
    Status,
}

/// Where drive intents come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Poll a remote HTTP server.
    Remote,
    /// Accept commands on the local HTTP endpoint.
    Local,
}

impl SourceKind {
    /// Config-file spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
        }
    }
}

/// Radio backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RadioKind {
    /// One UDP datagram per frame to a LoRa bridge.
    Udp,
    /// Log frames without sending them.
    DryRun,
}

/// Runtime configuration loaded from file, env, and defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// Active command source.
    pub source: SourceKind,
    /// Relay loop cadence.
    pub relay: LoopConfig,
    /// Fail-safe timing.
    pub watchdog: WatchdogConfig,
    /// Remote-poll source settings.
    pub remote: RemoteConfig,
    /// Local operator endpoint settings.
    pub local: LocalConfig,
    /// Radio transmit settings.
    pub radio: RadioConfig,
    /// Prometheus exporter settings.
    pub metrics: MetricsConfig,
    /// Signing key location.
    #[serde(default)]
    pub key: KeyConfig,
}

/// Relay loop settings.
#[derive(Debug, Deserialize, Clone)]
pub struct LoopConfig {
    /// Milliseconds between ticks.
    pub poll_interval_ms: u64,
}

/// Safety watchdog settings.
#[derive(Debug, Deserialize, Clone)]
pub struct WatchdogConfig {
    /// Minimum spacing of forced Stop frames while disconnected, in milliseconds.
    pub safety_interval_ms: u64,
}

/// Remote-poll source settings.
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    /// URL returning `{"command": ..., "speedness": ...}`.
    pub url: String,
    /// Per-request deadline in milliseconds. Must be below the safety interval.
    pub timeout_ms: u64,
    /// Direction word translation.
    pub remap: RemapConfig,
}

/// Named remap policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemapPolicy {
    /// Compensates the vehicle's motor orientation.
    OrientationFix,
    /// Each word maps to its namesake.
    Identity,
}

/// Remap policy plus optional per-word overrides (`"forward"`, `"stop"`, ...).
#[derive(Debug, Deserialize, Clone)]
pub struct RemapConfig {
    /// Base table.
    pub policy: RemapPolicy,
    /// Override for `"FORWARD"`.
    #[serde(default)]
    pub forward: Option<String>,
    /// Override for `"BACKWARD"`.
    #[serde(default)]
    pub backward: Option<String>,
    /// Override for `"LEFT"`.
    #[serde(default)]
    pub left: Option<String>,
    /// Override for `"RIGHT"`.
    #[serde(default)]
    pub right: Option<String>,
}

/// Local HTTP endpoint settings. The endpoint also serves `/status`.
#[derive(Debug, Deserialize, Clone)]
pub struct LocalConfig {
    /// Listen address, `host:port`.
    pub listen: String,
    /// Operator silence after which the local source reports unreachable.
    /// The operator client must repeat its action within this window to keep
    /// the vehicle moving. Required when `source = "local"`.
    pub idle_timeout_ms: u64,
}

/// Radio settings.
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    /// Backend selection.
    pub kind: RadioKind,
    /// Bridge address for the UDP radio.
    pub addr: String,
    /// Local bind address for the UDP radio.
    pub bind: String,
}

/// Prometheus exporter settings.
#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    /// Whether to serve `/metrics`.
    pub enabled: bool,
    /// Listen address, `host:port`.
    pub listen: String,
}

/// Signing key location. `None` uses the platform config dir.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct KeyConfig {
    /// Path to the 32-byte seed file.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Remote,
            relay: LoopConfig::default(),
            watchdog: WatchdogConfig::default(),
            remote: RemoteConfig::default(),
            local: LocalConfig::default(),
            radio: RadioConfig::default(),
            metrics: MetricsConfig::default(),
            key: KeyConfig::default(),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            safety_interval_ms: 1000,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000/command".to_string(),
            timeout_ms: 800,
            remap: RemapConfig::default(),
        }
    }
}

impl Default for RemapConfig {
    fn default() -> Self {
        Self {
            policy: RemapPolicy::OrientationFix,
            forward: None,
            backward: None,
            left: None,
            right: None,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7710".to_string(),
            idle_timeout_ms: 1500,
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            kind: RadioKind::DryRun,
            addr: "127.0.0.1:5555".to_string(),
            bind: "0.0.0.0:0".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:9090".to_string(),
        }
    }
}

fn check_socket_addr(field: &str, value: &str) -> Result<(), String> {
    value
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| format!("{field} must be a host:port socket address, got: {value}"))
}

impl RelayConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.relay.poll_interval_ms == 0 {
            return Err("relay.poll_interval_ms must be greater than 0".to_string());
        }
        if self.watchdog.safety_interval_ms == 0 {
            return Err("watchdog.safety_interval_ms must be greater than 0".to_string());
        }
        if self.relay.poll_interval_ms >= self.watchdog.safety_interval_ms {
            return Err(format!(
                "relay.poll_interval_ms ({}) must be shorter than watchdog.safety_interval_ms ({})",
                self.relay.poll_interval_ms, self.watchdog.safety_interval_ms
            ));
        }

        if self.source == SourceKind::Remote {
            if self.remote.url.is_empty() {
                return Err("remote.url must not be empty".to_string());
            }
            if !(self.remote.url.starts_with("http://") || self.remote.url.starts_with("https://"))
            {
                return Err(format!(
                    "remote.url must start with http:// or https://, got: {}",
                    self.remote.url
                ));
            }
        }
        if self.remote.timeout_ms == 0 {
            return Err("remote.timeout_ms must be greater than 0".to_string());
        }
        if self.remote.timeout_ms >= self.watchdog.safety_interval_ms {
            return Err(format!(
                "remote.timeout_ms ({}) must be shorter than watchdog.safety_interval_ms ({})",
                self.remote.timeout_ms, self.watchdog.safety_interval_ms
            ));
        }
        let remap = &self.remote.remap;
        for (word, value) in [
            ("forward", &remap.forward),
            ("backward", &remap.backward),
            ("left", &remap.left),
            ("right", &remap.right),
        ] {
            if let Some(name) = value {
                if parse_command_name(name).is_none() {
                    return Err(format!("remote.remap.{word}: unknown command {name:?}"));
                }
            }
        }

        if self.source == SourceKind::Local && self.local.idle_timeout_ms == 0 {
            return Err(
                "local.idle_timeout_ms must be greater than 0 when source = \"local\"".to_string(),
            );
        }
        check_socket_addr("local.listen", &self.local.listen)?;

        if self.radio.kind == RadioKind::Udp {
            check_socket_addr("radio.addr", &self.radio.addr)?;
            check_socket_addr("radio.bind", &self.radio.bind)?;
        }

        if self.metrics.enabled {
            check_socket_addr("metrics.listen", &self.metrics.listen)?;
        }

        Ok(())
    }

    /// Tick period of the relay loop.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.relay.poll_interval_ms)
    }

    /// Spacing of forced Stop frames while disconnected.
    #[must_use]
    pub const fn safety_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog.safety_interval_ms)
    }

    /// Local operator dead-man window. `None` only for a zero timeout, which
    /// validation rejects in local mode.
    #[must_use]
    pub const fn idle_timeout(&self) -> Option<Duration> {
        if self.local.idle_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.local.idle_timeout_ms))
        }
    }
}

/// Resolves a file under the platform config dir, falling back to
/// `~/.config/tank-relay/` when only that one exists.
#[must_use]
pub fn resolve_data_path(filename: &str) -> PathBuf {
    let native = dirs::config_dir().map(|d| d.join("tank-relay").join(filename));
    let xdg = dirs::home_dir().map(|d| d.join(".config").join("tank-relay").join(filename));

    if let Some(p) = native.as_ref().filter(|p| p.exists()) {
        return p.clone();
    }
    if let Some(p) = xdg.as_ref().filter(|p| p.exists()) {
        return p.clone();
    }
    native.unwrap_or_else(|| PathBuf::from(filename))
}

/// # Errors
///
/// Returns an error if the configuration file cannot be read or parsed.
#[allow(clippy::cast_possible_wrap)]
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RelayConfig> {
    let defaults = RelayConfig::default();
    let mut builder = config::Config::builder()
        .set_default("source", defaults.source.as_str())?
        .set_default(
            "relay.poll_interval_ms",
            defaults.relay.poll_interval_ms as i64,
        )?
        .set_default(
            "watchdog.safety_interval_ms",
            defaults.watchdog.safety_interval_ms as i64,
        )?
        .set_default("remote.url", defaults.remote.url.as_str())?
        .set_default("remote.timeout_ms", defaults.remote.timeout_ms as i64)?
        .set_default("remote.remap.policy", "orientation-fix")?
        .set_default("local.listen", defaults.local.listen.as_str())?
        .set_default("local.idle_timeout_ms", defaults.local.idle_timeout_ms as i64)?
        .set_default("radio.kind", "dry-run")?
        .set_default("radio.addr", defaults.radio.addr.as_str())?
        .set_default("radio.bind", defaults.radio.bind.as_str())?
        .set_default("metrics.enabled", defaults.metrics.enabled)?
        .set_default("metrics.listen", defaults.metrics.listen.as_str())?;

    if let Some(config_path) = path {
        if config_path.exists() {
            builder = builder.add_source(config::File::from(config_path));
        }
    } else {
        let native_path = dirs::config_dir().map(|d| d.join("tank-relay").join("config.toml"));
        let xdg_path =
            dirs::home_dir().map(|d| d.join(".config").join("tank-relay").join("config.toml"));

        let resolved = native_path
            .filter(|p| p.exists())
            .or_else(|| xdg_path.filter(|p| p.exists()));

        if let Some(config_path) = resolved {
            builder = builder.add_source(config::File::from(config_path));
        }
    }

    // TANK_RELAY_REMOTE__TIMEOUT_MS=600 -> remote.timeout_ms
    builder = builder.add_source(
        config::Environment::with_prefix("TANK_RELAY")
            .prefix_separator("_")
            .separator("__"),
    );

    let settings = builder.build()?;
    let config: RelayConfig = settings.try_deserialize()?;

    Ok(config)
}
