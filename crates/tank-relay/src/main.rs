#![forbid(unsafe_code)]

use tank_relay::config::{
    load_config, resolve_data_path, Cli, Commands, RadioKind, RelayConfig, SourceKind,
};
use tank_relay::keypair;
use tank_relay::local_api::{self, LocalApi, LocalOperator};
use tank_relay::metrics::start_metrics_server;
use tank_relay::radio::RadioLink;
use tank_relay::relay::{RelayLoop, RelaySettings, RelayStatus};
use tank_relay::remote::RemotePoller;
use tank_relay::source::ActiveSource;

use chrono::{DateTime, Utc};
use clap::Parser;
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tank_protocol::FrameAuthenticator;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ── ANSI style helpers ──────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

fn tty() -> bool {
    std::io::stdout().is_terminal()
}

// ── Shared helpers ──────────────────────────────────────────────────

fn key_path(config: &RelayConfig) -> PathBuf {
    config
        .key
        .path
        .clone()
        .unwrap_or_else(|| resolve_data_path("key"))
}

/// Config file + env, then CLI overrides, then validation.
fn effective_config(cli: &Cli) -> anyhow::Result<RelayConfig> {
    let mut config = load_config(cli.config.as_deref())?;

    if let Some(source) = cli.source {
        config.source = source;
    }
    if let Some(ref addr) = cli.radio_addr {
        config.radio.kind = RadioKind::Udp;
        config.radio.addr = addr.clone();
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
    Ok(config)
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };

    if let Some(ref path) = cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open log file {path:?}: {e}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => {
            warn!("cannot listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
    }
}

// ── Daemon ──────────────────────────────────────────────────────────

async fn run_daemon(cli: &Cli) -> anyhow::Result<()> {
    let config = effective_config(cli)?;

    let signing_key = keypair::load_signing_key(&key_path(&config))?;
    let authenticator = FrameAuthenticator::new(signing_key);
    let identity = keypair::encode_public_key(&authenticator.verifying_key());

    let (source, operator) = match config.source {
        SourceKind::Remote => (
            ActiveSource::Remote(RemotePoller::new(&config.remote)?),
            None,
        ),
        SourceKind::Local => {
            let operator = LocalOperator::new(config.idle_timeout());
            (ActiveSource::Local(operator.clone()), Some(operator))
        }
    };
    let radio = RadioLink::open(&config.radio).await?;

    // Startup banner
    if std::io::stderr().is_terminal() {
        let v = env!("CARGO_PKG_VERSION");
        eprintln!();
        eprintln!("  {BOLD}◈ Tank Relay{RESET} {DIM}v{v}{RESET}");
        eprintln!("  {DIM}Identity{RESET}   {CYAN}{identity}{RESET}");
        match config.source {
            SourceKind::Remote => eprintln!("  {DIM}Source{RESET}     remote {}", config.remote.url),
            SourceKind::Local => eprintln!("  {DIM}Source{RESET}     local"),
        }
        match config.radio.kind {
            RadioKind::Udp => eprintln!("  {DIM}Radio{RESET}      udp {}", config.radio.addr),
            RadioKind::DryRun => eprintln!("  {DIM}Radio{RESET}      {YELLOW}dry-run{RESET}"),
        }
        eprintln!("  {DIM}Listen{RESET}     {}", config.local.listen);
        eprintln!();
    }

    info!(
        source = source.name(),
        radio = radio.name(),
        "Starting tank-relay with identity {identity}"
    );

    let status = RelayStatus::new(source.name(), radio.name());
    let mut relay = RelayLoop::new(
        source,
        authenticator,
        radio,
        RelaySettings::from_config(&config),
        status,
    );

    let listener = TcpListener::bind(&config.local.listen)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {e}", config.local.listen))?;
    let api = LocalApi::new(operator, relay.subscribe());
    let api_handle = tokio::spawn(async move {
        if let Err(e) = local_api::serve(listener, api).await {
            error!("Local API error: {}", e);
        }
    });

    let metrics_handle = if config.metrics.enabled {
        let addr: SocketAddr = config.metrics.listen.parse()?;
        Some(tokio::spawn(async move {
            if let Err(e) = start_metrics_server(addr).await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    relay.run(shutdown_signal()).await;

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }
    Ok(())
}

// ── Daemon status ───────────────────────────────────────────────────

async fn fetch_status(listen: &str) -> anyhow::Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    match client.get(format!("http://{listen}/status")).send().await {
        Ok(resp) => Ok(resp.error_for_status()?.json().await?),
        Err(e) => {
            if tty() {
                eprintln!();
                eprintln!("  {RED}✗{RESET} Could not connect to daemon");
                eprintln!("    {DIM}{e}{RESET}");
                eprintln!();
                eprintln!("    Is tank-relay running? Try: {BOLD}tank-relay start{RESET}");
                eprintln!();
            } else {
                eprintln!("Failed to connect to daemon: {e}");
            }
            std::process::exit(1);
        }
    }
}

fn fmt_uptime(started_at: &str) -> Option<String> {
    let started: DateTime<Utc> = started_at.parse().ok()?;
    let uptime = u64::try_from((Utc::now() - started).num_seconds()).ok()?;
    let (h, m, s) = (uptime / 3600, (uptime % 3600) / 60, uptime % 60);
    Some(if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    })
}

fn fmt_status(json: &serde_json::Value) {
    let link = json["link"].as_str().unwrap_or("unknown");

    let (dot, label) = match link {
        "connected_moving" => (format!("{GREEN}●{RESET}"), "connected, moving"),
        "connected_stopped" => (format!("{GREEN}●{RESET}"), "connected, stopped"),
        "disconnected" => (format!("{RED}●{RESET}"), "disconnected"),
        _ => (format!("{YELLOW}●{RESET}"), "unknown"),
    };

    let v = env!("CARGO_PKG_VERSION");

    println!();
    println!("  {BOLD}◈ Tank Relay{RESET} {DIM}v{v}{RESET}");
    println!();
    println!("  {DIM}Link{RESET}       {dot} {label}");
    println!(
        "  {DIM}Source{RESET}     {}",
        json["source"].as_str().unwrap_or("?")
    );
    println!(
        "  {DIM}Radio{RESET}      {}",
        json["radio"].as_str().unwrap_or("?")
    );

    let state = json["state"].as_str().unwrap_or("?");
    let left = json["left_speed"].as_u64().unwrap_or(0);
    let right = json["right_speed"].as_u64().unwrap_or(0);
    println!("  {DIM}Command{RESET}    {BOLD}{state}{RESET} {DIM}({left}/{right}){RESET}");
    if let Some(seq) = json["last_sequence"].as_u64() {
        println!("  {DIM}Sequence{RESET}   {seq}");
    }

    if let Some(uptime) = json["started_at"].as_str().and_then(fmt_uptime) {
        println!("  {DIM}Uptime{RESET}     {uptime}");
    }

    let sent = json["frames_sent"].as_u64().unwrap_or(0);
    let suppressed = json["frames_suppressed"].as_u64().unwrap_or(0);
    println!("  {DIM}Frames{RESET}     {sent} sent, {suppressed} suppressed");

    let faults = json["source_faults"].as_u64().unwrap_or(0);
    let radio_failures = json["radio_failures"].as_u64().unwrap_or(0);
    let encode_failures = json["encode_failures"].as_u64().unwrap_or(0);
    if faults + radio_failures + encode_failures > 0 {
        println!(
            "  {DIM}Faults{RESET}     {faults} source, {radio_failures} radio, {encode_failures} encode"
        );
    }
    if let Some(err) = json["last_error"].as_str() {
        println!("  {DIM}Last error{RESET} {RED}{err}{RESET}");
    }

    println!();
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli)?;

    match &cli.command {
        Commands::Start => run_daemon(&cli).await?,

        Commands::Keygen { force } => {
            let config = load_config(cli.config.as_deref()).unwrap_or_default();
            let path = key_path(&config);
            let key = keypair::generate_and_store(&path, *force)?;
            let identity = keypair::encode_public_key(&key.verifying_key());
            if tty() {
                println!();
                println!("  {GREEN}✓{RESET} Key written to {BOLD}{}{RESET}", path.display());
                println!(
                    "    {DIM}Public key{RESET} {}",
                    keypair::public_key_path(&path).display()
                );
                println!("    {DIM}Identity{RESET}   {CYAN}{identity}{RESET}");
                println!();
            } else {
                println!("{identity}");
            }
        }

        Commands::Identity => {
            let config = load_config(cli.config.as_deref()).unwrap_or_default();
            let key = keypair::load_signing_key(&key_path(&config))?;
            println!("{}", keypair::encode_public_key(&key.verifying_key()));
        }

        Commands::Status => {
            let config = load_config(cli.config.as_deref()).unwrap_or_default();
            let json = fetch_status(&config.local.listen).await?;

            if tty() {
                fmt_status(&json);
            } else {
                println!("{}", serde_json::to_string(&json)?);
            }
        }
    }

    Ok(())
}
