use crate::config::RelayConfig;
use crate::error::SourceError;
use crate::metrics::{counters, gauges};
use crate::radio::Radio;
use crate::source::{CommandSource, DriveIntent};
use crate::watchdog::{Decision, LinkState, SafetyWatchdog, SuppressReason, TransmitReason};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tank_protocol::{Command, EncodedFrame, Frame, FrameEncoder, SequenceCounter};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Timing knobs for the relay loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// Tick period.
    pub poll_interval: Duration,
    /// Deadline for one source poll; a late poll counts as unreachable.
    pub poll_timeout: Duration,
    /// Periodic Stop spacing while disconnected.
    pub safety_interval: Duration,
}

impl RelaySettings {
    /// Takes the loop timing from a validated config.
    #[must_use]
    pub const fn from_config(config: &RelayConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            poll_timeout: Duration::from_millis(config.remote.timeout_ms),
            safety_interval: config.safety_interval(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

/// Snapshot published after every tick and served on `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    /// Active command source.
    pub source: &'static str,
    /// Active radio backend.
    pub radio: &'static str,
    /// Link state after the last tick.
    pub link: LinkState,
    /// Label of the last command put on the air (`"STOP"`, `"FORWARD"`, ...).
    pub state: &'static str,
    /// Left magnitude of that command.
    pub left_speed: u8,
    /// Right magnitude of that command.
    pub right_speed: u8,
    /// Sequence number of the last encoded frame.
    pub last_sequence: Option<u8>,
    /// Frames accepted by the radio.
    pub frames_sent: u64,
    /// Ticks on which nothing was sent.
    pub frames_suppressed: u64,
    /// Frames the radio rejected.
    pub radio_failures: u64,
    /// Frames that could not be encoded.
    pub encode_failures: u64,
    /// Failed polls.
    pub source_faults: u64,
    /// Most recent source or radio error.
    pub last_error: Option<String>,
    /// Error from the last transmit, cleared by the next successful one.
    pub last_radio_error: Option<String>,
    /// Process start.
    pub started_at: DateTime<Utc>,
    /// Time of the last tick.
    pub updated_at: Option<DateTime<Utc>>,
}

impl RelayStatus {
    /// Fresh status before the first tick.
    #[must_use]
    pub fn new(source: &'static str, radio: &'static str) -> Self {
        Self {
            source,
            radio,
            link: LinkState::Disconnected,
            state: Command::Stop.label(),
            left_speed: 0,
            right_speed: 0,
            last_sequence: None,
            frames_sent: 0,
            frames_suppressed: 0,
            radio_failures: 0,
            encode_failures: 0,
            source_faults: 0,
            last_error: None,
            last_radio_error: None,
            started_at: Utc::now(),
            updated_at: None,
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was encoded and the radio accepted it.
    Transmitted {
        /// The frame sent.
        frame: Frame,
        /// Why it was sent.
        reason: TransmitReason,
    },
    /// A frame was encoded but the radio failed. A lost Stop is sent again
    /// on the next tick that calls for one.
    RadioFailed {
        /// The frame that was lost.
        frame: Frame,
        /// Why it was being sent.
        reason: TransmitReason,
    },
    /// The watchdog decided to send nothing.
    Suppressed {
        /// Why.
        reason: SuppressReason,
    },
    /// Neither the decided frame nor the forced Stop could be encoded.
    EncodeFailed,
}

/// Everything downstream of the source: decision, sequence, encoding,
/// transmission and status. Kept apart from the source so the periodic
/// Stop can go out while a poll is still in flight.
struct Transmitter<E, R> {
    encoder: E,
    radio: R,
    watchdog: SafetyWatchdog,
    sequence: SequenceCounter,
    status: RelayStatus,
    status_tx: watch::Sender<RelayStatus>,
}

impl<E, R> Transmitter<E, R>
where
    E: FrameEncoder,
    R: Radio,
{
    fn record_poll(
        &mut self,
        polled: Result<Result<DriveIntent, SourceError>, tokio::time::error::Elapsed>,
        timeout: Duration,
    ) -> Result<DriveIntent, SourceError> {
        let polled = polled.unwrap_or_else(|_| {
            Err(SourceError::Unreachable(format!(
                "poll timed out after {}ms",
                timeout.as_millis()
            )))
        });

        if let Err(ref e) = polled {
            warn!(kind = e.kind(), error = %e, "command source fault");
            counters::source_faults(e.kind());
            self.status.source_faults += 1;
            self.status.last_error = Some(e.to_string());
        }
        polled
    }

    async fn observe(&mut self, polled: &Result<DriveIntent, SourceError>) -> TickOutcome {
        let now = Instant::now();
        let decision = self.watchdog.observe(polled, now);
        self.dispatch(decision, now).await
    }

    /// Sends the periodic Stop if it is due.
    async fn safety_stop(&mut self) {
        let now = Instant::now();
        if let Some(decision) = self.watchdog.periodic_stop(now) {
            self.dispatch(decision, now).await;
        }
    }

    async fn dispatch(&mut self, decision: Decision, now: Instant) -> TickOutcome {
        let mut decision = decision;
        let mut forced = false;

        let outcome = loop {
            let (command, left, right, reason) = match decision {
                Decision::Suppress { reason } => {
                    debug!(reason = reason.as_str(), "suppressed");
                    counters::frames_suppressed(reason.as_str());
                    self.status.frames_suppressed += 1;
                    break TickOutcome::Suppressed { reason };
                }
                Decision::Transmit {
                    command,
                    left,
                    right,
                    reason,
                } => (command, left, right, reason),
            };

            let frame = Frame::new(command, left, right, self.sequence.next());
            self.status.last_sequence = Some(frame.sequence());
            self.status.state = command.label();
            self.status.left_speed = frame.left_speed();
            self.status.right_speed = frame.right_speed();

            match self.encoder.encode(&frame) {
                Ok(encoded) => break self.transmit(frame, &encoded, reason).await,
                Err(e) => {
                    error!(seq = frame.sequence(), cmd = %command, error = %e, "frame encoding failed");
                    counters::encode_failures();
                    self.status.encode_failures += 1;
                    self.status.last_error = Some(e.to_string());
                    if forced {
                        self.watchdog.delivered(Command::Stop, false);
                        break TickOutcome::EncodeFailed;
                    }
                    forced = true;
                    decision = self.watchdog.delivery_failed(now);
                }
            }
        };

        self.publish();
        outcome
    }

    async fn transmit(
        &mut self,
        frame: Frame,
        encoded: &EncodedFrame,
        reason: TransmitReason,
    ) -> TickOutcome {
        let result = self.radio.transmit(encoded).await;
        self.watchdog.delivered(frame.command(), result.is_ok());
        match result {
            Ok(()) => {
                info!(
                    seq = frame.sequence(),
                    cmd = %frame.command(),
                    left = frame.left_speed(),
                    right = frame.right_speed(),
                    reason = reason.as_str(),
                    "frame sent"
                );
                counters::frames_sent(frame.command().label());
                self.status.frames_sent += 1;
                self.status.last_radio_error = None;
                TickOutcome::Transmitted { frame, reason }
            }
            Err(e) => {
                warn!(seq = frame.sequence(), error = %e, "radio transmit failed");
                counters::radio_failures();
                self.status.radio_failures += 1;
                self.status.last_error = Some(e.to_string());
                self.status.last_radio_error = Some(e.to_string());
                TickOutcome::RadioFailed { frame, reason }
            }
        }
    }

    fn publish(&mut self) {
        let link = self.watchdog.link();
        gauges::set_link_connected(link.is_connected());
        self.status.link = link;
        self.status.updated_at = Some(Utc::now());
        self.status_tx.send_replace(self.status.clone());
    }
}

/// The control loop: poll, decide, encode, transmit, once per tick, with
/// the periodic Stop on its own timer.
///
/// Owns every piece of mutable relay state; nothing is shared with other
/// tasks except the published [`RelayStatus`].
pub struct RelayLoop<S, E, R> {
    source: S,
    tx: Transmitter<E, R>,
    settings: RelaySettings,
}

impl<S, E, R> RelayLoop<S, E, R>
where
    S: CommandSource,
    E: FrameEncoder,
    R: Radio,
{
    /// Assembles a loop in the boot state. `status` carries the source and
    /// radio names reported on `/status`.
    pub fn new(source: S, encoder: E, radio: R, settings: RelaySettings, status: RelayStatus) -> Self {
        let (status_tx, _) = watch::channel(status.clone());
        Self {
            source,
            tx: Transmitter {
                encoder,
                radio,
                watchdog: SafetyWatchdog::new(settings.safety_interval),
                sequence: SequenceCounter::new(),
                status,
                status_tx,
            },
            settings,
        }
    }

    /// A receiver that sees every published status snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RelayStatus> {
        self.tx.status_tx.subscribe()
    }

    /// Latest status snapshot.
    #[must_use]
    pub const fn status(&self) -> &RelayStatus {
        &self.tx.status
    }

    /// The watchdog, for inspection.
    #[must_use]
    pub const fn watchdog(&self) -> &SafetyWatchdog {
        &self.tx.watchdog
    }

    /// The sequence number the next frame will carry.
    #[must_use]
    pub const fn next_sequence(&self) -> u8 {
        self.tx.sequence.peek()
    }

    /// The radio backend.
    pub fn radio(&self) -> &R {
        &self.tx.radio
    }

    /// Emits the boot-time Stop.
    pub async fn startup(&mut self) -> TickOutcome {
        let now = Instant::now();
        let decision = self.tx.watchdog.assert_startup_stop(now);
        self.tx.dispatch(decision, now).await
    }

    /// Runs one poll/decide/transmit cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        let timeout = self.settings.poll_timeout;
        let polled = tokio::time::timeout(timeout, self.source.poll()).await;
        let polled = self.tx.record_poll(polled, timeout);
        self.tx.observe(&polled).await
    }

    /// Ticks on the configured cadence until `shutdown` resolves, then sends
    /// a final best-effort Stop. While disconnected the periodic Stop runs
    /// on its own deadline, including while a poll is outstanding.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_ms = u64::try_from(self.settings.poll_interval.as_millis()).unwrap_or(u64::MAX),
            safety_ms = u64::try_from(self.settings.safety_interval.as_millis()).unwrap_or(u64::MAX),
            "relay loop started"
        );
        self.startup().await;

        'ticks: loop {
            let deadline = self.tx.watchdog.safety_deadline(Instant::now());
            tokio::select! {
                () = &mut shutdown => break,
                () = sleep_until_or_now(deadline), if deadline.is_some() => {
                    self.tx.safety_stop().await;
                }
                _ = ticker.tick() => {
                    let timeout = self.settings.poll_timeout;
                    let poll = tokio::time::timeout(timeout, self.source.poll());
                    tokio::pin!(poll);

                    let polled = loop {
                        let deadline = self.tx.watchdog.safety_deadline(Instant::now());
                        tokio::select! {
                            polled = &mut poll => break polled,
                            () = &mut shutdown => break 'ticks,
                            () = sleep_until_or_now(deadline), if deadline.is_some() => {
                                self.tx.safety_stop().await;
                            }
                        }
                    };
                    let polled = self.tx.record_poll(polled, timeout);
                    self.tx.observe(&polled).await;
                }
            }
        }

        info!("relay loop stopping, sending final stop");
        let now = Instant::now();
        let decision = self.tx.watchdog.assert_shutdown_stop(now);
        self.tx.dispatch(decision, now).await;
    }
}

fn sleep_until_or_now(deadline: Option<Instant>) -> tokio::time::Sleep {
    tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now))
}
