//! Connectivity tracking and the fail-safe decision for each tick.
//!
//! The watchdog turns "what the source said this tick" into "what, if
//! anything, goes on the air". Its rules:
//!
//! * a source fault forces a Stop unless the vehicle was already told to
//!   stop (deduplicated);
//! * while disconnected, a Stop is re-asserted once every safety interval
//!   regardless of deduplication;
//! * the first intent after a reconnect is always transmitted, Stop included;
//! * while connected, drive intents are always transmitted and repeated
//!   Stops are deduplicated.
//!
//! State is committed when the decision is made and corrected by
//! [`SafetyWatchdog::delivered`] once the radio answers: a Stop only counts
//! as sent when the radio took it.

use crate::error::SourceError;
use crate::source::DriveIntent;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tank_protocol::Command;
use tokio::time::Instant;

/// Link state as seen from the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// The last poll failed (or nothing has been polled yet).
    Disconnected,
    /// Connected and the last command was a drive command.
    ConnectedMoving,
    /// Connected and the last command was Stop.
    ConnectedStopped,
}

impl LinkState {
    /// Whether the source answered on the last tick.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    /// Label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::ConnectedMoving => "connected_moving",
            Self::ConnectedStopped => "connected_stopped",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the watchdog remembers between ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityState {
    /// Current link state.
    pub link: LinkState,
    /// Whether the last Stop decided on was also handed to the radio.
    pub last_command_was_stop: bool,
    /// Last committed left magnitude.
    pub last_left_speed: u8,
    /// Last committed right magnitude.
    pub last_right_speed: u8,
    /// When the watchdog last decided to transmit a Stop.
    pub last_stop_at: Option<Instant>,
}

impl ConnectivityState {
    /// Boot state: disconnected and assumed stopped, no Stop emitted yet.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            link: LinkState::Disconnected,
            last_command_was_stop: true,
            last_left_speed: 0,
            last_right_speed: 0,
            last_stop_at: None,
        }
    }

    /// True when a further Stop would change nothing on the vehicle.
    #[must_use]
    pub const fn is_stop_equivalent(&self) -> bool {
        self.last_command_was_stop && self.last_left_speed == 0 && self.last_right_speed == 0
    }
}

/// Why a frame is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitReason {
    /// One-off Stop at process start.
    Startup,
    /// Normal operator intent while connected.
    Intent,
    /// First intent after the source came back.
    Reconnect,
    /// The source failed this tick and the vehicle was not yet stopped.
    SourceFault,
    /// Periodic Stop while disconnected.
    SafetyInterval,
    /// The previous frame this tick could not be encoded.
    DeliveryFailed,
    /// Final Stop before the relay exits.
    Shutdown,
}

impl TransmitReason {
    /// Label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Intent => "intent",
            Self::Reconnect => "reconnect",
            Self::SourceFault => "source_fault",
            Self::SafetyInterval => "safety_interval",
            Self::DeliveryFailed => "delivery_failed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Why nothing is sent this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Connected, and the operator repeated a Stop.
    DuplicateStop,
    /// Disconnected, the Stop was already sent and the safety interval has
    /// not elapsed.
    AwaitingSafetyInterval,
}

impl SuppressReason {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateStop => "duplicate_stop",
            Self::AwaitingSafetyInterval => "awaiting_safety_interval",
        }
    }
}

/// Outcome of one watchdog evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Build, encode and transmit this command.
    Transmit {
        /// Command to send.
        command: Command,
        /// Left magnitude.
        left: u8,
        /// Right magnitude.
        right: u8,
        /// Why.
        reason: TransmitReason,
    },
    /// Send nothing.
    Suppress {
        /// Why.
        reason: SuppressReason,
    },
}

impl Decision {
    const fn stop(reason: TransmitReason) -> Self {
        Self::Transmit {
            command: Command::Stop,
            left: 0,
            right: 0,
            reason,
        }
    }

    /// Whether a frame goes out.
    #[must_use]
    pub const fn is_transmit(&self) -> bool {
        matches!(self, Self::Transmit { .. })
    }
}

/// The fail-safe state machine.
#[derive(Debug)]
pub struct SafetyWatchdog {
    state: ConnectivityState,
    safety_interval: Duration,
}

impl SafetyWatchdog {
    /// Creates a watchdog in the boot state.
    #[must_use]
    pub const fn new(safety_interval: Duration) -> Self {
        Self {
            state: ConnectivityState::initial(),
            safety_interval,
        }
    }

    /// Current connectivity state.
    #[must_use]
    pub const fn state(&self) -> &ConnectivityState {
        &self.state
    }

    /// Current link state.
    #[must_use]
    pub const fn link(&self) -> LinkState {
        self.state.link
    }

    /// Configured periodic Stop spacing.
    #[must_use]
    pub const fn safety_interval(&self) -> Duration {
        self.safety_interval
    }

    /// The Stop emitted once at process start. Arms the periodic timer.
    pub fn assert_startup_stop(&mut self, now: Instant) -> Decision {
        self.commit_stop(now);
        Decision::stop(TransmitReason::Startup)
    }

    /// The Stop emitted once before the relay exits.
    pub fn assert_shutdown_stop(&mut self, now: Instant) -> Decision {
        self.state.link = LinkState::Disconnected;
        self.commit_stop(now);
        Decision::stop(TransmitReason::Shutdown)
    }

    /// Encoding failed this tick: take the fault path and force a Stop.
    pub fn delivery_failed(&mut self, now: Instant) -> Decision {
        self.state.link = LinkState::Disconnected;
        self.commit_stop(now);
        Decision::stop(TransmitReason::DeliveryFailed)
    }

    /// Feeds back the radio's answer for a frame this watchdog decided on.
    ///
    /// A Stop the radio did not take leaves the vehicle in an unknown state,
    /// so the next fault tick or Stop intent sends it again. The link state
    /// is left alone.
    pub fn delivered(&mut self, command: Command, ok: bool) {
        if !ok && command.is_stop() {
            self.state.last_command_was_stop = false;
        }
    }

    /// When the next periodic Stop falls due, or `None` while connected.
    #[must_use]
    pub fn safety_deadline(&self, now: Instant) -> Option<Instant> {
        if self.state.link.is_connected() {
            return None;
        }
        Some(self.state.last_stop_at.map_or(now, |at| at + self.safety_interval))
    }

    /// The periodic Stop, checked off the poll path so a slow source cannot
    /// stretch the interval. Returns `None` while connected or not yet due.
    pub fn periodic_stop(&mut self, now: Instant) -> Option<Decision> {
        let deadline = self.safety_deadline(now)?;
        if now < deadline {
            return None;
        }
        self.commit_stop(now);
        Some(Decision::stop(TransmitReason::SafetyInterval))
    }

    /// Evaluates this tick's poll result.
    pub fn observe(&mut self, polled: &Result<DriveIntent, SourceError>, now: Instant) -> Decision {
        match polled {
            Ok(intent) => self.on_intent(*intent, now),
            Err(_) => self.on_fault(now),
        }
    }

    fn on_fault(&mut self, now: Instant) -> Decision {
        self.state.link = LinkState::Disconnected;

        if !self.state.is_stop_equivalent() {
            self.commit_stop(now);
            return Decision::stop(TransmitReason::SourceFault);
        }

        self.periodic_stop(now).unwrap_or(Decision::Suppress {
            reason: SuppressReason::AwaitingSafetyInterval,
        })
    }

    fn on_intent(&mut self, intent: DriveIntent, now: Instant) -> Decision {
        let reconnecting = !self.state.link.is_connected();
        let is_stop = intent.command().is_stop();

        if !reconnecting && is_stop && self.state.is_stop_equivalent() {
            self.state.link = LinkState::ConnectedStopped;
            return Decision::Suppress {
                reason: SuppressReason::DuplicateStop,
            };
        }

        self.state.last_command_was_stop = is_stop;
        self.state.last_left_speed = intent.left_speed();
        self.state.last_right_speed = intent.right_speed();
        if is_stop {
            self.state.last_stop_at = Some(now);
            self.state.link = LinkState::ConnectedStopped;
        } else {
            self.state.link = LinkState::ConnectedMoving;
        }

        Decision::Transmit {
            command: intent.command(),
            left: intent.left_speed(),
            right: intent.right_speed(),
            reason: if reconnecting {
                TransmitReason::Reconnect
            } else {
                TransmitReason::Intent
            },
        }
    }

    fn commit_stop(&mut self, now: Instant) {
        self.state.last_command_was_stop = true;
        self.state.last_left_speed = 0;
        self.state.last_right_speed = 0;
        self.state.last_stop_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAFETY: Duration = Duration::from_secs(1);
    const TICK: Duration = Duration::from_millis(500);

    fn unreachable() -> Result<DriveIntent, SourceError> {
        Err(SourceError::Unreachable("connection refused".to_string()))
    }

    fn drive(cmd: Command, speed: u8) -> Result<DriveIntent, SourceError> {
        Ok(DriveIntent::new(cmd, speed, speed))
    }

    fn stop_decision(reason: TransmitReason) -> Decision {
        Decision::Transmit {
            command: Command::Stop,
            left: 0,
            right: 0,
            reason,
        }
    }

    #[test]
    fn boot_state_is_disconnected_and_stopped() {
        let wd = SafetyWatchdog::new(SAFETY);
        assert_eq!(wd.link(), LinkState::Disconnected);
        assert!(wd.state().is_stop_equivalent());
        assert!(wd.state().last_stop_at.is_none());
    }

    #[test]
    fn startup_stop_arms_periodic_timer() {
        let t0 = Instant::now();
        let mut wd = SafetyWatchdog::new(SAFETY);
        assert_eq!(
            wd.assert_startup_stop(t0),
            stop_decision(TransmitReason::Startup)
        );
        assert!(!wd.observe(&unreachable(), t0 + TICK).is_transmit());
        assert_eq!(
            wd.observe(&unreachable(), t0 + SAFETY),
            stop_decision(TransmitReason::SafetyInterval)
        );
    }

    #[test]
    fn fault_while_moving_sends_one_stop_then_dedups() {
        let t0 = Instant::now();
        let mut wd = SafetyWatchdog::new(SAFETY);
        wd.observe(&drive(Command::Forward, 200), t0);

        assert_eq!(
            wd.observe(&unreachable(), t0 + TICK),
            stop_decision(TransmitReason::SourceFault)
        );
        assert_eq!(
            wd.observe(&unreachable(), t0 + TICK * 2),
            Decision::Suppress {
                reason: SuppressReason::AwaitingSafetyInterval
            }
        );
        assert_eq!(wd.link(), LinkState::Disconnected);
        assert!(wd.state().is_stop_equivalent());
    }

    #[test]
    fn periodic_stop_bypasses_dedup() {
        let t0 = Instant::now();
        let mut wd = SafetyWatchdog::new(SAFETY);
        wd.observe(&drive(Command::Left, 90), t0);

        let mut stops = Vec::new();
        for i in 1..=8u32 {
            let now = t0 + TICK * i;
            if wd.observe(&unreachable(), now).is_transmit() {
                stops.push(i);
            }
        }
        // fault at tick 1, then every second tick (1 s at 500 ms)
        assert_eq!(stops, vec![1, 3, 5, 7]);
    }

    #[test]
    fn invalid_payload_is_a_fault() {
        let t0 = Instant::now();
        let mut wd = SafetyWatchdog::new(SAFETY);
        wd.observe(&drive(Command::Backward, 40), t0);
        let decision = wd.observe(
            &Err(SourceError::InvalidPayload("expected value".to_string())),
            t0 + TICK,
        );
        assert_eq!(decision, stop_decision(TransmitReason::SourceFault));
    }

    #[test]
    fn first_intent_after_reconnect_is_sent_even_if_stop() {
        let t0 = Instant::now();
        let mut wd = SafetyWatchdog::new(SAFETY);
        wd.assert_startup_stop(t0);
        wd.observe(&unreachable(), t0 + TICK);

        assert_eq!(
            wd.observe(&Ok(DriveIntent::stop()), t0 + TICK * 2),
            stop_decision(TransmitReason::Reconnect)
        );
        assert_eq!(wd.link(), LinkState::ConnectedStopped);

        assert_eq!(
            wd.observe(&Ok(DriveIntent::stop()), t0 + TICK * 3),
            Decision::Suppress {
                reason: SuppressReason::DuplicateStop
            }
        );
    }

    #[test]
    fn connected_drive_intents_are_never_deduplicated() {
        let t0 = Instant::now();
        let mut wd = SafetyWatchdog::new(SAFETY);
        wd.observe(&drive(Command::Forward, 200), t0);
        for i in 1..5u32 {
            let decision = wd.observe(&drive(Command::Forward, 200), t0 + TICK * i);
            assert_eq!(
                decision,
                Decision::Transmit {
                    command: Command::Forward,
                    left: 200,
                    right: 200,
                    reason: TransmitReason::Intent
                }
            );
        }
        assert_eq!(wd.link(), LinkState::ConnectedMoving);
    }

    #[test]
    fn stop_after_moving_is_sent() {
        let t0 = Instant::now();
        let mut wd = SafetyWatchdog::new(SAFETY);
        wd.observe(&drive(Command::Right, 10), t0);
        assert_eq!(
            wd.observe(&Ok(DriveIntent::stop()), t0 + TICK),
            stop_decision(TransmitReason::Intent)
        );
    }

    #[test]
    fn delivery_failure_forces_stop_and_disconnects() {
        let t0 = Instant::now();
        let mut wd = SafetyWatchdog::new(SAFETY);
        wd.observe(&drive(Command::Forward, 120), t0);
        assert_eq!(
            wd.delivery_failed(t0),
            stop_decision(TransmitReason::DeliveryFailed)
        );
        assert_eq!(wd.link(), LinkState::Disconnected);
        assert!(wd.state().is_stop_equivalent());

        // next good poll is a reconnect
        let decision = wd.observe(&drive(Command::Forward, 120), t0 + TICK);
        assert!(matches!(
            decision,
            Decision::Transmit {
                reason: TransmitReason::Reconnect,
                ..
            }
        ));
    }

    #[test]
    fn lost_stop_is_sent_again_on_next_fault() {
        let t0 = Instant::now();
        let mut wd = SafetyWatchdog::new(SAFETY);
        wd.observe(&drive(Command::Forward, 200), t0);

        assert_eq!(
            wd.observe(&unreachable(), t0 + TICK),
            stop_decision(TransmitReason::SourceFault)
        );
        wd.delivered(Command::Stop, false);
        assert_eq!(wd.link(), LinkState::Disconnected);
        assert!(!wd.state().is_stop_equivalent());

        assert_eq!(
            wd.observe(&unreachable(), t0 + TICK * 2),
            stop_decision(TransmitReason::SourceFault)
        );
        wd.delivered(Command::Stop, true);
        assert!(!wd.observe(&unreachable(), t0 + TICK * 3).is_transmit());
    }

    #[test]
    fn lost_stop_intent_is_not_deduplicated() {
        let t0 = Instant::now();
        let mut wd = SafetyWatchdog::new(SAFETY);
        wd.observe(&drive(Command::Left, 40), t0);
        assert!(wd.observe(&Ok(DriveIntent::stop()), t0 + TICK).is_transmit());
        wd.delivered(Command::Stop, false);

        assert_eq!(
            wd.observe(&Ok(DriveIntent::stop()), t0 + TICK * 2),
            stop_decision(TransmitReason::Intent)
        );
    }

    #[test]
    fn failed_drive_frame_leaves_state_alone() {
        let t0 = Instant::now();
        let mut wd = SafetyWatchdog::new(SAFETY);
        wd.observe(&drive(Command::Forward, 90), t0);
        let before = wd.state().clone();
        wd.delivered(Command::Forward, false);
        assert_eq!(wd.state(), &before);
    }

    #[test]
    fn safety_deadline_tracks_last_stop() {
        let t0 = Instant::now();
        let mut wd = SafetyWatchdog::new(SAFETY);
        assert_eq!(wd.safety_deadline(t0), Some(t0));
        wd.assert_startup_stop(t0);
        assert_eq!(wd.safety_deadline(t0), Some(t0 + SAFETY));

        assert_eq!(wd.periodic_stop(t0 + TICK), None);
        assert_eq!(
            wd.periodic_stop(t0 + SAFETY),
            Some(stop_decision(TransmitReason::SafetyInterval))
        );
        assert_eq!(wd.safety_deadline(t0 + SAFETY), Some(t0 + SAFETY * 2));

        wd.observe(&drive(Command::Forward, 10), t0 + SAFETY + TICK);
        assert_eq!(wd.safety_deadline(t0 + SAFETY + TICK), None);
        assert_eq!(wd.periodic_stop(t0 + SAFETY * 5), None);
    }

    #[test]
    fn set_speed_counts_as_moving() {
        let t0 = Instant::now();
        let mut wd = SafetyWatchdog::new(SAFETY);
        wd.observe(&Ok(DriveIntent::new(Command::SetSpeed, 80, 80)), t0);
        assert_eq!(wd.link(), LinkState::ConnectedMoving);
        assert_eq!(
            wd.observe(&unreachable(), t0 + TICK),
            stop_decision(TransmitReason::SourceFault)
        );
    }
}
