//! Control frame model and its fixed-size wire layout.
//!
//! A [`Frame`] is the in-memory command record. Its signed header is five
//! bytes (`version | command | left | right | sequence`); the
//! [`crate::crypto`] module appends a 64-byte signature to produce an
//! [`EncodedFrame`] of exactly [`FRAME_SIZE`] bytes.

use crate::types::{offset, FRAME_SIZE, HEADER_LEN, PROTOCOL_VERSION};
use std::fmt;
use thiserror::Error;

/// Drive command carried by a frame.
///
/// Wire codes are the declaration order, starting at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Halt both tracks. Always carries zero speed.
    Stop,
    /// Drive forward at the frame's magnitudes.
    Forward,
    /// Drive backward at the frame's magnitudes.
    Backward,
    /// Turn left at the frame's magnitudes.
    Left,
    /// Turn right at the frame's magnitudes.
    Right,
    /// Update the vehicle's track speeds without changing direction.
    SetSpeed,
}

impl Command {
    /// Every command, in wire-code order.
    pub const ALL: [Self; 6] = [
        Self::Stop,
        Self::Forward,
        Self::Backward,
        Self::Left,
        Self::Right,
        Self::SetSpeed,
    ];

    /// Returns the one-byte wire code for this command.
    ///
    /// # Examples
    ///
    /// ```
    /// use tank_protocol::frame::Command;
    /// assert_eq!(Command::Stop.wire_code(), 0);
    /// assert_eq!(Command::SetSpeed.wire_code(), 5);
    /// ```
    #[must_use]
    pub const fn wire_code(self) -> u8 {
        match self {
            Self::Stop => 0,
            Self::Forward => 1,
            Self::Backward => 2,
            Self::Left => 3,
            Self::Right => 4,
            Self::SetSpeed => 5,
        }
    }

    /// Decodes a wire code. Unknown codes yield `None`.
    #[must_use]
    pub const fn from_wire(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Stop),
            1 => Some(Self::Forward),
            2 => Some(Self::Backward),
            3 => Some(Self::Left),
            4 => Some(Self::Right),
            5 => Some(Self::SetSpeed),
            _ => None,
        }
    }

    /// Upper-case state name reported to operators (`"FORWARD"`, `"SPEED"`, ...).
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Stop => "STOP",
            Self::Forward => "FORWARD",
            Self::Backward => "BACKWARD",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::SetSpeed => "SPEED",
        }
    }

    /// Returns `true` for [`Command::Stop`].
    #[must_use]
    pub const fn is_stop(self) -> bool {
        matches!(self, Self::Stop)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors produced when decoding a frame header.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version 0x{0:02x}")]
    UnsupportedVersion(u8),
    /// The command byte is not a known wire code.
    #[error("unknown command code 0x{0:02x}")]
    UnknownCommand(u8),
    /// A Stop header carries non-zero speeds.
    #[error("stop frame with non-zero speed ({left}, {right})")]
    NonZeroStop {
        /// Left magnitude found on the wire.
        left: u8,
        /// Right magnitude found on the wire.
        right: u8,
    },
}

/// A single command record, created fresh for every transmission attempt.
///
/// Fields are private so the Stop-is-zero-speed rule holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
    command: Command,
    left_speed: u8,
    right_speed: u8,
    sequence: u8,
}

impl Frame {
    /// Builds a frame. A `Stop` command forces both speeds to zero,
    /// whatever the caller supplied.
    ///
    /// # Examples
    ///
    /// ```
    /// use tank_protocol::frame::{Command, Frame};
    /// let frame = Frame::new(Command::Stop, 200, 17, 9);
    /// assert_eq!((frame.left_speed(), frame.right_speed()), (0, 0));
    /// ```
    #[must_use]
    pub const fn new(command: Command, left_speed: u8, right_speed: u8, sequence: u8) -> Self {
        let (left_speed, right_speed) = if command.is_stop() {
            (0, 0)
        } else {
            (left_speed, right_speed)
        };
        Self {
            command,
            left_speed,
            right_speed,
            sequence,
        }
    }

    /// Shorthand for a zero-speed Stop frame.
    #[must_use]
    pub const fn stop(sequence: u8) -> Self {
        Self::new(Command::Stop, 0, 0, sequence)
    }

    /// The drive command.
    #[must_use]
    pub const fn command(&self) -> Command {
        self.command
    }

    /// Left track magnitude.
    #[must_use]
    pub const fn left_speed(&self) -> u8 {
        self.left_speed
    }

    /// Right track magnitude.
    #[must_use]
    pub const fn right_speed(&self) -> u8 {
        self.right_speed
    }

    /// Anti-replay sequence number.
    #[must_use]
    pub const fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Returns `true` if the frame respects the Stop-is-zero-speed rule.
    #[must_use]
    pub const fn is_well_formed(&self) -> bool {
        !self.command.is_stop() || (self.left_speed == 0 && self.right_speed == 0)
    }

    /// Serializes the signed header.
    #[must_use]
    pub const fn header(&self) -> [u8; HEADER_LEN] {
        [
            PROTOCOL_VERSION,
            self.command.wire_code(),
            self.left_speed,
            self.right_speed,
            self.sequence,
        ]
    }

    /// Parses a signed header back into a frame.
    ///
    /// Unlike [`Frame::new`], a Stop header with non-zero speeds is rejected
    /// rather than normalized: on the receive side it means the sender is
    /// broken or hostile.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] on an unknown version, unknown command code,
    /// or a malformed Stop.
    pub fn parse_header(header: &[u8; HEADER_LEN]) -> Result<Self, FrameError> {
        let version = header[offset::VERSION];
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        let code = header[offset::COMMAND];
        let command = Command::from_wire(code).ok_or(FrameError::UnknownCommand(code))?;
        let left = header[offset::LEFT];
        let right = header[offset::RIGHT];
        if command.is_stop() && (left != 0 || right != 0) {
            return Err(FrameError::NonZeroStop { left, right });
        }
        Ok(Self {
            command,
            left_speed: left,
            right_speed: right,
            sequence: header[offset::SEQUENCE],
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} L{} R{} #{}",
            self.command, self.left_speed, self.right_speed, self.sequence
        )
    }
}

/// Authenticated, fixed-size frame ready for the radio.
///
/// Only the raw bytes are exposed: once encoded, no semantic field is
/// inspectable on the sending side.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedFrame([u8; FRAME_SIZE]);

impl EncodedFrame {
    pub(crate) const fn from_bytes(bytes: [u8; FRAME_SIZE]) -> Self {
        Self(bytes)
    }

    /// The wire bytes, exactly [`FRAME_SIZE`] long.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.0
    }
}

impl AsRef<[u8]> for EncodedFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EncodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedFrame(")?;
        for b in &self.0[..HEADER_LEN] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Per-link sequence generator. Wraps modulo 256.
#[derive(Debug, Default, Clone)]
pub struct SequenceCounter {
    next: u8,
}

impl SequenceCounter {
    /// Starts counting at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Returns the current value and advances the counter.
    pub fn next(&mut self) -> u8 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }

    /// The value the next call to [`SequenceCounter::next`] will return.
    #[must_use]
    pub const fn peek(&self) -> u8 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_forces_zero_speed() {
        let frame = Frame::new(Command::Stop, 255, 1, 3);
        assert_eq!(frame.left_speed(), 0);
        assert_eq!(frame.right_speed(), 0);
        assert!(frame.is_well_formed());
    }

    #[test]
    fn drive_commands_keep_speeds() {
        let frame = Frame::new(Command::Left, 10, 250, 4);
        assert_eq!(frame.command(), Command::Left);
        assert_eq!((frame.left_speed(), frame.right_speed()), (10, 250));
        assert_eq!(frame.sequence(), 4);
    }

    #[test]
    fn header_layout() {
        let frame = Frame::new(Command::Backward, 0xAA, 0xBB, 0x42);
        assert_eq!(frame.header(), [PROTOCOL_VERSION, 2, 0xAA, 0xBB, 0x42]);
    }

    #[test]
    fn wire_codes_are_declaration_order() {
        for (i, cmd) in Command::ALL.iter().enumerate() {
            assert_eq!(usize::from(cmd.wire_code()), i);
            assert_eq!(Command::from_wire(cmd.wire_code()), Some(*cmd));
        }
        assert_eq!(Command::from_wire(6), None);
        assert_eq!(Command::from_wire(0xFF), None);
    }

    #[test]
    fn parse_rejects_wrong_version() {
        let mut h = Frame::new(Command::Forward, 1, 1, 0).header();
        h[offset::VERSION] = 0x7F;
        assert_eq!(
            Frame::parse_header(&h),
            Err(FrameError::UnsupportedVersion(0x7F))
        );
    }

    #[test]
    fn parse_rejects_unknown_command() {
        let mut h = Frame::stop(0).header();
        h[offset::COMMAND] = 9;
        assert_eq!(Frame::parse_header(&h), Err(FrameError::UnknownCommand(9)));
    }

    #[test]
    fn parse_rejects_stop_with_speed() {
        let h = [PROTOCOL_VERSION, 0, 5, 0, 1];
        assert_eq!(
            Frame::parse_header(&h),
            Err(FrameError::NonZeroStop { left: 5, right: 0 })
        );
    }

    #[test]
    fn sequence_counter_wraps() {
        let mut seq = SequenceCounter { next: 254 };
        assert_eq!(seq.next(), 254);
        assert_eq!(seq.next(), 255);
        assert_eq!(seq.next(), 0);
        assert_eq!(seq.peek(), 1);
    }

    #[test]
    fn labels_match_operator_vocabulary() {
        assert_eq!(Command::Forward.to_string(), "FORWARD");
        assert_eq!(Command::SetSpeed.label(), "SPEED");
    }
}
