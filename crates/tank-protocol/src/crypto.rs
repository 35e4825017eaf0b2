//! Frame authentication and receiver-side verification.
//!
//! Each encoded frame is `header (5B) ‖ Ed25519(header) (64B)`. Ed25519 is
//! deterministic, so one key and one [`Frame`] always encode to the same
//! bytes, and the sequence number sits inside the signed header where it
//! cannot be altered without breaking the signature.

use crate::frame::{EncodedFrame, Frame, FrameError};
use crate::types::{FRAME_SIZE, HEADER_LEN, MAX_WRAPAROUNDS, REPLAY_WINDOW};
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use thiserror::Error;

/// Errors from [`FrameEncoder::encode`].
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The frame violates the Stop-is-zero-speed rule.
    #[error("malformed frame: {0}")]
    MalformedFrame(Frame),
    /// The signing primitive refused to produce a signature.
    #[error("signing key unavailable: {0}")]
    KeyUnavailable(#[from] ed25519_dalek::SignatureError),
}

/// Turns a [`Frame`] into authenticated wire bytes.
///
/// Implementations hold no mutable state, so a single instance can be used
/// from the relay loop without synchronization.
pub trait FrameEncoder {
    /// Encodes `frame` into exactly [`FRAME_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the frame is malformed or the key material
    /// cannot be used. Never panics.
    fn encode(&self, frame: &Frame) -> Result<EncodedFrame, EncodeError>;
}

/// Ed25519 frame signer used on the relay side.
pub struct FrameAuthenticator {
    key: SigningKey,
}

impl FrameAuthenticator {
    /// Wraps the relay's signing key.
    #[must_use]
    pub const fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// The public half, to be provisioned on the vehicle.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl FrameEncoder for FrameAuthenticator {
    /// # Examples
    ///
    /// ```
    /// use ed25519_dalek::SigningKey;
    /// use tank_protocol::crypto::{FrameAuthenticator, FrameEncoder};
    /// use tank_protocol::frame::{Command, Frame};
    ///
    /// let auth = FrameAuthenticator::new(SigningKey::from_bytes(&[7u8; 32]));
    /// let encoded = auth.encode(&Frame::new(Command::Forward, 200, 200, 1)).unwrap();
    /// assert_eq!(encoded.as_bytes().len(), tank_protocol::types::FRAME_SIZE);
    /// ```
    fn encode(&self, frame: &Frame) -> Result<EncodedFrame, EncodeError> {
        use ed25519_dalek::Signer;
        if !frame.is_well_formed() {
            return Err(EncodeError::MalformedFrame(*frame));
        }
        let header = frame.header();
        let signature = self.key.try_sign(&header)?;
        let mut out = [0u8; FRAME_SIZE];
        out[..HEADER_LEN].copy_from_slice(&header);
        out[HEADER_LEN..].copy_from_slice(&signature.to_bytes());
        Ok(EncodedFrame::from_bytes(out))
    }
}

/// Reasons a received frame is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// The packet is not exactly [`FRAME_SIZE`] bytes.
    #[error("wrong frame length: expected {expected}, got {actual}")]
    WrongLength {
        /// Required byte count.
        expected: usize,
        /// Byte count received.
        actual: usize,
    },
    /// The signature does not match the header under the provisioned key.
    #[error("signature verification failed")]
    BadSignature,
    /// The signed header does not decode.
    #[error("invalid header: {0}")]
    Header(#[from] FrameError),
    /// The sequence is not newer than the last accepted one.
    #[error("replayed or stale sequence {sequence} (last accepted {last})")]
    Replay {
        /// Sequence carried by the rejected frame.
        sequence: u8,
        /// Last sequence accepted in this session.
        last: u8,
    },
    /// The sequence would wrap past 255 a second time in one session.
    #[error("sequence {sequence} wraps again; session must be reset")]
    SessionExhausted {
        /// Sequence carried by the rejected frame.
        sequence: u8,
    },
}

/// Monotonic anti-replay window over 8-bit sequence numbers.
///
/// Uses serial-number comparison: `seq` is newer than `last` when
/// `seq.wrapping_sub(last)` lies in `1..=REPLAY_WINDOW`. The 255 → 0
/// transition is therefore an ordinary increment, but only
/// [`MAX_WRAPAROUNDS`] of them are accepted per session; after that every
/// frame is rejected until [`ReplayWindow::reset`].
#[derive(Debug, Default, Clone)]
pub struct ReplayWindow {
    last: Option<u8>,
    wraps: u32,
}

impl ReplayWindow {
    /// An empty window; the first frame of a session is always accepted.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: None,
            wraps: 0,
        }
    }

    /// Returns `true` if `sequence` would be accepted, without recording it.
    #[must_use]
    pub fn is_fresh(&self, sequence: u8) -> bool {
        match self.last {
            None => true,
            Some(last) => (1..=REPLAY_WINDOW).contains(&sequence.wrapping_sub(last)),
        }
    }

    /// Checks `sequence` and records it on success.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Replay`] for equal or older sequences and
    /// [`VerifyError::SessionExhausted`] for a wraparound past the limit.
    pub fn accept(&mut self, sequence: u8) -> Result<(), VerifyError> {
        if let Some(last) = self.last {
            if !self.is_fresh(sequence) {
                return Err(VerifyError::Replay { sequence, last });
            }
            if sequence < last {
                if self.wraps >= MAX_WRAPAROUNDS {
                    return Err(VerifyError::SessionExhausted { sequence });
                }
                self.wraps += 1;
            }
        }
        self.last = Some(sequence);
        Ok(())
    }

    /// Last accepted sequence, if any.
    #[must_use]
    pub const fn last(&self) -> Option<u8> {
        self.last
    }

    /// Number of 255 → 0 wraparounds seen in this session.
    #[must_use]
    pub const fn wraps(&self) -> u32 {
        self.wraps
    }

    /// Forgets the session; the next frame is accepted unconditionally.
    pub fn reset(&mut self) {
        self.last = None;
        self.wraps = 0;
    }
}

/// Vehicle-side verifier: authenticity first, then replay protection.
pub struct FrameVerifier {
    key: VerifyingKey,
    window: ReplayWindow,
}

impl FrameVerifier {
    /// Creates a verifier for frames signed by `key`.
    #[must_use]
    pub const fn new(key: VerifyingKey) -> Self {
        Self {
            key,
            window: ReplayWindow::new(),
        }
    }

    /// Authenticates `data` and advances the replay window.
    ///
    /// The signature is checked before the sequence, so forged or corrupted
    /// packets never move the window.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError`] if the length, signature, header or sequence
    /// is rejected.
    pub fn verify(&mut self, data: &[u8]) -> Result<Frame, VerifyError> {
        use ed25519_dalek::Verifier;
        let bytes: &[u8; FRAME_SIZE] = data.try_into().map_err(|_| VerifyError::WrongLength {
            expected: FRAME_SIZE,
            actual: data.len(),
        })?;
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&bytes[..HEADER_LEN]);
        let mut sig = [0u8; 64];
        sig.copy_from_slice(&bytes[HEADER_LEN..]);

        self.key
            .verify(&header, &Signature::from_bytes(&sig))
            .map_err(|_| VerifyError::BadSignature)?;

        let frame = Frame::parse_header(&header)?;
        self.window.accept(frame.sequence())?;
        Ok(frame)
    }

    /// Starts a new session (e.g. after the vehicle reboots its link).
    pub fn reset(&mut self) {
        self.window.reset();
    }

    /// The replay window state.
    #[must_use]
    pub const fn window(&self) -> &ReplayWindow {
        &self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Command;

    fn authenticator() -> FrameAuthenticator {
        FrameAuthenticator::new(SigningKey::from_bytes(&[42u8; 32]))
    }

    fn verifier_for(auth: &FrameAuthenticator) -> FrameVerifier {
        FrameVerifier::new(auth.verifying_key())
    }

    #[test]
    fn encode_is_deterministic() {
        let auth = authenticator();
        let frame = Frame::new(Command::Forward, 200, 200, 17);
        assert_eq!(auth.encode(&frame).unwrap(), auth.encode(&frame).unwrap());
    }

    #[test]
    fn sequence_changes_bytes() {
        let auth = authenticator();
        let a = auth.encode(&Frame::new(Command::Forward, 200, 200, 1)).unwrap();
        let b = auth.encode(&Frame::new(Command::Forward, 200, 200, 2)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn verify_round_trip() {
        let auth = authenticator();
        let mut verifier = verifier_for(&auth);
        let frame = Frame::new(Command::Right, 12, 34, 0);
        let encoded = auth.encode(&frame).unwrap();
        assert_eq!(verifier.verify(encoded.as_bytes()), Ok(frame));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let auth = authenticator();
        let other = FrameAuthenticator::new(SigningKey::from_bytes(&[99u8; 32]));
        let mut verifier = verifier_for(&other);
        let encoded = auth.encode(&Frame::stop(0)).unwrap();
        assert_eq!(
            verifier.verify(encoded.as_bytes()),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn substituted_command_fails_verification() {
        let auth = authenticator();
        let mut verifier = verifier_for(&auth);
        let mut bytes = *auth.encode(&Frame::stop(5)).unwrap().as_bytes();
        bytes[1] = Command::Forward.wire_code();
        bytes[2] = 255;
        bytes[3] = 255;
        assert_eq!(verifier.verify(&bytes), Err(VerifyError::BadSignature));
        assert_eq!(verifier.window().last(), None);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let auth = authenticator();
        let mut verifier = verifier_for(&auth);
        let encoded = auth.encode(&Frame::stop(0)).unwrap();
        assert_eq!(
            verifier.verify(&encoded.as_bytes()[..FRAME_SIZE - 1]),
            Err(VerifyError::WrongLength {
                expected: FRAME_SIZE,
                actual: FRAME_SIZE - 1
            })
        );
    }

    #[test]
    fn replayed_frame_is_rejected() {
        let auth = authenticator();
        let mut verifier = verifier_for(&auth);
        let encoded = auth.encode(&Frame::new(Command::Forward, 1, 1, 10)).unwrap();
        assert!(verifier.verify(encoded.as_bytes()).is_ok());
        assert_eq!(
            verifier.verify(encoded.as_bytes()),
            Err(VerifyError::Replay {
                sequence: 10,
                last: 10
            })
        );
    }

    #[test]
    fn older_sequence_is_rejected() {
        let auth = authenticator();
        let mut verifier = verifier_for(&auth);
        let newer = auth.encode(&Frame::stop(20)).unwrap();
        let older = auth.encode(&Frame::stop(19)).unwrap();
        assert!(verifier.verify(newer.as_bytes()).is_ok());
        assert!(matches!(
            verifier.verify(older.as_bytes()),
            Err(VerifyError::Replay { .. })
        ));
    }

    #[test]
    fn wraparound_is_accepted() {
        let mut window = ReplayWindow::new();
        assert!(window.accept(254).is_ok());
        assert!(window.accept(255).is_ok());
        assert!(window.accept(0).is_ok());
        assert!(window.accept(1).is_ok());
        assert_eq!(window.wraps(), 1);
        assert!(window.accept(255).is_err());
    }

    #[test]
    fn second_wraparound_needs_a_reset() {
        let mut window = ReplayWindow::new();
        window.accept(250).unwrap();
        window.accept(5).unwrap();
        window.accept(200).unwrap();
        assert_eq!(
            window.accept(2),
            Err(VerifyError::SessionExhausted { sequence: 2 })
        );
        assert_eq!(window.last(), Some(200));

        window.reset();
        window.accept(2).unwrap();
        window.accept(255).unwrap();
        assert!(window.accept(0).is_ok());
    }

    #[test]
    fn window_rejects_far_jumps_backwards() {
        let mut window = ReplayWindow::new();
        window.accept(100).unwrap();
        // 100 + 128 is "behind" under serial arithmetic.
        assert!(!window.is_fresh(228));
        assert!(window.is_fresh(227));
    }

    #[test]
    fn reset_starts_a_new_session() {
        let mut window = ReplayWindow::new();
        window.accept(200).unwrap();
        window.reset();
        assert!(window.accept(3).is_ok());
        assert_eq!(window.wraps(), 0);
    }

    #[test]
    fn verifier_rejects_unsigned_garbage() {
        let auth = authenticator();
        let mut verifier = verifier_for(&auth);
        assert_eq!(
            verifier.verify(&[0u8; FRAME_SIZE]),
            Err(VerifyError::BadSignature)
        );
    }
}
