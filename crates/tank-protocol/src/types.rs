//! Wire constants for the tank control link.

/// Version byte at offset 0 of every encoded frame.
/// Bump this on breaking wire-format changes.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Length of the signed header: version, command, left, right, sequence.
pub const HEADER_LEN: usize = 5;

/// Length of the Ed25519 signature trailing the header.
pub const SIGNATURE_LEN: usize = 64;

/// Total size of an encoded frame on the radio link (69 bytes).
pub const FRAME_SIZE: usize = HEADER_LEN + SIGNATURE_LEN;

/// Largest forward distance (mod 256) the receiver accepts as "newer".
///
/// Sequences are compared with serial-number arithmetic: a frame is newer
/// than the last accepted one when `seq.wrapping_sub(last)` falls in
/// `1..=REPLAY_WINDOW`. This keeps the 255 → 0 step an ordinary increment.
pub const REPLAY_WINDOW: u8 = 127;

/// 255 → 0 wraparounds a receiver tolerates before the session must be reset.
pub const MAX_WRAPAROUNDS: u32 = 1;

/// Byte offsets inside the signed header.
pub mod offset {
    /// Protocol version.
    pub const VERSION: usize = 0;
    /// Command wire code.
    pub const COMMAND: usize = 1;
    /// Left track magnitude.
    pub const LEFT: usize = 2;
    /// Right track magnitude.
    pub const RIGHT: usize = 3;
    /// Anti-replay sequence number.
    pub const SEQUENCE: usize = 4;
}
