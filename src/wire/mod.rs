//! Wire codec (C9): proto2-style varint field encoding for
//! `SignalMessage` and `PreKeySignalMessage`.

pub mod signal_message;
pub mod varint;

pub use signal_message::{PreKeySignalMessage, SignalMessage};

pub const CURRENT_VERSION: u8 = 4;
pub const MAC_LENGTH: usize = 8;

/// Combine a major/minor version pair into the single version byte used
/// on the wire: `(major << 4) | minor`.
pub fn version_byte(major: u8, minor: u8) -> u8 {
    (major << 4) | minor
}

pub fn version_major(byte: u8) -> u8 {
    byte >> 4
}

pub fn version_minor(byte: u8) -> u8 {
    byte & 0x0f
}

/// The two wire shapes a transport hands to the session cipher. Unlike
/// `SignalMessage`/`PreKeySignalMessage`, which share a version byte and
/// can't be told apart by content alone, callers tag which one they're
/// delivering — matching how a higher-layer envelope carries a message
/// type field in the systems this core is embedded in.
pub enum CiphertextMessage {
    Signal(Vec<u8>),
    PreKey(Vec<u8>),
}
