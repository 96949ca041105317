//! Protocol error types

use std::io;

use thiserror::Error;

/// Wire protocol errors
///
/// Every decode failure is final: a malformed or version-mismatched payload
/// is a connection-level fault and is not retried here.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// I/O error during read/write
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection closed by peer
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid packet format
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Protocol version outside the supported range
    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    /// Unknown packet type tag
    #[error("Unknown packet type {0}")]
    UnknownPacketType(u8),

    /// Frame carries a different packet than the one being decoded
    #[error("Unexpected packet type: expected {expected:?}, got {got:?}")]
    UnexpectedPacketType {
        expected: super::PacketType,
        got: super::PacketType,
    },

    /// Frame payload checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Frame larger than the configured maximum
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Opaque payload could not be (de)serialized
    #[error("Payload error: {0}")]
    Payload(String),
}

impl From<bincode::Error> for ProtocolError {
    fn from(e: bincode::Error) -> Self {
        ProtocolError::Payload(e.to_string())
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
