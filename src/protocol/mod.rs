//! Storage node wire protocol
//!
//! Packets are encoded into a payload with [`NetOutput`], decoded with
//! [`NetInput`], and carried in checksummed frames (see [`frame`]). Every
//! encode and decode is parameterized by the protocol version negotiated for
//! the connection, so packet layouts can evolve without new packet types.

pub mod codec;
pub mod error;
pub mod frame;
pub mod put;

pub use codec::{NetInput, NetOutput};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{Frame, FrameReader, FrameWriter, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
pub use put::{join_names, split_names, PutEntry, PutOutcome, StoragePut, StoragePutAck};

use bytes::Bytes;

/// First protocol version
pub const PROTOCOL_VERSION_1: u16 = 1;

/// Adds partition targets to storage puts
pub const PROTOCOL_VERSION_2: u16 = 2;

/// Version spoken by this build
pub const CURRENT_PROTOCOL_VERSION: u16 = PROTOCOL_VERSION_2;

/// Delimiter of the local transaction name list in acknowledgments
pub const NAME_DELIMITER: char = ',';

/// Check that `version` is one this build can read and write
pub fn check_version(version: u16) -> ProtocolResult<()> {
    if (PROTOCOL_VERSION_1..=CURRENT_PROTOCOL_VERSION).contains(&version) {
        Ok(())
    } else {
        Err(ProtocolError::UnsupportedVersion(version))
    }
}

/// Wire tags of packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Column writes sent by a coordinator to a storage node
    StoragePut = 40,
    /// Storage node reply to a put
    StoragePutAck = 41,
}

impl PacketType {
    /// Whether this packet answers a request
    pub fn is_ack(self) -> bool {
        matches!(self, PacketType::StoragePutAck)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            40 => Ok(PacketType::StoragePut),
            41 => Ok(PacketType::StoragePutAck),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }
}

/// A message that can be written to the wire
pub trait Packet {
    /// Wire tag of this packet
    fn packet_type(&self) -> PacketType;

    /// Append the payload for protocol `version`
    fn encode(&self, out: &mut NetOutput, version: u16) -> ProtocolResult<()>;
}

/// Reads one packet type back from its payload
pub trait PacketDecoder: Sized {
    /// Wire tag this decoder accepts
    const PACKET_TYPE: PacketType;

    /// Decode a payload written with protocol `version`
    fn decode(input: &mut NetInput, version: u16) -> ProtocolResult<Self>;
}

/// Encode a packet into a standalone payload
pub fn encode_packet<P: Packet + ?Sized>(packet: &P, version: u16) -> ProtocolResult<Bytes> {
    check_version(version)?;
    let mut out = NetOutput::new();
    packet.encode(&mut out, version)?;
    Ok(out.freeze())
}

/// Decode a standalone payload, rejecting trailing bytes
pub fn decode_packet<D: PacketDecoder>(payload: Bytes, version: u16) -> ProtocolResult<D> {
    check_version(version)?;
    let mut input = NetInput::new(payload);
    let packet = D::decode(&mut input, version)?;
    input.expect_end()?;
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_tags() {
        assert_eq!(PacketType::try_from(41).unwrap(), PacketType::StoragePutAck);
        assert_eq!(PacketType::StoragePut as u8, 40);
        assert!(matches!(
            PacketType::try_from(7),
            Err(ProtocolError::UnknownPacketType(7))
        ));
        assert!(PacketType::StoragePutAck.is_ack());
    }

    #[test]
    fn test_version_range() {
        assert!(check_version(PROTOCOL_VERSION_1).is_ok());
        assert!(check_version(CURRENT_PROTOCOL_VERSION).is_ok());
        assert!(matches!(
            check_version(0),
            Err(ProtocolError::UnsupportedVersion(0))
        ));
        assert!(check_version(CURRENT_PROTOCOL_VERSION + 1).is_err());
    }
}
