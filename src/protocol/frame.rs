//! Frame reading and writing
//!
//! Frames have an 11-byte header, all little-endian:
//! - 4 bytes: payload length
//! - 1 byte: packet type
//! - 2 bytes: protocol version
//! - 4 bytes: CRC32 of the payload
//!
//! Oversized frames, unsupported versions and checksum mismatches are
//! rejected before the payload is handed to a decoder.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{ProtocolError, ProtocolResult};
use super::{check_version, decode_packet, encode_packet, Packet, PacketDecoder, PacketType};

/// Frame header size in bytes
pub const FRAME_HEADER_SIZE: usize = 11;

/// Maximum payload size of one frame (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// A received frame, checksum already verified
#[derive(Debug, Clone)]
pub struct Frame {
    pub packet_type: PacketType,
    pub version: u16,
    pub payload: Bytes,
}

impl Frame {
    /// Decode the payload as packet `D`
    pub fn decode<D: PacketDecoder>(self) -> ProtocolResult<D> {
        if self.packet_type != D::PACKET_TYPE {
            return Err(ProtocolError::UnexpectedPacketType {
                expected: D::PACKET_TYPE,
                got: self.packet_type,
            });
        }
        decode_packet(self.payload, self.version)
    }
}

/// Reads frames from an async stream
pub struct FrameReader<R> {
    reader: R,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a new frame reader
    pub fn new(reader: R) -> Self {
        FrameReader {
            reader,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Lower the accepted payload size
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Read one complete frame
    pub async fn read_frame(&mut self) -> ProtocolResult<Frame> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        match self.reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::ConnectionClosed);
            }
            Err(e) => return Err(e.into()),
        }

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }
        let packet_type = PacketType::try_from(header[4])?;
        let version = u16::from_le_bytes([header[5], header[6]]);
        check_version(version)?;
        let expected = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);

        let mut payload = vec![0u8; length];
        if length > 0 {
            self.reader.read_exact(&mut payload).await?;
        }

        let actual = crc32fast::hash(&payload);
        if actual != expected {
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }

        Ok(Frame {
            packet_type,
            version,
            payload: Bytes::from(payload),
        })
    }

    /// Read one frame and decode it as packet `D`
    pub async fn read_packet<D: PacketDecoder>(&mut self) -> ProtocolResult<D> {
        self.read_frame().await?.decode()
    }
}

/// Writes frames to an async stream
pub struct FrameWriter<W> {
    writer: W,
    version: u16,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Create a frame writer speaking protocol `version`
    pub fn new(writer: W, version: u16) -> ProtocolResult<Self> {
        check_version(version)?;
        Ok(FrameWriter { writer, version })
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    /// Encode and write one packet
    pub async fn write_packet<P: Packet + ?Sized>(&mut self, packet: &P) -> ProtocolResult<()> {
        let payload = encode_packet(packet, self.version)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header[0..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        header[4] = packet.packet_type() as u8;
        header[5..7].copy_from_slice(&self.version.to_le_bytes());
        header[7..11].copy_from_slice(&crc32fast::hash(&payload).to_le_bytes());

        self.writer.write_all(&header).await?;
        if !payload.is_empty() {
            self.writer.write_all(&payload).await?;
        }
        Ok(())
    }

    /// Flush the underlying writer
    pub async fn flush(&mut self) -> ProtocolResult<()> {
        self.writer.flush().await?;
        Ok(())
    }
}
