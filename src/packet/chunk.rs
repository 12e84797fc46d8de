//! FIFO chunk codec
//!
//! Everything that goes through the AX5043 FIFO is framed as chunks. The top three bits of
//! the header byte give the payload size:
//!
//! | bits 7:5 | payload                                   |
//! |----------|-------------------------------------------|
//! | `000`    | none                                      |
//! | `001`    | 1 byte                                    |
//! | `010`    | 2 bytes                                   |
//! | `011`    | 3 bytes                                   |
//! | `111`    | length byte follows, then that many bytes |
//!
//! Transmit chunks are built here as byte arrays and pushed by the packet engine. Receive
//! chunks are read one at a time with [`read_chunk`].

use bitflags::bitflags;

use crate::device::{Device, RegisterPort};
use crate::error::Error;

/// Largest payload a variable-length chunk can carry
pub const MAX_CHUNK_PAYLOAD: usize = 255;

/// Error type for chunk type conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidChunkType(pub u8);

/// Chunk header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChunkType {
    Nop,
    /// Received signal strength, one byte
    Rssi,
    /// Transmitter control, one byte
    TxControl,
    /// Baseband frequency offset, two bytes
    FrequencyOffset,
    /// Antenna RSSI and background noise, two bytes
    AntennaRssi2,
    /// Wake timer value, three bytes
    Timer,
    /// RF frequency offset, three bytes
    RfFrequencyOffset,
    /// Receiver data rate, three bytes
    DataRate,
    /// Both antenna RSSI and background noise, three bytes
    AntennaRssi3,
    /// Repeat one byte: flags, count, byte
    RepeatData,
    /// Packet data: length, flags, bytes
    Data,
    /// Transmit power coefficients
    TxPower,
}

impl ChunkType {
    /// Convert a raw header byte to a ChunkType
    pub fn from_byte(value: u8) -> Result<Self, InvalidChunkType> {
        match value {
            0x00 => Ok(Self::Nop),
            0x31 => Ok(Self::Rssi),
            0x3C => Ok(Self::TxControl),
            0x52 => Ok(Self::FrequencyOffset),
            0x55 => Ok(Self::AntennaRssi2),
            0x62 => Ok(Self::RepeatData),
            0x70 => Ok(Self::Timer),
            0x73 => Ok(Self::RfFrequencyOffset),
            0x74 => Ok(Self::DataRate),
            0x75 => Ok(Self::AntennaRssi3),
            0xE1 => Ok(Self::Data),
            0xFD => Ok(Self::TxPower),
            invalid => Err(InvalidChunkType(invalid)),
        }
    }

    /// Convert a ChunkType to its header byte
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Nop => 0x00,
            Self::Rssi => 0x31,
            Self::TxControl => 0x3C,
            Self::FrequencyOffset => 0x52,
            Self::AntennaRssi2 => 0x55,
            Self::RepeatData => 0x62,
            Self::Timer => 0x70,
            Self::RfFrequencyOffset => 0x73,
            Self::DataRate => 0x74,
            Self::AntennaRssi3 => 0x75,
            Self::Data => 0xE1,
            Self::TxPower => 0xFD,
        }
    }
}

/// Payload size encoded in a header byte, `None` for variable-length chunks.
pub fn payload_len(header: u8) -> Option<usize> {
    match header >> 5 {
        0b111 => None,
        // 100..=110 are reserved and treated as carrying three bytes
        n => Some(usize::from(n).min(3)),
    }
}

bitflags! {
    /// Flags of transmitted DATA and REPEATDATA chunks
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxFlags: u8 {
        const PKTSTART = 1 << 0;
        const PKTEND = 1 << 1;
        /// The last byte holds fewer than 8 valid bits
        const RESIDUE = 1 << 2;
        /// Do not append a CRC
        const NOCRC = 1 << 3;
        /// Bypass the framer
        const RAW = 1 << 4;
        /// Bypass the encoder
        const UNENC = 1 << 5;
    }
}

bitflags! {
    /// Flags of received DATA chunks
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxFlags: u8 {
        const PKTSTART = 1 << 0;
        const PKTEND = 1 << 1;
        const RESIDUE = 1 << 2;
        const CRCFAIL = 1 << 3;
        const ADDRFAIL = 1 << 4;
        const SIZEFAIL = 1 << 5;
        const ABORT = 1 << 6;
    }
}

/// REPEATDATA chunk: `byte` sent `count` times.
pub fn repeat_data(flags: TxFlags, count: u8, byte: u8) -> [u8; 4] {
    [ChunkType::RepeatData.to_byte(), flags.bits(), count, byte]
}

/// Header of a DATA chunk carrying `len` payload bytes.
///
/// The length field counts the flags byte, so `len` is at most 254.
pub fn data_header(flags: TxFlags, len: usize) -> [u8; 3] {
    debug_assert!(len < MAX_CHUNK_PAYLOAD);
    [ChunkType::Data.to_byte(), (len + 1) as u8, flags.bits()]
}

/// One decoded receive chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxChunk {
    Data {
        flags: RxFlags,
        bytes: heapless::Vec<u8, MAX_CHUNK_PAYLOAD>,
    },
    /// RSSI in dB, two's complement
    Rssi(i8),
    /// Baseband frequency offset, two's complement
    FrequencyOffset(i16),
    /// RF frequency offset, sign extended from 24 bits
    RfFrequencyOffset(i32),
    Timer(u32),
    DataRate(u32),
    AntennaRssi2 { rssi: u8, background: u8 },
    AntennaRssi3 { antenna0: u8, antenna1: u8, background: u8 },
    /// Any other chunk, its payload already consumed
    Other(u8),
}

fn u24(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}

/// Sign extends a 24-bit two's complement value.
pub fn sign_extend_24(value: u32) -> i32 {
    ((value << 8) as i32) >> 8
}

/// Reads one chunk out of the FIFO. The caller makes sure the FIFO is not empty.
pub fn read_chunk<P: RegisterPort>(device: &mut Device<P>) -> Result<RxChunk, Error<P::Error>> {
    let mut header = [0u8];
    device.read_fifo(&mut header)?;
    let header = header[0];

    let Some(len) = payload_len(header) else {
        let mut len = [0u8];
        device.read_fifo(&mut len)?;
        let len = usize::from(len[0]);

        let mut payload = [0u8; MAX_CHUNK_PAYLOAD];
        device.read_fifo(&mut payload[..len])?;

        return Ok(match ChunkType::from_byte(header) {
            Ok(ChunkType::Data) if len > 0 => RxChunk::Data {
                flags: RxFlags::from_bits_retain(payload[0]),
                bytes: heapless::Vec::from_slice(&payload[1..len]).unwrap_or_default(),
            },
            _ => RxChunk::Other(header),
        });
    };

    let mut payload = [0u8; 3];
    device.read_fifo(&mut payload[..len])?;

    Ok(match ChunkType::from_byte(header) {
        Ok(ChunkType::Rssi) => RxChunk::Rssi(payload[0] as i8),
        Ok(ChunkType::FrequencyOffset) => {
            RxChunk::FrequencyOffset(i16::from_be_bytes([payload[0], payload[1]]))
        }
        Ok(ChunkType::AntennaRssi2) => RxChunk::AntennaRssi2 {
            rssi: payload[0],
            background: payload[1],
        },
        Ok(ChunkType::Timer) => RxChunk::Timer(u24(&payload)),
        Ok(ChunkType::RfFrequencyOffset) => {
            RxChunk::RfFrequencyOffset(sign_extend_24(u24(&payload)))
        }
        Ok(ChunkType::DataRate) => RxChunk::DataRate(u24(&payload)),
        Ok(ChunkType::AntennaRssi3) => RxChunk::AntennaRssi3 {
            antenna0: payload[0],
            antenna1: payload[1],
            background: payload[2],
        },
        _ => RxChunk::Other(header),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::SimRadio;

    #[test]
    fn test_header_encodes_payload_size() {
        assert_eq!(payload_len(ChunkType::Nop.to_byte()), Some(0));
        assert_eq!(payload_len(ChunkType::Rssi.to_byte()), Some(1));
        assert_eq!(payload_len(ChunkType::FrequencyOffset.to_byte()), Some(2));
        assert_eq!(payload_len(ChunkType::Timer.to_byte()), Some(3));
        assert_eq!(payload_len(ChunkType::RepeatData.to_byte()), Some(3));
        assert_eq!(payload_len(ChunkType::Data.to_byte()), None);
    }

    #[test]
    fn test_chunk_type_rejects_unknown_headers() {
        assert_eq!(ChunkType::from_byte(0xE1), Ok(ChunkType::Data));
        assert_eq!(ChunkType::from_byte(0x42), Err(InvalidChunkType(0x42)));
    }

    #[test]
    fn test_transmit_chunk_layout() {
        assert_eq!(
            repeat_data(TxFlags::UNENC | TxFlags::RAW | TxFlags::NOCRC, 9, 0x7E),
            [0x62, 0x38, 9, 0x7E]
        );
        assert_eq!(
            data_header(TxFlags::PKTSTART | TxFlags::PKTEND, 10),
            [0xE1, 11, 0x03]
        );
    }

    #[test]
    fn test_sign_extension() {
        assert_eq!(sign_extend_24(0x00_0010), 16);
        assert_eq!(sign_extend_24(0xFF_FFF0), -16);
        assert_eq!(sign_extend_24(0x80_0000), -0x80_0000);
    }

    #[test]
    fn test_read_data_and_metadata_chunks() {
        let mut sim = SimRadio::new();
        sim.push_rx_bytes(&[0xE1, 0x04, 0x03, b'a', b'b', b'c']);
        sim.push_rx_bytes(&[0x31, 0xB0]);
        sim.push_rx_bytes(&[0x73, 0xFF, 0xFF, 0xFE]);
        sim.push_rx_bytes(&[0x3C, 0x00]);
        sim.push_rx_bytes(&[0x74, 0x00, 0x25, 0x80]);
        let mut device = Device::new(sim);

        let RxChunk::Data { flags, bytes } = read_chunk(&mut device).unwrap() else {
            panic!("expected a data chunk");
        };
        assert_eq!(flags, RxFlags::PKTSTART | RxFlags::PKTEND);
        assert_eq!(&bytes[..], b"abc");

        assert_eq!(read_chunk(&mut device).unwrap(), RxChunk::Rssi(-80));
        assert_eq!(read_chunk(&mut device).unwrap(), RxChunk::RfFrequencyOffset(-2));
        // unknown payloads are skipped, keeping the stream aligned
        assert_eq!(read_chunk(&mut device).unwrap(), RxChunk::Other(0x3C));
        assert_eq!(read_chunk(&mut device).unwrap(), RxChunk::DataRate(0x2580));
    }
}
